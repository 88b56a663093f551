//! Builder harness over in-process collaborators.

use crate::fakes::{FakeEnvironment, RecordingBlobStore, RecordingSender, RecordingSubBuilds};
use kiln_agent::BuildAgent;
use kiln_core::ports::{CoordinationStore, JobQueue};
use kiln_core::{ChannelType, JobRecord, keys};
use kiln_notify::NotificationDispatcher;
use kiln_scheduler::{BuildContext, BuildReport, Builder, BuilderConfig, submit_build};
use kiln_store::{MemoryStore, StoreQueue};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// A build context whose every collaborator can be inspected.
///
/// Drop this to remove the work root.
pub struct TestHarness {
    pub store: Arc<MemoryStore>,
    pub queue: Arc<StoreQueue>,
    pub environment: Arc<FakeEnvironment>,
    pub blobs: Arc<RecordingBlobStore>,
    pub sub_builds: Arc<RecordingSubBuilds>,
    /// Receives every channel type.
    pub notifications: Arc<RecordingSender>,
    pub ctx: Arc<BuildContext>,
    work_root: TempDir,
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    /// Harness with adjusted builder settings. The work root is always a
    /// fresh temporary directory.
    pub fn with_config(adjust: impl FnOnce(&mut BuilderConfig)) -> Self {
        crate::init_test_logging();

        let work_root = tempfile::tempdir().expect("Failed to create work root");
        let mut config = BuilderConfig::default();
        adjust(&mut config);
        config.work_root = work_root.path().to_path_buf();

        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(StoreQueue::new(store.clone()));
        let environment = Arc::new(FakeEnvironment::new());
        let blobs = Arc::new(RecordingBlobStore::new());
        let sub_builds = Arc::new(RecordingSubBuilds::new());
        let notifications = Arc::new(RecordingSender::new());

        let notifier = [ChannelType::Dockerhub, ChannelType::Pushover, ChannelType::Email]
            .into_iter()
            .fold(NotificationDispatcher::empty(), |dispatcher, channel| {
                dispatcher.with_sender(channel, notifications.clone())
            });

        let ctx = Arc::new(BuildContext {
            store: store.clone(),
            queue: queue.clone(),
            environment: environment.clone(),
            blobs: blobs.clone(),
            notifier: Arc::new(notifier),
            sub_builds: sub_builds.clone(),
            config,
        });

        Self {
            store,
            queue,
            environment,
            blobs,
            sub_builds,
            notifications,
            ctx,
            work_root,
        }
    }

    pub fn work_root(&self) -> &Path {
        self.work_root.path()
    }

    /// Entries left in the work root.
    pub fn work_dirs(&self) -> usize {
        std::fs::read_dir(self.work_root.path())
            .map(|entries| entries.count())
            .unwrap_or(0)
    }

    pub async fn run_job(&self, job: JobRecord) -> BuildReport {
        Builder::new(self.ctx.clone(), job).run().await
    }

    pub async fn submit(&self, job: &JobRecord) {
        submit_build(&*self.queue, &*self.store, job)
            .await
            .expect("Failed to submit job");
    }

    pub fn agent(&self, max_concurrent_builds: usize) -> BuildAgent {
        BuildAgent::new(self.ctx.clone(), max_concurrent_builds, Duration::from_millis(10))
    }

    pub async fn get_string(&self, key: &str) -> Option<String> {
        self.store
            .get(key)
            .await
            .expect("store read failed")
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
    }

    pub async fn status(&self, repository: &str) -> Option<String> {
        self.get_string(&keys::build_status(repository)).await
    }

    /// Pop every queued job, oldest first.
    pub async fn drain_queue(&self) -> Vec<JobRecord> {
        let mut jobs = Vec::new();
        while let Some(payload) = self.queue.pop().await.expect("queue read failed") {
            jobs.push(JobRecord::from_bytes(&payload).expect("queued job decodes"));
        }
        jobs
    }
}
