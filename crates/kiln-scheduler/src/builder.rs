//! The builder: one job from lock to cleanup.

use crate::artifacts::{update_metadata, upload_assets};
use crate::config::BuilderConfig;
use crate::lock::BuildLock;
use crate::poison::find_poison;
use crate::retry::{RetryDecision, RetryPolicy};
use crate::state::{BuildState, Outcome, StateMachine};
use crate::triggers::spawn_sub_builds;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use kiln_core::ports::{BlobStore, BuildEnvironment, CoordinationStore, JobQueue, SubBuildSubmitter};
use kiln_core::{
    BuildConfig, BuildExit, BuildLogRecord, BuildStatus, ContainerHandle, ContainerSpec, Error,
    ErrorClass, EventType, JobRecord, Result, VolumeBinding, keys,
};
use kiln_notify::{NotificationDispatcher, NotifyEvent};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span, warn};

/// Collaborators shared by every builder of a worker.
pub struct BuildContext {
    pub store: Arc<dyn CoordinationStore>,
    pub queue: Arc<dyn JobQueue>,
    pub environment: Arc<dyn BuildEnvironment>,
    pub blobs: Arc<dyn BlobStore>,
    pub notifier: Arc<NotificationDispatcher>,
    pub sub_builds: Arc<dyn SubBuildSubmitter>,
    pub config: BuilderConfig,
}

/// How a run left the job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Finished,
    /// Back on the queue; `counted` says whether the retry budget was charged.
    Requeued { counted: bool },
    FinallyFailed,
    /// Could not even be put back on the queue.
    Lost,
}

#[derive(Debug)]
pub struct BuildReport {
    /// The job as it was last written (incremented counter on counted retries).
    pub job: JobRecord,
    pub resolution: Resolution,
    pub states: Vec<BuildState>,
    pub error: Option<String>,
    /// Detached sub-build submissions.
    pub sub_builds: Vec<JoinHandle<()>>,
}

pub struct Builder {
    ctx: Arc<BuildContext>,
    job: JobRecord,
    machine: StateMachine,
    lock: Option<BuildLock>,
    work_dir: Option<PathBuf>,
    started_at: Option<DateTime<Utc>>,
    container: Option<ContainerHandle>,
    exit: Option<BuildExit>,
    build_config: Option<BuildConfig>,
    log: String,
    resolution: Option<Resolution>,
    sub_builds: Vec<JoinHandle<()>>,
}

impl Builder {
    pub fn new(ctx: Arc<BuildContext>, job: JobRecord) -> Self {
        Self {
            ctx,
            job,
            machine: StateMachine::new(),
            lock: None,
            work_dir: None,
            started_at: None,
            container: None,
            exit: None,
            build_config: None,
            log: String::new(),
            resolution: None,
            sub_builds: Vec::new(),
        }
    }

    fn repository(&self) -> &str {
        &self.job.repository
    }

    fn store(&self) -> &dyn CoordinationStore {
        self.ctx.store.as_ref()
    }

    fn advance(&mut self, next: BuildState) -> Result<()> {
        debug!(repository = %self.job.repository, state = %next, "Build state");
        self.machine.advance(next)
    }

    /// Run the job to completion. Cleanup always runs.
    pub async fn run(mut self) -> BuildReport {
        let span = info_span!(
            "build",
            repository = %self.job.repository,
            execution_count = self.job.execution_count
        );

        async move {
            let error = match self.drive().await {
                Ok(()) => None,
                Err(e) => {
                    let message = e.to_string();
                    self.handle_failure(e).await;
                    Some(message)
                }
            };
            self.cleanup().await;

            BuildReport {
                resolution: self.resolution.clone().unwrap_or(Resolution::Lost),
                states: self.machine.history().to_vec(),
                job: self.job,
                error,
                sub_builds: self.sub_builds,
            }
        }
        .instrument(span)
        .await
    }

    async fn drive(&mut self) -> Result<()> {
        self.acquire_lock().await?;
        self.prepare_build().await?;
        self.build().await?;
        self.fetch_build_log().await?;
        self.write_build_log().await?;

        let outcome = self.evaluate();
        self.advance(BuildState::Evaluated(outcome.clone()))?;

        match outcome {
            Outcome::Success { upload } => {
                if upload {
                    self.advance(BuildState::Uploading)?;
                    self.upload_assets().await?;
                    self.update_metadata().await?;
                    self.advance(BuildState::MetadataUpdated)?;
                }
                // `finished` only once the manifest describes this build.
                self.update_build_status(BuildStatus::Finished).await?;
                self.send_notifications(EventType::Success).await;
                self.advance(BuildState::Notified)?;
                self.resolution = Some(Resolution::Finished);
                self.trigger_sub_builds();
                info!(repository = %self.job.repository, "Build finished");
                Ok(())
            }
            Outcome::Failed => Err(Error::BuildFailed(match self.exit {
                Some(BuildExit::Failed(code)) => format!("container exited with {}", code),
                _ => "build configuration missing or invalid".to_string(),
            })),
            Outcome::Aborted { reason } => Err(Error::BuildAborted { reason }),
        }
    }

    async fn acquire_lock(&mut self) -> Result<()> {
        let lock = BuildLock::acquire(self.store(), self.repository(), self.ctx.config.lock_ttl).await?;
        self.lock = Some(lock);
        self.advance(BuildState::LockAcquired)
    }

    async fn prepare_build(&mut self) -> Result<()> {
        let dir = self
            .ctx
            .config
            .work_root
            .join(format!("kiln-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            Error::TransientInfra(format!("Failed to create {}: {}", dir.display(), e))
        })?;
        debug!(dir = %dir.display(), "Working directory created");

        self.work_dir = Some(dir);
        self.started_at = Some(Utc::now());
        self.update_build_status(BuildStatus::Building).await?;
        self.advance(BuildState::Prepared)
    }

    async fn build(&mut self) -> Result<()> {
        let work_dir = self
            .work_dir
            .clone()
            .ok_or_else(|| Error::Internal("build started without working directory".into()))?;
        self.advance(BuildState::Executing)?;

        let mut spec = ContainerSpec::new(&self.ctx.config.image)
            .env("REPO", &self.job.repository)
            .env("COMMIT", &self.job.commit);
        if let Some(key) = &self.ctx.config.decrypt_key {
            spec = spec.env("DECRYPT_KEY", key);
        }

        let environment = self.ctx.environment.clone();
        let handle = environment.create_container(&spec).await?;
        self.container = Some(handle.clone());

        let volumes = [VolumeBinding::new(&work_dir, &self.ctx.config.artifact_mount)];
        environment.start(&handle, &volumes).await?;
        let code = environment.await_exit(&handle).await?;
        let exit = BuildExit::from_code(code);
        info!(repository = %self.job.repository, exit_code = code, "Build container exited");
        self.exit = Some(exit);

        match BuildConfig::load(&work_dir).await {
            Ok(config) => self.build_config = Some(config),
            Err(e) => warn!(repository = %self.job.repository, error = %e, "No usable build configuration"),
        }
        Ok(())
    }

    fn build_ok(&self) -> bool {
        self.exit.is_some_and(|exit| exit.is_success()) && self.build_config.is_some()
    }

    async fn fetch_build_log(&mut self) -> Result<()> {
        let handle = self
            .container
            .clone()
            .ok_or_else(|| Error::Internal("no container to read logs from".into()))?;

        let chunks: Vec<Vec<u8>> = self
            .ctx
            .environment
            .stream_logs(&handle)
            .await
            .map_err(|e| Error::TransientInfra(format!("Failed to fetch build log: {}", e)))?
            .try_collect()
            .await
            .map_err(|e| Error::TransientInfra(format!("Failed to fetch build log: {}", e)))?;

        self.log = String::from_utf8_lossy(&chunks.concat()).into_owned();
        self.advance(BuildState::LogsCollected)
    }

    async fn write_build_log(&mut self) -> Result<()> {
        let record = BuildLogRecord::new(self.build_ok(), Utc::now());
        let repository = self.repository().to_string();

        self.store()
            .set(&keys::build_log(&repository, &record.id), self.log.as_bytes(), None)
            .await?;
        self.store()
            .sorted_set_add(&keys::log_history(&repository), &record.encode()?, record.score())
            .await?;

        info!(repository = %repository, build_id = %record.id, success = record.success, "Build log written");
        Ok(())
    }

    fn evaluate(&self) -> Outcome {
        if self.build_ok() {
            let upload = self.exit.is_some_and(|exit| exit.requires_upload());
            return Outcome::Success { upload };
        }
        match find_poison(&self.log, &self.ctx.config.poison_rules) {
            Some(rule) => Outcome::Aborted {
                reason: rule.reason.clone(),
            },
            None => Outcome::Failed,
        }
    }

    async fn upload_assets(&mut self) -> Result<()> {
        let dir = self
            .work_dir
            .clone()
            .ok_or_else(|| Error::Internal("upload without working directory".into()))?;
        upload_assets(self.ctx.blobs.as_ref(), self.repository(), &dir).await?;
        Ok(())
    }

    async fn update_metadata(&mut self) -> Result<()> {
        let dir = self
            .work_dir
            .clone()
            .ok_or_else(|| Error::Internal("metadata without working directory".into()))?;
        let started_at = self.started_at.unwrap_or_else(Utc::now);
        update_metadata(self.store(), self.repository(), &dir, started_at).await?;
        Ok(())
    }

    async fn update_build_status(&self, status: BuildStatus) -> Result<()> {
        let ttl = (status == BuildStatus::Building).then_some(self.ctx.config.status_ttl);
        self.store()
            .set(&keys::build_status(self.repository()), status.as_str().as_bytes(), ttl)
            .await
    }

    /// Failures here are logged and never change the build's status.
    async fn send_notifications(&self, event: EventType) {
        let Some(config) = &self.build_config else {
            debug!(repository = %self.job.repository, "No build configuration, skipping notifications");
            return;
        };
        if config.notify.is_empty() {
            return;
        }

        let key = match self.store().get(&keys::encryption_key(self.repository())).await {
            Ok(key) => key.map(|bytes| String::from_utf8_lossy(&bytes).into_owned()),
            Err(e) => {
                warn!(repository = %self.job.repository, error = %e, "Could not load encryption key");
                None
            }
        };

        let mut notify_event = NotifyEvent::new(event, self.repository());
        notify_event.commit = self.job.commit.clone();

        match self
            .ctx
            .notifier
            .dispatch(&config.notify, &notify_event, key.as_deref())
            .await
        {
            Ok(report) => info!(
                repository = %self.job.repository,
                event = %event,
                delivered = report.delivered,
                skipped = report.skipped,
                "Notifications dispatched"
            ),
            Err(e) => {
                let err: Error = e.into();
                warn!(repository = %self.job.repository, error = %err, "Notification dispatch failed");
            }
        }
    }

    fn trigger_sub_builds(&mut self) {
        let triggers = self
            .build_config
            .as_ref()
            .map(|config| config.triggers.clone())
            .unwrap_or_default();
        if triggers.is_empty() {
            return;
        }
        self.sub_builds = spawn_sub_builds(
            self.ctx.sub_builds.clone(),
            &self.job.repository,
            &triggers,
            self.ctx.config.max_sub_builds,
        );
    }

    async fn handle_failure(&mut self, err: Error) {
        let class = err.class();
        match class {
            ErrorClass::Contention => {
                info!(repository = %self.job.repository, "Build lock held elsewhere, requeueing");
            }
            _ => warn!(
                repository = %self.job.repository,
                error = %err,
                class = ?class,
                "Build attempt failed"
            ),
        }

        if let Error::BuildAborted { reason } = &err {
            self.abort(reason.clone()).await;
            return;
        }

        if class.is_retryable() {
            self.put_back_job(class.counts_against_retries()).await;
        } else {
            error!(repository = %self.job.repository, error = %err, "Dropping job");
            self.resolution = Some(Resolution::Lost);
        }
    }

    async fn abort(&mut self, reason: String) {
        warn!(repository = %self.job.repository, reason = %reason, "Build aborted, not retrying");
        if let Err(e) = self
            .store()
            .set(&keys::abort_reason(self.repository()), reason.as_bytes(), None)
            .await
        {
            error!(repository = %self.job.repository, error = %e, "Failed to record abort reason");
        }
        self.finally_fail().await;
    }

    async fn finally_fail(&mut self) {
        if let Err(e) = self.update_build_status(BuildStatus::Failed).await {
            error!(repository = %self.job.repository, error = %e, "Failed to record failed status");
        }
        self.send_notifications(EventType::Error).await;
        if let Err(e) = self.advance(BuildState::FinallyFailed) {
            error!(error = %e, "Unexpected state while failing build");
        }
        self.resolution = Some(Resolution::FinallyFailed);
    }

    /// Requeue the job, charging the retry budget when `counted`.
    pub async fn put_back_job(&mut self, counted: bool) {
        let policy = RetryPolicy::new(self.ctx.config.max_job_retries);
        match policy.decide(&self.job, counted) {
            RetryDecision::GiveUp => {
                warn!(
                    repository = %self.job.repository,
                    execution_count = self.job.execution_count,
                    "Retry budget exhausted"
                );
                self.finally_fail().await;
            }
            RetryDecision::Requeue(next) => {
                self.job = next;
                match self.requeue().await {
                    Ok(()) => {
                        if let Err(e) = self.advance(BuildState::Requeued) {
                            error!(error = %e, "Unexpected state while requeueing");
                        }
                        self.resolution = Some(Resolution::Requeued { counted });
                    }
                    Err(e) => {
                        error!(repository = %self.job.repository, error = %e, "Failed to requeue job");
                        self.resolution = Some(Resolution::Lost);
                    }
                }
            }
        }
    }

    async fn requeue(&self) -> Result<()> {
        self.ctx.queue.push(self.job.to_bytes()?).await?;
        self.update_build_status(BuildStatus::Queued).await?;
        info!(
            repository = %self.job.repository,
            execution_count = self.job.execution_count,
            "Job requeued"
        );
        Ok(())
    }

    async fn cleanup(&mut self) {
        if let Some(handle) = self.container.take() {
            if let Err(e) = self.ctx.environment.remove(&handle).await {
                warn!(container = %handle.id, error = %e, "Failed to remove build container");
            }
        }

        if let Some(lock) = self.lock.take() {
            if let Err(e) = lock.release(self.store()).await {
                warn!(repository = %self.job.repository, error = %e, "Failed to release build lock");
            }
        }

        if let Some(dir) = self.work_dir.take() {
            if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
                warn!(dir = %dir.display(), error = %e, "Failed to remove working directory");
            }
        }

        if let Err(e) = self.advance(BuildState::Cleaned) {
            error!(error = %e, "Unexpected state during cleanup");
        }
    }
}
