//! In-process doubles for the collaborator ports.

use crate::fixtures::BuildScript;
use async_trait::async_trait;
use kiln_core::ports::{
    BlobStore, BuildEnvironment, LogStream, SubBuildSubmitter, Visibility,
};
use kiln_core::{ContainerHandle, ContainerSpec, Error, EventType, Result, VolumeBinding};
use kiln_notify::{Delivery, NotificationSender, NotifyError, NotifyEvent};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::watch;

#[derive(Default)]
struct EnvironmentState {
    scripts: VecDeque<BuildScript>,
    /// Replayed once `scripts` runs dry.
    last: Option<BuildScript>,
    running: HashMap<String, BuildScript>,
    next_id: u64,
    created: Vec<ContainerSpec>,
    bindings: Vec<VolumeBinding>,
    removed: Vec<String>,
}

/// Build environment that plays back [`BuildScript`]s.
pub struct FakeEnvironment {
    state: Mutex<EnvironmentState>,
    gate: watch::Sender<bool>,
}

impl Default for FakeEnvironment {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeEnvironment {
    pub fn new() -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            state: Mutex::new(EnvironmentState::default()),
            gate,
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, EnvironmentState> {
        self.state.lock().expect("environment state poisoned")
    }

    /// Queue the behaviour of the next container. Scripts are used in order
    /// and the last one repeats.
    pub fn script(&self, script: BuildScript) {
        self.state().scripts.push_back(script);
    }

    /// Containers block in `await_exit` until [`FakeEnvironment::release`].
    pub fn hold(&self) {
        self.gate.send_replace(false);
    }

    pub fn release(&self) {
        self.gate.send_replace(true);
    }

    pub fn created(&self) -> Vec<ContainerSpec> {
        self.state().created.clone()
    }

    pub fn bindings(&self) -> Vec<VolumeBinding> {
        self.state().bindings.clone()
    }

    pub fn removed(&self) -> Vec<String> {
        self.state().removed.clone()
    }

    fn running(&self, handle: &ContainerHandle) -> Result<BuildScript> {
        self.state()
            .running
            .get(&handle.id)
            .cloned()
            .ok_or_else(|| Error::Container(format!("No such container: {}", handle.id)))
    }
}

#[async_trait]
impl BuildEnvironment for FakeEnvironment {
    async fn create_container(&self, spec: &ContainerSpec) -> Result<ContainerHandle> {
        let mut state = self.state();
        let script = match state.scripts.pop_front() {
            Some(script) => {
                state.last = Some(script.clone());
                script
            }
            None => state.last.clone().unwrap_or_else(|| BuildScript::new(0)),
        };

        state.next_id += 1;
        let id = format!("fake-{}", state.next_id);
        state.running.insert(id.clone(), script);
        state.created.push(spec.clone());
        Ok(ContainerHandle::new(id))
    }

    async fn start(&self, handle: &ContainerHandle, volumes: &[VolumeBinding]) -> Result<()> {
        let script = self.running(handle)?;
        if script.panic_on_start {
            panic!("scripted container crash");
        }

        self.state().bindings.extend(volumes.iter().cloned());
        for volume in volumes {
            for (name, content) in &script.files {
                tokio::fs::write(volume.host_path.join(name), content).await?;
            }
        }
        Ok(())
    }

    async fn await_exit(&self, handle: &ContainerHandle) -> Result<i64> {
        let script = self.running(handle)?;
        let mut gate = self.gate.subscribe();
        gate.wait_for(|open| *open)
            .await
            .map(|_| ())
            .map_err(|e| Error::Container(e.to_string()))?;
        Ok(script.exit_code)
    }

    async fn stream_logs(&self, handle: &ContainerHandle) -> Result<LogStream> {
        let script = self.running(handle)?;
        let mut chunks: Vec<Result<Vec<u8>>> = script
            .log
            .split_inclusive('\n')
            .map(|line| Ok(line.as_bytes().to_vec()))
            .collect();
        if script.fail_log_fetch {
            chunks.truncate(1);
            chunks.push(Err(Error::Container("log stream interrupted".into())));
        }
        Ok(Box::pin(futures::stream::iter(chunks)))
    }

    async fn remove(&self, handle: &ContainerHandle) -> Result<()> {
        let mut state = self.state();
        state.running.remove(&handle.id);
        state.removed.push(handle.id.clone());
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub data: Vec<u8>,
    pub content_type: String,
    pub visibility: Visibility,
}

/// Blob store keeping uploads in memory, or rejecting them on demand.
#[derive(Default)]
pub struct RecordingBlobStore {
    blobs: Mutex<BTreeMap<String, StoredBlob>>,
    failing: AtomicBool,
}

impl RecordingBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_uploads(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    pub fn accept_uploads(&self) {
        self.failing.store(false, Ordering::SeqCst);
    }

    pub fn paths(&self) -> Vec<String> {
        self.blobs
            .lock()
            .expect("blob store poisoned")
            .keys()
            .cloned()
            .collect()
    }

    pub fn blob(&self, path: &str) -> Option<StoredBlob> {
        self.blobs.lock().expect("blob store poisoned").get(path).cloned()
    }
}

#[async_trait]
impl BlobStore for RecordingBlobStore {
    async fn put(
        &self,
        path: &str,
        data: Vec<u8>,
        content_type: &str,
        visibility: Visibility,
    ) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Blob(format!("Upload of {} timed out", path)));
        }
        self.blobs.lock().expect("blob store poisoned").insert(
            path.to_string(),
            StoredBlob {
                data,
                content_type: content_type.to_string(),
                visibility,
            },
        );
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>> {
        self.blob(path)
            .map(|blob| blob.data)
            .ok_or_else(|| Error::Blob(format!("Object not found: {}", path)))
    }

    async fn signed_url(&self, path: &str, expiry: Duration) -> Result<String> {
        Ok(format!("memory://{}?expires={}", path, expiry.as_secs()))
    }
}

/// Records sub-build submissions instead of sending them.
#[derive(Default)]
pub struct RecordingSubBuilds {
    submitted: Mutex<Vec<String>>,
}

impl RecordingSubBuilds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submitted(&self) -> Vec<String> {
        let mut submitted = self.submitted.lock().expect("submissions poisoned").clone();
        submitted.sort();
        submitted
    }
}

#[async_trait]
impl SubBuildSubmitter for RecordingSubBuilds {
    async fn submit(&self, repository: &str) -> Result<()> {
        self.submitted
            .lock()
            .expect("submissions poisoned")
            .push(repository.to_string());
        Ok(())
    }
}

/// Notification sender that records deliveries, or fails them on demand.
#[derive(Default)]
pub struct RecordingSender {
    sent: Mutex<Vec<(String, EventType)>>,
    failing: AtomicBool,
}

impl RecordingSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_deliveries(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<(String, EventType)> {
        self.sent.lock().expect("deliveries poisoned").clone()
    }
}

#[async_trait]
impl NotificationSender for RecordingSender {
    async fn send(&self, target: &str, event: &NotifyEvent) -> std::result::Result<Delivery, NotifyError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotifyError::DeliveryFailed(format!("{} unreachable", target)));
        }
        self.sent
            .lock()
            .expect("deliveries poisoned")
            .push((target.to_string(), event.event));
        Ok(Delivery::Sent)
    }
}
