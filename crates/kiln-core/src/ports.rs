//! Port traits (hexagonal architecture).
//!
//! The orchestrator only ever talks to its collaborators through these
//! traits; adapters live in the `kiln-store`, `kiln-runner` and `kiln-blob`
//! crates and fakes in `kiln-tests`.

use crate::container::{ContainerHandle, ContainerSpec, VolumeBinding};
use crate::Result;
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use std::time::Duration;

/// FIFO queue of encoded job records.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Append to the tail.
    async fn push(&self, payload: Vec<u8>) -> Result<()>;

    /// Take from the head. `None` when empty.
    async fn pop(&self) -> Result<Option<Vec<u8>>>;

    async fn len(&self) -> Result<usize>;
}

/// Key/value, sorted-set and list store shared by every worker.
///
/// Every method is a single-key atomic operation.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Write a value. `ttl` of `None` never expires.
    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<()>;

    /// Write only if the key is absent (or expired). Returns whether it wrote.
    async fn set_if_absent(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<bool>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Add or re-score a member.
    async fn sorted_set_add(&self, set: &str, member: &str, score: f64) -> Result<()>;

    /// Members with `min <= score <= max`, ascending by score.
    async fn sorted_set_range_by_score(
        &self,
        set: &str,
        min: f64,
        max: f64,
        limit: Option<usize>,
    ) -> Result<Vec<String>>;

    /// Returns how many members were removed.
    async fn sorted_set_remove_range_by_score(&self, set: &str, min: f64, max: f64)
    -> Result<u64>;

    async fn sorted_set_count(&self, set: &str, min: f64, max: f64) -> Result<u64>;

    async fn list_push(&self, list: &str, value: &[u8]) -> Result<()>;

    async fn list_pop(&self, list: &str) -> Result<Option<Vec<u8>>>;

    async fn list_length(&self, list: &str) -> Result<usize>;
}

/// Stream of raw container output.
pub type LogStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>>> + Send>>;

/// Container runtime running one isolated build.
#[async_trait]
pub trait BuildEnvironment: Send + Sync {
    async fn create_container(&self, spec: &ContainerSpec) -> Result<ContainerHandle>;

    async fn start(&self, handle: &ContainerHandle, volumes: &[VolumeBinding]) -> Result<()>;

    /// Block until the container stops and return its exit code.
    async fn await_exit(&self, handle: &ContainerHandle) -> Result<i64>;

    /// Combined stdout/stderr of a stopped container.
    async fn stream_logs(&self, handle: &ContainerHandle) -> Result<LogStream>;

    /// Dispose of a stopped container.
    async fn remove(&self, _handle: &ContainerHandle) -> Result<()> {
        Ok(())
    }
}

/// Object visibility on upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Private,
    PublicRead,
}

/// Object store holding published artifacts.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(
        &self,
        path: &str,
        data: Vec<u8>,
        content_type: &str,
        visibility: Visibility,
    ) -> Result<()>;

    async fn get(&self, path: &str) -> Result<Vec<u8>>;

    /// Time-limited download URL.
    async fn signed_url(&self, path: &str, expiry: Duration) -> Result<String>;
}

/// Re-submits builds for dependent repositories.
#[async_trait]
pub trait SubBuildSubmitter: Send + Sync {
    async fn submit(&self, repository: &str) -> Result<()>;
}
