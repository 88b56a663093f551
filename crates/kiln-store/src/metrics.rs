//! Observability readers over the coordination store.

use chrono::Utc;
use kiln_core::ports::{CoordinationStore, JobQueue};
use kiln_core::{Result, keys};
use std::time::Duration;

/// Window within which an announcement counts as alive.
pub const ACTIVE_WORKER_WINDOW: Duration = Duration::from_secs(300);

/// Workers that announced themselves within `window`.
pub async fn active_worker_count(store: &dyn CoordinationStore, window: Duration) -> Result<u64> {
    let since = Utc::now().timestamp() as f64 - window.as_secs_f64();
    store
        .sorted_set_count(keys::ACTIVE_WORKERS, since, f64::INFINITY)
        .await
}

pub async fn queue_length(queue: &dyn JobQueue) -> Result<usize> {
    queue.len().await
}
