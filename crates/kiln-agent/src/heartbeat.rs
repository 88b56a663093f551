//! Worker liveness announcements.

use chrono::Utc;
use kiln_core::ports::CoordinationStore;
use kiln_core::{Result, keys};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{Duration, interval};
use tracing::{debug, info, warn};

/// This machine's hostname, or `kiln-worker` when it cannot be read.
pub fn worker_name() -> String {
    hostname::get()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "kiln-worker".to_string())
}

/// Periodically records this worker in the `active-workers` sorted set and
/// prunes entries older than the retention window.
pub struct LivenessAnnouncer {
    store: Arc<dyn CoordinationStore>,
    worker: String,
    interval: Duration,
    retention: Duration,
}

impl LivenessAnnouncer {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        worker: impl Into<String>,
        interval: Duration,
        retention: Duration,
    ) -> Self {
        Self {
            store,
            worker: worker.into(),
            interval,
            retention,
        }
    }

    pub async fn announce(&self) -> Result<()> {
        let now = Utc::now().timestamp() as f64;
        self.store
            .sorted_set_add(keys::ACTIVE_WORKERS, &self.worker, now)
            .await?;
        let pruned = self
            .store
            .sorted_set_remove_range_by_score(
                keys::ACTIVE_WORKERS,
                f64::NEG_INFINITY,
                now - self.retention.as_secs_f64(),
            )
            .await?;
        debug!(worker = %self.worker, pruned, "Liveness announced");
        Ok(())
    }

    /// Announce on every tick until shutdown. Failures are logged only.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.interval);

        info!(
            worker = %self.worker,
            interval_secs = self.interval.as_secs(),
            "Starting liveness announcer"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.announce().await {
                        warn!(worker = %self.worker, error = %e, "Liveness announcement failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Liveness announcer shutting down");
                        break;
                    }
                }
            }
        }
    }
}
