//! Dispatcher loop.

use kiln_core::{JobRecord, Result};
use kiln_scheduler::{BuildContext, BuildReport, Builder};
use std::sync::Arc;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinHandle;
use tokio::time::{Duration, interval};
use tracing::{debug, error, info, warn};

/// What one tick of the dispatcher did.
#[derive(Debug)]
pub enum TickOutcome {
    /// Every build slot is busy.
    AtCapacity,
    QueueEmpty,
    /// Undecodable payload discarded.
    Dropped,
    Launched(JoinHandle<BuildReport>),
}

/// Feeds queued jobs to at most `max_concurrent_builds` builders.
pub struct BuildAgent {
    ctx: Arc<BuildContext>,
    slots: Arc<Semaphore>,
    max_concurrent_builds: usize,
    poll_interval: Duration,
}

impl BuildAgent {
    pub fn new(ctx: Arc<BuildContext>, max_concurrent_builds: usize, poll_interval: Duration) -> Self {
        Self {
            ctx,
            slots: Arc::new(Semaphore::new(max_concurrent_builds)),
            max_concurrent_builds,
            poll_interval,
        }
    }

    pub fn active_builds(&self) -> usize {
        self.max_concurrent_builds - self.slots.available_permits()
    }

    /// Take one job off the queue if a slot is free.
    ///
    /// The slot travels with the builder task and is released when the task
    /// ends, whether it returns or panics.
    pub async fn tick(&self) -> Result<TickOutcome> {
        let Ok(permit) = self.slots.clone().try_acquire_owned() else {
            debug!("All build slots busy, skipping tick");
            return Ok(TickOutcome::AtCapacity);
        };

        if self.ctx.queue.len().await? == 0 {
            return Ok(TickOutcome::QueueEmpty);
        }
        let Some(payload) = self.ctx.queue.pop().await? else {
            return Ok(TickOutcome::QueueEmpty);
        };

        let job = match JobRecord::from_bytes(&payload) {
            Ok(job) => job,
            Err(e) => {
                warn!(error = %e, size = payload.len(), "Dropping malformed job");
                return Ok(TickOutcome::Dropped);
            }
        };

        info!(
            repository = %job.repository,
            execution_count = job.execution_count,
            "Starting build"
        );
        let builder = Builder::new(self.ctx.clone(), job);
        let handle = tokio::spawn(async move {
            let _slot = permit;
            builder.run().await
        });
        Ok(TickOutcome::Launched(handle))
    }

    /// Poll on a fixed cadence until shutdown, then wait for running builds.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.poll_interval);

        info!(
            max_concurrent_builds = self.max_concurrent_builds,
            poll_interval_secs = self.poll_interval.as_secs(),
            "Dispatcher started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        error!(error = %e, "Dispatcher tick failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(active = self.active_builds(), "Waiting for running builds to finish");
        self.wait_idle().await;
        info!("Dispatcher stopped");
    }

    /// Resolves once no builder holds a slot.
    pub async fn wait_idle(&self) {
        if let Ok(all) = self.slots.acquire_many(self.max_concurrent_builds as u32).await {
            drop(all);
        }
    }

    /// Process the queue until it is empty and every builder has finished,
    /// including jobs requeued along the way.
    pub async fn run_until_drained(&self) -> Result<Vec<BuildReport>> {
        let mut running: Vec<JoinHandle<BuildReport>> = Vec::new();
        let mut reports = Vec::new();

        loop {
            match self.tick().await? {
                TickOutcome::Launched(handle) => {
                    running.push(handle);
                    continue;
                }
                TickOutcome::Dropped => continue,
                TickOutcome::AtCapacity | TickOutcome::QueueEmpty => {}
            }

            if running.is_empty() {
                break;
            }
            match running.remove(0).await {
                Ok(report) => reports.push(report),
                Err(e) => error!(error = %e, "Builder task panicked"),
            }
        }

        Ok(reports)
    }
}
