//! Enqueueing new builds.

use kiln_core::ports::{CoordinationStore, JobQueue};
use kiln_core::{BuildStatus, JobRecord, Result, keys};
use tracing::info;

/// Push a job to the tail of the queue and mark the repository `queued`.
pub async fn submit_build(
    queue: &dyn JobQueue,
    store: &dyn CoordinationStore,
    job: &JobRecord,
) -> Result<()> {
    queue.push(job.to_bytes()?).await?;
    store
        .set(
            &keys::build_status(&job.repository),
            BuildStatus::Queued.as_str().as_bytes(),
            None,
        )
        .await?;
    info!(
        repository = %job.repository,
        execution_count = job.execution_count,
        "Build queued"
    );
    Ok(())
}
