//! Build log history reader.

use kiln_core::ports::CoordinationStore;
use kiln_core::{BuildLogRecord, Result, keys};
use tracing::warn;

/// Most recent `limit` log records for a repository, newest first.
///
/// Undecodable members are skipped.
pub async fn recent_build_logs(
    store: &dyn CoordinationStore,
    repository: &str,
    limit: usize,
) -> Result<Vec<BuildLogRecord>> {
    let members = store
        .sorted_set_range_by_score(
            &keys::log_history(repository),
            f64::NEG_INFINITY,
            f64::INFINITY,
            None,
        )
        .await?;

    let mut records: Vec<BuildLogRecord> = members
        .iter()
        .filter_map(|member| match BuildLogRecord::decode(member) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(repository = %repository, error = %e, "Skipping undecodable log record");
                None
            }
        })
        .collect();

    records.sort_by(|a, b| b.time.cmp(&a.time));
    records.truncate(limit);
    Ok(records)
}
