//! Coordination store key scheme.
//!
//! Per-repository keys live under `project::<repo>::`.

pub const BUILD_QUEUE: &str = "build-queue";
pub const LAST_BUILDS: &str = "last-builds";
pub const ACTIVE_WORKERS: &str = "active-workers";

fn project(repository: &str, suffix: &str) -> String {
    format!("project::{}::{}", repository, suffix)
}

pub fn build_lock(repository: &str) -> String {
    project(repository, "build-lock")
}

pub fn build_status(repository: &str) -> String {
    project(repository, "build-status")
}

pub fn abort_reason(repository: &str) -> String {
    project(repository, "abort")
}

/// Sorted set of encoded build log records.
pub fn log_history(repository: &str) -> String {
    project(repository, "logs")
}

pub fn build_log(repository: &str, id: &str) -> String {
    project(repository, &format!("logs::{}", id))
}

pub fn build_duration(repository: &str) -> String {
    project(repository, "build-duration")
}

pub fn signature(repository: &str, label: &str) -> String {
    project(repository, &format!("signatures::{}", label))
}

pub fn hashes(repository: &str, label: &str) -> String {
    project(repository, &format!("hashes::{}", label))
}

pub fn hash_db(repository: &str, label: &str) -> String {
    project(repository, &format!("hashdb::{}", label))
}

pub fn last_build(repository: &str) -> String {
    project(repository, "last-build")
}

pub fn built_commits(repository: &str) -> String {
    project(repository, "built-commits")
}

pub fn build_db(repository: &str) -> String {
    project(repository, "builddb")
}

pub fn encryption_key(repository: &str) -> String {
    project(repository, "encryption-key")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        assert_eq!(build_lock("example.org/a/b"), "project::example.org/a/b::build-lock");
        assert_eq!(build_log("r", "abc"), "project::r::logs::abc");
        assert_eq!(signature("r", "v1.0"), "project::r::signatures::v1.0");
        assert_eq!(hashes("r", "master"), "project::r::hashes::master");
    }
}
