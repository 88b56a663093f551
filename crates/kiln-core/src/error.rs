//! Error types for Kiln.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Orchestration errors
    #[error("Build lock for {repository} is held by another builder")]
    LockContention { repository: String },

    #[error("Transient infrastructure failure: {0}")]
    TransientInfra(String),

    #[error("Build failed: {0}")]
    BuildFailed(String),

    #[error("Build aborted: {reason}")]
    BuildAborted { reason: String },

    #[error("Malformed job payload: {0}")]
    MalformedJob(String),

    #[error("Invalid build configuration: {0}")]
    InvalidBuildConfig(String),

    #[error("Notification failed: {0}")]
    Notification(String),

    // Infrastructure errors
    #[error("Coordination store error: {0}")]
    Store(String),

    #[error("Container runtime error: {0}")]
    Container(String),

    #[error("Blob store error: {0}")]
    Blob(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // Generic
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// How a failure is treated by the retry bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Lock held elsewhere.
    Contention,
    /// Log fetch, storage or runtime hiccups.
    TransientInfra,
    /// Non-zero exit, missing configuration, a poison log, or output the
    /// publisher cannot make sense of.
    PermanentBuildFailure,
    /// Undecodable queue payload.
    MalformedJob,
    /// Isolated to one channel, never touches build status.
    NotificationFailure,
}

impl ErrorClass {
    /// Whether a requeue for this class charges the job's retry budget.
    pub fn counts_against_retries(self) -> bool {
        matches!(self, ErrorClass::PermanentBuildFailure)
    }

    /// Whether a job failing with this class may be put back on the queue.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorClass::Contention | ErrorClass::TransientInfra | ErrorClass::PermanentBuildFailure
        )
    }
}

impl Error {
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::LockContention { .. } => ErrorClass::Contention,
            // Repeating the attempt reproduces these.
            Error::BuildFailed(_)
            | Error::BuildAborted { .. }
            | Error::InvalidBuildConfig(_)
            | Error::Serialization(_)
            | Error::Internal(_) => ErrorClass::PermanentBuildFailure,
            Error::MalformedJob(_) => ErrorClass::MalformedJob,
            Error::Notification(_) => ErrorClass::NotificationFailure,
            Error::TransientInfra(_)
            | Error::Store(_)
            | Error::Container(_)
            | Error::Blob(_)
            | Error::Network(_)
            | Error::Io(_) => ErrorClass::TransientInfra,
        }
    }

    /// Permanent failures that must never be retried.
    pub fn is_abort(&self) -> bool {
        matches!(self, Error::BuildAborted { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contention_is_free_retry() {
        let err = Error::LockContention {
            repository: "example.org/a/b".into(),
        };
        assert_eq!(err.class(), ErrorClass::Contention);
        assert!(!err.class().counts_against_retries());
        assert!(err.class().is_retryable());
    }

    #[test]
    fn test_build_failures_are_counted() {
        assert!(Error::BuildFailed("exit 2".into()).class().counts_against_retries());
        assert!(
            Error::InvalidBuildConfig("missing".into())
                .class()
                .counts_against_retries()
        );
    }

    #[test]
    fn test_deterministic_errors_are_counted() {
        for err in [
            Error::Serialization("key must be a string".into()),
            Error::Internal("Illegal build transition".into()),
        ] {
            assert_eq!(err.class(), ErrorClass::PermanentBuildFailure);
            assert!(err.class().counts_against_retries());
        }
    }

    #[test]
    fn test_infrastructure_errors_are_transient() {
        for err in [
            Error::Store("down".into()),
            Error::Blob("timeout".into()),
            Error::Container("gone".into()),
            Error::Io(std::io::Error::other("disk")),
        ] {
            assert_eq!(err.class(), ErrorClass::TransientInfra);
            assert!(!err.class().counts_against_retries());
        }
    }

    #[test]
    fn test_malformed_jobs_are_not_retryable() {
        assert!(!Error::MalformedJob("garbage".into()).class().is_retryable());
        assert!(!Error::Notification("smtp".into()).class().is_retryable());
    }
}
