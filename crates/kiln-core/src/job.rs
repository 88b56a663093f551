//! Queue payloads.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// A request to build one repository, carried through the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub repository: String,
    /// Empty means "whatever the default branch points at".
    #[serde(default)]
    pub commit: String,
    /// Number of counted (build failure) retries already spent.
    #[serde(default)]
    pub execution_count: u32,
}

impl JobRecord {
    pub fn new(repository: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            commit: String::new(),
            execution_count: 0,
        }
    }

    pub fn with_commit(mut self, commit: impl Into<String>) -> Self {
        self.commit = commit.into();
        self
    }

    /// Encode for queue transport.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode a queue payload. Failures map to [`Error::MalformedJob`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let job: JobRecord =
            serde_json::from_slice(bytes).map_err(|e| Error::MalformedJob(e.to_string()))?;
        if job.repository.trim().is_empty() {
            return Err(Error::MalformedJob("empty repository".into()));
        }
        Ok(job)
    }

    /// Parse `repo` or `repo@commit` as typed on the command line.
    pub fn parse_reference(reference: &str) -> Self {
        match reference.split_once('@') {
            Some((repository, commit)) => Self::new(repository).with_commit(commit),
            None => Self::new(reference),
        }
    }
}
