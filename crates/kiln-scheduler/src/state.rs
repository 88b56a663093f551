//! Builder lifecycle states and their legal transitions.

use kiln_core::{Error, Result};
use std::fmt;

/// What the evaluation step concluded about a finished container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Exit 0 uploads, the redundant-build exit does not.
    Success { upload: bool },
    /// Counted failure.
    Failed,
    /// Poison log match, never retried.
    Aborted { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildState {
    Idle,
    LockAcquired,
    Prepared,
    Executing,
    LogsCollected,
    Evaluated(Outcome),
    Uploading,
    MetadataUpdated,
    Notified,
    Requeued,
    FinallyFailed,
    Cleaned,
}

impl BuildState {
    pub fn name(&self) -> &'static str {
        match self {
            BuildState::Idle => "idle",
            BuildState::LockAcquired => "lock_acquired",
            BuildState::Prepared => "prepared",
            BuildState::Executing => "executing",
            BuildState::LogsCollected => "logs_collected",
            BuildState::Evaluated(_) => "evaluated",
            BuildState::Uploading => "uploading",
            BuildState::MetadataUpdated => "metadata_updated",
            BuildState::Notified => "notified",
            BuildState::Requeued => "requeued",
            BuildState::FinallyFailed => "finally_failed",
            BuildState::Cleaned => "cleaned",
        }
    }

    /// States after which the job is settled and only cleanup remains.
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            BuildState::Notified | BuildState::Requeued | BuildState::FinallyFailed
        )
    }

    pub fn can_transition_to(&self, next: &BuildState) -> bool {
        use BuildState::*;

        match (self, next) {
            (Cleaned, _) => false,
            (_, Cleaned) => true,
            // Failure exits are open to every state that has not settled.
            (from, Requeued | FinallyFailed) => !from.is_settled(),
            (Idle, LockAcquired) => true,
            (LockAcquired, Prepared) => true,
            (Prepared, Executing) => true,
            (Executing, LogsCollected) => true,
            (LogsCollected, Evaluated(_)) => true,
            (Evaluated(Outcome::Success { upload: true }), Uploading) => true,
            (Evaluated(Outcome::Success { upload: false }), Notified) => true,
            (Uploading, MetadataUpdated) => true,
            (MetadataUpdated, Notified) => true,
            _ => false,
        }
    }
}

impl fmt::Display for BuildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Current state plus the path taken to reach it.
#[derive(Debug, Clone)]
pub struct StateMachine {
    history: Vec<BuildState>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self {
            history: vec![BuildState::Idle],
        }
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> &BuildState {
        // history always starts with Idle
        &self.history[self.history.len() - 1]
    }

    pub fn advance(&mut self, next: BuildState) -> Result<()> {
        if !self.current().can_transition_to(&next) {
            return Err(Error::Internal(format!(
                "Illegal build transition {} -> {}",
                self.current(),
                next
            )));
        }
        self.history.push(next);
        Ok(())
    }

    pub fn history(&self) -> &[BuildState] {
        &self.history
    }

    /// Whether the machine has passed through `state`.
    pub fn visited(&self, state: &BuildState) -> bool {
        self.history.contains(state)
    }
}
