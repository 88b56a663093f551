//! Build orchestration for Kiln.
//!
//! Drives a single job through lock, container build, log capture,
//! publication and notification, and decides what happens to it on failure.

pub mod artifacts;
pub mod builder;
pub mod config;
pub mod lock;
pub mod poison;
pub mod retry;
pub mod state;
pub mod submit;
pub mod triggers;

pub use builder::{BuildContext, BuildReport, Builder, Resolution};
pub use config::BuilderConfig;
pub use lock::BuildLock;
pub use poison::{PoisonRule, default_poison_rules};
pub use retry::{RetryDecision, RetryPolicy};
pub use state::{BuildState, Outcome, StateMachine};
pub use submit::submit_build;
pub use triggers::{HttpSubBuildSubmitter, QueueSubBuildSubmitter, spawn_sub_builds};
