//! Kiln build worker.
//!
//! Polls the build queue, runs a bounded number of builders in parallel and
//! announces the worker's liveness.

pub mod agent;
pub mod config;
pub mod heartbeat;

pub use agent::{BuildAgent, TickOutcome};
pub use config::AgentConfig;
pub use heartbeat::{LivenessAnnouncer, worker_name};
