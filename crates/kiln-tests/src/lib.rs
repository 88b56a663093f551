//! Test infrastructure for Kiln.
//!
//! In-process doubles for every collaborator port plus a harness that wires
//! them into a [`kiln_scheduler::BuildContext`] over a real
//! [`kiln_store::MemoryStore`] and a temporary work root.
//!
//! # Usage
//!
//! ```ignore
//! use kiln_tests::{BuildScript, TestHarness};
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let harness = TestHarness::new();
//!     harness.environment.script(BuildScript::success("master"));
//!     let report = harness.run_job(JobRecord::new("example.org/a/b")).await;
//! }
//! ```

pub mod context;
pub mod fakes;
pub mod fixtures;

pub use context::TestHarness;
pub use fakes::*;
pub use fixtures::*;

/// Initialize test logging (call once per test binary).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,kiln_scheduler=debug")),
        )
        .with_test_writer()
        .try_init();
}
