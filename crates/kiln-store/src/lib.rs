//! Kiln Store
//!
//! Coordination store adapters (Redis for shared workers, in-process for a
//! single worker and tests), the job queue built on top of them, and the
//! read helpers used for observability.

pub mod config;
pub mod history;
pub mod memory;
pub mod metrics;
pub mod queue;
pub mod redis_store;

pub use config::{StoreBackend, StoreConfig, create_store};
pub use history::recent_build_logs;
pub use memory::MemoryStore;
pub use metrics::{ACTIVE_WORKER_WINDOW, active_worker_count, queue_length};
pub use queue::StoreQueue;
pub use redis_store::RedisStore;
