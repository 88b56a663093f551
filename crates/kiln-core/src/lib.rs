//! Kiln Core
//!
//! Domain types, collaborator ports and error handling for the Kiln build
//! orchestrator. Every other crate in the workspace speaks this vocabulary.

pub mod buildconfig;
pub mod buildlog;
pub mod container;
pub mod error;
pub mod job;
pub mod keys;
pub mod manifest;
pub mod notify;
pub mod ports;
pub mod status;

pub use buildconfig::BuildConfig;
pub use buildlog::BuildLogRecord;
pub use container::{BuildExit, ContainerHandle, ContainerSpec, REDUNDANT_BUILD_EXIT_CODE, VolumeBinding};
pub use error::{Error, ErrorClass, Result};
pub use job::JobRecord;
pub use manifest::{Asset, Branch, BuildDb, HashDb, Hashes};
pub use notify::{ChannelType, EventType, NotifyEntry, NotifyFilter};
pub use status::BuildStatus;
