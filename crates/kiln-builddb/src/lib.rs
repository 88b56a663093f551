//! Kiln BuildDB
//!
//! Turns the archives a build left in its working directory into the
//! per-label build manifest and the flattened hash manifests.

pub mod builder;
pub mod digest;

pub use builder::{ARCHIVE_SUFFIXES, BUILD_DB_FILE, BuildDbBuilder, Generated, TOOL_VERSION_FILE, label_for};
pub use digest::FileDigests;
