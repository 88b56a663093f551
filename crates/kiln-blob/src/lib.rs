//! Kiln Blob
//!
//! Stores published build artifacts and hands out time-limited download
//! URLs for them.

pub mod config;
pub mod filesystem;
pub mod s3;

pub use config::{BlobBackend, BlobConfig, S3Config};
pub use filesystem::FilesystemBlobStore;
pub use s3::S3BlobStore;

use kiln_core::Result;
use kiln_core::ports::BlobStore;
use std::sync::Arc;

/// Build the blob store selected by configuration.
pub fn create_blob_store(config: &BlobConfig) -> Result<Arc<dyn BlobStore>> {
    match config.backend {
        BlobBackend::S3 => Ok(Arc::new(S3BlobStore::new(&config.s3)?)),
        BlobBackend::Filesystem => Ok(Arc::new(FilesystemBlobStore::new(config.root.clone()))),
    }
}
