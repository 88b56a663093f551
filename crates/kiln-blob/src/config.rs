//! Blob store configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlobBackend {
    #[default]
    S3,
    Filesystem,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobConfig {
    #[serde(default)]
    pub backend: BlobBackend,
    #[serde(default)]
    pub s3: S3Config,
    /// Root directory for the filesystem backend.
    #[serde(default = "default_root")]
    pub root: PathBuf,
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            backend: BlobBackend::default(),
            s3: S3Config::default(),
            root: default_root(),
        }
    }
}

fn default_root() -> PathBuf {
    PathBuf::from("/var/lib/kiln/artifacts")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    #[serde(default = "default_bucket")]
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint for S3-compatible services.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub access_key: Option<String>,
    #[serde(default)]
    pub secret_key: Option<String>,
    #[serde(default)]
    pub force_path_style: bool,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: default_bucket(),
            region: default_region(),
            endpoint: None,
            access_key: None,
            secret_key: None,
            force_path_style: false,
        }
    }
}

fn default_bucket() -> String {
    "kiln-artifacts".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}
