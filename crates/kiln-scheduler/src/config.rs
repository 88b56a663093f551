//! Builder tuning.

use crate::poison::{PoisonRule, default_poison_rules};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct BuilderConfig {
    /// Container image that runs the build script.
    pub image: String,
    /// Handed to the container for decrypting repository secrets.
    pub decrypt_key: Option<String>,
    /// Parent of the per-build working directories.
    pub work_root: PathBuf,
    /// Where the working directory appears inside the container.
    pub artifact_mount: String,
    pub lock_ttl: Duration,
    pub status_ttl: Duration,
    pub max_job_retries: u32,
    /// Flood protection ceiling for cascading builds.
    pub max_sub_builds: usize,
    pub poison_rules: Vec<PoisonRule>,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            image: "kiln/builder:latest".to_string(),
            decrypt_key: None,
            work_root: std::env::temp_dir(),
            artifact_mount: "/artifacts".to_string(),
            lock_ttl: Duration::from_secs(1800),
            status_ttl: Duration::from_secs(1800),
            max_job_retries: 5,
            max_sub_builds: 20,
            poison_rules: default_poison_rules(),
        }
    }
}
