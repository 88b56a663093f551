//! Worker configuration.

use kiln_blob::BlobConfig;
use kiln_notify::NotifyConfig;
use kiln_scheduler::BuilderConfig;
use kiln_store::StoreConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Worker configuration.
///
/// Read from an optional YAML file, then overridden by `KILN_*`
/// environment variables (`__` separates nested keys, e.g.
/// `KILN_BLOB__BACKEND=filesystem`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Name announced in the active-workers set. Defaults to the hostname.
    #[serde(default)]
    pub worker_name: Option<String>,
    #[serde(default = "default_build_image")]
    pub build_image: String,
    #[serde(default = "default_pull_image")]
    pub pull_image_on_start: bool,
    #[serde(default)]
    pub decrypt_key: Option<String>,
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_builds: usize,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_liveness_interval")]
    pub liveness_interval_secs: u64,
    #[serde(default = "default_liveness_retention")]
    pub liveness_retention_secs: u64,
    #[serde(default = "default_ttl")]
    pub lock_ttl_secs: u64,
    #[serde(default = "default_ttl")]
    pub status_ttl_secs: u64,
    #[serde(default = "default_max_job_retries")]
    pub max_job_retries: u32,
    #[serde(default = "default_max_sub_builds")]
    pub max_sub_builds: usize,
    /// Endpoint accepting `repository=<repo>` posts. Sub-builds go straight
    /// to the local queue when unset.
    #[serde(default)]
    pub sub_build_url: Option<String>,
    /// Queue, locks, status, logs and manifests.
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub blob: BlobConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
}

fn default_build_image() -> String {
    "kiln/builder:latest".to_string()
}

fn default_pull_image() -> bool {
    true
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("/var/lib/kiln/work")
}

fn default_max_concurrent() -> usize {
    2
}

fn default_poll_interval() -> u64 {
    10
}

fn default_liveness_interval() -> u64 {
    300
}

fn default_liveness_retention() -> u64 {
    3600
}

fn default_ttl() -> u64 {
    1800
}

fn default_max_job_retries() -> u32 {
    5
}

fn default_max_sub_builds() -> usize {
    20
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            worker_name: None,
            build_image: default_build_image(),
            pull_image_on_start: default_pull_image(),
            decrypt_key: None,
            work_dir: default_work_dir(),
            max_concurrent_builds: default_max_concurrent(),
            poll_interval_secs: default_poll_interval(),
            liveness_interval_secs: default_liveness_interval(),
            liveness_retention_secs: default_liveness_retention(),
            lock_ttl_secs: default_ttl(),
            status_ttl_secs: default_ttl(),
            max_job_retries: default_max_job_retries(),
            max_sub_builds: default_max_sub_builds(),
            sub_build_url: None,
            store: StoreConfig::default(),
            blob: BlobConfig::default(),
            notify: NotifyConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Load from an optional YAML file plus `KILN_*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Yaml)
                    .required(true),
            );
        }
        builder
            .add_source(
                config::Environment::with_prefix("KILN")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn liveness_interval(&self) -> Duration {
        Duration::from_secs(self.liveness_interval_secs)
    }

    pub fn liveness_retention(&self) -> Duration {
        Duration::from_secs(self.liveness_retention_secs)
    }

    pub fn builder_config(&self) -> BuilderConfig {
        BuilderConfig {
            image: self.build_image.clone(),
            decrypt_key: self.decrypt_key.clone(),
            work_root: self.work_dir.clone(),
            lock_ttl: Duration::from_secs(self.lock_ttl_secs),
            status_ttl: Duration::from_secs(self.status_ttl_secs),
            max_job_retries: self.max_job_retries,
            max_sub_builds: self.max_sub_builds,
            ..BuilderConfig::default()
        }
    }
}
