//! Per-build configuration written by the build container.

use crate::notify::NotifyEntry;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// File the container leaves in the working directory.
pub const BUILD_CONFIG_FILE: &str = ".kiln.yml";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildConfig {
    #[serde(default)]
    pub readme_file: Option<String>,
    /// Source path inside the build -> published artifact name.
    #[serde(default)]
    pub artifacts: BTreeMap<String, String>,
    /// Repositories to rebuild after this one succeeds.
    #[serde(default)]
    pub triggers: Vec<String>,
    #[serde(default)]
    pub version_file: Option<String>,
    #[serde(default)]
    pub notify: Vec<NotifyEntry>,
    #[serde(default)]
    pub build_matrix: BTreeMap<String, MatrixEntry>,
}

/// Per-target overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixEntry {
    #[serde(default)]
    pub build_tags: Vec<String>,
    #[serde(default)]
    pub ldflags: Option<String>,
}

impl BuildConfig {
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| Error::InvalidBuildConfig(format!("Failed to parse build config: {}", e)))
    }

    /// Load [`BUILD_CONFIG_FILE`] from a finished build's working directory.
    /// Absence counts as a build failure.
    pub async fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(BUILD_CONFIG_FILE);
        let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
            Error::InvalidBuildConfig(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&content)
    }
}
