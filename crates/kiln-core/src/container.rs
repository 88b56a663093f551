//! Build execution environment vocabulary.

use std::collections::BTreeMap;
use std::path::PathBuf;

/// Exit status a build container uses to say "superseded, nothing to
/// publish". The build script and every environment implementation agree on
/// this value.
pub const REDUNDANT_BUILD_EXIT_CODE: i64 = 130;

/// What to run. Volume bindings are applied when the container starts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSpec {
    pub image: String,
    pub env: BTreeMap<String, String>,
}

impl ContainerSpec {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            env: BTreeMap::new(),
        }
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeBinding {
    pub host_path: PathBuf,
    pub container_path: String,
    pub read_only: bool,
}

impl VolumeBinding {
    pub fn new(host_path: impl Into<PathBuf>, container_path: impl Into<String>) -> Self {
        Self {
            host_path: host_path.into(),
            container_path: container_path.into(),
            read_only: false,
        }
    }

    /// `host:container[:ro]` form understood by container runtimes.
    pub fn to_bind_string(&self) -> String {
        let mut bind = format!("{}:{}", self.host_path.display(), self.container_path);
        if self.read_only {
            bind.push_str(":ro");
        }
        bind
    }
}

/// Opaque reference to a created container.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerHandle {
    pub id: String,
}

impl ContainerHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// Classified container exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildExit {
    /// Exit 0: artifacts produced, upload required.
    Success,
    /// [`REDUNDANT_BUILD_EXIT_CODE`]: success without upload.
    Redundant,
    Failed(i64),
}

impl BuildExit {
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => BuildExit::Success,
            REDUNDANT_BUILD_EXIT_CODE => BuildExit::Redundant,
            other => BuildExit::Failed(other),
        }
    }

    pub fn is_success(&self) -> bool {
        !matches!(self, BuildExit::Failed(_))
    }

    pub fn requires_upload(&self) -> bool {
        matches!(self, BuildExit::Success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_classification() {
        assert_eq!(BuildExit::from_code(0), BuildExit::Success);
        assert_eq!(BuildExit::from_code(130), BuildExit::Redundant);
        assert_eq!(BuildExit::from_code(1), BuildExit::Failed(1));
        assert!(BuildExit::Redundant.is_success());
        assert!(!BuildExit::Redundant.requires_upload());
        assert!(!BuildExit::Failed(2).is_success());
    }

    #[test]
    fn test_bind_string() {
        let mut bind = VolumeBinding::new("/tmp/kiln-1", "/artifacts");
        assert_eq!(bind.to_bind_string(), "/tmp/kiln-1:/artifacts");
        bind.read_only = true;
        assert_eq!(bind.to_bind_string(), "/tmp/kiln-1:/artifacts:ro");
    }
}
