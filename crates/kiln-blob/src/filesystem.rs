//! Filesystem blob store for single-host deployments.

use async_trait::async_trait;
use chrono::Utc;
use kiln_core::ports::{BlobStore, Visibility};
use kiln_core::{Error, Result};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub struct FilesystemBlobStore {
    root_dir: PathBuf,
}

impl FilesystemBlobStore {
    pub fn new(root_dir: PathBuf) -> Self {
        Self { root_dir }
    }

    fn object_path(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);
        if !relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
        {
            return Err(Error::Blob(format!("Invalid object path: {}", path)));
        }
        Ok(self.root_dir.join(relative))
    }
}

#[async_trait]
impl BlobStore for FilesystemBlobStore {
    async fn put(
        &self,
        path: &str,
        data: Vec<u8>,
        _content_type: &str,
        _visibility: Visibility,
    ) -> Result<()> {
        let target = self.object_path(path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::Blob(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }
        tokio::fs::write(&target, data)
            .await
            .map_err(|e| Error::Blob(format!("Failed to write {}: {}", target.display(), e)))?;
        debug!(path = %target.display(), "Stored artifact");
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>> {
        let target = self.object_path(path)?;
        tokio::fs::read(&target)
            .await
            .map_err(|e| Error::Blob(format!("Failed to read {}: {}", target.display(), e)))
    }

    async fn signed_url(&self, path: &str, expiry: Duration) -> Result<String> {
        let target = self.object_path(path)?;
        let expires = Utc::now().timestamp() + expiry.as_secs() as i64;
        Ok(format!("file://{}?expires={}", target.display(), expires))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_then_get() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemBlobStore::new(dir.path().to_path_buf());

        store
            .put("example.org/a/b/app.zip", b"zip".to_vec(), "application/zip", Visibility::PublicRead)
            .await
            .unwrap();

        assert_eq!(store.get("example.org/a/b/app.zip").await.unwrap(), b"zip");
        assert!(dir.path().join("example.org/a/b/app.zip").exists());
    }

    #[tokio::test]
    async fn test_rejects_escaping_paths() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemBlobStore::new(dir.path().to_path_buf());
        let err = store
            .put("../outside", vec![], "text/plain", Visibility::Private)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Blob(_)));
    }

    #[tokio::test]
    async fn test_signed_url_carries_expiry() {
        let store = FilesystemBlobStore::new(PathBuf::from("/srv/kiln"));
        let url = store
            .signed_url("r/app.zip", Duration::from_secs(3600))
            .await
            .unwrap();
        assert!(url.starts_with("file:///srv/kiln/r/app.zip?expires="));
    }
}
