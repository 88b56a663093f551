//! S3-compatible blob store.

use crate::config::S3Config;
use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::ObjectCannedAcl;
use kiln_core::ports::{BlobStore, Visibility};
use kiln_core::{Error, Result};
use std::time::Duration;
use tracing::{debug, info};

pub struct S3BlobStore {
    client: Client,
    bucket: String,
}

impl S3BlobStore {
    pub fn new(config: &S3Config) -> Result<Self> {
        let mut builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .force_path_style(config.force_path_style);

        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        match (&config.access_key, &config.secret_key) {
            (Some(access), Some(secret)) => {
                builder = builder.credentials_provider(Credentials::new(
                    access.clone(),
                    secret.clone(),
                    None,
                    None,
                    "kiln",
                ));
            }
            (None, None) => {}
            _ => {
                return Err(Error::Blob(
                    "S3 access_key and secret_key must be set together".to_string(),
                ));
            }
        }

        Ok(Self::with_client(Client::from_conf(builder.build()), &config.bucket))
    }

    pub fn with_client(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }
}

fn canned_acl(visibility: Visibility) -> ObjectCannedAcl {
    match visibility {
        Visibility::Private => ObjectCannedAcl::Private,
        Visibility::PublicRead => ObjectCannedAcl::PublicRead,
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn put(
        &self,
        path: &str,
        data: Vec<u8>,
        content_type: &str,
        visibility: Visibility,
    ) -> Result<()> {
        let size = data.len();
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(path)
            .body(ByteStream::from(data))
            .content_type(content_type)
            .acl(canned_acl(visibility))
            .send()
            .await
            .map_err(|e| Error::Blob(format!("Failed to upload {}: {}", path, e)))?;

        info!(bucket = %self.bucket, path = %path, size, "Uploaded artifact");
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(path)
            .send()
            .await
            .map_err(|e| Error::Blob(format!("Failed to fetch {}: {}", path, e)))?;

        let data = output
            .body
            .collect()
            .await
            .map_err(|e| Error::Blob(format!("Failed to read {}: {}", path, e)))?
            .into_bytes();
        Ok(data.to_vec())
    }

    async fn signed_url(&self, path: &str, expiry: Duration) -> Result<String> {
        let presigning = PresigningConfig::expires_in(expiry)
            .map_err(|e| Error::Blob(format!("Invalid URL expiry: {}", e)))?;

        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(path)
            .presigned(presigning)
            .await
            .map_err(|e| Error::Blob(format!("Failed to sign {}: {}", path, e)))?;

        debug!(path = %path, expiry_secs = expiry.as_secs(), "Signed download URL");
        Ok(request.uri().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_half_configured_credentials_are_rejected() {
        let config = S3Config {
            access_key: Some("AKIA".into()),
            ..Default::default()
        };
        assert!(matches!(S3BlobStore::new(&config), Err(Error::Blob(_))));
    }

    #[tokio::test]
    async fn test_signed_url_is_local_and_scoped_to_key() {
        let config = S3Config {
            endpoint: Some("http://127.0.0.1:9000".into()),
            access_key: Some("minio".into()),
            secret_key: Some("minio-secret".into()),
            force_path_style: true,
            ..Default::default()
        };
        let store = S3BlobStore::new(&config).unwrap();

        let url = store
            .signed_url("example.org/a/b/app_master_linux-amd64.zip", Duration::from_secs(3600))
            .await
            .unwrap();

        assert!(url.starts_with("http://127.0.0.1:9000/kiln-artifacts/"));
        assert!(url.contains("app_master_linux-amd64.zip"));
        assert!(url.contains("X-Amz-Expires=3600"));
    }
}
