//! Docker-backed build execution environment.
//!
//! The build container signals "superseded, nothing to publish" by exiting
//! with [`kiln_core::REDUNDANT_BUILD_EXIT_CODE`] (130).

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, LogOutput, LogsOptions, RemoveContainerOptions,
    StartContainerOptions, WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use futures::{StreamExt, TryStreamExt};
use kiln_core::ports::{BuildEnvironment, LogStream};
use kiln_core::{ContainerHandle, ContainerSpec, Error, Result, VolumeBinding};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// `KEY=value` pairs in the form the Engine API expects.
pub fn container_env(env: &BTreeMap<String, String>) -> Vec<String> {
    env.iter().map(|(k, v)| format!("{}={}", k, v)).collect()
}

pub struct DockerEnvironment {
    docker: Docker,
    // Docker takes bind mounts at creation time, so containers are only
    // materialised once `start` supplies the volumes.
    pending: Mutex<HashMap<String, ContainerSpec>>,
}

impl DockerEnvironment {
    pub fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| Error::Container(format!("Failed to connect to Docker: {}", e)))?;
        Ok(Self::with_docker(docker))
    }

    pub fn with_docker(docker: Docker) -> Self {
        Self {
            docker,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Pull the build image so the first build does not pay for it.
    pub async fn pull_image(&self, image: &str) -> Result<()> {
        info!(image = %image, "Pulling build image");
        let options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };
        self.docker
            .create_image(Some(options), None, None)
            .try_for_each(|_| async { Ok(()) })
            .await
            .map_err(|e| Error::Container(format!("Failed to pull {}: {}", image, e)))?;
        info!(image = %image, "Build image up to date");
        Ok(())
    }
}

#[async_trait]
impl BuildEnvironment for DockerEnvironment {
    async fn create_container(&self, spec: &ContainerSpec) -> Result<ContainerHandle> {
        let name = format!("kiln-{}", uuid::Uuid::new_v4());
        debug!(container = %name, image = %spec.image, "Registering build container");
        self.pending.lock().await.insert(name.clone(), spec.clone());
        Ok(ContainerHandle::new(name))
    }

    async fn start(&self, handle: &ContainerHandle, volumes: &[VolumeBinding]) -> Result<()> {
        let spec = self
            .pending
            .lock()
            .await
            .remove(&handle.id)
            .ok_or_else(|| Error::Container(format!("Unknown container: {}", handle.id)))?;

        let config = Config {
            image: Some(spec.image.clone()),
            env: Some(container_env(&spec.env)),
            host_config: Some(bollard::models::HostConfig {
                binds: Some(volumes.iter().map(VolumeBinding::to_bind_string).collect()),
                auto_remove: Some(false),
                ..Default::default()
            }),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: handle.id.as_str(),
            platform: None,
        };
        self.docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| Error::Container(format!("Failed to create container: {}", e)))?;

        self.docker
            .start_container(&handle.id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| Error::Container(format!("Failed to start container: {}", e)))?;

        info!(container = %handle.id, image = %spec.image, "Build container started");
        Ok(())
    }

    async fn await_exit(&self, handle: &ContainerHandle) -> Result<i64> {
        let options = WaitContainerOptions {
            condition: "not-running",
        };
        let result = self
            .docker
            .wait_container(&handle.id, Some(options))
            .next()
            .await
            .ok_or_else(|| Error::Container("Container wait returned no result".to_string()))?;

        match result {
            Ok(response) => Ok(response.status_code),
            // Non-zero exits surface as an error carrying the code.
            Err(bollard::errors::Error::DockerContainerWaitError { code, .. }) => Ok(code),
            Err(e) => Err(Error::Container(format!("Container wait failed: {}", e))),
        }
    }

    async fn stream_logs(&self, handle: &ContainerHandle) -> Result<LogStream> {
        let options = LogsOptions::<String> {
            follow: false,
            stdout: true,
            stderr: true,
            ..Default::default()
        };

        let stream = self
            .docker
            .logs(&handle.id, Some(options))
            .map(|chunk| match chunk {
                Ok(LogOutput::StdOut { message })
                | Ok(LogOutput::StdErr { message })
                | Ok(LogOutput::Console { message })
                | Ok(LogOutput::StdIn { message }) => Ok(message.to_vec()),
                Err(e) => Err(Error::Container(format!("Failed to read logs: {}", e))),
            });
        Ok(Box::pin(stream))
    }

    async fn remove(&self, handle: &ContainerHandle) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        if let Err(e) = self.docker.remove_container(&handle.id, Some(options)).await {
            warn!(container = %handle.id, error = %e, "Failed to remove container");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_env_is_sorted_key_value() {
        let mut env = BTreeMap::new();
        env.insert("REPO".to_string(), "example.org/a/b".to_string());
        env.insert("COMMIT".to_string(), String::new());
        assert_eq!(
            container_env(&env),
            vec!["COMMIT=".to_string(), "REPO=example.org/a/b".to_string()]
        );
    }

    #[tokio::test]
    async fn test_start_unknown_container_is_rejected() {
        let Ok(env) = DockerEnvironment::connect() else {
            return;
        };
        let err = env
            .start(&ContainerHandle::new("kiln-missing"), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Container(_)));
    }

    #[tokio::test]
    async fn test_create_registers_pending_spec() {
        let Ok(env) = DockerEnvironment::connect() else {
            return;
        };
        let handle = env
            .create_container(&ContainerSpec::new("kiln/builder:latest").env("REPO", "r"))
            .await
            .unwrap();
        assert!(handle.id.starts_with("kiln-"));
        assert!(env.pending.lock().await.contains_key(&handle.id));
    }
}
