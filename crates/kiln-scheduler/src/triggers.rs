//! Cascading sub-builds.

use async_trait::async_trait;
use kiln_core::ports::{CoordinationStore, JobQueue, SubBuildSubmitter};
use kiln_core::{Error, JobRecord, Result};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::submit::submit_build;

/// Posts `repository=<repo>` to a build submission endpoint.
pub struct HttpSubBuildSubmitter {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpSubBuildSubmitter {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl SubBuildSubmitter for HttpSubBuildSubmitter {
    async fn submit(&self, repository: &str) -> Result<()> {
        let response = self
            .client
            .post(&self.endpoint)
            .form(&[("repository", repository)])
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to submit {}: {}", repository, e)))?;

        if !response.status().is_success() {
            return Err(Error::Network(format!(
                "Build submission for {} returned {}",
                repository,
                response.status()
            )));
        }
        Ok(())
    }
}

/// Enqueues sub-builds directly on the local queue.
pub struct QueueSubBuildSubmitter {
    queue: Arc<dyn JobQueue>,
    store: Arc<dyn CoordinationStore>,
}

impl QueueSubBuildSubmitter {
    pub fn new(queue: Arc<dyn JobQueue>, store: Arc<dyn CoordinationStore>) -> Self {
        Self { queue, store }
    }
}

#[async_trait]
impl SubBuildSubmitter for QueueSubBuildSubmitter {
    async fn submit(&self, repository: &str) -> Result<()> {
        submit_build(
            self.queue.as_ref(),
            self.store.as_ref(),
            &JobRecord::new(repository),
        )
        .await
    }
}

/// Fire one detached submission per trigger.
///
/// More than `ceiling` triggers submits nothing. The handles are returned
/// for observation only; failures are logged by the tasks themselves.
pub fn spawn_sub_builds(
    submitter: Arc<dyn SubBuildSubmitter>,
    parent: &str,
    triggers: &[String],
    ceiling: usize,
) -> Vec<JoinHandle<()>> {
    if triggers.len() > ceiling {
        error!(
            repository = %parent,
            triggers = triggers.len(),
            ceiling,
            "Refusing to trigger sub-builds: too many triggers configured"
        );
        return Vec::new();
    }

    triggers
        .iter()
        .map(|repository| {
            let submitter = submitter.clone();
            let repository = repository.clone();
            let parent = parent.to_string();
            tokio::spawn(async move {
                match submitter.submit(&repository).await {
                    Ok(()) => info!(parent = %parent, repository = %repository, "Sub-build submitted"),
                    Err(e) => warn!(
                        parent = %parent,
                        repository = %repository,
                        error = %e,
                        "Sub-build submission failed"
                    ),
                }
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_http_submitter_posts_form() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/build"))
            .and(body_string("repository=example.org%2Fc%2Fd"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let submitter = HttpSubBuildSubmitter::new(format!("{}/api/v1/build", server.uri()));
        submitter.submit("example.org/c/d").await.unwrap();
    }

    #[tokio::test]
    async fn test_http_submitter_surfaces_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let submitter = HttpSubBuildSubmitter::new(server.uri());
        assert!(matches!(submitter.submit("r").await, Err(Error::Network(_))));
    }
}
