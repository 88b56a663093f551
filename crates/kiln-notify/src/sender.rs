//! Notification sender implementations.

use crate::channels::{MailgunConfig, NotifyConfig, PushoverConfig};
use askama::Template;
use async_trait::async_trait;
use kiln_core::{ChannelType, EventType};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Template error: {0}")]
    Template(#[from] askama::Error),
    #[error("Channel not configured: {0}")]
    NotConfigured(String),
    #[error("Delivery failed: {0}")]
    DeliveryFailed(String),
    #[error("Target decryption failed: {0}")]
    Decryption(String),
}

impl From<NotifyError> for kiln_core::Error {
    fn from(err: NotifyError) -> Self {
        kiln_core::Error::Notification(err.to_string())
    }
}

/// A finished build being announced.
#[derive(Debug, Clone)]
pub struct NotifyEvent {
    pub event: EventType,
    pub repository: String,
    pub commit: String,
}

impl NotifyEvent {
    pub fn new(event: EventType, repository: impl Into<String>) -> Self {
        Self {
            event,
            repository: repository.into(),
            commit: String::new(),
        }
    }

    fn verb(&self) -> &'static str {
        match self.event {
            EventType::Success => "succeeded",
            EventType::Error => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// The channel does not announce this kind of event.
    Skipped,
}

#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(&self, target: &str, event: &NotifyEvent) -> Result<Delivery, NotifyError>;
}

async fn ensure_success(response: reqwest::Response, channel: &str) -> Result<(), NotifyError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(NotifyError::DeliveryFailed(format!(
            "{} returned {}: {}",
            channel, status, body
        )));
    }
    Ok(())
}

/// Fires a Docker Hub build trigger URL after successful builds.
pub struct DockerHubSender {
    client: reqwest::Client,
}

impl DockerHubSender {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl NotificationSender for DockerHubSender {
    async fn send(&self, target: &str, event: &NotifyEvent) -> Result<Delivery, NotifyError> {
        if event.event != EventType::Success {
            return Ok(Delivery::Skipped);
        }

        debug!(repository = %event.repository, "Triggering Docker Hub build");
        let response = self
            .client
            .post(target)
            .form(&[("build", "true")])
            .send()
            .await?;

        // Trigger URLs answer 200 on acceptance, anything else is a failure.
        if response.status() != reqwest::StatusCode::OK {
            return Err(NotifyError::DeliveryFailed(format!(
                "Docker Hub returned {}",
                response.status()
            )));
        }

        info!(repository = %event.repository, "Docker Hub build triggered");
        Ok(Delivery::Sent)
    }
}

/// Pushes a short message through the Pushover API.
pub struct PushoverSender {
    config: PushoverConfig,
    base_url: String,
    client: reqwest::Client,
}

impl PushoverSender {
    pub fn new(config: PushoverConfig, base_url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            config,
            base_url: base_url.into(),
            client,
        }
    }

    fn build_form(&self, token: &str, user: &str, event: &NotifyEvent) -> Vec<(&'static str, String)> {
        vec![
            ("token", token.to_string()),
            ("user", user.to_string()),
            (
                "message",
                format!("The build for repo {} {}.", event.repository, event.verb()),
            ),
            ("title", format!("Kiln build {}", event.verb())),
            (
                "url",
                format!("{}/{}", self.base_url.trim_end_matches('/'), event.repository),
            ),
            ("url_title", "Open build page".to_string()),
        ]
    }
}

#[async_trait]
impl NotificationSender for PushoverSender {
    async fn send(&self, target: &str, event: &NotifyEvent) -> Result<Delivery, NotifyError> {
        let token = self
            .config
            .app_token
            .as_deref()
            .ok_or_else(|| NotifyError::NotConfigured("pushover app token".to_string()))?;

        debug!(repository = %event.repository, "Sending Pushover notification");
        let response = self
            .client
            .post(&self.config.endpoint)
            .form(&self.build_form(token, target, event))
            .send()
            .await?;
        ensure_success(response, "Pushover").await?;

        info!(repository = %event.repository, "Pushover notification sent");
        Ok(Delivery::Sent)
    }
}

#[derive(Template)]
#[template(path = "build_notification.html")]
struct BuildNotificationMail<'a> {
    repository: &'a str,
    commit: &'a str,
    succeeded: bool,
    build_url: &'a str,
}

/// Sends an HTML mail through the Mailgun messages API.
pub struct EmailSender {
    config: MailgunConfig,
    base_url: String,
    client: reqwest::Client,
}

impl EmailSender {
    pub fn new(config: MailgunConfig, base_url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            config,
            base_url: base_url.into(),
            client,
        }
    }

    pub fn render(&self, event: &NotifyEvent) -> Result<String, NotifyError> {
        let build_url = format!("{}/{}", self.base_url.trim_end_matches('/'), event.repository);
        let mail = BuildNotificationMail {
            repository: &event.repository,
            commit: &event.commit,
            succeeded: event.event == EventType::Success,
            build_url: &build_url,
        };
        Ok(mail.render()?)
    }
}

#[async_trait]
impl NotificationSender for EmailSender {
    async fn send(&self, target: &str, event: &NotifyEvent) -> Result<Delivery, NotifyError> {
        let (Some(domain), Some(api_key)) = (&self.config.domain, &self.config.api_key) else {
            return Err(NotifyError::NotConfigured("mailgun domain and api key".to_string()));
        };

        let html = self.render(event)?;
        let subject = format!("[Kiln] Build for {} {}", event.repository, event.verb());
        let url = format!(
            "{}/v3/{}/messages",
            self.config.endpoint.trim_end_matches('/'),
            domain
        );

        debug!(repository = %event.repository, "Sending build mail");
        let response = self
            .client
            .post(&url)
            .basic_auth("api", Some(api_key))
            .form(&[
                ("from", self.config.from.as_str()),
                ("to", target),
                ("subject", subject.as_str()),
                ("html", html.as_str()),
            ])
            .send()
            .await?;
        ensure_success(response, "Mailgun").await?;

        info!(repository = %event.repository, "Build mail sent");
        Ok(Delivery::Sent)
    }
}

/// Create the sender for a channel type.
pub fn create_sender(
    channel: ChannelType,
    config: &NotifyConfig,
    client: reqwest::Client,
) -> Arc<dyn NotificationSender> {
    match channel {
        ChannelType::Dockerhub => Arc::new(DockerHubSender::new(client)),
        ChannelType::Pushover => Arc::new(PushoverSender::new(
            config.pushover.clone(),
            config.base_url.clone(),
            client,
        )),
        ChannelType::Email => Arc::new(EmailSender::new(
            config.mailgun.clone(),
            config.base_url.clone(),
            client,
        )),
    }
}
