//! Fan-out of one build outcome to a repository's notify entries.

use crate::channels::NotifyConfig;
use crate::crypto::TargetCipher;
use crate::sender::{Delivery, NotificationSender, NotifyError, NotifyEvent, create_sender};
use kiln_core::{ChannelType, NotifyEntry};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    /// Filtered out, or declined by the channel.
    pub skipped: usize,
}

/// Delivers events entry by entry in declaration order.
///
/// Fail-fast: the first entry whose decryption or delivery fails stops the
/// call and its error is returned; later entries are not attempted.
pub struct NotificationDispatcher {
    senders: HashMap<ChannelType, Arc<dyn NotificationSender>>,
}

impl NotificationDispatcher {
    /// Dispatcher with the HTTP sender for every channel type.
    pub fn new(config: &NotifyConfig) -> Self {
        let client = reqwest::Client::new();
        let senders = [ChannelType::Dockerhub, ChannelType::Pushover, ChannelType::Email]
            .into_iter()
            .map(|channel| (channel, create_sender(channel, config, client.clone())))
            .collect();
        Self { senders }
    }

    /// Dispatcher with no channels registered.
    pub fn empty() -> Self {
        Self {
            senders: HashMap::new(),
        }
    }

    pub fn with_sender(mut self, channel: ChannelType, sender: Arc<dyn NotificationSender>) -> Self {
        self.senders.insert(channel, sender);
        self
    }

    pub async fn dispatch(
        &self,
        entries: &[NotifyEntry],
        event: &NotifyEvent,
        encryption_key: Option<&str>,
    ) -> Result<DispatchReport, NotifyError> {
        let mut report = DispatchReport::default();
        let cipher = encryption_key.map(TargetCipher::from_key).transpose()?;

        for entry in entries {
            if !entry.filter.matches(event.event) {
                debug!(channel = %entry.channel, event = %event.event, "Entry filtered out");
                report.skipped += 1;
                continue;
            }

            let target = resolve_target(entry, cipher.as_ref())?;
            let sender = self
                .senders
                .get(&entry.channel)
                .ok_or_else(|| NotifyError::NotConfigured(entry.channel.to_string()))?;

            match sender.send(&target, event).await {
                Ok(Delivery::Sent) => report.delivered += 1,
                Ok(Delivery::Skipped) => report.skipped += 1,
                Err(e) => {
                    warn!(
                        repository = %event.repository,
                        channel = %entry.channel,
                        error = %e,
                        "Notification failed, remaining entries not attempted"
                    );
                    return Err(e);
                }
            }
        }

        Ok(report)
    }
}

fn resolve_target(entry: &NotifyEntry, cipher: Option<&TargetCipher>) -> Result<String, NotifyError> {
    if !TargetCipher::is_encrypted(&entry.target) {
        return Ok(entry.target.clone());
    }
    let cipher = cipher.ok_or_else(|| {
        NotifyError::Decryption(format!(
            "{} target is encrypted but the repository has no key",
            entry.channel
        ))
    })?;
    cipher.decrypt(&entry.target)
}
