//! Channel credentials and endpoints.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Public base URL linked from messages, e.g. `https://kiln.example.org`.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub pushover: PushoverConfig,
    #[serde(default)]
    pub mailgun: MailgunConfig,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            pushover: PushoverConfig::default(),
            mailgun: MailgunConfig::default(),
        }
    }
}

impl NotifyConfig {
    /// Link to a repository's build page.
    pub fn repository_url(&self, repository: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), repository)
    }
}

fn default_base_url() -> String {
    "http://localhost:3000".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushoverConfig {
    #[serde(default)]
    pub app_token: Option<String>,
    #[serde(default = "default_pushover_endpoint")]
    pub endpoint: String,
}

impl Default for PushoverConfig {
    fn default() -> Self {
        Self {
            app_token: None,
            endpoint: default_pushover_endpoint(),
        }
    }
}

fn default_pushover_endpoint() -> String {
    "https://api.pushover.net/1/messages.json".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailgunConfig {
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_mail_from")]
    pub from: String,
    #[serde(default = "default_mailgun_endpoint")]
    pub endpoint: String,
}

impl Default for MailgunConfig {
    fn default() -> Self {
        Self {
            domain: None,
            api_key: None,
            from: default_mail_from(),
            endpoint: default_mailgun_endpoint(),
        }
    }
}

fn default_mail_from() -> String {
    "Kiln <builds@localhost>".to_string()
}

fn default_mailgun_endpoint() -> String {
    "https://api.mailgun.net".to_string()
}
