//! Build notification channels for Kiln.
//!
//! Delivers build outcomes to Docker Hub trigger URLs, Pushover and email
//! (Mailgun), honouring per-entry filters and encrypted targets.

pub mod channels;
pub mod crypto;
pub mod dispatcher;
pub mod sender;

pub use channels::{MailgunConfig, NotifyConfig, PushoverConfig};
pub use crypto::{ENCRYPTED_PREFIX, TargetCipher};
pub use dispatcher::{DispatchReport, NotificationDispatcher};
pub use sender::{
    Delivery, DockerHubSender, EmailSender, NotificationSender, NotifyError, NotifyEvent,
    PushoverSender, create_sender,
};
