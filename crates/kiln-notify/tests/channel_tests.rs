//! Channel delivery against mock HTTP endpoints.

use async_trait::async_trait;
use kiln_core::{ChannelType, EventType, NotifyEntry, NotifyFilter};
use kiln_notify::*;
use std::sync::{Arc, Mutex};
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn entry(channel: ChannelType, target: &str) -> NotifyEntry {
    NotifyEntry {
        channel,
        target: target.to_string(),
        filter: NotifyFilter::default(),
    }
}

fn config_for(server: &MockServer) -> NotifyConfig {
    NotifyConfig {
        base_url: "https://kiln.example.org".to_string(),
        pushover: PushoverConfig {
            app_token: Some("app-token".to_string()),
            endpoint: format!("{}/1/messages.json", server.uri()),
        },
        mailgun: MailgunConfig {
            domain: Some("mg.example.org".to_string()),
            api_key: Some("key".to_string()),
            from: "Kiln <builds@example.org>".to_string(),
            endpoint: server.uri(),
        },
    }
}

#[tokio::test]
async fn test_dockerhub_trigger_on_success() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/trigger/abc"))
        .and(body_string_contains("build=true"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let dispatcher = NotificationDispatcher::new(&config_for(&server));
    let target = format!("{}/trigger/abc", server.uri());
    let report = dispatcher
        .dispatch(
            &[entry(ChannelType::Dockerhub, &target)],
            &NotifyEvent::new(EventType::Success, "example.org/a/b"),
            None,
        )
        .await
        .unwrap();

    assert_eq!(report.delivered, 1);
}

#[tokio::test]
async fn test_dockerhub_requires_exactly_200() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(202))
        .mount(&server)
        .await;

    let sender = DockerHubSender::new(reqwest::Client::new());
    let result = sender
        .send(
            &format!("{}/trigger", server.uri()),
            &NotifyEvent::new(EventType::Success, "r"),
        )
        .await;

    assert!(matches!(result, Err(NotifyError::DeliveryFailed(_))));
}

#[tokio::test]
async fn test_pushover_with_encrypted_user_key() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/1/messages.json"))
        .and(body_string_contains("token=app-token"))
        .and(body_string_contains("user=u-123"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let sealed = TargetCipher::from_key("repo-key").unwrap().encrypt("u-123").unwrap();
    let dispatcher = NotificationDispatcher::new(&config_for(&server));
    let report = dispatcher
        .dispatch(
            &[entry(ChannelType::Pushover, &sealed)],
            &NotifyEvent::new(EventType::Error, "example.org/a/b"),
            Some("repo-key"),
        )
        .await
        .unwrap();

    assert_eq!(report.delivered, 1);
}

#[tokio::test]
async fn test_mailgun_uses_basic_auth() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v3/mg.example.org/messages"))
        .and(header("authorization", "Basic YXBpOmtleQ=="))
        .and(body_string_contains("to=ops%40example.org"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let dispatcher = NotificationDispatcher::new(&config_for(&server));
    dispatcher
        .dispatch(
            &[entry(ChannelType::Email, "ops@example.org")],
            &NotifyEvent::new(EventType::Success, "example.org/a/b"),
            None,
        )
        .await
        .unwrap();
}

/// Records every target it is asked to deliver to.
struct Recorder {
    sent: Arc<Mutex<Vec<String>>>,
    fail: bool,
}

#[async_trait]
impl NotificationSender for Recorder {
    async fn send(&self, target: &str, _event: &NotifyEvent) -> Result<Delivery, NotifyError> {
        self.sent.lock().unwrap().push(target.to_string());
        if self.fail {
            return Err(NotifyError::DeliveryFailed("boom".to_string()));
        }
        Ok(Delivery::Sent)
    }
}

#[tokio::test]
async fn test_first_failure_stops_remaining_entries() {
    let sent = Arc::new(Mutex::new(Vec::new()));
    let dispatcher = NotificationDispatcher::empty()
        .with_sender(
            ChannelType::Email,
            Arc::new(Recorder {
                sent: sent.clone(),
                fail: false,
            }),
        )
        .with_sender(
            ChannelType::Pushover,
            Arc::new(Recorder {
                sent: sent.clone(),
                fail: true,
            }),
        );

    let entries = vec![
        entry(ChannelType::Email, "first"),
        entry(ChannelType::Pushover, "second"),
        entry(ChannelType::Email, "third"),
    ];
    let result = dispatcher
        .dispatch(&entries, &NotifyEvent::new(EventType::Error, "r"), None)
        .await;

    assert!(result.is_err());
    assert_eq!(*sent.lock().unwrap(), vec!["first", "second"]);
}

#[tokio::test]
async fn test_filters_and_missing_key() {
    let sent = Arc::new(Mutex::new(Vec::new()));
    let dispatcher = NotificationDispatcher::empty().with_sender(
        ChannelType::Email,
        Arc::new(Recorder {
            sent: sent.clone(),
            fail: false,
        }),
    );

    let mut success_only = entry(ChannelType::Email, "success-only");
    success_only.filter = NotifyFilter::only(&[EventType::Success]);
    let report = dispatcher
        .dispatch(
            &[success_only, entry(ChannelType::Email, "always")],
            &NotifyEvent::new(EventType::Error, "r"),
            None,
        )
        .await
        .unwrap();
    assert_eq!(report, DispatchReport { delivered: 1, skipped: 1 });
    assert_eq!(*sent.lock().unwrap(), vec!["always"]);

    let err = dispatcher
        .dispatch(
            &[entry(ChannelType::Email, "encrypted:AAAAAAAAAAAAAAAAAAAAAAAA")],
            &NotifyEvent::new(EventType::Error, "r"),
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, NotifyError::Decryption(_)));
}
