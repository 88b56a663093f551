//! Scripted builds and configuration fixtures.

use kiln_core::buildconfig::BUILD_CONFIG_FILE;
use kiln_core::{BuildConfig, ChannelType, EventType, NotifyEntry, NotifyFilter};

pub const TEST_REPOSITORY: &str = "example.org/a/b";
pub const TEST_COMMIT: &str = "abc123";

/// What a fake build container does when it runs.
#[derive(Debug, Clone)]
pub struct BuildScript {
    pub exit_code: i64,
    pub log: String,
    /// Written into the bound working directory on start.
    pub files: Vec<(String, Vec<u8>)>,
    /// Log stream breaks after the first chunk.
    pub fail_log_fetch: bool,
    pub panic_on_start: bool,
}

impl BuildScript {
    pub fn new(exit_code: i64) -> Self {
        Self {
            exit_code,
            log: String::new(),
            files: Vec::new(),
            fail_log_fetch: false,
            panic_on_start: false,
        }
    }

    /// A build that published one archive for `label`.
    pub fn success(label: &str) -> Self {
        Self::new(0)
            .with_log("go build ./...\nok\n")
            .with_config(&BuildConfig::default())
            .with_file(&format!("app_{}_linux-amd64.zip", label), b"archive")
            .with_file(".built_tags", format!("{}\n", label).as_bytes())
            .with_file(&format!(".signature_{}", label), b"signed")
            .with_file(".build_commit", TEST_COMMIT.as_bytes())
            .with_file(".tool_version", b"go1.22.1\n")
    }

    /// The container found nothing new to build.
    pub fn redundant() -> Self {
        Self::new(kiln_core::REDUNDANT_BUILD_EXIT_CODE)
            .with_log("already built\n")
            .with_config(&BuildConfig::default())
    }

    pub fn failure(log: &str) -> Self {
        Self::new(1).with_log(log).with_config(&BuildConfig::default())
    }

    pub fn with_log(mut self, log: &str) -> Self {
        self.log = log.to_string();
        self
    }

    pub fn with_file(mut self, name: &str, content: &[u8]) -> Self {
        self.files.retain(|(existing, _)| existing != name);
        self.files.push((name.to_string(), content.to_vec()));
        self
    }

    /// Replace the build configuration the container leaves behind.
    pub fn with_config(self, config: &BuildConfig) -> Self {
        self.with_file(BUILD_CONFIG_FILE, config_yaml(config).as_bytes())
    }

    pub fn without_config(mut self) -> Self {
        self.files.retain(|(name, _)| name != BUILD_CONFIG_FILE);
        self
    }

    pub fn failing_log_fetch(mut self) -> Self {
        self.fail_log_fetch = true;
        self
    }

    pub fn panicking(mut self) -> Self {
        self.panic_on_start = true;
        self
    }
}

pub fn config_yaml(config: &BuildConfig) -> String {
    serde_yaml::to_string(config).expect("build config serializes")
}

/// Notify entry restricted to `events`; empty fires for everything.
pub fn notify_entry(channel: ChannelType, target: &str, events: &[EventType]) -> NotifyEntry {
    NotifyEntry {
        channel,
        target: target.to_string(),
        filter: NotifyFilter::only(events),
    }
}

pub fn config_with_notify(entries: Vec<NotifyEntry>) -> BuildConfig {
    BuildConfig {
        notify: entries,
        ..BuildConfig::default()
    }
}

/// `count` distinct downstream repositories.
pub fn config_with_triggers(count: usize) -> BuildConfig {
    BuildConfig {
        triggers: (0..count).map(|i| format!("example.org/dep/{}", i)).collect(),
        ..BuildConfig::default()
    }
}
