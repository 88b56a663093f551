//! Notification entries as declared in a repository's build configuration.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    Dockerhub,
    Pushover,
    Email,
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ChannelType::Dockerhub => "dockerhub",
            ChannelType::Pushover => "pushover",
            ChannelType::Email => "email",
        })
    }
}

/// Outcome being announced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Success,
    Error,
}

impl EventType {
    pub fn from_success(success: bool) -> Self {
        if success {
            EventType::Success
        } else {
            EventType::Error
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Success => "success",
            EventType::Error => "error",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Set of event names an entry fires for. Empty fires for everything.
///
/// Accepts `"success,error"` or a YAML list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawFilter", into = "Vec<String>")]
pub struct NotifyFilter(BTreeSet<String>);

#[derive(Deserialize)]
#[serde(untagged)]
enum RawFilter {
    Text(String),
    List(Vec<String>),
}

impl From<RawFilter> for NotifyFilter {
    fn from(raw: RawFilter) -> Self {
        let items: Vec<String> = match raw {
            RawFilter::Text(text) => text.split(',').map(str::to_string).collect(),
            RawFilter::List(list) => list,
        };
        NotifyFilter(
            items
                .into_iter()
                .map(|item| item.trim().to_lowercase())
                .filter(|item| !item.is_empty())
                .collect(),
        )
    }
}

impl From<NotifyFilter> for Vec<String> {
    fn from(filter: NotifyFilter) -> Self {
        filter.0.into_iter().collect()
    }
}

impl NotifyFilter {
    pub fn only(events: &[EventType]) -> Self {
        NotifyFilter(events.iter().map(|e| e.as_str().to_string()).collect())
    }

    pub fn matches(&self, event: EventType) -> bool {
        self.0.is_empty() || self.0.contains(event.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyEntry {
    #[serde(rename = "type")]
    pub channel: ChannelType,
    /// Plain or `encrypted:`-prefixed target.
    pub target: String,
    #[serde(default)]
    pub filter: NotifyFilter,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_filter_matches_everything() {
        let filter = NotifyFilter::default();
        assert!(filter.matches(EventType::Success));
        assert!(filter.matches(EventType::Error));
    }

    #[test]
    fn test_comma_separated_filter() {
        let entry: NotifyEntry =
            serde_yaml::from_str("type: pushover\ntarget: u123\nfilter: \"error, \"\n").unwrap();
        assert!(entry.filter.matches(EventType::Error));
        assert!(!entry.filter.matches(EventType::Success));
    }

    #[test]
    fn test_list_filter() {
        let entry: NotifyEntry =
            serde_yaml::from_str("type: email\ntarget: a@b.c\nfilter: [Success]\n").unwrap();
        assert_eq!(entry.channel, ChannelType::Email);
        assert!(entry.filter.matches(EventType::Success));
        assert!(!entry.filter.matches(EventType::Error));
    }

    #[test]
    fn test_unknown_channel_is_rejected() {
        assert!(serde_yaml::from_str::<NotifyEntry>("type: fax\ntarget: x\n").is_err());
    }
}
