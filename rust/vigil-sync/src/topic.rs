//! Topic keys the server uses to label pushed messages.
//!
//! A topic is either an entity-state channel (`binary_sensor.camera_one_connected`)
//! or a slash-delimited event name that may end in a `*` wildcard
//! (`camera_one/recorder/start`, `domain/setup/domain_failed/camera/*`).
//!
//! Matching lives entirely in this module so the reference-counting layer
//! never needs to know how patterns are interpreted.

use serde::{Deserialize, Serialize};

const WILDCARD: &str = "*";

/// A string key identifying a server push channel. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topic(String);

impl Topic {
    pub fn new(topic: impl Into<String>) -> Self {
        Self(topic.into())
    }

    /// Entity-state channel: `<domain>.<identifier>_<attribute>`.
    pub fn entity(domain: &str, identifier: &str, attribute: &str) -> Self {
        Self(format!("{domain}.{identifier}_{attribute}"))
    }

    /// Hierarchical event name built from slash-joined segments.
    pub fn event<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let joined = segments
            .into_iter()
            .map(|s| s.as_ref().to_string())
            .collect::<Vec<_>>()
            .join("/");
        Self(joined)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_wildcard(&self) -> bool {
        self.0 == WILDCARD || self.0.ends_with("/*")
    }

    /// Whether an inbound push labeled `event` belongs to this topic.
    ///
    /// Exact match always wins; a trailing `*` segment matches any event
    /// under that prefix. A `*` anywhere else is literal.
    pub fn matches(&self, event: &str) -> bool {
        if self.0 == event {
            return true;
        }
        if self.0 == WILDCARD {
            return true;
        }
        if let Some(prefix) = self.0.strip_suffix("/*") {
            return event
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with('/'));
        }
        false
    }
}

impl From<&str> for Topic {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Topic {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match() {
        let topic = Topic::new("camera_one/recorder/start");
        assert!(topic.matches("camera_one/recorder/start"));
        assert!(!topic.matches("camera_one/recorder/stop"));
    }

    #[test]
    fn test_trailing_wildcard() {
        let topic = Topic::new("camera_one/recorder/*");
        assert!(topic.matches("camera_one/recorder/start"));
        assert!(topic.matches("camera_one/recorder/segment/rotate"));
        assert!(!topic.matches("camera_two/recorder/start"));
        assert!(!topic.matches("camera_one/recorder"));
        // the literal pattern is its own topic too
        assert!(topic.matches("camera_one/recorder/*"));
    }

    #[test]
    fn test_wildcard_prefix_is_segment_aligned() {
        let topic = Topic::new("domain/setup/domain_failed/camera/*");
        assert!(topic.matches("domain/setup/domain_failed/camera/front"));
        assert!(!topic.matches("domain/setup/domain_failed/camera_extra/front"));
    }

    #[test]
    fn test_embedded_star_is_literal() {
        let topic = Topic::new("a/*/b");
        assert!(topic.matches("a/*/b"));
        assert!(!topic.matches("a/x/b"));
    }

    #[test]
    fn test_entity_topic() {
        let topic = Topic::entity("binary_sensor", "camera_one", "connected");
        assert_eq!(topic.as_str(), "binary_sensor.camera_one_connected");
        assert!(topic.matches("binary_sensor.camera_one_connected"));
        assert!(!topic.matches("binary_sensor.camera_one_motion"));
    }

    #[test]
    fn test_event_builder() {
        let topic = Topic::event(["camera_one", "recorder", "start"]);
        assert_eq!(topic.as_str(), "camera_one/recorder/start");
        assert!(!topic.is_wildcard());
        assert!(Topic::event(["camera_one", "recorder", "*"]).is_wildcard());
    }
}
