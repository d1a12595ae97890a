//! Wire frames exchanged with the NVR server.
//!
//! Both directions are closed tagged unions parsed once at the channel
//! boundary; a frame with an unknown `type` is rejected there instead of
//! flowing through the rest of the client untyped.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SyncError;

/// Frames issued to the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    SubscribeEvent { event: String },
    UnsubscribeEvent { event: String },
    Ping,
}

impl ClientMessage {
    pub fn subscribe(event: impl Into<String>) -> Self {
        Self::SubscribeEvent {
            event: event.into(),
        }
    }

    pub fn unsubscribe(event: impl Into<String>) -> Self {
        Self::UnsubscribeEvent {
            event: event.into(),
        }
    }
}

/// Frames pushed by the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// An event push, labeled with the topic (or topic pattern) it matched.
    Event {
        event: String,
        #[serde(default)]
        payload: Value,
    },
    /// An entity-state change; the entity id is the topic.
    StateChanged {
        entity_id: String,
        #[serde(default)]
        state: Value,
    },
    Pong,
}

impl ServerMessage {
    /// The topic string this push should be matched against, if any.
    pub fn topic(&self) -> Option<&str> {
        match self {
            ServerMessage::Event { event, .. } => Some(event),
            ServerMessage::StateChanged { entity_id, .. } => Some(entity_id),
            ServerMessage::Pong => None,
        }
    }
}

/// Parses an inbound text frame, rejecting unknown message kinds.
pub fn parse_message(text: &str) -> Result<ServerMessage, SyncError> {
    serde_json::from_str(text).map_err(|err| {
        SyncError::UnknownMessage(format!("{err} in {text:.120}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_subscribe_serialization() {
        let msg = ClientMessage::subscribe("camera_one/recorder/*");
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "subscribe_event");
        assert_eq!(value["event"], "camera_one/recorder/*");
    }

    #[test]
    fn test_unsubscribe_serialization() {
        let msg = ClientMessage::unsubscribe("cameras");
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "unsubscribe_event");
        assert_eq!(value["event"], "cameras");
    }

    #[test]
    fn test_event_push_parse() {
        let text = json!({
            "type": "event",
            "event": "camera_one/recorder/start",
            "payload": { "segment": 12 }
        })
        .to_string();

        let msg = parse_message(&text).unwrap();
        assert_eq!(msg.topic(), Some("camera_one/recorder/start"));
    }

    #[test]
    fn test_state_changed_parse() {
        let text = json!({
            "type": "state_changed",
            "entity_id": "binary_sensor.camera_one_connected",
            "state": "on"
        })
        .to_string();

        let msg = parse_message(&text).unwrap();
        assert_eq!(msg.topic(), Some("binary_sensor.camera_one_connected"));
    }

    #[test]
    fn test_payload_defaults_to_null() {
        let msg = parse_message(r#"{"type":"event","event":"cameras"}"#).unwrap();
        match msg {
            ServerMessage::Event { payload, .. } => assert!(payload.is_null()),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_type_rejected() {
        let err = parse_message(r#"{"type":"telemetry","data":{}}"#).unwrap_err();
        assert!(matches!(err, SyncError::UnknownMessage(_)));
    }

    #[test]
    fn test_malformed_frame_rejected() {
        assert!(parse_message("not json").is_err());
    }
}
