//! Envelope and codec.
//!
//! Decoding goes raw JSON -> tag -> typed payload. Any failure along the way
//! is a [`ProtocolError`]; nothing here panics on daemon input.

use crate::message_type::MessageType;
use crate::payloads::*;
use chrono::{DateTime, TimeZone, Utc};
use questlink_core::{now, ProtocolError, Timestamp};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

macro_rules! messages {
    ($($variant:ident($payload:ty)),* $(,)?) => {
        /// Tagged union over every message the link carries.
        #[derive(Debug, Clone, PartialEq)]
        pub enum Message {
            $($variant($payload),)*
        }

        impl Message {
            pub fn message_type(&self) -> MessageType {
                match self {
                    $(Message::$variant(_) => MessageType::$variant,)*
                }
            }

            /// Validate a raw payload against the shape its tag requires.
            pub fn from_parts(
                message_type: MessageType,
                payload: Value,
            ) -> Result<Self, ProtocolError> {
                match message_type {
                    $(MessageType::$variant => {
                        payload_as(message_type, payload).map(Message::$variant)
                    })*
                }
            }

            pub fn payload_value(&self) -> Result<Value, ProtocolError> {
                let message_type = self.message_type();
                match self {
                    $(Message::$variant(payload) => payload_to_value(message_type, payload),)*
                }
            }
        }
    };
}

messages! {
    Auth(AuthPayload),
    AuthSuccess(AuthSuccessPayload),
    AuthError(AuthErrorPayload),
    Heartbeat(HeartbeatPayload),
    HeartbeatAck(HeartbeatPayload),
    AgentList(AgentListPayload),
    AgentSpawn(AgentSpawnPayload),
    AgentSpawned(AgentEventPayload),
    AgentUpdate(AgentEventPayload),
    AgentKill(AgentRefPayload),
    AgentKilled(AgentRefPayload),
    AgentInput(AgentInputPayload),
    AgentOutput(AgentOutputPayload),
    AgentThought(AgentThoughtPayload),
    AgentStatusChange(AgentStatusChangePayload),
    AgentActivityChange(AgentActivityChangePayload),
    AgentProgress(AgentProgressPayload),
    AgentQuestion(AgentQuestionPayload),
    AgentAnswer(AgentAnswerPayload),
    QuestStarted(QuestEventPayload),
    QuestProgress(QuestProgressPayload),
    QuestComplete(QuestEventPayload),
    QuestAccepted(QuestRefPayload),
    QuestRevision(QuestRevisionPayload),
    QuestReview(QuestReviewPayload),
    Error(ErrorPayload),
}

fn payload_as<T: DeserializeOwned>(
    message_type: MessageType,
    payload: Value,
) -> Result<T, ProtocolError> {
    // A missing payload is treated as an empty object so all-optional shapes still decode.
    let payload = match payload {
        Value::Null => Value::Object(Map::new()),
        other => other,
    };
    serde_json::from_value(payload).map_err(|e| ProtocolError::InvalidPayload {
        message_type: message_type.as_str(),
        reason: e.to_string(),
    })
}

fn payload_to_value<T: Serialize>(
    message_type: MessageType,
    payload: &T,
) -> Result<Value, ProtocolError> {
    serde_json::to_value(payload).map_err(|e| ProtocolError::Encode {
        message_type: message_type.as_str(),
        reason: e.to_string(),
    })
}

/// A decoded message with its wire metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub message: Message,
    pub timestamp: Timestamp,
    pub id: Option<String>,
}

impl Envelope {
    /// Wrap a message, stamped with the current time.
    pub fn new(message: Message) -> Self {
        Self {
            message,
            timestamp: now(),
            id: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn message_type(&self) -> MessageType {
        self.message.message_type()
    }
}

impl From<Message> for Envelope {
    fn from(message: Message) -> Self {
        Envelope::new(message)
    }
}

#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    message_type: String,
    #[serde(default)]
    payload: Value,
    #[serde(default)]
    timestamp: Value,
    #[serde(default)]
    id: Value,
}

#[derive(Serialize)]
struct WireEnvelope<'a> {
    #[serde(rename = "type")]
    message_type: &'static str,
    payload: Value,
    timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<&'a str>,
}

/// Decode one text frame.
pub fn decode(text: &str) -> Result<Envelope, ProtocolError> {
    let raw: RawEnvelope = serde_json::from_str(text).map_err(|e| ProtocolError::Malformed {
        reason: e.to_string(),
    })?;
    let message_type: MessageType = raw.message_type.parse()?;
    let message = Message::from_parts(message_type, raw.payload)?;
    let timestamp = parse_wire_time(&raw.timestamp).unwrap_or_else(now);
    let id = match raw.id {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    };
    Ok(Envelope {
        message,
        timestamp,
        id,
    })
}

/// Encode an envelope as one text frame.
pub fn encode(envelope: &Envelope) -> Result<String, ProtocolError> {
    let message_type = envelope.message_type();
    let wire = WireEnvelope {
        message_type: message_type.as_str(),
        payload: envelope.message.payload_value()?,
        timestamp: envelope.timestamp.timestamp_millis(),
        id: envelope.id.as_deref(),
    };
    serde_json::to_string(&wire).map_err(|e| ProtocolError::Encode {
        message_type: message_type.as_str(),
        reason: e.to_string(),
    })
}

/// Interpret a wire timestamp: unix milliseconds (number or numeric string)
/// or an RFC 3339 string. Anything else yields `None`.
pub fn parse_wire_time(value: &Value) -> Option<Timestamp> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        Value::String(s) => {
            if let Ok(ms) = s.parse::<i64>() {
                return Utc.timestamp_millis_opt(ms).single();
            }
            DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use questlink_core::AgentId;
    use serde_json::json;

    #[test]
    fn test_decode_agent_spawned() {
        let text = r#"{"type":"agent_spawned","payload":{"agent":{"id":"a1","name":"Merlin","class":"mage"}},"timestamp":1700000000000,"id":"m-1"}"#;
        let envelope = decode(text).unwrap();
        assert_eq!(envelope.message_type(), MessageType::AgentSpawned);
        assert_eq!(envelope.id.as_deref(), Some("m-1"));
        assert_eq!(envelope.timestamp.timestamp_millis(), 1_700_000_000_000);
        match envelope.message {
            Message::AgentSpawned(payload) => assert_eq!(payload.agent.id, AgentId::new("a1")),
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_decode_unknown_type_is_error() {
        let err = decode(r#"{"type":"unknown_type_xyz","payload":{}}"#).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::UnknownType {
                message_type: "unknown_type_xyz".to_string()
            }
        );
    }

    #[test]
    fn test_decode_malformed_json() {
        assert!(matches!(decode("{not json"), Err(ProtocolError::Malformed { .. })));
        assert!(matches!(decode(r#"{"payload":{}}"#), Err(ProtocolError::Malformed { .. })));
        assert!(matches!(decode("[]"), Err(ProtocolError::Malformed { .. })));
    }

    #[test]
    fn test_decode_payload_shape_violation() {
        let err = decode(r#"{"type":"agent_kill","payload":{"reason":"x"}}"#).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::InvalidPayload {
                message_type: "agent_kill",
                ..
            }
        ));
    }

    #[test]
    fn test_decode_missing_payload_and_iso_timestamp() {
        let envelope =
            decode(r#"{"type":"heartbeat_ack","timestamp":"2024-05-01T12:00:00Z"}"#).unwrap();
        assert_eq!(envelope.message, Message::HeartbeatAck(HeartbeatPayload::default()));
        assert_eq!(envelope.timestamp.to_rfc3339(), "2024-05-01T12:00:00+00:00");
    }

    #[test]
    fn test_encode_quest_review_wire_shape() {
        let envelope = Envelope::new(Message::QuestReview(QuestReviewPayload {
            quest_id: "q1".into(),
            action: ReviewAction::Revise,
            note: Some("add tests".to_string()),
        }));
        let value: Value = serde_json::from_str(&encode(&envelope).unwrap()).unwrap();
        assert_eq!(value["type"], "quest_review");
        assert_eq!(
            value["payload"],
            json!({"questId": "q1", "action": "revise", "note": "add tests"})
        );
        assert!(value["timestamp"].is_i64());
        assert!(value.get("id").is_none());
    }

    #[test]
    fn test_encode_agent_list_request_is_empty_object() {
        let envelope = Envelope::new(Message::AgentList(AgentListPayload::default()));
        let value: Value = serde_json::from_str(&encode(&envelope).unwrap()).unwrap();
        assert_eq!(value["payload"], json!({}));
    }

    #[test]
    fn test_parse_wire_time_rejects_garbage() {
        assert!(parse_wire_time(&json!("yesterday")).is_none());
        assert!(parse_wire_time(&json!(true)).is_none());
        assert!(parse_wire_time(&Value::Null).is_none());
    }
}
