//! Message type tags.

use questlink_core::ProtocolError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which side of the link originates a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Daemon to client
    Inbound,
    /// Client to daemon
    Outbound,
    /// Either side may send it
    Both,
}

/// Literal `type` tag carried by every envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    // Connection
    Auth,
    AuthSuccess,
    AuthError,
    Heartbeat,
    HeartbeatAck,
    // Agent management
    AgentList,
    AgentSpawn,
    AgentSpawned,
    AgentUpdate,
    AgentKill,
    AgentKilled,
    // Agent interaction
    AgentInput,
    AgentOutput,
    AgentThought,
    AgentStatusChange,
    AgentActivityChange,
    AgentProgress,
    AgentQuestion,
    AgentAnswer,
    // Quest
    QuestStarted,
    QuestProgress,
    QuestComplete,
    QuestAccepted,
    QuestRevision,
    QuestReview,
    // Errors
    Error,
}

impl MessageType {
    pub const ALL: [MessageType; 26] = [
        MessageType::Auth,
        MessageType::AuthSuccess,
        MessageType::AuthError,
        MessageType::Heartbeat,
        MessageType::HeartbeatAck,
        MessageType::AgentList,
        MessageType::AgentSpawn,
        MessageType::AgentSpawned,
        MessageType::AgentUpdate,
        MessageType::AgentKill,
        MessageType::AgentKilled,
        MessageType::AgentInput,
        MessageType::AgentOutput,
        MessageType::AgentThought,
        MessageType::AgentStatusChange,
        MessageType::AgentActivityChange,
        MessageType::AgentProgress,
        MessageType::AgentQuestion,
        MessageType::AgentAnswer,
        MessageType::QuestStarted,
        MessageType::QuestProgress,
        MessageType::QuestComplete,
        MessageType::QuestAccepted,
        MessageType::QuestRevision,
        MessageType::QuestReview,
        MessageType::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Auth => "auth",
            MessageType::AuthSuccess => "auth_success",
            MessageType::AuthError => "auth_error",
            MessageType::Heartbeat => "heartbeat",
            MessageType::HeartbeatAck => "heartbeat_ack",
            MessageType::AgentList => "agent_list",
            MessageType::AgentSpawn => "agent_spawn",
            MessageType::AgentSpawned => "agent_spawned",
            MessageType::AgentUpdate => "agent_update",
            MessageType::AgentKill => "agent_kill",
            MessageType::AgentKilled => "agent_killed",
            MessageType::AgentInput => "agent_input",
            MessageType::AgentOutput => "agent_output",
            MessageType::AgentThought => "agent_thought",
            MessageType::AgentStatusChange => "agent_status_change",
            MessageType::AgentActivityChange => "agent_activity_change",
            MessageType::AgentProgress => "agent_progress",
            MessageType::AgentQuestion => "agent_question",
            MessageType::AgentAnswer => "agent_answer",
            MessageType::QuestStarted => "quest_started",
            MessageType::QuestProgress => "quest_progress",
            MessageType::QuestComplete => "quest_complete",
            MessageType::QuestAccepted => "quest_accepted",
            MessageType::QuestRevision => "quest_revision",
            MessageType::QuestReview => "quest_review",
            MessageType::Error => "error",
        }
    }

    pub fn direction(&self) -> Direction {
        match self {
            MessageType::Auth
            | MessageType::AgentSpawn
            | MessageType::AgentKill
            | MessageType::AgentInput
            | MessageType::QuestReview => Direction::Outbound,
            // agent_list is a request outbound and a snapshot inbound;
            // agent_answer is sent by the client and echoed by the daemon.
            MessageType::AgentList | MessageType::AgentAnswer | MessageType::Heartbeat => {
                Direction::Both
            }
            _ => Direction::Inbound,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MessageType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ProtocolError::UnknownType {
                message_type: s.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_tag_roundtrips() {
        for message_type in MessageType::ALL {
            assert_eq!(message_type.as_str().parse::<MessageType>(), Ok(message_type));
            let json = serde_json::to_string(&message_type).unwrap();
            assert_eq!(json, format!("\"{}\"", message_type.as_str()));
        }
    }

    #[test]
    fn test_unknown_tag_is_protocol_error() {
        let err = "unknown_type_xyz".parse::<MessageType>().unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownType { .. }));
    }

    #[test]
    fn test_directions() {
        assert_eq!(MessageType::Auth.direction(), Direction::Outbound);
        assert_eq!(MessageType::AgentSpawned.direction(), Direction::Inbound);
        assert_eq!(MessageType::AgentList.direction(), Direction::Both);
    }
}
