//! Typed payloads, one struct per message shape.
//!
//! Inbound payloads are deliberately permissive: anything the daemon may omit
//! is an `Option`, legacy field names are accepted through `#[serde(alias)]`,
//! and enum-like fields stay as raw strings so the normalizer can fall back to
//! a default instead of rejecting the whole message. Outbound payloads are
//! strict and use the core enums directly.

use crate::lenient;
use questlink_core::{AgentClass, AgentId, ArtifactId, QuestId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// CONNECTION
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "code")]
    pub connection_code: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSuccessPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthErrorPayload {
    #[serde(default, alias = "message", alias = "error")]
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

// ============================================================================
// AGENTS
// ============================================================================

/// Agent record as the daemon reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentPayload {
    pub id: AgentId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        alias = "agentClass",
        alias = "agent_class"
    )]
    pub class: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "gitBranch")]
    pub branch: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        alias = "cwd",
        alias = "working_directory"
    )]
    pub working_directory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_thought: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_question: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quick_replies: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thoughts: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "output")]
    pub output_buffer: Option<Vec<String>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient::u64_opt"
    )]
    pub context_used: Option<u64>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient::u64_opt"
    )]
    pub context_total: Option<u64>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient::u64_opt"
    )]
    pub xp: Option<u64>,
    /// Cumulative experience across all levels, sent by older daemons.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        alias = "total_xp",
        alias = "cumulativeXp",
        deserialize_with = "lenient::u64_opt"
    )]
    pub total_xp: Option<u64>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient::u32_opt"
    )]
    pub level: Option<u32>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient::u32_opt"
    )]
    pub talent_points: Option<u32>,
    /// Unix milliseconds or RFC 3339; parsed by the normalizer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<Value>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient::bool_opt"
    )]
    pub is_favorite: Option<bool>,
}

impl AgentPayload {
    /// Minimal payload carrying only an id.
    pub fn new(id: impl Into<AgentId>) -> Self {
        Self {
            id: id.into(),
            name: None,
            class: None,
            status: None,
            activity: None,
            branch: None,
            working_directory: None,
            last_thought: None,
            pending_question: None,
            quick_replies: None,
            thoughts: None,
            output_buffer: None,
            context_used: None,
            context_total: None,
            xp: None,
            total_xp: None,
            level: None,
            talent_points: None,
            created_at: None,
            is_favorite: None,
        }
    }
}

/// Payload of `agent_spawned` and `agent_update`.
///
/// Daemons send the agent either nested under `agent` or flattened into the
/// payload itself; both decode to the same value. Always encodes nested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "AgentCarrier")]
pub struct AgentEventPayload {
    pub agent: AgentPayload,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AgentCarrier {
    Nested { agent: AgentPayload },
    Flat(AgentPayload),
}

impl From<AgentCarrier> for AgentEventPayload {
    fn from(carrier: AgentCarrier) -> Self {
        match carrier {
            AgentCarrier::Nested { agent } | AgentCarrier::Flat(agent) => Self { agent },
        }
    }
}

/// `agent_list`: empty when sent as a request, the full roster when received.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentListPayload {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub agents: Vec<AgentPayload>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSpawnPayload {
    pub name: String,
    pub class: AgentClass,
    pub working_directory: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_task: Option<String>,
}

/// Payload of `agent_kill` and `agent_killed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRefPayload {
    #[serde(alias = "id")]
    pub agent_id: AgentId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentInputPayload {
    pub agent_id: AgentId,
    pub input: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentOutputPayload {
    pub agent_id: AgentId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lines: Option<Vec<String>>,
}

impl AgentOutputPayload {
    /// Output as individual lines, whichever form the daemon used.
    pub fn lines(&self) -> Vec<String> {
        let mut lines = self.lines.clone().unwrap_or_default();
        if let Some(output) = &self.output {
            lines.extend(output.lines().map(str::to_string));
        }
        lines
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentThoughtPayload {
    pub agent_id: AgentId,
    #[serde(alias = "content")]
    pub thought: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStatusChangePayload {
    pub agent_id: AgentId,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentActivityChangePayload {
    pub agent_id: AgentId,
    pub activity: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentProgressPayload {
    pub agent_id: AgentId,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient::u64_opt"
    )]
    pub context_used: Option<u64>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient::u64_opt"
    )]
    pub context_total: Option<u64>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient::u64_opt"
    )]
    pub xp_gained: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentQuestionPayload {
    pub agent_id: AgentId,
    pub question: String,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "options")]
    pub quick_replies: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentAnswerPayload {
    pub agent_id: AgentId,
    pub answer: String,
}

// ============================================================================
// QUESTS
// ============================================================================

/// An artifact as reported: a bare path or a possibly partial record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawArtifact {
    Path(String),
    Record(PartialArtifact),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialArtifact {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ArtifactId>,
    #[serde(alias = "file")]
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "change")]
    pub change_type: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient::u32_opt"
    )]
    pub lines_changed: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
}

/// Quest record as the daemon reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestPayload {
    pub id: QuestId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<AgentId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<RawArtifact>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        alias = "xp",
        deserialize_with = "lenient::u64_opt"
    )]
    pub xp_reward: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<Value>,
}

impl QuestPayload {
    pub fn new(id: impl Into<QuestId>) -> Self {
        Self {
            id: id.into(),
            agent_id: None,
            title: None,
            description: None,
            status: None,
            priority: None,
            artifacts: Vec::new(),
            xp_reward: None,
            started_at: None,
            completed_at: None,
        }
    }
}

/// Payload of `quest_started` and `quest_complete`, nested or flat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "QuestCarrier")]
pub struct QuestEventPayload {
    pub quest: QuestPayload,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum QuestCarrier {
    Nested { quest: QuestPayload },
    Flat(QuestPayload),
}

impl From<QuestCarrier> for QuestEventPayload {
    fn from(carrier: QuestCarrier) -> Self {
        match carrier {
            QuestCarrier::Nested { quest } | QuestCarrier::Flat(quest) => Self { quest },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestProgressPayload {
    pub quest_id: QuestId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<AgentId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<Vec<RawArtifact>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestRefPayload {
    #[serde(alias = "id")]
    pub quest_id: QuestId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestRevisionPayload {
    #[serde(alias = "id")]
    pub quest_id: QuestId,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        alias = "note",
        alias = "feedback"
    )]
    pub notes: Option<String>,
}

/// Review verdict sent with `quest_review`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewAction {
    Accept,
    Reject,
    Revise,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestReviewPayload {
    pub quest_id: QuestId,
    pub action: ReviewAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    #[serde(default, alias = "error", alias = "reason")]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_agent_event_accepts_nested_and_flat() {
        let nested: AgentEventPayload =
            serde_json::from_value(json!({"agent": {"id": "a1", "name": "Merlin"}})).unwrap();
        let flat: AgentEventPayload =
            serde_json::from_value(json!({"id": "a1", "name": "Merlin"})).unwrap();
        assert_eq!(nested, flat);
        assert_eq!(nested.agent.name.as_deref(), Some("Merlin"));
    }

    #[test]
    fn test_agent_payload_legacy_names() {
        let payload: AgentPayload = serde_json::from_value(json!({
            "id": "a1",
            "agentClass": "scout",
            "cwd": "/srv/app",
            "cumulativeXp": 250
        }))
        .unwrap();
        assert_eq!(payload.class.as_deref(), Some("scout"));
        assert_eq!(payload.working_directory.as_deref(), Some("/srv/app"));
        assert_eq!(payload.total_xp, Some(250));
    }

    #[test]
    fn test_agent_list_survives_loosely_typed_fields() {
        let payload: AgentListPayload = serde_json::from_value(json!({"agents": [
            {"id": "a1", "name": "Merlin", "level": 3},
            {"id": "a2", "contextUsed": 1234.5, "level": -2, "xp": "40", "isFavorite": "yes"}
        ]}))
        .unwrap();
        assert_eq!(payload.agents.len(), 2);
        let second = &payload.agents[1];
        assert_eq!(second.context_used, Some(1234));
        assert_eq!(second.level, None);
        assert_eq!(second.xp, Some(40));
        assert_eq!(second.is_favorite, Some(true));
    }

    #[test]
    fn test_raw_artifact_shapes() {
        let items: Vec<RawArtifact> = serde_json::from_value(json!([
            "src/a.ts",
            {"path": "src/b.ts", "changeType": "deleted"}
        ]))
        .unwrap();
        assert_eq!(items[0], RawArtifact::Path("src/a.ts".to_string()));
        match &items[1] {
            RawArtifact::Record(record) => {
                assert_eq!(record.path, "src/b.ts");
                assert_eq!(record.change_type.as_deref(), Some("deleted"));
                assert!(record.id.is_none());
            }
            other => panic!("expected record, got {:?}", other),
        }
    }

    #[test]
    fn test_output_lines_merge() {
        let payload = AgentOutputPayload {
            agent_id: AgentId::new("a1"),
            output: Some("one\ntwo".to_string()),
            lines: Some(vec!["zero".to_string()]),
        };
        assert_eq!(payload.lines(), vec!["zero", "one", "two"]);
    }

    #[test]
    fn test_auth_payload_omits_absent_credentials() {
        let payload = AuthPayload {
            token: None,
            connection_code: Some("ABC-123".to_string()),
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value, json!({"connectionCode": "ABC-123"}));
    }
}
