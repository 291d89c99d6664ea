//! Questlink Test Utilities
//!
//! Shared test infrastructure for the Questlink workspace:
//! - Proptest generators for ids, enums and wire payloads
//! - Fixtures producing daemon messages as JSON text
//! - Assertions for entity invariants

pub use questlink_core::{
    Agent, AgentActivity, AgentClass, AgentId, AgentStatus, ChangeType, QuestId, QuestStatus,
    Timestamp, XpCurve,
};
pub use questlink_protocol::{decode, Envelope, MessageType};

use serde_json::{json, Value};

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for Questlink ids, enums and wire payloads.

    use super::*;
    use proptest::prelude::*;

    /// Generate a short agent id from a small pool, so collisions happen.
    pub fn arb_agent_id() -> impl Strategy<Value = AgentId> {
        (0u8..6).prop_map(|n| AgentId::new(format!("agent-{}", n)))
    }

    pub fn arb_quest_id() -> impl Strategy<Value = QuestId> {
        (0u8..6).prop_map(|n| QuestId::new(format!("quest-{}", n)))
    }

    pub fn arb_agent_class() -> impl Strategy<Value = AgentClass> {
        prop::sample::select(AgentClass::ALL.to_vec())
    }

    pub fn arb_agent_status() -> impl Strategy<Value = AgentStatus> {
        prop_oneof![
            Just(AgentStatus::Spawning),
            Just(AgentStatus::Channeling),
            Just(AgentStatus::Dormant),
            Just(AgentStatus::Awaiting),
            Just(AgentStatus::Complete),
            Just(AgentStatus::Error),
        ]
    }

    /// Activity strings as a daemon might send them, canonical or legacy.
    pub fn arb_activity_string() -> impl Strategy<Value = String> {
        prop_oneof![
            Just("thinking".to_string()),
            Just("searching".to_string()),
            Just("editing".to_string()),
            Just("compiling".to_string()),
            Just("committing".to_string()),
            Just("blocked".to_string()),
            "[a-z_]{1,12}",
        ]
    }

    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        // 2020-2030
        (1577836800i64..1893456000i64).prop_map(|secs| {
            chrono::DateTime::from_timestamp(secs, 0).unwrap_or_else(chrono::Utc::now)
        })
    }

    /// A raw artifact: either a bare path or a partial record.
    pub fn arb_raw_artifact() -> impl Strategy<Value = Value> {
        let path = "[a-z]{1,8}/[a-z]{1,8}\\.(rs|ts|md)";
        prop_oneof![
            path.prop_map(Value::String),
            (
                path,
                prop::option::of(prop::sample::select(vec![
                    "created", "modified", "deleted", "renamed",
                ])),
                prop::option::of(0u32..500),
            )
                .prop_map(|(path, change, lines)| {
                    let mut record = json!({ "path": path });
                    if let Some(change) = change {
                        record["changeType"] = json!(change);
                    }
                    if let Some(lines) = lines {
                        record["linesChanged"] = json!(lines);
                    }
                    record
                }),
        ]
    }

    /// A well-formed inbound daemon message as JSON text.
    pub fn arb_inbound_message() -> impl Strategy<Value = String> {
        prop_oneof![
            (arb_agent_id(), "[A-Z][a-z]{2,8}", arb_agent_class())
                .prop_map(|(id, name, class)| fixtures::agent_spawned(&id, &name, class)),
            (arb_agent_id(), arb_agent_status())
                .prop_map(|(id, status)| fixtures::agent_status_change(&id, status)),
            (arb_agent_id(), arb_activity_string())
                .prop_map(|(id, activity)| fixtures::agent_activity_change(&id, &activity)),
            (arb_agent_id(), 0u64..400).prop_map(|(id, xp)| fixtures::agent_progress(&id, xp)),
            (arb_agent_id(), "[a-z ]{1,20}")
                .prop_map(|(id, line)| fixtures::agent_output(&id, &line)),
            arb_agent_id().prop_map(|id| fixtures::agent_killed(&id)),
            (arb_quest_id(), arb_agent_id())
                .prop_map(|(quest, agent)| fixtures::quest_started(&quest, &agent, "Fix it")),
            (
                arb_quest_id(),
                arb_agent_id(),
                0u64..300,
                prop::collection::vec(arb_raw_artifact(), 0..4)
            )
                .prop_map(|(quest, agent, xp, artifacts)| {
                    fixtures::quest_complete(&quest, &agent, xp, artifacts)
                }),
            arb_quest_id().prop_map(|id| fixtures::quest_accepted(&id)),
        ]
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Daemon messages as wire text.

    use super::*;

    /// Wrap a payload in an envelope with a fixed timestamp.
    pub fn envelope(message_type: MessageType, payload: Value) -> String {
        json!({
            "type": message_type.as_str(),
            "payload": payload,
            "timestamp": 1_700_000_000_000i64,
        })
        .to_string()
    }

    pub fn agent_spawned(id: &AgentId, name: &str, class: AgentClass) -> String {
        envelope(
            MessageType::AgentSpawned,
            json!({ "agent": { "id": id.as_str(), "name": name, "class": class.as_str() } }),
        )
    }

    pub fn agent_update(id: &AgentId, status: AgentStatus) -> String {
        envelope(
            MessageType::AgentUpdate,
            json!({ "agent": { "id": id.as_str(), "status": status.as_str() } }),
        )
    }

    pub fn agent_status_change(id: &AgentId, status: AgentStatus) -> String {
        envelope(
            MessageType::AgentStatusChange,
            json!({ "agentId": id.as_str(), "status": status.as_str() }),
        )
    }

    pub fn agent_activity_change(id: &AgentId, activity: &str) -> String {
        envelope(
            MessageType::AgentActivityChange,
            json!({ "agentId": id.as_str(), "activity": activity }),
        )
    }

    pub fn agent_progress(id: &AgentId, xp_gained: u64) -> String {
        envelope(
            MessageType::AgentProgress,
            json!({ "agentId": id.as_str(), "xpGained": xp_gained }),
        )
    }

    pub fn agent_output(id: &AgentId, output: &str) -> String {
        envelope(
            MessageType::AgentOutput,
            json!({ "agentId": id.as_str(), "output": output }),
        )
    }

    pub fn agent_killed(id: &AgentId) -> String {
        envelope(MessageType::AgentKilled, json!({ "agentId": id.as_str() }))
    }

    pub fn quest_started(id: &QuestId, agent_id: &AgentId, title: &str) -> String {
        envelope(
            MessageType::QuestStarted,
            json!({ "quest": { "id": id.as_str(), "agentId": agent_id.as_str(), "title": title } }),
        )
    }

    pub fn quest_complete(
        id: &QuestId,
        agent_id: &AgentId,
        xp_reward: u64,
        artifacts: Vec<Value>,
    ) -> String {
        envelope(
            MessageType::QuestComplete,
            json!({ "quest": {
                "id": id.as_str(),
                "agentId": agent_id.as_str(),
                "xpReward": xp_reward,
                "artifacts": artifacts,
            } }),
        )
    }

    pub fn quest_accepted(id: &QuestId) -> String {
        envelope(MessageType::QuestAccepted, json!({ "questId": id.as_str() }))
    }

    /// Decode fixture text, panicking on failure.
    pub fn decoded(text: &str) -> Envelope {
        match decode(text) {
            Ok(envelope) => envelope,
            Err(err) => panic!("fixture did not decode: {} ({})", err, text),
        }
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Invariant checks for Questlink entities.

    use super::*;

    /// Assert the leveling invariants `level >= 1` and `0 <= xp < xp_to_next_level`.
    #[track_caller]
    pub fn assert_progress_invariants(agent: &Agent, curve: &XpCurve) {
        assert!(agent.level >= 1, "level must be at least 1: {:?}", agent.level);
        assert_eq!(
            agent.xp_to_next_level,
            curve.xp_to_next_level(agent.level),
            "xp_to_next_level out of date for {}",
            agent.id
        );
        assert!(
            agent.xp < agent.xp_to_next_level,
            "xp {} not below threshold {} for {}",
            agent.xp,
            agent.xp_to_next_level,
            agent.id
        );
    }

    /// Assert `idle_since` is set exactly while the agent is dormant.
    #[track_caller]
    pub fn assert_idle_bookkeeping(agent: &Agent) {
        let dormant = agent.status == AgentStatus::Dormant;
        assert_eq!(
            agent.idle_since.is_some(),
            dormant,
            "idle_since {:?} inconsistent with status {} for {}",
            agent.idle_since,
            agent.status,
            agent.id
        );
        if !dormant {
            assert!(!agent.idle_notified, "idle flag left set on {}", agent.id);
        }
    }

    /// Assert the thought and output caps hold.
    #[track_caller]
    pub fn assert_buffer_caps(agent: &Agent) {
        assert!(agent.thoughts.len() <= questlink_core::MAX_THOUGHTS);
        assert!(agent.output_buffer.len() <= questlink_core::MAX_OUTPUT_LINES);
    }
}
