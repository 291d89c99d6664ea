//! Core entity structures

use crate::{
    ActivityId, ActivityType, AgentActivity, AgentClass, AgentId, AgentStatus, ArtifactId,
    ChangeType, ConnectionId, ConnectionStatus, LootId, QuestId, QuestPriority, QuestStatus,
    Timestamp, XpCurve,
};
use serde::{Deserialize, Serialize};

/// Maximum number of thoughts retained per agent (newest kept).
pub const MAX_THOUGHTS: usize = 50;

/// Maximum number of output lines retained per agent (newest kept).
pub const MAX_OUTPUT_LINES: usize = 500;

/// Name given to agents materialized from a reference to an unknown id.
pub const PLACEHOLDER_AGENT_NAME: &str = "Unknown Agent";

/// A remote coding agent mirrored locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    pub id: AgentId,
    pub name: String,
    pub class: AgentClass,
    pub status: AgentStatus,
    pub activity: AgentActivity,
    pub branch: Option<String>,
    pub working_directory: Option<String>,
    pub last_thought: Option<String>,
    pub pending_question: Option<String>,
    pub quick_replies: Vec<String>,
    pub thoughts: Vec<String>,
    pub output_buffer: Vec<String>,
    pub context_used: u64,
    pub context_total: u64,
    /// Experience within the current level.
    pub xp: u64,
    pub level: u32,
    pub xp_to_next_level: u64,
    pub talent_points: u32,
    /// Set only while `status == Dormant`.
    pub idle_since: Option<Timestamp>,
    /// Whether the current idle window already produced a notification.
    #[serde(default)]
    pub idle_notified: bool,
    /// Materialized from a reference before any agent payload was seen.
    #[serde(default)]
    pub placeholder: bool,
    pub created_at: Timestamp,
    pub last_activity: Timestamp,
    pub is_favorite: bool,
}

impl Agent {
    /// Create a fresh level-1 agent.
    pub fn new(id: AgentId, name: impl Into<String>, class: AgentClass, now: Timestamp) -> Self {
        Self {
            id,
            name: name.into(),
            class,
            status: AgentStatus::Spawning,
            activity: AgentActivity::Idle,
            branch: None,
            working_directory: None,
            last_thought: None,
            pending_question: None,
            quick_replies: Vec::new(),
            thoughts: Vec::new(),
            output_buffer: Vec::new(),
            context_used: 0,
            context_total: 0,
            xp: 0,
            level: 1,
            xp_to_next_level: XpCurve::default().xp_to_next_level(1),
            talent_points: 0,
            idle_since: None,
            idle_notified: false,
            placeholder: false,
            created_at: now,
            last_activity: now,
            is_favorite: false,
        }
    }

    /// Best-effort stand-in for an agent that was referenced before it was seen.
    pub fn placeholder(id: AgentId, now: Timestamp) -> Self {
        let mut agent = Self::new(id, PLACEHOLDER_AGENT_NAME, AgentClass::default(), now);
        agent.placeholder = true;
        agent
    }

    pub fn is_placeholder(&self) -> bool {
        self.placeholder
    }

    /// Set the status, maintaining the idle window bookkeeping.
    ///
    /// Returns `true` when the status actually changed.
    pub fn set_status(&mut self, status: AgentStatus, now: Timestamp) -> bool {
        let changed = self.status != status;
        self.status = status;
        if status == AgentStatus::Dormant {
            if changed || self.idle_since.is_none() {
                self.idle_since = Some(now);
                self.idle_notified = false;
            }
        } else {
            self.idle_since = None;
            self.idle_notified = false;
        }
        if changed {
            self.last_activity = now;
        }
        changed
    }

    /// Append a thought, keeping only the newest [`MAX_THOUGHTS`].
    pub fn push_thought(&mut self, thought: impl Into<String>) {
        let thought = thought.into();
        self.last_thought = Some(thought.clone());
        self.thoughts.push(thought);
        trim_front(&mut self.thoughts, MAX_THOUGHTS);
    }

    /// Append output lines, keeping only the newest [`MAX_OUTPUT_LINES`].
    pub fn append_output<I, S>(&mut self, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_buffer.extend(lines.into_iter().map(Into::into));
        trim_front(&mut self.output_buffer, MAX_OUTPUT_LINES);
    }

    /// Enforce list caps on data that came from elsewhere (server payloads, storage).
    pub fn enforce_caps(&mut self) {
        trim_front(&mut self.thoughts, MAX_THOUGHTS);
        trim_front(&mut self.output_buffer, MAX_OUTPUT_LINES);
    }

    /// Fraction of the context window in use, if the total is known.
    pub fn context_ratio(&self) -> Option<f64> {
        if self.context_total == 0 {
            None
        } else {
            Some(self.context_used as f64 / self.context_total as f64)
        }
    }
}

fn trim_front<T>(items: &mut Vec<T>, cap: usize) {
    if items.len() > cap {
        let excess = items.len() - cap;
        items.drain(..excess);
    }
}

/// A file touched while completing a quest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    pub id: ArtifactId,
    pub path: String,
    pub change_type: ChangeType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lines_changed: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
}

/// A discrete unit of work assigned to an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quest {
    pub id: QuestId,
    /// Weak reference; the agent may have been removed since.
    pub agent_id: AgentId,
    pub title: String,
    pub description: Option<String>,
    pub status: QuestStatus,
    pub priority: QuestPriority,
    pub artifacts: Vec<Artifact>,
    pub xp_reward: u64,
    pub started_at: Timestamp,
    pub completed_at: Option<Timestamp>,
    pub reviewed_at: Option<Timestamp>,
    pub revision_notes: Option<String>,
}

impl Quest {
    pub fn new(id: QuestId, agent_id: AgentId, title: impl Into<String>, now: Timestamp) -> Self {
        Self {
            id,
            agent_id,
            title: title.into(),
            description: None,
            status: QuestStatus::Active,
            priority: QuestPriority::default(),
            artifacts: Vec::new(),
            xp_reward: 0,
            started_at: now,
            completed_at: None,
            reviewed_at: None,
            revision_notes: None,
        }
    }

    pub fn is_pending_review(&self) -> bool {
        self.status.is_pending_review()
    }
}

/// A daemon the client knows how to reach.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub id: ConnectionId,
    pub name: String,
    pub url: String,
    pub status: ConnectionStatus,
    pub last_connected: Option<Timestamp>,
    pub last_disconnected: Option<Timestamp>,
    pub agent_ids: Vec<AgentId>,
}

impl Connection {
    pub fn new(id: ConnectionId, name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            url: url.into(),
            status: ConnectionStatus::Disconnected,
            last_connected: None,
            last_disconnected: None,
            agent_ids: Vec::new(),
        }
    }

    /// Attribute an agent to this connection. Returns `false` if it already was.
    pub fn attach_agent(&mut self, agent_id: &AgentId) -> bool {
        if self.agent_ids.contains(agent_id) {
            return false;
        }
        self.agent_ids.push(agent_id.clone());
        true
    }

    pub fn detach_agent(&mut self, agent_id: &AgentId) -> bool {
        let before = self.agent_ids.len();
        self.agent_ids.retain(|id| id != agent_id);
        before != self.agent_ids.len()
    }
}

/// A notable transition recorded for the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEntry {
    pub id: ActivityId,
    #[serde(rename = "type")]
    pub activity_type: ActivityType,
    pub agent_id: Option<AgentId>,
    pub quest_id: Option<QuestId>,
    pub title: String,
    pub description: Option<String>,
    pub timestamp: Timestamp,
    pub is_read: bool,
}

impl ActivityEntry {
    pub fn new(activity_type: ActivityType, title: impl Into<String>, now: Timestamp) -> Self {
        Self {
            id: ActivityId::generate(),
            activity_type,
            agent_id: None,
            quest_id: None,
            title: title.into(),
            description: None,
            timestamp: now,
            is_read: false,
        }
    }

    pub fn with_agent(mut self, agent_id: AgentId) -> Self {
        self.agent_id = Some(agent_id);
        self
    }

    pub fn with_quest(mut self, quest_id: QuestId) -> Self {
        self.quest_id = Some(quest_id);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Reward record derived from one artifact of a completed quest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Loot {
    pub id: LootId,
    pub quest_id: QuestId,
    pub agent_id: AgentId,
    pub artifact: Artifact,
    /// Portion of the quest's xp reward attributed to this artifact.
    pub xp_share: u64,
    pub obtained_at: Timestamp,
}
