//! Enum types for Questlink entities

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Error when a wire string does not name any variant of an enum.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid {kind}: {value}")]
pub struct EnumParseError {
    pub kind: &'static str,
    pub value: String,
}

impl EnumParseError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

fn normalize_key(s: &str) -> String {
    s.trim().to_ascii_lowercase().replace(['-', ' '], "_")
}

macro_rules! wire_enum_traits {
    ($name:ident) => {
        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = EnumParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }
    };
}

// ============================================================================
// AGENT ENUMS
// ============================================================================

/// Archetype of a remote agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgentClass {
    #[default]
    Mage,
    Architect,
    Engineer,
    Scout,
    Guardian,
    Artisan,
}

impl AgentClass {
    pub const ALL: [AgentClass; 6] = [
        AgentClass::Mage,
        AgentClass::Architect,
        AgentClass::Engineer,
        AgentClass::Scout,
        AgentClass::Guardian,
        AgentClass::Artisan,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentClass::Mage => "mage",
            AgentClass::Architect => "architect",
            AgentClass::Engineer => "engineer",
            AgentClass::Scout => "scout",
            AgentClass::Guardian => "guardian",
            AgentClass::Artisan => "artisan",
        }
    }

    pub fn parse(s: &str) -> Result<Self, EnumParseError> {
        match normalize_key(s).as_str() {
            "mage" => Ok(AgentClass::Mage),
            "architect" => Ok(AgentClass::Architect),
            "engineer" => Ok(AgentClass::Engineer),
            "scout" => Ok(AgentClass::Scout),
            "guardian" => Ok(AgentClass::Guardian),
            "artisan" => Ok(AgentClass::Artisan),
            _ => Err(EnumParseError::new("agent class", s)),
        }
    }
}

wire_enum_traits!(AgentClass);

/// Lifecycle status of a remote agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Agent process is starting up
    #[default]
    Spawning,
    /// Agent is actively working
    Channeling,
    /// Agent is alive but has nothing to do
    Dormant,
    /// Agent is blocked on a question for the user
    Awaiting,
    /// Agent finished its task
    Complete,
    /// Agent hit an unrecoverable error
    Error,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Spawning => "spawning",
            AgentStatus::Channeling => "channeling",
            AgentStatus::Dormant => "dormant",
            AgentStatus::Awaiting => "awaiting",
            AgentStatus::Complete => "complete",
            AgentStatus::Error => "error",
        }
    }

    /// Parse a status, accepting the legacy names older daemons send.
    pub fn parse(s: &str) -> Result<Self, EnumParseError> {
        match normalize_key(s).as_str() {
            "spawning" | "starting" => Ok(AgentStatus::Spawning),
            "channeling" | "working" | "active" => Ok(AgentStatus::Channeling),
            "dormant" | "idle" => Ok(AgentStatus::Dormant),
            "awaiting" | "waiting" | "blocked" => Ok(AgentStatus::Awaiting),
            "complete" | "completed" | "done" => Ok(AgentStatus::Complete),
            "error" | "failed" => Ok(AgentStatus::Error),
            _ => Err(EnumParseError::new("agent status", s)),
        }
    }

    /// Whether the agent needs the user's attention in this status.
    pub fn needs_attention(&self) -> bool {
        matches!(self, AgentStatus::Awaiting | AgentStatus::Error)
    }
}

wire_enum_traits!(AgentStatus);

/// Fine-grained activity reported while an agent works.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgentActivity {
    #[default]
    Idle,
    Thinking,
    Researching,
    Reading,
    Writing,
    Testing,
    Building,
    Git,
    Waiting,
    Error,
}

impl AgentActivity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentActivity::Idle => "idle",
            AgentActivity::Thinking => "thinking",
            AgentActivity::Researching => "researching",
            AgentActivity::Reading => "reading",
            AgentActivity::Writing => "writing",
            AgentActivity::Testing => "testing",
            AgentActivity::Building => "building",
            AgentActivity::Git => "git",
            AgentActivity::Waiting => "waiting",
            AgentActivity::Error => "error",
        }
    }

    /// Strict parse of a canonical activity name.
    pub fn parse(s: &str) -> Result<Self, EnumParseError> {
        match normalize_key(s).as_str() {
            "idle" => Ok(AgentActivity::Idle),
            "thinking" => Ok(AgentActivity::Thinking),
            "researching" => Ok(AgentActivity::Researching),
            "reading" => Ok(AgentActivity::Reading),
            "writing" => Ok(AgentActivity::Writing),
            "testing" => Ok(AgentActivity::Testing),
            "building" => Ok(AgentActivity::Building),
            "git" => Ok(AgentActivity::Git),
            "waiting" => Ok(AgentActivity::Waiting),
            "error" => Ok(AgentActivity::Error),
            _ => Err(EnumParseError::new("agent activity", s)),
        }
    }

    /// Resolve an activity through the alias table. Anything unrecognized is `Idle`.
    pub fn from_alias(s: &str) -> Self {
        if let Ok(activity) = Self::parse(s) {
            return activity;
        }
        match normalize_key(s).as_str() {
            "searching" | "search" | "grep" | "browsing" | "exploring" => {
                AgentActivity::Researching
            }
            "planning" | "reasoning" | "analyzing" => AgentActivity::Thinking,
            "editing" | "coding" | "refactoring" => AgentActivity::Writing,
            "viewing" | "scanning" => AgentActivity::Reading,
            "running_tests" | "test" => AgentActivity::Testing,
            "compiling" | "build" => AgentActivity::Building,
            "committing" | "pushing" | "branching" => AgentActivity::Git,
            "blocked" | "paused" => AgentActivity::Waiting,
            "failed" | "crashed" => AgentActivity::Error,
            _ => AgentActivity::Idle,
        }
    }
}

wire_enum_traits!(AgentActivity);

// ============================================================================
// QUEST ENUMS
// ============================================================================

/// Status of a quest. Variants are mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum QuestStatus {
    #[default]
    Active,
    /// Finished by the agent and waiting for review
    Complete,
    Accepted,
    Revising,
    Failed,
}

impl QuestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestStatus::Active => "active",
            QuestStatus::Complete => "complete",
            QuestStatus::Accepted => "accepted",
            QuestStatus::Revising => "revising",
            QuestStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self, EnumParseError> {
        match normalize_key(s).as_str() {
            "active" | "in_progress" => Ok(QuestStatus::Active),
            "complete" | "completed" | "pending_review" => Ok(QuestStatus::Complete),
            "accepted" | "approved" => Ok(QuestStatus::Accepted),
            "revising" | "revision" | "rejected" => Ok(QuestStatus::Revising),
            "failed" | "error" => Ok(QuestStatus::Failed),
            _ => Err(EnumParseError::new("quest status", s)),
        }
    }

    /// Linear lifecycle: `active -> complete -> accepted | revising -> active -> ...`
    pub fn can_transition_to(&self, next: QuestStatus) -> bool {
        use QuestStatus::*;
        matches!(
            (self, next),
            (Active, Complete)
                | (Active, Failed)
                | (Complete, Accepted)
                | (Complete, Revising)
                | (Revising, Active)
                | (Revising, Complete)
        )
    }

    pub fn is_pending_review(&self) -> bool {
        matches!(self, QuestStatus::Complete)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, QuestStatus::Accepted | QuestStatus::Failed)
    }
}

wire_enum_traits!(QuestStatus);

/// Relative urgency the daemon assigns to a quest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum QuestPriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl QuestPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestPriority::Low => "low",
            QuestPriority::Normal => "normal",
            QuestPriority::High => "high",
            QuestPriority::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Result<Self, EnumParseError> {
        match normalize_key(s).as_str() {
            "low" | "minor" => Ok(QuestPriority::Low),
            "normal" | "medium" => Ok(QuestPriority::Normal),
            "high" | "major" => Ok(QuestPriority::High),
            "critical" | "urgent" | "epic" => Ok(QuestPriority::Critical),
            _ => Err(EnumParseError::new("quest priority", s)),
        }
    }
}

wire_enum_traits!(QuestPriority);

/// How a quest artifact changed the file it points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Created,
    #[default]
    Modified,
    Deleted,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Created => "created",
            ChangeType::Modified => "modified",
            ChangeType::Deleted => "deleted",
        }
    }

    pub fn parse(s: &str) -> Result<Self, EnumParseError> {
        match normalize_key(s).as_str() {
            "created" | "added" | "new" => Ok(ChangeType::Created),
            "modified" | "changed" | "updated" => Ok(ChangeType::Modified),
            "deleted" | "removed" => Ok(ChangeType::Deleted),
            _ => Err(EnumParseError::new("change type", s)),
        }
    }
}

wire_enum_traits!(ChangeType);

// ============================================================================
// CONNECTION AND ACTIVITY ENUMS
// ============================================================================

/// Status of the link to a daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Error,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Reconnecting => "reconnecting",
            ConnectionStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Result<Self, EnumParseError> {
        match normalize_key(s).as_str() {
            "disconnected" => Ok(ConnectionStatus::Disconnected),
            "connecting" => Ok(ConnectionStatus::Connecting),
            "connected" => Ok(ConnectionStatus::Connected),
            "reconnecting" => Ok(ConnectionStatus::Reconnecting),
            "error" => Ok(ConnectionStatus::Error),
            _ => Err(EnumParseError::new("connection status", s)),
        }
    }

    /// A connection attempt is underway or established.
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            ConnectionStatus::Connecting
                | ConnectionStatus::Connected
                | ConnectionStatus::Reconnecting
        )
    }
}

wire_enum_traits!(ConnectionStatus);

/// Kind of notable transition recorded in the activity log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    AgentSpawned,
    AgentKilled,
    AgentQuestion,
    AgentError,
    AgentIdle,
    QuestStarted,
    QuestComplete,
    QuestAccepted,
    QuestRevision,
    QuestFailed,
    LevelUp,
    ConnectionLost,
}

impl ActivityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityType::AgentSpawned => "agent_spawned",
            ActivityType::AgentKilled => "agent_killed",
            ActivityType::AgentQuestion => "agent_question",
            ActivityType::AgentError => "agent_error",
            ActivityType::AgentIdle => "agent_idle",
            ActivityType::QuestStarted => "quest_started",
            ActivityType::QuestComplete => "quest_complete",
            ActivityType::QuestAccepted => "quest_accepted",
            ActivityType::QuestRevision => "quest_revision",
            ActivityType::QuestFailed => "quest_failed",
            ActivityType::LevelUp => "level_up",
            ActivityType::ConnectionLost => "connection_lost",
        }
    }

    pub fn parse(s: &str) -> Result<Self, EnumParseError> {
        match normalize_key(s).as_str() {
            "agent_spawned" => Ok(ActivityType::AgentSpawned),
            "agent_killed" => Ok(ActivityType::AgentKilled),
            "agent_question" => Ok(ActivityType::AgentQuestion),
            "agent_error" => Ok(ActivityType::AgentError),
            "agent_idle" => Ok(ActivityType::AgentIdle),
            "quest_started" => Ok(ActivityType::QuestStarted),
            "quest_complete" => Ok(ActivityType::QuestComplete),
            "quest_accepted" => Ok(ActivityType::QuestAccepted),
            "quest_revision" => Ok(ActivityType::QuestRevision),
            "quest_failed" => Ok(ActivityType::QuestFailed),
            "level_up" => Ok(ActivityType::LevelUp),
            "connection_lost" => Ok(ActivityType::ConnectionLost),
            _ => Err(EnumParseError::new("activity type", s)),
        }
    }
}

wire_enum_traits!(ActivityType);
