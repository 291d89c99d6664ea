//! Identity types for Questlink entities
//!
//! Remote ids are opaque strings chosen by the daemon, so every id is a
//! transparent string newtype rather than a UUID.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Current wall-clock time.
pub fn now() -> Timestamp {
    Utc::now()
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_empty(&self) -> bool {
                self.0.trim().is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Identifier of a remote agent.
    AgentId
);
string_id!(
    /// Identifier of a quest.
    QuestId
);
string_id!(
    /// Identifier of a daemon connection record.
    ConnectionId
);
string_id!(
    /// Identifier of an activity log entry.
    ActivityId
);
string_id!(
    /// Identifier of a quest artifact.
    ArtifactId
);
string_id!(
    /// Identifier of a loot record derived from a completed quest.
    LootId
);

impl ActivityId {
    /// Generate a fresh, time-sortable activity id.
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }
}

impl ConnectionId {
    /// Generate a fresh connection id.
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }
}

impl ArtifactId {
    /// Synthetic id for an artifact that arrived without one.
    pub fn synthetic(quest_id: &QuestId, index: usize) -> Self {
        Self(format!("{}-artifact-{}", quest_id, index))
    }
}

impl LootId {
    /// Deterministic id for the loot derived from the `index`th artifact of a quest.
    pub fn for_artifact(quest_id: &QuestId, index: usize) -> Self {
        Self(format!("{}-loot-{}", quest_id, index))
    }
}
