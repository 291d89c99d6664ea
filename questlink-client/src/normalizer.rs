//! Payload normalization.
//!
//! Turns the loosely-shaped agent and quest payloads the daemon sends into
//! canonical entities. Nothing in here fails: a field that cannot be
//! interpreted is logged as a [`NormalizationError`] and replaced with the
//! existing local value or a default.

use questlink_core::{
    Agent, AgentActivity, AgentClass, AgentId, AgentStatus, Artifact, ArtifactId, ChangeType,
    EnumParseError, NormalizationError, Quest, QuestId, QuestPriority, QuestStatus, Timestamp,
    XpCurve, PLACEHOLDER_AGENT_NAME,
};
use questlink_protocol::{parse_wire_time, AgentPayload, QuestPayload, RawArtifact};
use serde_json::Value;
use tracing::debug;

/// Agent id recorded on quests that arrive without any attribution.
pub const UNATTRIBUTED_AGENT_ID: &str = "unattributed";

const UNTITLED_QUEST: &str = "Untitled quest";

#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    curve: XpCurve,
}

impl Normalizer {
    pub fn new(curve: XpCurve) -> Self {
        Self { curve }
    }

    pub fn curve(&self) -> &XpCurve {
        &self.curve
    }

    /// Build the canonical agent for `payload`, merged with the local record if any.
    ///
    /// Structural fields the payload omits keep their local value so partial
    /// updates never clobber one another. Ephemeral fields (thoughts, output,
    /// replies, last thought, pending question) likewise prefer the local record.
    pub fn agent(&self, payload: &AgentPayload, existing: Option<&Agent>, now: Timestamp) -> Agent {
        let name = payload
            .name
            .clone()
            .filter(|name| !name.trim().is_empty())
            .or_else(|| existing.map(|a| a.name.clone()))
            .unwrap_or_else(|| PLACEHOLDER_AGENT_NAME.to_string());
        let class = payload
            .class
            .as_deref()
            .and_then(|raw| parsed("class", raw, AgentClass::parse))
            .or_else(|| existing.map(|a| a.class))
            .unwrap_or_default();

        let mut agent = Agent::new(payload.id.clone(), name, class, now);

        // Structural overlay.
        agent.branch = payload
            .branch
            .clone()
            .or_else(|| existing.and_then(|a| a.branch.clone()));
        agent.working_directory = payload
            .working_directory
            .clone()
            .or_else(|| existing.and_then(|a| a.working_directory.clone()));
        if let Some(existing) = existing {
            agent.status = existing.status;
            agent.idle_since = existing.idle_since;
            agent.idle_notified = existing.idle_notified;
            agent.created_at = existing.created_at;
            agent.last_activity = existing.last_activity;
            agent.is_favorite = existing.is_favorite;
        }
        let status = payload
            .status
            .as_deref()
            .and_then(|raw| parsed("status", raw, AgentStatus::parse))
            .unwrap_or(agent.status);
        agent.set_status(status, now);

        agent.activity = match payload.activity.as_deref() {
            Some(raw) => AgentActivity::from_alias(raw),
            None => existing.map(|a| a.activity).unwrap_or_default(),
        };

        // Ephemeral fields.
        agent.thoughts = payload
            .thoughts
            .clone()
            .or_else(|| existing.map(|a| a.thoughts.clone()))
            .unwrap_or_default();
        agent.output_buffer = payload
            .output_buffer
            .clone()
            .or_else(|| existing.map(|a| a.output_buffer.clone()))
            .unwrap_or_default();
        agent.quick_replies = payload
            .quick_replies
            .clone()
            .or_else(|| existing.map(|a| a.quick_replies.clone()))
            .unwrap_or_default();
        agent.last_thought = payload
            .last_thought
            .clone()
            .or_else(|| existing.and_then(|a| a.last_thought.clone()))
            .or_else(|| agent.thoughts.last().cloned());
        agent.pending_question = payload
            .pending_question
            .clone()
            .or_else(|| existing.and_then(|a| a.pending_question.clone()));
        agent.enforce_caps();

        agent.context_used = payload
            .context_used
            .or_else(|| existing.map(|a| a.context_used))
            .unwrap_or(0);
        agent.context_total = payload
            .context_total
            .or_else(|| existing.map(|a| a.context_total))
            .unwrap_or(0);

        self.overlay_progress(&mut agent, payload, existing);

        if let Some(created_at) = payload
            .created_at
            .as_ref()
            .and_then(|v| timestamp("createdAt", v))
        {
            agent.created_at = created_at;
        }
        if existing.is_none() {
            agent.is_favorite = payload.is_favorite.unwrap_or(false);
        }
        agent
    }

    fn overlay_progress(
        &self,
        agent: &mut Agent,
        payload: &AgentPayload,
        existing: Option<&Agent>,
    ) {
        agent.level = payload
            .level
            .or_else(|| existing.map(|a| a.level))
            .unwrap_or(1)
            .max(1);
        agent.talent_points = payload
            .talent_points
            .or_else(|| existing.map(|a| a.talent_points))
            .unwrap_or(0);

        let threshold = self.curve.xp_to_next_level(agent.level);
        agent.xp = match (payload.total_xp, payload.xp) {
            (Some(total), _) => self.curve.rebase_cumulative_xp(total, agent.level),
            // A per-level value can never reach the threshold, so this one is cumulative.
            (None, Some(xp)) if xp >= threshold && agent.level > 1 => {
                self.curve.rebase_cumulative_xp(xp, agent.level)
            }
            (None, Some(xp)) => xp,
            (None, None) => existing.map(|a| a.xp).unwrap_or(0),
        };
        agent.xp_to_next_level = threshold;
        let carried = self.curve.normalize_progress(agent);
        if carried > 0 {
            debug!(agent_id = %agent.id, levels = carried, "Carried reported xp into levels");
        }
    }

    /// Build the canonical quest for `payload`, merged with the local record if any.
    pub fn quest(&self, payload: &QuestPayload, existing: Option<&Quest>, now: Timestamp) -> Quest {
        let agent_id = payload
            .agent_id
            .clone()
            .filter(|id| !id.is_empty())
            .or_else(|| existing.map(|q| q.agent_id.clone()))
            .unwrap_or_else(|| AgentId::new(UNATTRIBUTED_AGENT_ID));
        let title = payload
            .title
            .clone()
            .filter(|title| !title.trim().is_empty())
            .or_else(|| existing.map(|q| q.title.clone()))
            .unwrap_or_else(|| UNTITLED_QUEST.to_string());

        let mut quest = match existing {
            Some(existing) => Quest {
                agent_id,
                title,
                ..existing.clone()
            },
            None => Quest::new(payload.id.clone(), agent_id, title, now),
        };

        if payload.description.is_some() {
            quest.description = payload.description.clone();
        }
        if let Some(status) = payload
            .status
            .as_deref()
            .and_then(|raw| parsed("quest status", raw, QuestStatus::parse))
        {
            quest.status = status;
        }
        if let Some(priority) = payload
            .priority
            .as_deref()
            .and_then(|raw| parsed("priority", raw, QuestPriority::parse))
        {
            quest.priority = priority;
        }
        if !payload.artifacts.is_empty() {
            quest.artifacts = self.artifacts(&quest.id, &payload.artifacts);
        }
        if let Some(xp_reward) = payload.xp_reward {
            quest.xp_reward = xp_reward;
        }
        if let Some(started_at) = payload
            .started_at
            .as_ref()
            .and_then(|v| timestamp("startedAt", v))
        {
            quest.started_at = started_at;
        }
        if let Some(completed_at) = payload
            .completed_at
            .as_ref()
            .and_then(|v| timestamp("completedAt", v))
        {
            quest.completed_at = Some(completed_at);
        }
        quest
    }

    pub fn artifacts(&self, quest_id: &QuestId, raw: &[RawArtifact]) -> Vec<Artifact> {
        raw.iter()
            .enumerate()
            .map(|(index, raw)| normalize_artifact(quest_id, index, raw))
            .collect()
    }
}

/// Normalize one artifact. Bare paths and partial records get a synthetic
/// `"{questId}-artifact-{index}"` id and `modified` as the change type.
pub fn normalize_artifact(quest_id: &QuestId, index: usize, raw: &RawArtifact) -> Artifact {
    match raw {
        RawArtifact::Path(path) => Artifact {
            id: ArtifactId::synthetic(quest_id, index),
            path: path.clone(),
            change_type: ChangeType::default(),
            lines_changed: None,
            preview: None,
        },
        RawArtifact::Record(record) => Artifact {
            id: record
                .id
                .clone()
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| ArtifactId::synthetic(quest_id, index)),
            path: record.path.clone(),
            change_type: record
                .change_type
                .as_deref()
                .and_then(|raw| parsed("changeType", raw, ChangeType::parse))
                .unwrap_or_default(),
            lines_changed: record.lines_changed,
            preview: record.preview.clone(),
        },
    }
}

/// Parse an enum-like field, logging and discarding values that do not parse.
pub(crate) fn parsed<T>(
    field: &'static str,
    raw: &str,
    parse: impl FnOnce(&str) -> Result<T, EnumParseError>,
) -> Option<T> {
    match parse(raw) {
        Ok(value) => Some(value),
        Err(_) => {
            let err = NormalizationError::InvalidField {
                field,
                value: raw.to_string(),
            };
            debug!(error = %err, "Falling back to default");
            None
        }
    }
}

fn timestamp(field: &'static str, value: &Value) -> Option<Timestamp> {
    let parsed = parse_wire_time(value);
    if parsed.is_none() {
        let err = NormalizationError::InvalidField {
            field,
            value: value.to_string(),
        };
        debug!(error = %err, "Falling back to default");
    }
    parsed
}
