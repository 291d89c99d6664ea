//! State reconciler.
//!
//! [`Reconciler::apply`] is the single dispatch point for inbound envelopes and
//! [`Reconciler::command`] for UI commands. Both run on the session task, one
//! call at a time, against the [`Registries`] they are handed.
//!
//! Side effects (activity entries, [`SyncEvent`]s) fire once per transition,
//! not once per message: replaying a message that reports an already-current
//! state records nothing new.

use crate::normalizer::{parsed, Normalizer, UNATTRIBUTED_AGENT_ID};
use crate::registry::Registries;
use questlink_core::{
    ActivityEntry, ActivityId, ActivityType, Agent, AgentActivity, AgentClass, AgentId,
    AgentStatus, ConnectionId, ConnectionStatus, LevelUpResult, Loot, LootId, Quest, QuestId,
    QuestStatus, ReconciliationError, Timestamp,
};
use questlink_protocol::{
    AgentAnswerPayload, AgentEventPayload, AgentInputPayload, AgentListPayload,
    AgentProgressPayload, AgentQuestionPayload, AgentRefPayload, AgentSpawnPayload,
    AgentStatusChangePayload, Envelope, ErrorPayload, Message, QuestEventPayload,
    QuestPayload, QuestProgressPayload, QuestRefPayload, QuestReviewPayload, QuestRevisionPayload,
    ReviewAction,
};
use std::collections::BTreeSet;
use tracing::{debug, info, trace, warn};

/// Externally observable side effects, consumed by sound, haptic and
/// notification collaborators.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    AgentSpawned {
        agent_id: AgentId,
        name: String,
    },
    AgentKilled {
        agent_id: AgentId,
    },
    AgentNeedsAttention {
        agent_id: AgentId,
        question: Option<String>,
    },
    AgentErrored {
        agent_id: AgentId,
    },
    AgentIdle {
        agent_id: AgentId,
        idle_since: Timestamp,
    },
    /// One per grant, however many levels it crossed.
    LevelUp {
        agent_id: AgentId,
        levels_gained: u32,
        new_level: u32,
    },
    QuestStarted {
        quest_id: QuestId,
        agent_id: AgentId,
    },
    QuestCompleted {
        quest_id: QuestId,
        agent_id: AgentId,
        loot: Vec<Loot>,
    },
    QuestAccepted {
        quest_id: QuestId,
    },
    QuestRevisionRequested {
        quest_id: QuestId,
        notes: Option<String>,
    },
    QuestFailed {
        quest_id: QuestId,
    },
    ConnectionChanged {
        connection_id: ConnectionId,
        status: ConnectionStatus,
        reason: Option<String>,
    },
    ServerError {
        message: String,
        code: Option<String>,
    },
}

/// Requests from the UI collaborator.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SendInput {
        agent_id: AgentId,
        input: String,
    },
    Spawn {
        name: String,
        class: AgentClass,
        working_directory: String,
        initial_task: Option<String>,
    },
    Kill {
        agent_id: AgentId,
    },
    Answer {
        agent_id: AgentId,
        answer: String,
    },
    Review {
        quest_id: QuestId,
        action: ReviewAction,
        note: Option<String>,
    },
    MarkRead {
        activity_id: ActivityId,
    },
    MarkAllRead,
    ToggleFavorite {
        agent_id: AgentId,
    },
    RemoveConnection {
        connection_id: ConnectionId,
    },
    ClearActivity,
}

impl Command {
    /// Whether the command goes to the daemon rather than staying local.
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            Command::SendInput { .. }
                | Command::Spawn { .. }
                | Command::Kill { .. }
                | Command::Answer { .. }
                | Command::Review { .. }
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct Reconciler {
    normalizer: Normalizer,
}

impl Reconciler {
    pub fn new(normalizer: Normalizer) -> Self {
        Self { normalizer }
    }

    pub fn normalizer(&self) -> &Normalizer {
        &self.normalizer
    }

    /// Apply one inbound envelope. Never fails; unusable input is a no-op.
    pub fn apply(
        &self,
        registries: &mut Registries,
        envelope: Envelope,
        now: Timestamp,
    ) -> Vec<SyncEvent> {
        let mut events = Vec::new();
        let message_type = envelope.message_type();
        trace!(message_type = %message_type, "Dispatching");
        match envelope.message {
            Message::AgentList(payload) => self.on_agent_list(registries, payload, now),
            Message::AgentSpawned(payload) => {
                self.on_agent_spawned(registries, payload, now, &mut events)
            }
            Message::AgentUpdate(payload) => {
                self.on_agent_update(registries, payload, now, &mut events)
            }
            Message::AgentKilled(payload) => on_agent_killed(registries, payload, now, &mut events),
            Message::AgentOutput(payload) => {
                let agent = registries.agent_or_placeholder(&payload.agent_id, now);
                agent.append_output(payload.lines());
                agent.last_activity = now;
            }
            Message::AgentThought(payload) => {
                let agent = registries.agent_or_placeholder(&payload.agent_id, now);
                agent.push_thought(payload.thought);
                agent.last_activity = now;
            }
            Message::AgentStatusChange(payload) => {
                on_status_change(registries, payload, now, &mut events)
            }
            Message::AgentActivityChange(payload) => {
                let agent = registries.agent_or_placeholder(&payload.agent_id, now);
                agent.activity = AgentActivity::from_alias(&payload.activity);
                agent.last_activity = now;
            }
            Message::AgentProgress(payload) => {
                self.on_progress(registries, payload, now, &mut events)
            }
            Message::AgentQuestion(payload) => on_question(registries, payload, now, &mut events),
            Message::AgentAnswer(payload) => {
                let agent = registries.agent_or_placeholder(&payload.agent_id, now);
                agent.pending_question = None;
                agent.quick_replies.clear();
                agent.last_activity = now;
            }
            Message::QuestStarted(payload) => {
                self.on_quest_started(registries, payload, now, &mut events)
            }
            Message::QuestProgress(payload) => {
                self.on_quest_progress(registries, payload, now, &mut events)
            }
            Message::QuestComplete(payload) => {
                self.on_quest_complete(registries, payload, now, &mut events)
            }
            Message::QuestAccepted(payload) => {
                on_quest_accepted(registries, payload, now, &mut events)
            }
            Message::QuestRevision(payload) => {
                on_quest_revision(registries, payload, now, &mut events)
            }
            Message::Error(ErrorPayload { message, code }) => {
                warn!(message = %message, code = ?code, "Daemon reported an error");
                events.push(SyncEvent::ServerError { message, code });
            }
            // Link-level traffic is handled by the transport; outbound-only
            // messages echoed back carry nothing to mirror.
            Message::Auth(_)
            | Message::AuthSuccess(_)
            | Message::AuthError(_)
            | Message::Heartbeat(_)
            | Message::HeartbeatAck(_)
            | Message::AgentSpawn(_)
            | Message::AgentKill(_)
            | Message::AgentInput(_)
            | Message::QuestReview(_) => {
                trace!(message_type = %message_type, "Nothing to reconcile");
            }
        }
        events
    }

    /// Handle a UI command. Remote commands yield the message to send; local
    /// ones only touch the registries.
    pub fn command(&self, registries: &mut Registries, command: Command) -> Option<Message> {
        match command {
            Command::SendInput { agent_id, input } => {
                Some(Message::AgentInput(AgentInputPayload { agent_id, input }))
            }
            Command::Spawn {
                name,
                class,
                working_directory,
                initial_task,
            } => Some(Message::AgentSpawn(AgentSpawnPayload {
                name,
                class,
                working_directory,
                initial_task,
            })),
            Command::Kill { agent_id } => Some(Message::AgentKill(AgentRefPayload { agent_id })),
            Command::Answer { agent_id, answer } => {
                Some(Message::AgentAnswer(AgentAnswerPayload { agent_id, answer }))
            }
            Command::Review {
                quest_id,
                action,
                note,
            } => Some(Message::QuestReview(QuestReviewPayload {
                quest_id,
                action,
                note,
            })),
            Command::MarkRead { activity_id } => {
                registries.activity.mark_read(&activity_id);
                None
            }
            Command::MarkAllRead => {
                registries.activity.mark_all_read();
                None
            }
            Command::ToggleFavorite { agent_id } => {
                if let Some(agent) = registries.agents.get_mut(&agent_id) {
                    agent.is_favorite = !agent.is_favorite;
                }
                None
            }
            Command::RemoveConnection { connection_id } => {
                registries.remove_connection(&connection_id);
                None
            }
            Command::ClearActivity => {
                registries.activity.clear();
                None
            }
        }
    }

    // ========================================================================
    // Agent handlers
    // ========================================================================

    fn on_agent_list(
        &self,
        registries: &mut Registries,
        payload: AgentListPayload,
        now: Timestamp,
    ) {
        let mut listed = BTreeSet::new();
        for agent_payload in &payload.agents {
            let agent = self
                .normalizer
                .agent(agent_payload, registries.agents.get(&agent_payload.id), now);
            listed.insert(agent.id.clone());
            registries.upsert_agent(agent);
        }

        let stale: Vec<AgentId> = registries
            .active_connection()
            .map(|c| {
                c.agent_ids
                    .iter()
                    .filter(|id| !listed.contains(*id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        for id in &stale {
            registries.remove_agent(id);
        }
        info!(
            agents = listed.len(),
            dropped = stale.len(),
            "Agent roster synchronized"
        );
    }

    fn on_agent_spawned(
        &self,
        registries: &mut Registries,
        payload: AgentEventPayload,
        now: Timestamp,
        events: &mut Vec<SyncEvent>,
    ) {
        let existing = registries.agents.get(&payload.agent.id);
        let first_sighting = existing.map_or(true, Agent::is_placeholder);
        let agent = self.normalizer.agent(&payload.agent, existing, now);
        let (agent_id, name) = (agent.id.clone(), agent.name.clone());
        registries.upsert_agent(agent);

        if first_sighting {
            let title = format!("{} joined the party", name);
            registries.activity.push(
                ActivityEntry::new(ActivityType::AgentSpawned, title, now)
                    .with_agent(agent_id.clone()),
            );
            events.push(SyncEvent::AgentSpawned { agent_id, name });
        } else {
            debug!(agent_id = %agent_id, "Replayed agent_spawned, updated in place");
        }
    }

    fn on_agent_update(
        &self,
        registries: &mut Registries,
        payload: AgentEventPayload,
        now: Timestamp,
        events: &mut Vec<SyncEvent>,
    ) {
        let existing = registries.agents.get(&payload.agent.id);
        let previous = existing.map(|a| a.status);
        let agent = self.normalizer.agent(&payload.agent, existing, now);
        let agent_id = agent.id.clone();
        let current = agent.status;
        registries.upsert_agent(agent);
        if previous != Some(current) {
            status_transition(registries, &agent_id, previous, current, now, events);
        }
    }

    fn on_progress(
        &self,
        registries: &mut Registries,
        payload: AgentProgressPayload,
        now: Timestamp,
        events: &mut Vec<SyncEvent>,
    ) {
        let agent = registries.agent_or_placeholder(&payload.agent_id, now);
        if let Some(used) = payload.context_used {
            agent.context_used = used;
        }
        if let Some(total) = payload.context_total {
            agent.context_total = total;
        }
        agent.last_activity = now;
        if let Some(amount) = payload.xp_gained.filter(|xp| *xp > 0) {
            self.grant_xp(registries, &payload.agent_id, amount, now, events);
        }
    }

    fn grant_xp(
        &self,
        registries: &mut Registries,
        agent_id: &AgentId,
        amount: u64,
        now: Timestamp,
        events: &mut Vec<SyncEvent>,
    ) {
        let agent = registries.agent_or_placeholder(agent_id, now);
        let result: LevelUpResult = self.normalizer.curve().grant_xp(agent, amount);
        if !result.leveled_up() {
            return;
        }
        let title = format!("{} reached level {}", agent.name, result.new_level);
        info!(
            agent_id = %agent_id,
            levels_gained = result.levels_gained,
            new_level = result.new_level,
            "Level up"
        );
        registries.activity.push(
            ActivityEntry::new(ActivityType::LevelUp, title, now).with_agent(agent_id.clone()),
        );
        events.push(SyncEvent::LevelUp {
            agent_id: agent_id.clone(),
            levels_gained: result.levels_gained,
            new_level: result.new_level,
        });
    }

    // ========================================================================
    // Quest handlers
    // ========================================================================

    fn on_quest_started(
        &self,
        registries: &mut Registries,
        payload: QuestEventPayload,
        now: Timestamp,
        events: &mut Vec<SyncEvent>,
    ) {
        let existing = registries.quests.get(&payload.quest.id);
        let previous = existing.map(|q| q.status);
        let mut quest = self.normalizer.quest(&payload.quest, existing, now);
        if payload.quest.status.is_none() {
            quest.status = QuestStatus::Active;
        }
        touch_quest_agent(registries, &quest.agent_id, now);
        let (quest_id, status) = (quest.id.clone(), quest.status);
        note_out_of_order(&quest_id, previous, status);
        registries.quests.insert(quest_id.clone(), quest);

        if previous == Some(status) {
            return;
        }
        if status == QuestStatus::Active {
            quest_started_effects(registries, &quest_id, now, events);
        } else {
            quest_status_effects(registries, &quest_id, status, now, events);
        }
    }

    fn on_quest_progress(
        &self,
        registries: &mut Registries,
        payload: QuestProgressPayload,
        now: Timestamp,
        events: &mut Vec<SyncEvent>,
    ) {
        if !registries.quests.contains_key(&payload.quest_id) {
            let err = ReconciliationError::UnknownQuest {
                quest_id: payload.quest_id.to_string(),
            };
            debug!(error = %err, "Recording quest from progress report");
            let mut seed = QuestPayload::new(payload.quest_id.clone());
            seed.agent_id = payload.agent_id.clone();
            let quest = self.normalizer.quest(&seed, None, now);
            touch_quest_agent(registries, &quest.agent_id, now);
            registries.quests.insert(payload.quest_id.clone(), quest);
            quest_started_effects(registries, &payload.quest_id, now, events);
        }
        let artifacts = payload
            .artifacts
            .as_deref()
            .map(|raw| self.normalizer.artifacts(&payload.quest_id, raw));
        if let Some(quest) = registries.quests.get_mut(&payload.quest_id) {
            if payload.description.is_some() {
                quest.description = payload.description;
            }
            if let Some(artifacts) = artifacts {
                quest.artifacts = artifacts;
            }
        }
    }

    fn on_quest_complete(
        &self,
        registries: &mut Registries,
        payload: QuestEventPayload,
        now: Timestamp,
        events: &mut Vec<SyncEvent>,
    ) {
        let existing = registries.quests.get(&payload.quest.id);
        let previous = existing.map(|q| q.status);
        let mut quest = self.normalizer.quest(&payload.quest, existing, now);
        quest.status = QuestStatus::Complete;
        if quest.completed_at.is_none() {
            quest.completed_at = Some(now);
        }
        note_out_of_order(&quest.id, previous, quest.status);
        let attributed = touch_quest_agent(registries, &quest.agent_id, now);

        if previous == Some(QuestStatus::Complete) {
            debug!(quest_id = %quest.id, "Replayed quest_complete, updated in place");
            registries.quests.insert(quest.id.clone(), quest);
            return;
        }

        let loot = materialize_loot(&quest, now);
        for item in &loot {
            registries.loot.push(item.clone());
        }
        let quest_id = quest.id.clone();
        let agent_id = quest.agent_id.clone();
        let xp_reward = quest.xp_reward;
        let title = format!("Quest complete: {}", quest.title);
        let summary = format!("{} artifacts, {} xp", quest.artifacts.len(), xp_reward);
        registries.activity.push(
            ActivityEntry::new(ActivityType::QuestComplete, title, now)
                .with_agent(agent_id.clone())
                .with_quest(quest_id.clone())
                .with_description(summary),
        );
        registries.quests.insert(quest_id.clone(), quest);
        events.push(SyncEvent::QuestCompleted {
            quest_id,
            agent_id: agent_id.clone(),
            loot,
        });
        if xp_reward > 0 && attributed {
            self.grant_xp(registries, &agent_id, xp_reward, now, events);
        }
    }
}

fn on_agent_killed(
    registries: &mut Registries,
    payload: AgentRefPayload,
    now: Timestamp,
    events: &mut Vec<SyncEvent>,
) {
    let Some(agent) = registries.remove_agent(&payload.agent_id) else {
        debug!(agent_id = %payload.agent_id, "Kill reported for unknown agent");
        return;
    };
    registries.activity.push(
        ActivityEntry::new(ActivityType::AgentKilled, format!("{} was dismissed", agent.name), now)
            .with_agent(agent.id.clone()),
    );
    events.push(SyncEvent::AgentKilled { agent_id: agent.id });
}

fn on_status_change(
    registries: &mut Registries,
    payload: AgentStatusChangePayload,
    now: Timestamp,
    events: &mut Vec<SyncEvent>,
) {
    let Some(status) = parsed("status", &payload.status, AgentStatus::parse) else {
        return;
    };
    let agent = registries.agent_or_placeholder(&payload.agent_id, now);
    let previous = agent.status;
    if agent.set_status(status, now) {
        status_transition(registries, &payload.agent_id, Some(previous), status, now, events);
    }
}

fn on_question(
    registries: &mut Registries,
    payload: AgentQuestionPayload,
    now: Timestamp,
    events: &mut Vec<SyncEvent>,
) {
    let agent = registries.agent_or_placeholder(&payload.agent_id, now);
    let repeated = agent.pending_question.as_deref() == Some(payload.question.as_str());
    agent.pending_question = Some(payload.question.clone());
    agent.quick_replies = payload.quick_replies.unwrap_or_default();
    agent.set_status(AgentStatus::Awaiting, now);
    if repeated {
        return;
    }
    let title = format!("{} has a question", agent.name);
    registries.activity.push(
        ActivityEntry::new(ActivityType::AgentQuestion, title, now)
            .with_agent(payload.agent_id.clone())
            .with_description(payload.question.clone()),
    );
    events.push(SyncEvent::AgentNeedsAttention {
        agent_id: payload.agent_id,
        question: Some(payload.question),
    });
}

fn on_quest_accepted(
    registries: &mut Registries,
    payload: QuestRefPayload,
    now: Timestamp,
    events: &mut Vec<SyncEvent>,
) {
    let quest = quest_or_placeholder(registries, &payload.quest_id, now);
    let previous = quest.status;
    note_out_of_order(&quest.id, Some(previous), QuestStatus::Accepted);
    quest.status = QuestStatus::Accepted;
    quest.reviewed_at = Some(now);
    if previous != QuestStatus::Accepted {
        quest_status_effects(registries, &payload.quest_id, QuestStatus::Accepted, now, events);
    }
}

fn on_quest_revision(
    registries: &mut Registries,
    payload: QuestRevisionPayload,
    now: Timestamp,
    events: &mut Vec<SyncEvent>,
) {
    let quest = quest_or_placeholder(registries, &payload.quest_id, now);
    let previous = quest.status;
    note_out_of_order(&quest.id, Some(previous), QuestStatus::Revising);
    quest.status = QuestStatus::Revising;
    quest.reviewed_at = Some(now);
    if payload.notes.is_some() {
        quest.revision_notes = payload.notes;
    }
    if previous != QuestStatus::Revising {
        quest_status_effects(registries, &payload.quest_id, QuestStatus::Revising, now, events);
    }
}

/// Materialize the agent a quest belongs to. Quests reported without any agent
/// stay unattributed. Returns whether the quest has an agent.
fn touch_quest_agent(registries: &mut Registries, agent_id: &AgentId, now: Timestamp) -> bool {
    if agent_id.as_str() == UNATTRIBUTED_AGENT_ID {
        return false;
    }
    registries.agent_or_placeholder(agent_id, now);
    true
}

fn quest_started_effects(
    registries: &mut Registries,
    quest_id: &QuestId,
    now: Timestamp,
    events: &mut Vec<SyncEvent>,
) {
    let Some(quest) = registries.quests.get(quest_id) else {
        return;
    };
    let agent_id = quest.agent_id.clone();
    let title = format!("Quest started: {}", quest.title);
    registries.activity.push(
        ActivityEntry::new(ActivityType::QuestStarted, title, now)
            .with_agent(agent_id.clone())
            .with_quest(quest_id.clone()),
    );
    events.push(SyncEvent::QuestStarted {
        quest_id: quest_id.clone(),
        agent_id,
    });
}

fn quest_or_placeholder<'a>(
    registries: &'a mut Registries,
    id: &QuestId,
    now: Timestamp,
) -> &'a mut Quest {
    if !registries.quests.contains_key(id) {
        let err = ReconciliationError::UnknownQuest {
            quest_id: id.to_string(),
        };
        debug!(error = %err, "Creating placeholder quest");
    }
    registries.quests.entry(id.clone()).or_insert_with(|| {
        let mut quest = Quest::new(
            id.clone(),
            AgentId::new(UNATTRIBUTED_AGENT_ID),
            "Untitled quest",
            now,
        );
        quest.status = QuestStatus::Complete;
        quest
    })
}

/// Side effects of an agent entering `current`. Callers only invoke this when
/// the status actually changed.
fn status_transition(
    registries: &mut Registries,
    agent_id: &AgentId,
    previous: Option<AgentStatus>,
    current: AgentStatus,
    now: Timestamp,
    events: &mut Vec<SyncEvent>,
) {
    let Some(agent) = registries.agents.get(agent_id) else {
        return;
    };
    debug!(agent_id = %agent_id, from = ?previous, to = %current, "Agent status changed");
    match current {
        AgentStatus::Error => {
            let title = format!("{} ran into trouble", agent.name);
            registries.activity.push(
                ActivityEntry::new(ActivityType::AgentError, title, now)
                    .with_agent(agent_id.clone()),
            );
            events.push(SyncEvent::AgentErrored {
                agent_id: agent_id.clone(),
            });
        }
        AgentStatus::Awaiting => events.push(SyncEvent::AgentNeedsAttention {
            agent_id: agent_id.clone(),
            question: agent.pending_question.clone(),
        }),
        _ => {}
    }
}

fn quest_status_effects(
    registries: &mut Registries,
    quest_id: &QuestId,
    status: QuestStatus,
    now: Timestamp,
    events: &mut Vec<SyncEvent>,
) {
    let Some(quest) = registries.quests.get(quest_id) else {
        return;
    };
    let (activity_type, title, event) = match status {
        QuestStatus::Accepted => (
            ActivityType::QuestAccepted,
            format!("Quest accepted: {}", quest.title),
            SyncEvent::QuestAccepted {
                quest_id: quest_id.clone(),
            },
        ),
        QuestStatus::Revising => (
            ActivityType::QuestRevision,
            format!("Revision requested: {}", quest.title),
            SyncEvent::QuestRevisionRequested {
                quest_id: quest_id.clone(),
                notes: quest.revision_notes.clone(),
            },
        ),
        QuestStatus::Failed => (
            ActivityType::QuestFailed,
            format!("Quest failed: {}", quest.title),
            SyncEvent::QuestFailed {
                quest_id: quest_id.clone(),
            },
        ),
        QuestStatus::Active | QuestStatus::Complete => return,
    };
    let entry = ActivityEntry::new(activity_type, title, now)
        .with_agent(quest.agent_id.clone())
        .with_quest(quest_id.clone());
    registries.activity.push(entry);
    events.push(event);
}

fn note_out_of_order(quest_id: &QuestId, previous: Option<QuestStatus>, next: QuestStatus) {
    if let Some(previous) = previous {
        if previous != next && !previous.can_transition_to(next) {
            debug!(
                quest_id = %quest_id,
                from = %previous,
                to = %next,
                "Out-of-order quest transition, applying last write"
            );
        }
    }
}

/// One loot record per artifact, splitting the quest's xp reward between them.
fn materialize_loot(quest: &Quest, now: Timestamp) -> Vec<Loot> {
    let count = quest.artifacts.len() as u64;
    if count == 0 {
        return Vec::new();
    }
    let share = quest.xp_reward / count;
    let remainder = quest.xp_reward % count;
    quest
        .artifacts
        .iter()
        .enumerate()
        .map(|(index, artifact)| Loot {
            id: LootId::for_artifact(&quest.id, index),
            quest_id: quest.id.clone(),
            agent_id: quest.agent_id.clone(),
            artifact: artifact.clone(),
            xp_share: share + if index == 0 { remainder } else { 0 },
            obtained_at: now,
        })
        .collect()
}
