//! Local registries mirrored from the daemon.
//!
//! [`Registries`] is the explicit session context: it owns the agent, quest
//! and connection maps plus the bounded activity log and loot bag. Only the
//! reconciler and the idle monitor mutate it, always from the session task.

use questlink_core::{
    ActivityEntry, ActivityId, Agent, AgentId, Connection, ConnectionId, Loot, Quest, QuestId,
    ReconciliationError, Timestamp,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use tracing::debug;

pub const DEFAULT_ACTIVITY_LOG_CAP: usize = 200;
pub const DEFAULT_LOOT_CAP: usize = 200;

/// Append-only log of notable transitions, oldest entries dropped past `cap`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityLog {
    entries: VecDeque<ActivityEntry>,
    cap: usize,
}

impl Default for ActivityLog {
    fn default() -> Self {
        Self::with_cap(DEFAULT_ACTIVITY_LOG_CAP)
    }
}

impl ActivityLog {
    pub fn with_cap(cap: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            cap: cap.max(1),
        }
    }

    pub fn push(&mut self, entry: ActivityEntry) {
        self.entries.push_back(entry);
        while self.entries.len() > self.cap {
            self.entries.pop_front();
        }
    }

    pub fn mark_read(&mut self, id: &ActivityId) -> bool {
        match self.entries.iter_mut().find(|e| &e.id == id) {
            Some(entry) if !entry.is_read => {
                entry.is_read = true;
                true
            }
            _ => false,
        }
    }

    pub fn mark_all_read(&mut self) -> usize {
        let mut flipped = 0;
        for entry in self.entries.iter_mut().filter(|e| !e.is_read) {
            entry.is_read = true;
            flipped += 1;
        }
        flipped
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn unread_count(&self) -> usize {
        self.entries.iter().filter(|e| !e.is_read).count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &ActivityEntry> {
        self.entries.iter()
    }

    /// Newest first.
    pub fn recent(&self, limit: usize) -> Vec<&ActivityEntry> {
        self.entries.iter().rev().take(limit).collect()
    }
}

/// Loot records, oldest dropped past `cap`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LootBag {
    items: VecDeque<Loot>,
    cap: usize,
}

impl Default for LootBag {
    fn default() -> Self {
        Self::with_cap(DEFAULT_LOOT_CAP)
    }
}

impl LootBag {
    pub fn with_cap(cap: usize) -> Self {
        Self {
            items: VecDeque::new(),
            cap: cap.max(1),
        }
    }

    pub fn push(&mut self, loot: Loot) {
        self.items.retain(|existing| existing.id != loot.id);
        self.items.push_back(loot);
        while self.items.len() > self.cap {
            self.items.pop_front();
        }
    }

    pub fn for_quest<'a>(&'a self, quest_id: &'a QuestId) -> impl Iterator<Item = &'a Loot> {
        self.items.iter().filter(move |l| &l.quest_id == quest_id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Loot> {
        self.items.iter()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registries {
    pub agents: BTreeMap<AgentId, Agent>,
    pub quests: BTreeMap<QuestId, Quest>,
    pub connections: BTreeMap<ConnectionId, Connection>,
    pub activity: ActivityLog,
    pub loot: LootBag,
    /// Connection new agents are attributed to.
    pub active_connection: Option<ConnectionId>,
}

impl Registries {
    pub fn with_retention(activity_cap: usize, loot_cap: usize) -> Self {
        Self {
            activity: ActivityLog::with_cap(activity_cap),
            loot: LootBag::with_cap(loot_cap),
            ..Self::default()
        }
    }

    /// Insert or replace an agent, attributing it to the active connection.
    /// Returns `true` if the id was not present before.
    pub fn upsert_agent(&mut self, agent: Agent) -> bool {
        let id = agent.id.clone();
        let inserted = self.agents.insert(id.clone(), agent).is_none();
        self.attribute(&id);
        inserted
    }

    /// Look up an agent, materializing a placeholder if it was never seen.
    pub fn agent_or_placeholder(&mut self, id: &AgentId, now: Timestamp) -> &mut Agent {
        if !self.agents.contains_key(id) {
            let err = ReconciliationError::UnknownAgent {
                agent_id: id.to_string(),
            };
            debug!(error = %err, "Creating placeholder agent");
            self.attribute(id);
        }
        self.agents
            .entry(id.clone())
            .or_insert_with(|| Agent::placeholder(id.clone(), now))
    }

    /// Remove an agent and every connection's reference to it. Quests stay.
    pub fn remove_agent(&mut self, id: &AgentId) -> Option<Agent> {
        for connection in self.connections.values_mut() {
            connection.detach_agent(id);
        }
        self.agents.remove(id)
    }

    /// Find the connection for `url`, creating it if needed. Updates the name.
    pub fn ensure_connection(&mut self, url: &str, name: &str) -> ConnectionId {
        if let Some(connection) = self.connections.values_mut().find(|c| c.url == url) {
            connection.name = name.to_string();
            return connection.id.clone();
        }
        let connection = Connection::new(ConnectionId::generate(), name, url);
        let id = connection.id.clone();
        self.connections.insert(id.clone(), connection);
        id
    }

    /// Remove a connection together with the agents attributed to it.
    pub fn remove_connection(&mut self, id: &ConnectionId) -> Option<Connection> {
        let connection = self.connections.remove(id)?;
        for agent_id in &connection.agent_ids {
            self.agents.remove(agent_id);
        }
        if self.active_connection.as_ref() == Some(id) {
            self.active_connection = None;
        }
        Some(connection)
    }

    pub fn active_connection(&self) -> Option<&Connection> {
        self.active_connection
            .as_ref()
            .and_then(|id| self.connections.get(id))
    }

    pub fn active_connection_mut(&mut self) -> Option<&mut Connection> {
        let id = self.active_connection.clone()?;
        self.connections.get_mut(&id)
    }

    fn attribute(&mut self, agent_id: &AgentId) {
        if let Some(connection) = self.active_connection_mut() {
            connection.attach_agent(agent_id);
        }
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// Favorites first, then by name.
    pub fn agents_sorted(&self) -> Vec<&Agent> {
        let mut agents: Vec<&Agent> = self.agents.values().collect();
        agents.sort_by(|a, b| {
            b.is_favorite
                .cmp(&a.is_favorite)
                .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
                .then_with(|| a.id.cmp(&b.id))
        });
        agents
    }

    pub fn agents_needing_attention(&self) -> Vec<&Agent> {
        self.agents
            .values()
            .filter(|a| a.status.needs_attention())
            .collect()
    }

    pub fn quests_pending_review(&self) -> Vec<&Quest> {
        self.quests.values().filter(|q| q.is_pending_review()).collect()
    }

    pub fn quests_for_agent<'a>(
        &'a self,
        agent_id: &'a AgentId,
    ) -> impl Iterator<Item = &'a Quest> {
        self.quests.values().filter(move |q| &q.agent_id == agent_id)
    }

    pub fn unread_activity_count(&self) -> usize {
        self.activity.unread_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use questlink_core::{ActivityType, AgentClass, QuestStatus};

    fn agent(id: &str, name: &str) -> Agent {
        Agent::new(AgentId::new(id), name, AgentClass::Mage, Utc::now())
    }

    #[test]
    fn test_activity_log_drops_oldest() {
        let mut log = ActivityLog::with_cap(3);
        for i in 0..5 {
            let title = format!("entry {}", i);
            log.push(ActivityEntry::new(ActivityType::AgentIdle, title, Utc::now()));
        }
        assert_eq!(log.len(), 3);
        let titles: Vec<&str> = log.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, vec!["entry 2", "entry 3", "entry 4"]);
        assert_eq!(log.recent(1)[0].title, "entry 4");
    }

    #[test]
    fn test_mark_read_only_flips_once() {
        let mut log = ActivityLog::default();
        let entry = ActivityEntry::new(ActivityType::AgentError, "Error", Utc::now());
        let id = entry.id.clone();
        log.push(entry);
        log.push(ActivityEntry::new(ActivityType::AgentIdle, "Idle", Utc::now()));
        assert_eq!(log.unread_count(), 2);
        assert!(log.mark_read(&id));
        assert!(!log.mark_read(&id));
        assert_eq!(log.mark_all_read(), 1);
        assert_eq!(log.unread_count(), 0);
    }

    #[test]
    fn test_upsert_attributes_to_active_connection() {
        let mut registries = Registries::default();
        let conn = registries.ensure_connection("ws://desk:4000/ws", "Desk");
        registries.active_connection = Some(conn.clone());
        assert!(registries.upsert_agent(agent("a1", "Merlin")));
        assert!(!registries.upsert_agent(agent("a1", "Merlin II")));
        assert_eq!(registries.agents.len(), 1);
        assert_eq!(registries.connections[&conn].agent_ids, vec![AgentId::new("a1")]);

        registries.remove_agent(&AgentId::new("a1"));
        assert!(registries.connections[&conn].agent_ids.is_empty());
    }

    #[test]
    fn test_ensure_connection_reuses_url() {
        let mut registries = Registries::default();
        let first = registries.ensure_connection("ws://desk:4000/ws", "Desk");
        let second = registries.ensure_connection("ws://desk:4000/ws", "Desk (renamed)");
        assert_eq!(first, second);
        assert_eq!(registries.connections[&first].name, "Desk (renamed)");
    }

    #[test]
    fn test_placeholder_created_once() {
        let mut registries = Registries::default();
        let id = AgentId::new("ghost");
        registries.agent_or_placeholder(&id, Utc::now()).push_thought("boo");
        registries.agent_or_placeholder(&id, Utc::now());
        assert_eq!(registries.agents.len(), 1);
        assert!(registries.agents[&id].is_placeholder());
        assert_eq!(registries.agents[&id].thoughts.len(), 1);
    }

    #[test]
    fn test_sorted_and_pending_review_queries() {
        let mut registries = Registries::default();
        registries.upsert_agent(agent("a1", "zed"));
        let mut fav = agent("a2", "Yara");
        fav.is_favorite = true;
        registries.upsert_agent(fav);
        registries.upsert_agent(agent("a3", "alba"));
        let names: Vec<&str> = registries.agents_sorted().iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["Yara", "alba", "zed"]);

        let mut quest = Quest::new(QuestId::new("q1"), AgentId::new("a1"), "Fix", Utc::now());
        quest.status = QuestStatus::Complete;
        registries.quests.insert(quest.id.clone(), quest);
        assert_eq!(registries.quests_pending_review().len(), 1);
        assert_eq!(registries.quests_for_agent(&AgentId::new("a1")).count(), 1);
    }

    #[test]
    fn test_remove_connection_drops_its_agents() {
        let mut registries = Registries::default();
        let conn = registries.ensure_connection("ws://desk:4000/ws", "Desk");
        registries.active_connection = Some(conn.clone());
        registries.upsert_agent(agent("a1", "Merlin"));
        registries.remove_connection(&conn);
        assert!(registries.agents.is_empty());
        assert!(registries.active_connection.is_none());
    }
}
