//! Idle-timeout detection.
//!
//! An agent that stays `dormant` for at least the threshold is reported once.
//! The window re-arms when the agent leaves `dormant` ([`Agent::set_status`]
//! clears the flag), so a later dormant period can fire again.
//!
//! [`Agent::set_status`]: questlink_core::Agent::set_status

use crate::reconciler::SyncEvent;
use crate::registry::Registries;
use chrono::Duration as ChronoDuration;
use questlink_core::{ActivityEntry, ActivityType, AgentId, AgentStatus, Timestamp};
use std::time::Duration;
use tracing::{debug, info};

/// Default dormant time before an agent counts as idle.
pub const DEFAULT_IDLE_THRESHOLD: Duration = Duration::from_secs(300);

/// One agent crossing the idle threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct IdleAlert {
    pub agent_id: AgentId,
    pub agent_name: String,
    pub idle_since: Timestamp,
}

impl From<IdleAlert> for SyncEvent {
    fn from(alert: IdleAlert) -> Self {
        SyncEvent::AgentIdle {
            agent_id: alert.agent_id,
            idle_since: alert.idle_since,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IdleMonitor {
    threshold: ChronoDuration,
}

impl Default for IdleMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_IDLE_THRESHOLD)
    }
}

impl IdleMonitor {
    pub fn new(threshold: Duration) -> Self {
        let threshold =
            ChronoDuration::from_std(threshold).unwrap_or_else(|_| ChronoDuration::weeks(52 * 100));
        Self { threshold }
    }

    /// Flag every dormant agent whose window has reached the threshold and was
    /// not flagged yet, appending one activity entry each.
    pub fn sweep(&self, registries: &mut Registries, now: Timestamp) -> Vec<IdleAlert> {
        let mut alerts = Vec::new();
        for agent in registries.agents.values_mut() {
            if agent.status != AgentStatus::Dormant || agent.idle_notified {
                continue;
            }
            let Some(idle_since) = agent.idle_since else {
                continue;
            };
            if now.signed_duration_since(idle_since) < self.threshold {
                continue;
            }
            agent.idle_notified = true;
            alerts.push(IdleAlert {
                agent_id: agent.id.clone(),
                agent_name: agent.name.clone(),
                idle_since,
            });
        }

        for alert in &alerts {
            info!(agent_id = %alert.agent_id, idle_since = %alert.idle_since, "Agent idle");
            registries.activity.push(
                ActivityEntry::new(
                    ActivityType::AgentIdle,
                    format!("{} is waiting for work", alert.agent_name),
                    now,
                )
                .with_agent(alert.agent_id.clone()),
            );
        }
        if alerts.is_empty() {
            debug!(agents = registries.agents.len(), "Idle sweep found nothing new");
        }
        alerts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use questlink_core::{Agent, AgentClass};

    fn dormant_agent(registries: &mut Registries, id: &str, since: Timestamp) {
        let mut agent = Agent::new(AgentId::new(id), id, AgentClass::Mage, since);
        agent.set_status(AgentStatus::Dormant, since);
        registries.upsert_agent(agent);
    }

    fn idle_entries(registries: &Registries) -> usize {
        registries
            .activity
            .iter()
            .filter(|e| e.activity_type == ActivityType::AgentIdle)
            .count()
    }

    #[test]
    fn test_fires_once_per_window() {
        let monitor = IdleMonitor::default();
        let mut registries = Registries::default();
        let t0 = Utc::now();
        dormant_agent(&mut registries, "a1", t0);

        assert!(monitor.sweep(&mut registries, t0 + ChronoDuration::minutes(4)).is_empty());
        assert_eq!(monitor.sweep(&mut registries, t0 + ChronoDuration::minutes(5)).len(), 1);
        assert!(monitor.sweep(&mut registries, t0 + ChronoDuration::minutes(6)).is_empty());
        assert!(monitor.sweep(&mut registries, t0 + ChronoDuration::minutes(7)).is_empty());
        assert_eq!(idle_entries(&registries), 1);
    }

    #[test]
    fn test_rearms_after_leaving_dormant() {
        let monitor = IdleMonitor::default();
        let mut registries = Registries::default();
        let t0 = Utc::now();
        dormant_agent(&mut registries, "a1", t0);
        monitor.sweep(&mut registries, t0 + ChronoDuration::minutes(5));

        let t1 = t0 + ChronoDuration::minutes(8);
        let agent = registries.agents.get_mut(&AgentId::new("a1")).unwrap();
        agent.set_status(AgentStatus::Channeling, t1);
        assert!(!agent.idle_notified);
        agent.set_status(AgentStatus::Dormant, t1 + ChronoDuration::minutes(1));

        assert!(monitor.sweep(&mut registries, t1 + ChronoDuration::minutes(5)).is_empty());
        let alerts = monitor.sweep(&mut registries, t1 + ChronoDuration::minutes(6));
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].idle_since, t1 + ChronoDuration::minutes(1));
        assert_eq!(idle_entries(&registries), 2);
    }

    #[test]
    fn test_ignores_non_dormant_agents() {
        let monitor = IdleMonitor::new(Duration::from_secs(1));
        let mut registries = Registries::default();
        let t0 = Utc::now();
        let agent = Agent::new(AgentId::new("busy"), "Busy", AgentClass::Scout, t0);
        registries.upsert_agent(agent);
        assert!(monitor.sweep(&mut registries, t0 + ChronoDuration::hours(1)).is_empty());
    }

    #[test]
    fn test_alert_converts_to_sync_event() {
        let since = Utc::now();
        let event: SyncEvent = IdleAlert {
            agent_id: AgentId::new("a1"),
            agent_name: "Merlin".to_string(),
            idle_since: since,
        }
        .into();
        assert_eq!(
            event,
            SyncEvent::AgentIdle {
                agent_id: AgentId::new("a1"),
                idle_since: since
            }
        );
    }
}
