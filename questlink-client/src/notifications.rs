//! Notification collaborator.
//!
//! The session hands every [`SyncEvent`] to a [`Notifier`]. Events worth a
//! user-facing alert become a [`Notification`]; the rest return `None` from
//! [`Notification::from_event`].

use crate::reconciler::SyncEvent;
use chrono::{DateTime, Utc};
use questlink_core::ConnectionStatus;
use std::sync::Mutex;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
    Info,
    Warning,
    Error,
    Success,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationAction {
    /// Open the agent's question or review screen.
    Respond,
    /// Manual retry after reconnect exhaustion or an auth failure.
    Reconnect,
    Dismiss,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub level: NotificationLevel,
    pub message: String,
    pub action: Option<NotificationAction>,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(level: NotificationLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            action: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_action(mut self, action: NotificationAction) -> Self {
        self.action = Some(action);
        self
    }

    pub fn from_event(event: &SyncEvent) -> Option<Self> {
        let notification = match event {
            SyncEvent::AgentNeedsAttention { agent_id, question } => Notification::new(
                NotificationLevel::Warning,
                match question {
                    Some(question) => format!("{} asks: {}", agent_id, question),
                    None => format!("{} needs attention", agent_id),
                },
            )
            .with_action(NotificationAction::Respond),
            SyncEvent::AgentErrored { agent_id } => {
                Notification::new(NotificationLevel::Error, format!("{} hit an error", agent_id))
            }
            SyncEvent::AgentIdle { agent_id, .. } => {
                Notification::new(NotificationLevel::Info, format!("{} is idle", agent_id))
            }
            SyncEvent::QuestCompleted { quest_id, loot, .. } => Notification::new(
                NotificationLevel::Success,
                format!("Quest {} complete ({} artifacts)", quest_id, loot.len()),
            )
            .with_action(NotificationAction::Respond),
            SyncEvent::LevelUp {
                agent_id, new_level, ..
            } => Notification::new(
                NotificationLevel::Success,
                format!("{} reached level {}", agent_id, new_level),
            ),
            SyncEvent::ConnectionChanged {
                status: ConnectionStatus::Error,
                reason,
                ..
            } => Notification::new(
                NotificationLevel::Error,
                format!(
                    "Connection failed: {}",
                    reason.as_deref().unwrap_or("unknown error")
                ),
            )
            .with_action(NotificationAction::Reconnect),
            SyncEvent::ServerError { message, .. } => {
                Notification::new(NotificationLevel::Error, message.clone())
                    .with_action(NotificationAction::Dismiss)
            }
            _ => return None,
        };
        Some(notification)
    }
}

/// Receives user-facing notifications. Implementations must not block.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Writes notifications to the log. Used by the headless binary.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: Notification) {
        match notification.level {
            NotificationLevel::Error => {
                error!(action = ?notification.action, "{}", notification.message)
            }
            NotificationLevel::Warning => {
                warn!(action = ?notification.action, "{}", notification.message)
            }
            NotificationLevel::Info | NotificationLevel::Success => {
                info!(action = ?notification.action, "{}", notification.message)
            }
        }
    }
}

/// Keeps every notification in memory.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    received: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn take(&self) -> Vec<Notification> {
        match self.received.lock() {
            Ok(mut received) => std::mem::take(&mut *received),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: Notification) {
        match self.received.lock() {
            Ok(mut received) => received.push(notification),
            Err(poisoned) => poisoned.into_inner().push(notification),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use questlink_core::{AgentId, ConnectionId, QuestId};

    #[test]
    fn test_attention_is_actionable() {
        let notification = Notification::from_event(&SyncEvent::AgentNeedsAttention {
            agent_id: AgentId::new("a1"),
            question: Some("Proceed?".to_string()),
        })
        .unwrap();
        assert_eq!(notification.level, NotificationLevel::Warning);
        assert_eq!(notification.action, Some(NotificationAction::Respond));
        assert!(notification.message.contains("Proceed?"));
    }

    #[test]
    fn test_connection_error_offers_reconnect() {
        let notification = Notification::from_event(&SyncEvent::ConnectionChanged {
            connection_id: ConnectionId::new("c1"),
            status: ConnectionStatus::Error,
            reason: Some("reconnect attempts exhausted".to_string()),
        })
        .unwrap();
        assert_eq!(notification.action, Some(NotificationAction::Reconnect));
    }

    #[test]
    fn test_routine_events_are_silent() {
        assert!(Notification::from_event(&SyncEvent::QuestStarted {
            quest_id: QuestId::new("q1"),
            agent_id: AgentId::new("a1"),
        })
        .is_none());
        assert!(Notification::from_event(&SyncEvent::ConnectionChanged {
            connection_id: ConnectionId::new("c1"),
            status: ConnectionStatus::Connected,
            reason: None,
        })
        .is_none());
    }

    #[test]
    fn test_recording_notifier_drains() {
        let notifier = RecordingNotifier::default();
        notifier.notify(Notification::new(NotificationLevel::Info, "hello"));
        assert_eq!(notifier.take().len(), 1);
        assert!(notifier.take().is_empty());
    }
}
