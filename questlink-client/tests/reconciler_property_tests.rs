//! Property tests for reconciliation and idle detection.

use chrono::{Duration as ChronoDuration, Utc};
use proptest::prelude::*;
use questlink_client::idle::IdleMonitor;
use questlink_client::{Reconciler, Registries, SyncEvent};
use questlink_core::{ActivityType, AgentStatus, XpCurve};
use questlink_test_utils::assertions::{
    assert_buffer_caps, assert_idle_bookkeeping, assert_progress_invariants,
};
use questlink_test_utils::fixtures;
use questlink_test_utils::generators::*;
use serde_json::json;
use std::time::Duration;

proptest! {
    #[test]
    fn agent_spawned_replay_is_a_no_op(
        id in arb_agent_id(),
        name in "[A-Z][a-z]{2,8}",
        class in arb_agent_class(),
    ) {
        let reconciler = Reconciler::default();
        let now = Utc::now();
        let text = fixtures::agent_spawned(&id, &name, class);

        let mut registries = Registries::default();
        let first = reconciler.apply(&mut registries, fixtures::decoded(&text), now);
        let after_first = registries.clone();
        let second = reconciler.apply(&mut registries, fixtures::decoded(&text), now);

        prop_assert_eq!(first.len(), 1);
        prop_assert!(second.is_empty());
        prop_assert_eq!(registries, after_first);
    }

    #[test]
    fn invariants_hold_for_any_message_sequence(
        messages in prop::collection::vec(arb_inbound_message(), 1..40),
    ) {
        let reconciler = Reconciler::default();
        let curve = XpCurve::default();
        let mut registries = Registries::with_retention(10, 10);
        let mut now = Utc::now();
        for text in &messages {
            now += ChronoDuration::seconds(1);
            reconciler.apply(&mut registries, fixtures::decoded(text), now);
        }
        for agent in registries.agents.values() {
            assert_progress_invariants(agent, &curve);
            assert_idle_bookkeeping(agent);
            assert_buffer_caps(agent);
        }
        prop_assert!(registries.activity.len() <= 10);
        prop_assert!(registries.loot.len() <= 10);
    }

    #[test]
    fn link_level_messages_change_nothing(
        messages in prop::collection::vec(arb_inbound_message(), 0..10),
        tag in prop::sample::select(vec![
            "auth_success",
            "heartbeat",
            "heartbeat_ack",
            "agent_input",
            "quest_review",
        ]),
    ) {
        let reconciler = Reconciler::default();
        let now = Utc::now();
        let mut registries = Registries::default();
        for text in &messages {
            reconciler.apply(&mut registries, fixtures::decoded(text), now);
        }
        let before = registries.clone();
        let payload = match tag {
            "agent_input" => json!({"agentId": "agent-1", "input": "go"}),
            "quest_review" => json!({"questId": "quest-1", "action": "accept"}),
            _ => json!({}),
        };
        let text = json!({"type": tag, "payload": payload}).to_string();
        let events = reconciler.apply(&mut registries, fixtures::decoded(&text), now);
        prop_assert!(events.is_empty());
        prop_assert_eq!(registries, before);
    }

    #[test]
    fn one_level_up_event_per_grant(id in arb_agent_id(), xp in 0u64..1_000) {
        let reconciler = Reconciler::default();
        let mut registries = Registries::default();
        let events = reconciler.apply(
            &mut registries,
            fixtures::decoded(&fixtures::agent_progress(&id, xp)),
            Utc::now(),
        );
        let level_ups: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, SyncEvent::LevelUp { .. }))
            .collect();
        prop_assert_eq!(level_ups.len(), usize::from(xp >= 100));
        let agent = &registries.agents[&id];
        prop_assert_eq!(agent.level as u64, 1 + xp / 100);
        prop_assert_eq!(agent.xp, xp % 100);
        prop_assert_eq!(agent.talent_points as u64, xp / 100);
    }

    #[test]
    fn completed_quest_loot_matches_artifacts(
        quest in arb_quest_id(),
        agent in arb_agent_id(),
        xp in 0u64..500,
        artifacts in prop::collection::vec(arb_raw_artifact(), 0..6),
    ) {
        let reconciler = Reconciler::default();
        let mut registries = Registries::default();
        let count = artifacts.len();
        reconciler.apply(
            &mut registries,
            fixtures::decoded(&fixtures::quest_complete(&quest, &agent, xp, artifacts)),
            Utc::now(),
        );
        let stored = &registries.quests[&quest];
        prop_assert_eq!(stored.artifacts.len(), count);
        for (index, artifact) in stored.artifacts.iter().enumerate() {
            prop_assert_eq!(artifact.id.as_str(), format!("{}-artifact-{}", quest, index));
        }
        prop_assert_eq!(registries.loot.len(), count);
        if count > 0 {
            let shares: u64 = registries.loot.iter().map(|l| l.xp_share).sum();
            prop_assert_eq!(shares, xp);
        }
    }

    #[test]
    fn idle_fires_at_most_once_per_window(
        offsets in prop::collection::vec(0i64..1_200, 1..12),
    ) {
        let reconciler = Reconciler::default();
        let monitor = IdleMonitor::new(Duration::from_secs(300));
        let mut registries = Registries::default();
        let id = questlink_core::AgentId::new("agent-0");
        let t0 = Utc::now();
        reconciler.apply(
            &mut registries,
            fixtures::decoded(&fixtures::agent_update(&id, AgentStatus::Dormant)),
            t0,
        );

        let mut offsets = offsets;
        offsets.sort_unstable();
        let mut alerts = 0;
        for offset in &offsets {
            alerts += monitor.sweep(&mut registries, t0 + ChronoDuration::seconds(*offset)).len();
        }
        let expected = usize::from(offsets.iter().any(|o| *o >= 300));
        prop_assert_eq!(alerts, expected);
        let entries = registries
            .activity
            .iter()
            .filter(|e| e.activity_type == ActivityType::AgentIdle)
            .count();
        prop_assert_eq!(entries, expected);
    }
}
