//! Experience and level arithmetic.
//!
//! Pure functions over [`Agent`] progress fields. The curve is flat: every
//! level costs the same amount of experience.

use crate::Agent;
use serde::{Deserialize, Serialize};

/// Experience required per level when nothing else is configured.
pub const DEFAULT_XP_PER_LEVEL: u64 = 100;

/// Experience curve used to derive `xp_to_next_level` from `level`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct XpCurve {
    pub xp_per_level: u64,
}

impl Default for XpCurve {
    fn default() -> Self {
        Self {
            xp_per_level: DEFAULT_XP_PER_LEVEL,
        }
    }
}

/// Outcome of a single experience grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelUpResult {
    pub levels_gained: u32,
    pub new_level: u32,
}

impl LevelUpResult {
    pub fn leveled_up(&self) -> bool {
        self.levels_gained > 0
    }
}

impl XpCurve {
    pub fn new(xp_per_level: u64) -> Self {
        Self {
            xp_per_level: xp_per_level.max(1),
        }
    }

    /// Experience needed to go from `level` to `level + 1`.
    pub fn xp_to_next_level(&self, _level: u32) -> u64 {
        self.xp_per_level.max(1)
    }

    /// Total experience accumulated before reaching `level`.
    pub fn level_base(&self, level: u32) -> u64 {
        let completed = u64::from(level.max(1) - 1);
        completed.saturating_mul(self.xp_to_next_level(level))
    }

    /// Convert a cumulative experience total reported at `level` into
    /// experience within that level, clamped at zero.
    pub fn rebase_cumulative_xp(&self, total_xp: u64, level: u32) -> u64 {
        total_xp.saturating_sub(self.level_base(level))
    }

    /// Add experience, converting every full threshold into a level and a talent point.
    pub fn grant_xp(&self, agent: &mut Agent, amount: u64) -> LevelUpResult {
        agent.xp = agent.xp.saturating_add(amount);
        let levels_gained = self.carry_overflow(agent);
        LevelUpResult {
            levels_gained,
            new_level: agent.level,
        }
    }

    /// Restore `0 <= xp < xp_to_next_level` and `level >= 1` after fields were
    /// overwritten from elsewhere. Overflow becomes levels without a grant event.
    pub fn normalize_progress(&self, agent: &mut Agent) -> u32 {
        if agent.level == 0 {
            agent.level = 1;
        }
        self.carry_overflow(agent)
    }

    fn carry_overflow(&self, agent: &mut Agent) -> u32 {
        let mut levels_gained = 0;
        let mut threshold = self.xp_to_next_level(agent.level);
        while agent.xp >= threshold {
            agent.xp -= threshold;
            agent.level = agent.level.saturating_add(1);
            agent.talent_points = agent.talent_points.saturating_add(1);
            levels_gained += 1;
            threshold = self.xp_to_next_level(agent.level);
        }
        agent.xp_to_next_level = threshold;
        levels_gained
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AgentClass, AgentId};
    use chrono::Utc;
    use proptest::prelude::*;

    fn agent() -> Agent {
        Agent::new(AgentId::new("a1"), "Merlin", AgentClass::Mage, Utc::now())
    }

    #[test]
    fn test_grant_below_threshold() {
        let curve = XpCurve::default();
        let mut agent = agent();
        let result = curve.grant_xp(&mut agent, 40);
        assert!(!result.leveled_up());
        assert_eq!(agent.xp, 40);
        assert_eq!(agent.level, 1);
    }

    #[test]
    fn test_grant_crossing_two_levels() {
        let curve = XpCurve::default();
        let mut agent = agent();
        let result = curve.grant_xp(&mut agent, 250);
        assert_eq!(result.levels_gained, 2);
        assert_eq!(result.new_level, 3);
        assert_eq!(agent.level, 3);
        assert_eq!(agent.xp, 50);
        assert_eq!(agent.talent_points, 2);
        assert_eq!(agent.xp_to_next_level, 100);
    }

    #[test]
    fn test_grant_exact_threshold() {
        let curve = XpCurve::default();
        let mut agent = agent();
        let result = curve.grant_xp(&mut agent, 100);
        assert_eq!(result.levels_gained, 1);
        assert_eq!(agent.xp, 0);
    }

    #[test]
    fn test_rebase_cumulative_xp() {
        let curve = XpCurve::default();
        assert_eq!(curve.rebase_cumulative_xp(250, 3), 50);
        assert_eq!(curve.rebase_cumulative_xp(150, 3), 0);
        assert_eq!(curve.rebase_cumulative_xp(42, 1), 42);
    }

    #[test]
    fn test_normalize_repairs_level_zero() {
        let curve = XpCurve::default();
        let mut agent = agent();
        agent.level = 0;
        agent.xp = 30;
        assert_eq!(curve.normalize_progress(&mut agent), 0);
        assert_eq!(agent.level, 1);
    }

    proptest! {
        #[test]
        fn grant_preserves_invariant(
            start in 0u64..100,
            amount in 0u64..10_000,
            per_level in 1u64..500,
        ) {
            let curve = XpCurve::new(per_level);
            let mut agent = agent();
            agent.xp = start % per_level;
            agent.xp_to_next_level = per_level;
            let before_total = curve.level_base(agent.level) + agent.xp;
            let result = curve.grant_xp(&mut agent, amount);
            prop_assert!(agent.xp < agent.xp_to_next_level);
            prop_assert_eq!(agent.talent_points, result.levels_gained);
            prop_assert_eq!(curve.level_base(agent.level) + agent.xp, before_total + amount);
        }
    }
}
