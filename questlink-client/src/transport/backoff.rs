//! Reconnect delay sequence.

use crate::config::ReconnectConfig;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Capped exponential backoff with additive jitter.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: ReconnectConfig,
}

impl Backoff {
    pub fn new(config: ReconnectConfig) -> Self {
        Self { config }
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Delay before the given retry (1-based), without jitter.
    pub fn base_delay_ms(&self, attempt: u32) -> u64 {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let scaled = self.config.initial_ms as f64 * self.config.multiplier.powi(exponent);
        if !scaled.is_finite() || scaled >= self.config.max_ms as f64 {
            self.config.max_ms
        } else {
            scaled as u64
        }
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(jittered_backoff(
            self.base_delay_ms(attempt),
            self.config.jitter_ms,
        ))
    }
}

fn jittered_backoff(base_ms: u64, jitter_ms: u64) -> u64 {
    if jitter_ms == 0 {
        return base_ms;
    }
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_nanos(0))
        .subsec_nanos() as u64;
    let jitter = nanos % jitter_ms;
    base_ms.saturating_add(jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(jitter_ms: u64) -> ReconnectConfig {
        ReconnectConfig {
            initial_ms: 1_000,
            max_ms: 30_000,
            multiplier: 2.0,
            jitter_ms,
            max_attempts: 10,
        }
    }

    #[test]
    fn test_delay_doubles_then_caps() {
        let backoff = Backoff::new(config(0));
        let delays: Vec<u64> = (1..=7).map(|a| backoff.base_delay_ms(a)).collect();
        assert_eq!(delays, vec![1_000, 2_000, 4_000, 8_000, 16_000, 30_000, 30_000]);
        assert_eq!(backoff.delay(3), Duration::from_millis(4_000));
    }

    #[test]
    fn test_huge_attempt_stays_capped() {
        let backoff = Backoff::new(config(0));
        assert_eq!(backoff.base_delay_ms(u32::MAX), 30_000);
    }

    #[test]
    fn test_jitter_bounded() {
        let backoff = Backoff::new(config(250));
        for attempt in 1..=10 {
            let delay = backoff.delay(attempt).as_millis() as u64;
            let base = backoff.base_delay_ms(attempt);
            assert!(delay >= base && delay < base + 250);
        }
    }
}
