//! Property tests for the reconnect delay sequence and config validation.

use proptest::prelude::*;
use questlink_client::config::{ClientConfig, ReconnectConfig};
use questlink_client::transport::Backoff;

fn arb_reconnect() -> impl Strategy<Value = ReconnectConfig> {
    (1u64..5_000, 1u64..120_000, 1.0f64..4.0, 0u64..1_000, 1u32..20).prop_map(
        |(initial_ms, extra, multiplier, jitter_ms, max_attempts)| ReconnectConfig {
            initial_ms,
            max_ms: initial_ms + extra,
            multiplier,
            jitter_ms,
            max_attempts,
        },
    )
}

proptest! {
    #[test]
    fn delays_are_capped_and_non_decreasing(config in arb_reconnect(), attempts in 1u32..64) {
        let backoff = Backoff::new(config.clone());
        let mut previous = 0;
        for attempt in 1..=attempts {
            let base = backoff.base_delay_ms(attempt);
            prop_assert!(base <= config.max_ms);
            prop_assert!(base >= previous);
            previous = base;

            let delay = backoff.delay(attempt).as_millis() as u64;
            prop_assert!(delay >= base);
            prop_assert!(delay < base + config.jitter_ms.max(1));
        }
    }

    #[test]
    fn first_retry_waits_initial_delay(config in arb_reconnect()) {
        let backoff = Backoff::new(config.clone());
        prop_assert_eq!(backoff.base_delay_ms(1), config.initial_ms);
    }

    #[test]
    fn generated_reconnect_sections_validate(config in arb_reconnect()) {
        let client = ClientConfig {
            reconnect: config,
            ..ClientConfig::default()
        };
        prop_assert!(client.validate().is_ok());
    }
}
