//! Retry delays: exponential backoff with random jitter.

use libro_core::RetryConfig;
use rand::Rng;
use std::time::Duration;

/// Delay before retry number `retry` (1-based).
///
/// The exponential base from `config` plus up to `config.jitter` of random
/// delay. A server-provided `retry_after` is a floor, honored up to
/// `config.max_backoff` so the total never exceeds
/// [`RetryConfig::max_delay`].
pub fn backoff_delay(config: &RetryConfig, retry: u32, retry_after: Option<Duration>) -> Duration {
    let delay = config.base_delay(retry).saturating_add(jitter(config.jitter));
    match retry_after {
        Some(floor) => delay.max(floor.min(config.max_backoff)),
        None => delay,
    }
}

fn jitter(max: Duration) -> Duration {
    let max_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(0..=max_ms))
}
