//! Exponential backoff between retry attempts.

use std::time::Duration;

/// Calculate the delay before the next attempt after `retry_index` prior
/// retryable failures: `base * 2^retry_index`, clamped to `max`.
///
/// The exponent is capped before the shift so large indices saturate at
/// `max` instead of overflowing.
pub fn delay_for(retry_index: u32, base: Duration, max: Duration) -> Duration {
    let base_ms = base.as_millis() as u64;
    let factor = 2u64.saturating_pow(retry_index.min(63));
    let delay = Duration::from_millis(base_ms.saturating_mul(factor));
    delay.min(max)
}
