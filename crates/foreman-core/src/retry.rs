//! Retry configuration and backoff calculation.
//!
//! Portable, sync-only building blocks for retrying external-process calls.
//! The async retry executor lives in `foreman-runtime` (which has access to
//! tokio); this module only owns the parameters and the math:
//!
//! - [`RetryConfig`]: retry parameters (max attempts, backoff, jitter)
//! - [`calculate_backoff_delay`]: exponential backoff with jitter

use serde::{Deserialize, Serialize};

/// Default maximum attempts (first try + retries).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Default base delay in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;
/// Default maximum delay in milliseconds.
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;
/// Default jitter factor (0.0–1.0).
pub const DEFAULT_JITTER_FACTOR: f64 = 0.2;

/// Configuration for retrying the external agent process.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryConfig {
    /// Total attempts including the first (default: 3).
    pub max_attempts: u32,
    /// Base delay for exponential backoff in ms (default: 1000).
    pub base_delay_ms: u64,
    /// Maximum delay between attempts in ms (default: 30000).
    pub max_delay_ms: u64,
    /// Jitter factor 0.0–1.0 (default: 0.2).
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            jitter_factor: DEFAULT_JITTER_FACTOR,
        }
    }
}

/// Calculate exponential backoff delay with jitter.
///
/// Formula: `min(max_delay, base_delay * 2^attempt) * (1 ± jitter)`.
/// The jitter seed is deterministic (derived from the attempt index) so the
/// function stays portable and testable; the spread is what matters, not
/// cryptographic randomness.
///
/// * `attempt` — zero-based retry index (0 for the first retry)
pub fn calculate_backoff_delay(
    attempt: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
    jitter_factor: f64,
) -> u64 {
    let exp = base_delay_ms.saturating_mul(1_u64.checked_shl(attempt).unwrap_or(u64::MAX));
    let capped = exp.min(max_delay_ms);

    // Deterministic jitter in [-jitter_factor, +jitter_factor].
    let seed = f64::from(attempt.wrapping_mul(2_654_435_761) % 1000) / 1000.0;
    let jitter = (seed * 2.0 - 1.0) * jitter_factor.clamp(0.0, 1.0);
    let jittered = (capped as f64 * (1.0 + jitter)).max(0.0);

    (jittered as u64).min(max_delay_ms)
}

impl RetryConfig {
    /// Backoff delay for the given zero-based retry index.
    pub fn delay_for_attempt(&self, attempt: u32) -> u64 {
        calculate_backoff_delay(
            attempt,
            self.base_delay_ms,
            self.max_delay_ms,
            self.jitter_factor,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn backoff_grows_exponentially_without_jitter() {
        assert_eq!(calculate_backoff_delay(0, 100, 60_000, 0.0), 100);
        assert_eq!(calculate_backoff_delay(1, 100, 60_000, 0.0), 200);
        assert_eq!(calculate_backoff_delay(2, 100, 60_000, 0.0), 400);
    }

    #[test]
    fn backoff_is_capped_at_max() {
        for attempt in 0..64 {
            assert!(calculate_backoff_delay(attempt, 1000, 5000, 0.0) <= 5000);
            assert!(calculate_backoff_delay(attempt, 1000, 5000, 0.5) <= 5000);
        }
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let base = calculate_backoff_delay(3, 1000, 60_000, 0.0);
        let jittered = calculate_backoff_delay(3, 1000, 60_000, 0.2);
        let spread = (jittered as f64 - base as f64).abs();
        assert!(spread <= base as f64 * 0.2 + 1.0);
    }

    #[test]
    fn defaults_round_trip_through_serde() {
        let config: RetryConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert_eq!(config.base_delay_ms, DEFAULT_BASE_DELAY_MS);
    }

    proptest! {
        // The delay never exceeds the configured cap, for any attempt index,
        // base delay, or jitter factor.
        #[test]
        fn delay_never_exceeds_cap(
            attempt in 0_u32..128,
            base_delay_ms in 1_u64..100_000,
            max_delay_ms in 1_u64..100_000,
            jitter_factor in 0.0_f64..=1.0,
        ) {
            let delay = calculate_backoff_delay(attempt, base_delay_ms, max_delay_ms, jitter_factor);
            prop_assert!(delay <= max_delay_ms);
        }
    }
}
