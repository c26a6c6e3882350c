//! Retry/backoff helpers shared by every target in the Dispatcher's
//! fallback chain (§4.6, §9 "explicit state-machine iteration over the
//! fallback chain" rather than three near-duplicate per-provider loops).
//!
//! Jitter is derived from `SystemTime::now().subsec_nanos()` rather than
//! pulling in the `rand` crate for one call site.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::atoms::constants::{
    DEFAULT_MAX_RETRIES, DEFAULT_RETRY_BASE_MS, DEFAULT_RETRY_MAX_DELAY_MS, JITTER_MAX_FACTOR, JITTER_MIN_FACTOR,
};

pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504 | 529)
}

/// Integer-seconds `Retry-After` parsing only; no HTTP-date support.
pub fn parse_retry_after(header_value: &str) -> Option<u64> {
    header_value.trim().parse::<u64>().ok()
}

fn jitter_factor() -> f64 {
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.subsec_nanos()).unwrap_or(0);
    let unit = (nanos % 1_000) as f64 / 1_000.0; // [0, 1)
    JITTER_MIN_FACTOR + unit * (JITTER_MAX_FACTOR - JITTER_MIN_FACTOR)
}

pub fn apply_jitter(base_ms: u64) -> u64 {
    ((base_ms as f64) * jitter_factor()).round() as u64
}

/// `base x 2^attempt` clamped to `max_delay`, then jittered; honors a
/// server-provided retry hint (floored at the computed backoff) when
/// present (§4.6).
pub fn retry_delay(attempt: u32, retry_after_s: Option<u64>, base_ms: u64, max_delay_ms: u64) -> Duration {
    let backoff_ms = base_ms.saturating_mul(2u64.saturating_pow(attempt)).min(max_delay_ms);
    let delay_ms = match retry_after_s {
        Some(secs) => (secs * 1_000).max(backoff_ms),
        None => apply_jitter(backoff_ms),
    };
    Duration::from_millis(delay_ms)
}

/// Retry policy parameters for one target (§4.6 "Default base=1s,
/// max-delay=30s, max-retries=3").
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub base_ms: u64,
    pub max_delay_ms: u64,
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { base_ms: DEFAULT_RETRY_BASE_MS, max_delay_ms: DEFAULT_RETRY_MAX_DELAY_MS, max_retries: DEFAULT_MAX_RETRIES }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_statuses() {
        for s in [429, 500, 502, 503, 504, 529] {
            assert!(is_retryable_status(s));
        }
        for s in [400, 401, 403, 404] {
            assert!(!is_retryable_status(s));
        }
    }

    #[test]
    fn parse_retry_after_valid() {
        assert_eq!(parse_retry_after("30"), Some(30));
        assert_eq!(parse_retry_after("not-a-number"), None);
    }

    #[test]
    fn jitter_stays_in_range() {
        for _ in 0..50 {
            let d = apply_jitter(1_000);
            assert!(d >= 800 && d <= 1_200, "jittered delay {d} out of [800,1200]");
        }
    }

    #[test]
    fn backoff_doubles_and_caps_at_max_delay() {
        let d0 = retry_delay(0, None, 100, 1_000);
        let d1 = retry_delay(1, None, 100, 1_000);
        let d2 = retry_delay(2, None, 100, 1_000);
        // base=100: attempt0 ~100ms, attempt1 ~200ms, attempt2 ~400ms, jittered +/-20%.
        assert!(d0.as_millis() >= 80 && d0.as_millis() <= 120);
        assert!(d1.as_millis() >= 160 && d1.as_millis() <= 240);
        assert!(d2.as_millis() >= 320 && d2.as_millis() <= 480);
    }

    #[test]
    fn retry_after_floors_at_computed_backoff() {
        // backoff for attempt=0,base=1000,max=30000 is ~1000ms (jittered 800-1200);
        // a retry-after of 5s should dominate regardless.
        let d = retry_delay(0, Some(5), 1_000, 30_000);
        assert_eq!(d.as_millis(), 5_000);
    }
}
