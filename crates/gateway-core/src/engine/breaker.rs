//! Health & Circuit Breaker (§4.5).
//!
//! An explicit three-state machine per target: closed -> open -> half-open
//! -> closed, with a single-flight half-open probe per target (§4.5 "at
//! most one in flight per target; concurrent callers seeing half-open race
//! on a lock and the losers are treated as though the breaker is open").

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::atoms::constants::HALFOPEN_FAILURE_THRESHOLD;
use crate::atoms::types::{CircuitState, TargetId};
use crate::engine::config::BreakerConfig;

struct TargetState {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure_time: Option<DateTime<Utc>>,
    success_count_in_half_open: u32,
    probe_in_flight: bool,
}

impl Default for TargetState {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_failure_time: None,
            success_count_in_half_open: 0,
            probe_in_flight: false,
        }
    }
}

/// Per-target mutex guarding the state tuple; short critical sections only
/// (§5 "Shared-resource policy"). One `HashMap` entry per target, each
/// behind the same outer lock — contention is acceptable since critical
/// sections here are a handful of field reads/writes.
pub struct CircuitBreaker {
    targets: Mutex<HashMap<TargetId, TargetState>>,
    failure_threshold: u32,
    reset_timeout_s: u64,
    halfopen_successes: u32,
}

impl CircuitBreaker {
    pub fn new(config: &BreakerConfig) -> Self {
        Self {
            targets: Mutex::new(HashMap::new()),
            failure_threshold: config.failure_threshold,
            reset_timeout_s: config.reset_timeout_s,
            halfopen_successes: config.halfopen_successes,
        }
    }

    /// `available(target) -> bool`. Transitions open -> half-open when the
    /// reset-timeout window has elapsed, then grants at most one caller the
    /// half-open probe; other concurrent callers are treated as open.
    pub fn available(&self, target: &TargetId) -> bool {
        let mut targets = self.targets.lock();
        let entry = targets.entry(target.clone()).or_default();

        if entry.state == CircuitState::Open {
            let elapsed = entry
                .last_failure_time
                .map(|t| (Utc::now() - t).num_seconds() as u64)
                .unwrap_or(self.reset_timeout_s);
            if elapsed >= self.reset_timeout_s {
                entry.state = CircuitState::HalfOpen;
                entry.success_count_in_half_open = 0;
                entry.probe_in_flight = false;
            }
        }

        match entry.state {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => {
                if entry.probe_in_flight {
                    false
                } else {
                    entry.probe_in_flight = true;
                    true
                }
            }
        }
    }

    /// `onSuccess(target)`.
    pub fn on_success(&self, target: &TargetId) {
        let mut targets = self.targets.lock();
        let entry = targets.entry(target.clone()).or_default();
        match entry.state {
            CircuitState::Closed => {
                entry.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                entry.success_count_in_half_open += 1;
                if entry.success_count_in_half_open >= self.halfopen_successes {
                    entry.state = CircuitState::Closed;
                    entry.consecutive_failures = 0;
                    entry.success_count_in_half_open = 0;
                    entry.probe_in_flight = false;
                } else {
                    // More probes required; release the slot for the next caller.
                    entry.probe_in_flight = false;
                }
            }
            CircuitState::Open => {}
        }
    }

    /// `onFailure(target, error)`.
    pub fn on_failure(&self, target: &TargetId) {
        let mut targets = self.targets.lock();
        let entry = targets.entry(target.clone()).or_default();
        match entry.state {
            CircuitState::Closed => {
                entry.consecutive_failures += 1;
                if entry.consecutive_failures >= self.failure_threshold {
                    entry.state = CircuitState::Open;
                    entry.last_failure_time = Some(Utc::now());
                }
            }
            CircuitState::HalfOpen => {
                entry.consecutive_failures += 1;
                if entry.consecutive_failures >= HALFOPEN_FAILURE_THRESHOLD {
                    entry.state = CircuitState::Open;
                    entry.last_failure_time = Some(Utc::now());
                    entry.probe_in_flight = false;
                    entry.success_count_in_half_open = 0;
                    entry.consecutive_failures = 0;
                } else {
                    entry.probe_in_flight = false;
                }
            }
            CircuitState::Open => {
                entry.last_failure_time = Some(Utc::now());
            }
        }
    }

    pub fn state(&self, target: &TargetId) -> CircuitState {
        self.targets.lock().get(target).map(|e| e.state).unwrap_or(CircuitState::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(threshold: u32, reset_s: u64, halfopen: u32) -> BreakerConfig {
        BreakerConfig { failure_threshold: threshold, reset_timeout_s: reset_s, halfopen_successes: halfopen }
    }

    #[test]
    fn closed_by_default_and_available() {
        let cb = CircuitBreaker::new(&config(5, 60, 1));
        let t = TargetId("economy".into());
        assert!(cb.available(&t));
    }

    #[test]
    fn opens_after_threshold_failures() {
        let cb = CircuitBreaker::new(&config(3, 60, 1));
        let t = TargetId("economy".into());
        for _ in 0..3 {
            cb.on_failure(&t);
        }
        assert_eq!(cb.state(&t), CircuitState::Open);
        assert!(!cb.available(&t));
    }

    #[test]
    fn success_resets_consecutive_failures_in_closed() {
        let cb = CircuitBreaker::new(&config(3, 60, 1));
        let t = TargetId("economy".into());
        cb.on_failure(&t);
        cb.on_failure(&t);
        cb.on_success(&t);
        cb.on_failure(&t);
        cb.on_failure(&t);
        assert_eq!(cb.state(&t), CircuitState::Closed);
    }

    #[test]
    fn half_open_probe_is_single_flight() {
        let cb = CircuitBreaker::new(&config(1, 0, 1));
        let t = TargetId("economy".into());
        cb.on_failure(&t); // opens immediately (threshold 1)
        assert_eq!(cb.state(&t), CircuitState::Open);
        // reset_timeout_s = 0, so the next `available` call transitions to half-open
        // and grants the probe to the first caller.
        assert!(cb.available(&t));
        // A second concurrent caller is treated as open (no probe available).
        assert!(!cb.available(&t));
    }

    #[test]
    fn half_open_failure_reopens() {
        let cb = CircuitBreaker::new(&config(1, 0, 1));
        let t = TargetId("economy".into());
        cb.on_failure(&t);
        assert!(cb.available(&t)); // grants probe, now half-open
        cb.on_failure(&t);
        assert_eq!(cb.state(&t), CircuitState::Open);
    }

    #[test]
    fn half_open_success_closes_after_k_successes() {
        let cb = CircuitBreaker::new(&config(1, 0, 2));
        let t = TargetId("economy".into());
        cb.on_failure(&t);
        assert!(cb.available(&t)); // probe 1 granted
        cb.on_success(&t); // 1/2 successes, still half-open, probe released
        assert_eq!(cb.state(&t), CircuitState::HalfOpen);
        assert!(cb.available(&t)); // probe 2 granted
        cb.on_success(&t); // 2/2 successes, closes
        assert_eq!(cb.state(&t), CircuitState::Closed);
    }
}
