// ── Gateway Atoms: Constants ───────────────────────────────────────────────
// Named defaults for every configurable knob the core exposes. Collecting
// them here keeps config.rs's `Default` impls and the engine modules free of
// magic numbers scattered across files.

// ── Budget gates (§6 limits.*) ─────────────────────────────────────────────
pub const DEFAULT_PER_TASK_USD: f64 = 1.00;
pub const DEFAULT_DAILY_USD: f64 = 50.00;
pub const DEFAULT_MONTHLY_USD: f64 = 1_000.00;
pub const DEFAULT_MAX_QUEUE: u32 = 100;
pub const DEFAULT_WARNING_FRACTION: f64 = 0.80;

// ── Router / classifier (§6 router.*) ──────────────────────────────────────
pub const DEFAULT_CACHE_TTL_S: u64 = 300;
pub const DEFAULT_CACHE_MAX_ENTRIES: usize = 10_000;
// Complexity bucket thresholds from §4.1.
pub const COMPLEXITY_LOW_CEILING: f64 = 0.30;
pub const COMPLEXITY_HIGH_FLOOR: f64 = 0.70;
// Weight applied to high-complexity keyword hits in the score formula.
pub const HIGH_COMPLEXITY_WEIGHT: f64 = 0.34;
// Divisor for the word-count contribution to the complexity score.
pub const WORD_COUNT_DIVISOR: f64 = 20.0;

// ── Circuit breaker (§6 breaker.*) ─────────────────────────────────────────
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
pub const DEFAULT_RESET_TIMEOUT_S: u64 = 60;
pub const DEFAULT_HALFOPEN_SUCCESSES: u32 = 1;
// §4.5: in half-open, a single failure reopens the breaker.
pub const HALFOPEN_FAILURE_THRESHOLD: u32 = 1;

// ── Heartbeat reaper (§6 heartbeat.*) ──────────────────────────────────────
pub const DEFAULT_CHECK_INTERVAL_S: u64 = 30;
pub const DEFAULT_STALE_THRESHOLD_S: u64 = 300;
pub const DEFAULT_TIMEOUT_THRESHOLD_S: u64 = 1_800;

// ── Session store (§6 session.*) ───────────────────────────────────────────
pub const DEFAULT_MAX_TURNS_EXPORTED: usize = 20;
pub const DEFAULT_SESSION_TTL_S: u64 = 86_400;

// ── Dispatcher retry/backoff (§4.6) ────────────────────────────────────────
pub const DEFAULT_RETRY_BASE_MS: u64 = 1_000;
pub const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 30_000;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const JITTER_MIN_FACTOR: f64 = 0.8;
pub const JITTER_MAX_FACTOR: f64 = 1.2;

// ── Token estimation (§4.3) ─────────────────────────────────────────────────
pub const CHARS_PER_TOKEN: usize = 4;
