//! Error types for the gateway core.
//!
//! `GatewayError` is the coarse, domain-grained error any fallible internal
//! operation returns — it exists so `?` and `#[from]` work uniformly across
//! modules. `DispatchError` is the caller-facing taxonomy from the error
//! handling design: every error the Dispatcher surfaces to a channel adapter
//! is one of its five variants, each carrying the fields needed to render
//! the HTTP response in §6.
//!
//! Design rules:
//! - Variants are coarse-grained by domain, not by call site.
//! - `#[from]` wires the common conversions so call sites can use `?`.
//! - No variant carries secret material (API keys, tokens).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("internal invariant violation: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        GatewayError::Config(msg.into())
    }

    pub fn internal<S: Into<String>>(msg: S) -> Self {
        GatewayError::Internal(msg.into())
    }
}

/// Classification an upstream adapter assigns to a failed call (§6 outbound
/// contract: "Each adapter is responsible for translating its provider's
/// error shape to the four classes").
#[derive(Debug, Clone)]
pub enum UpstreamErrorKind {
    /// Network error, 5xx, timeout — retry within the target, then fall back.
    Transient,
    /// 429, with or without a server-provided retry hint.
    RateLimit { retry_after_s: Option<u64> },
    /// Auth failure against the upstream target.
    Auth,
    /// 4xx non-429, malformed response — abandon target immediately.
    Permanent,
}

#[derive(Debug, Error)]
#[error("{kind:?}: {message}")]
pub struct UpstreamError {
    pub kind: UpstreamErrorKind,
    pub message: String,
}

impl UpstreamError {
    pub fn transient<S: Into<String>>(message: S) -> Self {
        Self { kind: UpstreamErrorKind::Transient, message: message.into() }
    }

    pub fn rate_limit<S: Into<String>>(message: S, retry_after_s: Option<u64>) -> Self {
        Self { kind: UpstreamErrorKind::RateLimit { retry_after_s }, message: message.into() }
    }

    pub fn auth<S: Into<String>>(message: S) -> Self {
        Self { kind: UpstreamErrorKind::Auth, message: message.into() }
    }

    pub fn permanent<S: Into<String>>(message: S) -> Self {
        Self { kind: UpstreamErrorKind::Permanent, message: message.into() }
    }

    /// Permanent and auth failures abandon the target's retry loop immediately.
    pub fn aborts_retry(&self) -> bool {
        matches!(self.kind, UpstreamErrorKind::Permanent | UpstreamErrorKind::Auth)
    }
}

/// Caller-facing error taxonomy (§7). Every variant maps to exactly one
/// HTTP status via [`DispatchError::status_code`].
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("budget exceeded: {gate} gate, current spend {current_spend:.2}, limit {limit:.2}")]
    BudgetExceeded { gate: String, current_spend: f64, limit: f64 },

    #[error("rate limited upstream")]
    RateLimitedUpstream { retry_after_s: Option<u64> },

    #[error("upstream failed: {0:?}")]
    UpstreamFailed(Vec<String>),

    #[error("queue full")]
    QueueFull,

    #[error("cancelled")]
    Cancelled,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("internal error: {0}")]
    Internal(String),
}

impl DispatchError {
    pub fn status_code(&self) -> u16 {
        match self {
            DispatchError::Unauthorized => 401,
            DispatchError::BudgetExceeded { .. } => 402,
            DispatchError::RateLimitedUpstream { .. } | DispatchError::QueueFull => 429,
            DispatchError::InvalidRequest(_) => 400,
            DispatchError::UpstreamFailed(_) => 502,
            DispatchError::Cancelled => 499,
            DispatchError::Internal(_) => 500,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            DispatchError::Unauthorized => "unauthorized",
            DispatchError::BudgetExceeded { .. } => "budget-exceeded",
            DispatchError::RateLimitedUpstream { .. } => "rate-limited-upstream",
            DispatchError::QueueFull => "queue-full",
            DispatchError::InvalidRequest(_) => "invalid-request",
            DispatchError::UpstreamFailed(_) => "upstream-failed",
            DispatchError::Cancelled => "cancelled",
            DispatchError::Internal(_) => "internal",
        }
    }
}

impl From<GatewayError> for DispatchError {
    fn from(err: GatewayError) -> Self {
        DispatchError::Internal(err.to_string())
    }
}
