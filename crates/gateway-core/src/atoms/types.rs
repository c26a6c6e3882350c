//! Core data types (§3 Data Model).
//!
//! Struct definitions live here; `impl` blocks beyond simple constructors
//! live alongside the engine module that owns their behavior.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Query ───────────────────────────────────────────────────────────────

/// Opaque user text plus optional routing hints. Immutable once admitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    pub content: String,
    #[serde(default)]
    pub session_key: Option<SessionKey>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub requested_agent: Option<String>,
    #[serde(default)]
    pub requested_model: Option<String>,
}

/// Stable identifier (channel + user + conversation), namespace-scoped.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionKey(pub String);

impl SessionKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for SessionKey {
    fn from(s: String) -> Self {
        SessionKey(s)
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Session ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// {created-at, updated-at, message-count, ordered message sequence}.
///
/// Invariant: `message_count == messages.len()`; `updated_at >= created_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub key: SessionKey,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub message_count: usize,
    pub messages: VecDeque<SessionMessage>,
}

impl SessionRecord {
    pub fn new(key: SessionKey) -> Self {
        let now = Utc::now();
        Self { key, created_at: now, updated_at: now, message_count: 0, messages: VecDeque::new() }
    }

    /// Last `n` messages, in insertion order.
    pub fn recent(&self, n: usize) -> Vec<SessionMessage> {
        let len = self.messages.len();
        let start = len.saturating_sub(n);
        self.messages.iter().skip(start).cloned().collect()
    }
}

// ── Model pool ──────────────────────────────────────────────────────────

/// Closed set of model tiers (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    Economy,
    Standard,
    Premium,
    Local,
}

impl ModelTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelTier::Economy => "economy",
            ModelTier::Standard => "standard",
            ModelTier::Premium => "premium",
            ModelTier::Local => "local",
        }
    }

    /// Ordered from cheapest to most capable; used to build the
    /// "next-cheaper-available" fallback step in the Dispatcher (§4.6).
    pub fn cost_order() -> &'static [ModelTier] {
        &[ModelTier::Economy, ModelTier::Standard, ModelTier::Premium]
    }
}

/// Per-tier configuration: display name, endpoint, prices, limits (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierConfig {
    pub tier: ModelTier,
    pub model_name: String,
    pub endpoint: String,
    /// USD per megatoken of input.
    pub input_price: f64,
    /// USD per megatoken of output.
    pub output_price: f64,
    pub timeout_s: u64,
    pub max_output_tokens: u32,
    pub context_window: u32,
}

// ── Classification / routing ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Security,
    Development,
    Planning,
    Database,
    General,
}

/// {complexity, intent, matched-keywords, confidence} (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    pub complexity: Complexity,
    pub intent: Intent,
    pub matched_keywords: Vec<String>,
    pub confidence: f64,
}

/// {tier, model-name, reason-string, classification, cached-flag} (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub tier: ModelTier,
    pub model_name: String,
    pub reason: String,
    pub classification: Classification,
    pub cached: bool,
}

// ── Cost ledger ─────────────────────────────────────────────────────────

/// {timestamp, session-key, project-id, tier, input-tokens, output-tokens,
/// cost-usd}. Append-only; never mutated (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpendRecord {
    pub timestamp: DateTime<Utc>,
    pub session_key: Option<SessionKey>,
    pub project_id: Option<String>,
    pub tier: ModelTier,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
}

// ── Budget ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BudgetGateScope {
    PerTask,
    Daily,
    Monthly,
    QueueSize,
}

/// Outcome of a budget check (§4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum BudgetDecision {
    Admit,
    Warn { gate: BudgetGateScope, reason: String },
    Reject { gate: BudgetGateScope, reason: String, current_spend: f64, limit: f64 },
}

// ── Circuit breaker ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Identifies a concrete endpoint: a tier at a provider, or a specific agent
/// service (glossary: "Target").
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetId(pub String);

impl TargetId {
    pub fn for_tier(tier: ModelTier) -> Self {
        TargetId(tier.as_str().to_string())
    }
}

impl std::fmt::Display for TargetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Heartbeat ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Running,
    Idle,
}

/// {agent-id, task-id, started-at, last-activity-at, status} (§3).
///
/// Invariant: `started_at <= last_activity_at <= now` for any in-flight
/// record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentActivity {
    pub agent_id: String,
    pub task_id: String,
    pub started_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub status: AgentStatus,
}

// ── Response / adapter types ───────────────────────────────────────────

/// Result of a successful upstream call (§6 outbound contract).
#[derive(Debug, Clone)]
pub struct AdapterReply {
    pub text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Response body for `POST /chat` (§6).
#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    pub response: String,
    pub model: String,
    pub tokens: TokenUsage,
    #[serde(rename = "sessionKey")]
    pub session_key: Option<String>,
    #[serde(rename = "historyLength")]
    pub history_length: usize,
    pub tier: ModelTier,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_record_recent_caps_at_len() {
        let mut s = SessionRecord::new(SessionKey("k".into()));
        for i in 0..3 {
            s.messages.push_back(SessionMessage {
                role: Role::User,
                content: format!("m{i}"),
                timestamp: Utc::now(),
            });
        }
        s.message_count = s.messages.len();
        let recent = s.recent(10);
        assert_eq!(recent.len(), 3);
    }

    #[test]
    fn session_record_recent_returns_last_n_in_order() {
        let mut s = SessionRecord::new(SessionKey("k".into()));
        for i in 0..5 {
            s.messages.push_back(SessionMessage {
                role: Role::User,
                content: format!("m{i}"),
                timestamp: Utc::now(),
            });
        }
        let recent = s.recent(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].content, "m3");
        assert_eq!(recent[1].content, "m4");
    }

    #[test]
    fn tier_cost_order_is_cheapest_first() {
        let order = ModelTier::cost_order();
        assert_eq!(order, &[ModelTier::Economy, ModelTier::Standard, ModelTier::Premium]);
    }
}
