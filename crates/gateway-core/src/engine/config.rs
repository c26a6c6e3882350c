//! Configuration loading (§6 Configuration).
//!
//! Grounded on `at-core::config::Config::load()`: a TOML file under the
//! user's config directory, parsed with `serde`/`toml`, falling back to
//! built-in defaults when absent. Every section mirrors a dotted-path group
//! from §6 (`limits.*`, `tiers.*`, `router.*`, `breaker.*`, `heartbeat.*`,
//! `session.*`).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::atoms::constants::*;
use crate::atoms::types::{ModelTier, TierConfig};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(String),
    #[error("parse: {0}")]
    Parse(String),
}

/// Top-level configuration loaded from `~/.config/ai-gateway/config.toml`,
/// or from the path named by the `AI_GATEWAY_CONFIG` environment variable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default = "default_tiers")]
    pub tiers: HashMap<String, TierEntry>,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub breaker: BreakerConfig,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            limits: LimitsConfig::default(),
            tiers: default_tiers(),
            router: RouterConfig::default(),
            breaker: BreakerConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            session: SessionConfig::default(),
            auth: AuthConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Load from the default path, falling back to `GatewayConfig::default()`
    /// when the file does not exist.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(GatewayConfig::default())
        }
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io(e.to_string()))?;
        toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    fn default_path() -> PathBuf {
        if let Ok(p) = std::env::var("AI_GATEWAY_CONFIG") {
            return PathBuf::from(p);
        }
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ai-gateway")
            .join("config.toml")
    }

    /// Resolve effective per-project limits, falling back to the global
    /// defaults when no override exists (§6 `limits.per_project.<id>.*`).
    pub fn limits_for_project(&self, project_id: Option<&str>) -> ResolvedLimits {
        let base = ResolvedLimits {
            per_task_usd: self.limits.per_task_usd,
            daily_usd: self.limits.daily_usd,
            monthly_usd: self.limits.monthly_usd,
            max_queue: self.limits.max_queue,
            warning_fraction: self.limits.warning_fraction,
        };
        let Some(pid) = project_id else { return base };
        let Some(ovr) = self.limits.per_project.get(pid) else { return base };
        ResolvedLimits {
            per_task_usd: ovr.per_task_usd.unwrap_or(base.per_task_usd),
            daily_usd: ovr.daily_usd.unwrap_or(base.daily_usd),
            monthly_usd: ovr.monthly_usd.unwrap_or(base.monthly_usd),
            max_queue: ovr.max_queue.unwrap_or(base.max_queue),
            warning_fraction: ovr.warning_fraction.unwrap_or(base.warning_fraction),
        }
    }

    pub fn tier_config(&self, tier: ModelTier) -> Option<TierConfig> {
        self.tiers.get(tier.as_str()).map(|e| TierConfig {
            tier,
            model_name: e.model_name.clone(),
            endpoint: e.endpoint.clone(),
            input_price: e.input_price,
            output_price: e.output_price,
            timeout_s: e.timeout_s,
            max_output_tokens: e.max_output_tokens,
            context_window: e.context_window,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ResolvedLimits {
    pub per_task_usd: f64,
    pub daily_usd: f64,
    pub monthly_usd: f64,
    pub max_queue: u32,
    pub warning_fraction: f64,
}

// ── limits.* ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_per_task_usd")]
    pub per_task_usd: f64,
    #[serde(default = "default_daily_usd")]
    pub daily_usd: f64,
    #[serde(default = "default_monthly_usd")]
    pub monthly_usd: f64,
    #[serde(default = "default_max_queue")]
    pub max_queue: u32,
    #[serde(default = "default_warning_fraction")]
    pub warning_fraction: f64,
    #[serde(default)]
    pub per_project: HashMap<String, ProjectLimitsOverride>,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            per_task_usd: default_per_task_usd(),
            daily_usd: default_daily_usd(),
            monthly_usd: default_monthly_usd(),
            max_queue: default_max_queue(),
            warning_fraction: default_warning_fraction(),
            per_project: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectLimitsOverride {
    #[serde(default)]
    pub per_task_usd: Option<f64>,
    #[serde(default)]
    pub daily_usd: Option<f64>,
    #[serde(default)]
    pub monthly_usd: Option<f64>,
    #[serde(default)]
    pub max_queue: Option<u32>,
    #[serde(default)]
    pub warning_fraction: Option<f64>,
}

fn default_per_task_usd() -> f64 {
    DEFAULT_PER_TASK_USD
}
fn default_daily_usd() -> f64 {
    DEFAULT_DAILY_USD
}
fn default_monthly_usd() -> f64 {
    DEFAULT_MONTHLY_USD
}
fn default_max_queue() -> u32 {
    DEFAULT_MAX_QUEUE
}
fn default_warning_fraction() -> f64 {
    DEFAULT_WARNING_FRACTION
}

// ── tiers.* ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierEntry {
    pub model_name: String,
    pub endpoint: String,
    pub input_price: f64,
    pub output_price: f64,
    #[serde(default = "default_tier_timeout_s")]
    pub timeout_s: u64,
    #[serde(default = "default_tier_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default = "default_tier_context_window")]
    pub context_window: u32,
}

fn default_tier_timeout_s() -> u64 {
    30
}
fn default_tier_max_output_tokens() -> u32 {
    4_096
}
fn default_tier_context_window() -> u32 {
    128_000
}

fn default_tiers() -> HashMap<String, TierEntry> {
    let mut m = HashMap::new();
    m.insert(
        "economy".to_string(),
        TierEntry {
            model_name: "economy-small".into(),
            endpoint: "https://api.economy.example/v1/chat/completions".into(),
            input_price: 0.25,
            output_price: 1.25,
            timeout_s: 20,
            max_output_tokens: 2_048,
            context_window: 16_000,
        },
    );
    m.insert(
        "standard".to_string(),
        TierEntry {
            model_name: "standard-mid".into(),
            endpoint: "https://api.standard.example/v1/chat/completions".into(),
            input_price: 3.00,
            output_price: 15.00,
            timeout_s: 30,
            max_output_tokens: 4_096,
            context_window: 128_000,
        },
    );
    m.insert(
        "premium".to_string(),
        TierEntry {
            model_name: "premium-large".into(),
            endpoint: "https://api.premium.example/v1/chat/completions".into(),
            input_price: 15.00,
            output_price: 75.00,
            timeout_s: 60,
            max_output_tokens: 8_192,
            context_window: 200_000,
        },
    );
    m.insert(
        "local".to_string(),
        TierEntry {
            model_name: "local-default".into(),
            endpoint: "http://localhost:11434/v1/chat/completions".into(),
            input_price: 0.0,
            output_price: 0.0,
            timeout_s: 45,
            max_output_tokens: 4_096,
            context_window: 32_000,
        },
    );
    m
}

// ── router.* ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    #[serde(default = "default_haiku_threshold")]
    pub haiku_threshold: f64,
    #[serde(default = "default_premium_threshold")]
    pub premium_threshold: f64,
    #[serde(default = "default_cache_ttl_s")]
    pub cache_ttl_s: u64,
    #[serde(default = "default_cache_max_entries")]
    pub cache_max_entries: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            haiku_threshold: default_haiku_threshold(),
            premium_threshold: default_premium_threshold(),
            cache_ttl_s: default_cache_ttl_s(),
            cache_max_entries: default_cache_max_entries(),
        }
    }
}

fn default_haiku_threshold() -> f64 {
    COMPLEXITY_LOW_CEILING
}
fn default_premium_threshold() -> f64 {
    COMPLEXITY_HIGH_FLOOR
}
fn default_cache_ttl_s() -> u64 {
    DEFAULT_CACHE_TTL_S
}
fn default_cache_max_entries() -> usize {
    DEFAULT_CACHE_MAX_ENTRIES
}

// ── breaker.* ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_reset_timeout_s")]
    pub reset_timeout_s: u64,
    #[serde(default = "default_halfopen_successes")]
    pub halfopen_successes: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            reset_timeout_s: default_reset_timeout_s(),
            halfopen_successes: default_halfopen_successes(),
        }
    }
}

fn default_failure_threshold() -> u32 {
    DEFAULT_FAILURE_THRESHOLD
}
fn default_reset_timeout_s() -> u64 {
    DEFAULT_RESET_TIMEOUT_S
}
fn default_halfopen_successes() -> u32 {
    DEFAULT_HALFOPEN_SUCCESSES
}

// ── heartbeat.* ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    #[serde(default = "default_check_interval_s")]
    pub check_interval_s: u64,
    #[serde(default = "default_stale_threshold_s")]
    pub stale_threshold_s: u64,
    #[serde(default = "default_timeout_threshold_s")]
    pub timeout_threshold_s: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            check_interval_s: default_check_interval_s(),
            stale_threshold_s: default_stale_threshold_s(),
            timeout_threshold_s: default_timeout_threshold_s(),
        }
    }
}

fn default_check_interval_s() -> u64 {
    DEFAULT_CHECK_INTERVAL_S
}
fn default_stale_threshold_s() -> u64 {
    DEFAULT_STALE_THRESHOLD_S
}
fn default_timeout_threshold_s() -> u64 {
    DEFAULT_TIMEOUT_THRESHOLD_S
}

// ── session.* ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_max_turns_exported")]
    pub max_turns_exported: usize,
    #[serde(default = "default_session_ttl_s")]
    pub ttl_s: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { max_turns_exported: default_max_turns_exported(), ttl_s: default_session_ttl_s() }
    }
}

fn default_max_turns_exported() -> usize {
    DEFAULT_MAX_TURNS_EXPORTED
}
fn default_session_ttl_s() -> u64 {
    DEFAULT_SESSION_TTL_S
}

// ── auth (ambient, §6 "Auth") ───────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Bearer token expected on inbound requests. `None` disables auth
    /// (intended for local development only).
    #[serde(default)]
    pub bearer_token: Option<String>,
}
