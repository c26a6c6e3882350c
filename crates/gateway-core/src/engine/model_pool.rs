//! Model Pool (§4.1, select/cacheDecision/lookup half).
//!
//! Tier selection policy plus the Decision Cache: a bounded LRU keyed by a
//! stable hash of the normalized query, with a per-entry TTL.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};

use crate::atoms::types::{Classification, Complexity, Intent, ModelTier, RoutingDecision, TargetId};
use crate::engine::config::GatewayConfig;

/// Tier selection policy (§4.1 `select`). Given a Classification, minimizes
/// cost subject to the predicted adequacy floor.
pub fn select_tier(classification: &Classification) -> ModelTier {
    if classification.intent == Intent::Planning {
        return ModelTier::Premium;
    }
    match classification.complexity {
        Complexity::High => ModelTier::Premium,
        Complexity::Medium => ModelTier::Standard,
        Complexity::Low => match classification.intent {
            Intent::General | Intent::Database => ModelTier::Economy,
            // Not explicitly enumerated by the policy table; security and
            // development queries at low complexity still get the mid tier
            // rather than the cheapest one.
            Intent::Security | Intent::Development | Intent::Planning => ModelTier::Standard,
        },
    }
}

/// Builds the full RoutingDecision for a classified, normalized query.
/// `requested_model` implements the "explicit override" escape hatch: when
/// set, it bypasses the tier policy but the caller (Dispatcher) is still
/// responsible for running budget and circuit checks against it.
pub fn route(
    config: &GatewayConfig,
    classification: Classification,
    requested_model: Option<&str>,
) -> RoutingDecision {
    if let Some(model) = requested_model {
        // Find the tier whose configured model name matches the override,
        // defaulting to the policy tier's own model if no tier matches (the
        // override then just renames the model sent upstream).
        let tier = config
            .tiers
            .iter()
            .find(|(_, e)| e.model_name == model)
            .map(|(name, _)| tier_from_name(name))
            .unwrap_or_else(|| select_tier(&classification));
        return RoutingDecision {
            tier,
            model_name: model.to_string(),
            reason: "explicit override in query".to_string(),
            classification,
            cached: false,
        };
    }

    let tier = select_tier(&classification);
    let model_name =
        config.tiers.get(tier.as_str()).map(|e| e.model_name.clone()).unwrap_or_else(|| tier.as_str().to_string());
    let reason = format!(
        "complexity={:?} intent={:?} -> tier={}",
        classification.complexity, classification.intent, tier.as_str()
    );
    RoutingDecision { tier, model_name, reason, classification, cached: false }
}

fn tier_from_name(name: &str) -> ModelTier {
    match name {
        "economy" => ModelTier::Economy,
        "standard" => ModelTier::Standard,
        "premium" => ModelTier::Premium,
        "local" => ModelTier::Local,
        _ => ModelTier::Standard,
    }
}

/// Lowercase + whitespace-collapse (§4.1 `cacheDecision`/`lookup`).
pub fn normalize_query(content: &str) -> String {
    content.to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
}

fn fingerprint(normalized: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    normalized.hash(&mut hasher);
    hasher.finish()
}

struct CacheEntry {
    decision: RoutingDecision,
    expires_at: DateTime<Utc>,
}

/// Bounded LRU decision cache with per-entry TTL (§4.1, §5 "Decision Cache").
pub struct DecisionCache {
    capacity: usize,
    ttl: chrono::Duration,
    entries: HashMap<u64, CacheEntry>,
    order: VecDeque<u64>,
}

impl DecisionCache {
    pub fn new(capacity: usize, ttl_s: u64) -> Self {
        Self {
            capacity,
            ttl: chrono::Duration::seconds(ttl_s as i64),
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    /// `cacheDecision(query, decision)`.
    pub fn insert(&mut self, query: &str, decision: RoutingDecision) {
        let key = fingerprint(&normalize_query(query));
        if self.entries.contains_key(&key) {
            self.order.retain(|k| *k != key);
        } else if self.entries.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
        self.order.push_back(key);
        self.entries.insert(key, CacheEntry { decision, expires_at: Utc::now() + self.ttl });
    }

    /// `lookup(query)`. Returns `None` once the TTL has elapsed (the expired
    /// entry is evicted).
    pub fn lookup(&mut self, query: &str) -> Option<RoutingDecision> {
        let key = fingerprint(&normalize_query(query));
        let expired = match self.entries.get(&key) {
            Some(entry) => entry.expires_at <= Utc::now(),
            None => return None,
        };
        if expired {
            self.entries.remove(&key);
            self.order.retain(|k| *k != key);
            return None;
        }
        let mut decision = self.entries.get(&key)?.decision.clone();
        decision.cached = true;
        Some(decision)
    }

    /// Invalidates the cache entry for `query` if present. Called by the
    /// Dispatcher when a lookup hit names a tier whose breaker has since
    /// opened (§4.1 invariant).
    pub fn invalidate(&mut self, query: &str) {
        let key = fingerprint(&normalize_query(query));
        if self.entries.remove(&key).is_some() {
            self.order.retain(|k| *k != key);
        }
    }

    /// Looks up a decision, automatically invalidating (and returning
    /// `None`) if the decision's tier is no longer available per
    /// `is_available`.
    pub fn lookup_valid(
        &mut self,
        query: &str,
        is_available: impl Fn(&TargetId) -> bool,
    ) -> Option<RoutingDecision> {
        let decision = self.lookup(query)?;
        let target = TargetId::for_tier(decision.tier);
        if is_available(&target) {
            Some(decision)
        } else {
            self.invalidate(query);
            None
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::types::Classification;

    fn classification(complexity: Complexity, intent: Intent) -> Classification {
        Classification { complexity, intent, matched_keywords: vec![], confidence: 0.5 }
    }

    #[test]
    fn low_general_selects_economy() {
        assert_eq!(select_tier(&classification(Complexity::Low, Intent::General)), ModelTier::Economy);
    }

    #[test]
    fn low_database_selects_economy() {
        assert_eq!(select_tier(&classification(Complexity::Low, Intent::Database)), ModelTier::Economy);
    }

    #[test]
    fn medium_selects_standard() {
        assert_eq!(select_tier(&classification(Complexity::Medium, Intent::General)), ModelTier::Standard);
    }

    #[test]
    fn high_selects_premium() {
        assert_eq!(select_tier(&classification(Complexity::High, Intent::General)), ModelTier::Premium);
    }

    #[test]
    fn planning_always_selects_premium_regardless_of_complexity() {
        assert_eq!(select_tier(&classification(Complexity::Low, Intent::Planning)), ModelTier::Premium);
    }

    #[test]
    fn decision_cache_hit_within_ttl() {
        let mut cache = DecisionCache::new(10, 300);
        let decision = route(&GatewayConfig::default(), classification(Complexity::Low, Intent::General), None);
        cache.insert("hello world", decision);
        let hit = cache.lookup("Hello   World").expect("normalized match");
        assert!(hit.cached);
    }

    #[test]
    fn decision_cache_miss_for_different_query() {
        let mut cache = DecisionCache::new(10, 300);
        let decision = route(&GatewayConfig::default(), classification(Complexity::Low, Intent::General), None);
        cache.insert("hello", decision);
        assert!(cache.lookup("goodbye").is_none());
    }

    #[test]
    fn decision_cache_evicts_oldest_over_capacity() {
        let mut cache = DecisionCache::new(2, 300);
        let d = route(&GatewayConfig::default(), classification(Complexity::Low, Intent::General), None);
        cache.insert("a", d.clone());
        cache.insert("b", d.clone());
        cache.insert("c", d);
        assert_eq!(cache.len(), 2);
        assert!(cache.lookup("a").is_none());
        assert!(cache.lookup("c").is_some());
    }

    #[test]
    fn lookup_valid_invalidates_when_tier_unavailable() {
        let mut cache = DecisionCache::new(10, 300);
        let decision = route(&GatewayConfig::default(), classification(Complexity::Low, Intent::General), None);
        cache.insert("hello", decision);
        let result = cache.lookup_valid("hello", |_target| false);
        assert!(result.is_none());
        assert!(cache.is_empty());
    }
}
