//! Dispatcher (§4.6).
//!
//! End-to-end per-request orchestration, grounded on
//! `engine::orchestrator::run_project`'s classify -> resolve-provider ->
//! build-context -> call -> record-result shape, generalized from "always
//! dispatch to one resolved provider" into an explicit ordered fallback
//! chain (§9 "explicit state-machine iteration over the fallback chain,
//! with cancellation delivered through a single cancellation signal").

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::atoms::error::{DispatchError, UpstreamError, UpstreamErrorKind};
use crate::atoms::types::{
    AdapterReply, ChatResponse, ModelTier, Query, Role, SessionKey, TargetId, TierConfig, TokenUsage,
};
use crate::engine::adapters::{ChatAdapter, HttpChatAdapter, LocalChatAdapter};
use crate::engine::breaker::CircuitBreaker;
use crate::engine::config::GatewayConfig;
use crate::engine::heartbeat::{CancellationSignal, HeartbeatMap};
use crate::engine::ledger::CostLedger;
use crate::engine::model_pool::DecisionCache;
use crate::engine::session_store::{self, SessionStore};
use crate::engine::{budget, classifier, model_pool, retry};

pub struct Dispatcher {
    config: GatewayConfig,
    ledger: CostLedger,
    sessions: SessionStore,
    breaker: CircuitBreaker,
    heartbeats: Arc<HeartbeatMap>,
    decision_cache: Mutex<DecisionCache>,
    adapters: HashMap<ModelTier, Box<dyn ChatAdapter>>,
    queue_size: AtomicU32,
}

/// Decrements the queue counter on every exit path, including early returns
/// and cancellation.
struct QueueGuard<'a>(&'a AtomicU32);
impl Drop for QueueGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Dispatcher {
    pub fn new(config: GatewayConfig, ledger: CostLedger, sessions: SessionStore, heartbeats: Arc<HeartbeatMap>) -> Self {
        let breaker = CircuitBreaker::new(&config.breaker);
        let decision_cache =
            Mutex::new(DecisionCache::new(config.router.cache_max_entries, config.router.cache_ttl_s));

        let api_key = std::env::var("GATEWAY_UPSTREAM_API_KEY").ok();
        let mut adapters: HashMap<ModelTier, Box<dyn ChatAdapter>> = HashMap::new();
        for tier in [ModelTier::Economy, ModelTier::Standard, ModelTier::Premium] {
            adapters.insert(tier, Box::new(HttpChatAdapter::new(api_key.clone())));
        }
        adapters.insert(ModelTier::Local, Box::new(LocalChatAdapter::new()));

        Self { config, ledger, sessions, breaker, heartbeats, decision_cache, adapters, queue_size: AtomicU32::new(0) }
    }

    /// Same as [`Dispatcher::new`] but with the per-tier adapter map supplied
    /// directly, for tests that need a deterministic `ChatAdapter` instead of
    /// a real outbound HTTP call.
    pub fn with_adapters(
        config: GatewayConfig,
        ledger: CostLedger,
        sessions: SessionStore,
        heartbeats: Arc<HeartbeatMap>,
        adapters: HashMap<ModelTier, Box<dyn ChatAdapter>>,
    ) -> Self {
        let breaker = CircuitBreaker::new(&config.breaker);
        let decision_cache =
            Mutex::new(DecisionCache::new(config.router.cache_max_entries, config.router.cache_ttl_s));
        Self { config, ledger, sessions, breaker, heartbeats, decision_cache, adapters, queue_size: AtomicU32::new(0) }
    }

    pub fn queue_depth(&self) -> u32 {
        self.queue_size.load(Ordering::SeqCst)
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn ledger(&self) -> &CostLedger {
        &self.ledger
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Circuit state per tier, for `GET /health` (§6).
    pub fn breaker_states(&self) -> Vec<(ModelTier, crate::atoms::types::CircuitState)> {
        [ModelTier::Economy, ModelTier::Standard, ModelTier::Premium, ModelTier::Local]
            .into_iter()
            .map(|tier| (tier, self.breaker.state(&TargetId::for_tier(tier))))
            .collect()
    }

    /// `POST /route` (§6): classification + tier selection with no admission
    /// side effects (no budget check, no session load, no dispatch).
    pub fn route_preview(&self, content: &str) -> crate::atoms::types::RoutingDecision {
        let query = Query { content: content.to_string(), session_key: None, project_id: None, requested_agent: None, requested_model: None };
        self.classify_and_route(&query)
    }

    /// `dispatch(Query, SessionKey?, project-id?) -> Response | Error` (§4.6).
    pub async fn dispatch(
        &self,
        query: Query,
        external_cancel: Option<CancellationSignal>,
    ) -> Result<ChatResponse, DispatchError> {
        let task_id = Uuid::new_v4().to_string();
        let project_id = query.project_id.clone();
        let limits = self.config.limits_for_project(project_id.as_deref());

        // Step 1 (fast path): queue-size-at-limit returns immediately, with
        // no classification and no ledger write (§8 boundary behavior).
        let current_queue = self.queue_size.load(Ordering::SeqCst);
        if current_queue >= limits.max_queue {
            return Err(DispatchError::QueueFull);
        }
        self.queue_size.fetch_add(1, Ordering::SeqCst);
        let _queue_guard = QueueGuard(&self.queue_size);

        // Step 2: classify & route.
        let decision = self.classify_and_route(&query);

        // Step 3: budget check against the selected tier's estimated cost.
        let tier_config = self
            .config
            .tier_config(decision.tier)
            .ok_or_else(|| DispatchError::Internal(format!("no tier config for {:?}", decision.tier)))?;
        let estimated_cost = budget::estimate_cost_usd(&tier_config, &query.content);
        match budget::check(&self.ledger, project_id.as_deref(), estimated_cost, current_queue, &limits) {
            Ok(crate::atoms::types::BudgetDecision::Reject { gate, reason, current_spend, limit }) => {
                log::info!("budget rejected ({gate:?}): {reason}");
                return Err(DispatchError::BudgetExceeded { gate: format!("{gate:?}"), current_spend, limit });
            }
            Ok(crate::atoms::types::BudgetDecision::Warn { gate, reason }) => {
                log::warn!("budget warning on {gate:?} gate: {reason}");
            }
            Ok(crate::atoms::types::BudgetDecision::Admit) => {}
            Err(e) => return Err(DispatchError::Internal(e.to_string())),
        }

        // Step 4: session load, snapshot the last N messages.
        let session_key = query.session_key.clone().unwrap_or_else(|| SessionKey(format!("anon-{task_id}")));
        let history = self.sessions.recent(&session_key, self.config.session.max_turns_exported);

        // Step 5: register heartbeat.
        let heartbeat_signal = self.heartbeats.register(&task_id, "dispatcher").await;
        let is_cancelled =
            |hb: &CancellationSignal, ext: &Option<CancellationSignal>| hb.is_cancelled() || ext.as_ref().is_some_and(|s| s.is_cancelled());

        if is_cancelled(&heartbeat_signal, &external_cancel) {
            self.heartbeats.unregister(&task_id).await;
            return Err(DispatchError::Cancelled);
        }

        // Step 6: execute with fallback chain.
        let chain = build_fallback_chain(decision.tier);
        let mut causes: Vec<String> = Vec::new();
        let mut last_rate_limited = false;
        let mut last_retry_after: Option<u64> = None;

        let mut messages_for_call = history.clone();
        messages_for_call.push(crate::atoms::types::SessionMessage {
            role: Role::User,
            content: query.content.clone(),
            timestamp: Utc::now(),
        });

        for tier in chain {
            if is_cancelled(&heartbeat_signal, &external_cancel) {
                self.heartbeats.unregister(&task_id).await;
                return Err(DispatchError::Cancelled);
            }

            let target = TargetId::for_tier(tier);
            if !self.breaker.available(&target) {
                continue;
            }

            let Some(fallback_tier_config) = self.config.tier_config(tier) else { continue };

            // §9 open question: re-check budget against the fallback tier's
            // (possibly higher) price before calling.
            if tier != decision.tier {
                let fallback_estimate = budget::estimate_cost_usd(&fallback_tier_config, &query.content);
                match budget::check(&self.ledger, project_id.as_deref(), fallback_estimate, current_queue, &limits) {
                    Ok(crate::atoms::types::BudgetDecision::Reject { reason, .. }) => {
                        causes.push(format!("{}: budget re-check rejected: {reason}", tier.as_str()));
                        continue;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        causes.push(format!("{}: ledger read failed: {e}", tier.as_str()));
                        continue;
                    }
                }
            }

            let Some(adapter) = self.adapters.get(&tier) else { continue };
            let policy = retry::RetryPolicy::default();

            match self
                .run_with_retries(adapter.as_ref(), &target, &fallback_tier_config, &messages_for_call, policy)
                .await
            {
                Ok(reply) => {
                    self.breaker.on_success(&target);
                    self.heartbeats.touch(&task_id).await;

                    let spend = crate::engine::ledger::spend_record(
                        Some(session_key.clone()),
                        project_id.clone(),
                        tier,
                        reply.input_tokens,
                        reply.output_tokens,
                        fallback_tier_config.input_price,
                        fallback_tier_config.output_price,
                    );
                    if let Err(e) = self.ledger.record(&spend) {
                        self.heartbeats.unregister(&task_id).await;
                        return Err(DispatchError::Internal(format!("ledger write failed: {e}")));
                    }

                    let now = Utc::now();
                    session_store::append_or_log(&self.sessions, &session_key, Role::User, query.content.clone(), now);
                    session_store::append_or_log(&self.sessions, &session_key, Role::Assistant, reply.text.clone(), now);

                    self.heartbeats.unregister(&task_id).await;

                    let history_length = self.sessions.recent(&session_key, usize::MAX).len();
                    return Ok(ChatResponse {
                        response: reply.text,
                        model: fallback_tier_config.model_name.clone(),
                        tokens: TokenUsage { input: reply.input_tokens, output: reply.output_tokens },
                        session_key: Some(session_key.to_string()),
                        history_length,
                        tier,
                    });
                }
                Err(last_error) => {
                    self.breaker.on_failure(&target);
                    last_rate_limited = matches!(last_error.kind, UpstreamErrorKind::RateLimit { .. });
                    if let UpstreamErrorKind::RateLimit { retry_after_s } = &last_error.kind {
                        last_retry_after = *retry_after_s;
                    }
                    causes.push(format!("{}: {}", tier.as_str(), last_error.message));
                }
            }
        }

        // Step 7: all targets exhausted.
        self.heartbeats.unregister(&task_id).await;
        if last_rate_limited {
            Err(DispatchError::RateLimitedUpstream { retry_after_s: last_retry_after })
        } else {
            Err(DispatchError::UpstreamFailed(causes))
        }
    }

    fn classify_and_route(&self, query: &Query) -> crate::atoms::types::RoutingDecision {
        if let Some(model) = &query.requested_model {
            let classification = classifier::classify_with_thresholds(
                &query.content,
                self.config.router.haiku_threshold,
                self.config.router.premium_threshold,
            );
            let decision = model_pool::route(&self.config, classification.clone(), Some(model.as_str()));
            // "If the requested-model override is set and the corresponding
            // target's breaker is open, fail over silently to the policy
            // choice" (§4.6 step 2). A plain state read, not `available()`:
            // this is a routing decision, not the probe-consuming admission
            // check the fallback loop performs on the same target below.
            let target = TargetId::for_tier(decision.tier);
            if self.breaker.state(&target) != crate::atoms::types::CircuitState::Open {
                return decision;
            }
            return model_pool::route(&self.config, classification, None);
        }

        let mut cache = self.decision_cache.lock();
        let breaker = &self.breaker;
        // Same rationale as the override path above: a state read, not the
        // probe-consuming `available()` the fallback loop uses to actually
        // admit a call.
        if let Some(cached) =
            cache.lookup_valid(&query.content, |target| breaker.state(target) != crate::atoms::types::CircuitState::Open)
        {
            return cached;
        }
        let classification = classifier::classify_with_thresholds(
            &query.content,
            self.config.router.haiku_threshold,
            self.config.router.premium_threshold,
        );
        let decision = model_pool::route(&self.config, classification, None);
        cache.insert(&query.content, decision.clone());
        decision
    }

    async fn run_with_retries(
        &self,
        adapter: &dyn ChatAdapter,
        target: &TargetId,
        tier_config: &TierConfig,
        messages: &[crate::atoms::types::SessionMessage],
        policy: retry::RetryPolicy,
    ) -> Result<AdapterReply, UpstreamError> {
        let mut attempt = 0u32;
        let mut retry_after: Option<u64> = None;
        loop {
            let call = adapter.call(target, tier_config, messages, tier_config.max_output_tokens);
            let timed = tokio::time::timeout(std::time::Duration::from_secs(tier_config.timeout_s), call).await;

            let result = match timed {
                Ok(inner) => inner,
                Err(_) => Err(UpstreamError::transient("upstream call timed out")),
            };

            match result {
                Ok(reply) => return Ok(reply),
                Err(err) => {
                    if err.aborts_retry() {
                        return Err(err);
                    }
                    if let UpstreamErrorKind::RateLimit { retry_after_s } = &err.kind {
                        retry_after = *retry_after_s;
                    }
                    if attempt >= policy.max_retries {
                        return Err(err);
                    }
                    let delay = retry::retry_delay(attempt, retry_after.take(), policy.base_ms, policy.max_delay_ms);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Ordered target list for §4.6 step 6: `[primary] + [next-cheaper-available]
/// + [local fallback if configured]`.
fn build_fallback_chain(primary: ModelTier) -> Vec<ModelTier> {
    let mut chain = vec![primary];
    let order = ModelTier::cost_order();
    if let Some(pos) = order.iter().position(|t| *t == primary) {
        if pos > 0 {
            chain.push(order[pos - 1]);
        }
    }
    if primary != ModelTier::Local {
        chain.push(ModelTier::Local);
    }
    let mut seen = std::collections::HashSet::new();
    chain.retain(|t| seen.insert(*t));
    chain
}
