//! Budget Enforcer (§4.3).
//!
//! Pure function over (Query metadata, ledger state, queue size) to an
//! admission decision. Grounded on
//! `engine::state::DailyTokenTracker::check_budget`/`check_budget_warning`
//! for the warning-threshold bookkeeping, and enriched with the three-way
//! Normal/SoftLimit/HardLimit admit/warn/reject structure from the
//! `leocamello-nexus` budget-control enrichment example.

use crate::atoms::constants::CHARS_PER_TOKEN;
use crate::atoms::types::{BudgetDecision, BudgetGateScope, TierConfig};
use crate::engine::config::ResolvedLimits;
use crate::engine::ledger::CostLedger;

/// Pessimistic cost estimate: `ceil(chars/4)` input tokens, output capped at
/// the tier's configured max (§4.3 "Estimated cost").
pub fn estimate_cost_usd(tier: &TierConfig, content: &str) -> f64 {
    let input_tokens = content.chars().count().div_ceil(CHARS_PER_TOKEN) as u64;
    let output_tokens = tier.max_output_tokens as u64;
    crate::engine::ledger::compute_cost_usd(tier.input_price, tier.output_price, input_tokens, output_tokens)
}

/// `check(project_id, estimated_cost, queue_size) -> {admit | warn | reject}`.
pub fn check(
    ledger: &CostLedger,
    project_id: Option<&str>,
    estimated_cost: f64,
    queue_size: u32,
    limits: &ResolvedLimits,
) -> Result<BudgetDecision, crate::atoms::error::GatewayError> {
    let daily_spend = ledger.spend_in_current_day(project_id)?;
    if daily_spend + estimated_cost > limits.daily_usd {
        return Ok(BudgetDecision::Reject {
            gate: BudgetGateScope::Daily,
            reason: format!(
                "daily spend {:.2} + estimated {:.2} exceeds daily limit {:.2}",
                daily_spend, estimated_cost, limits.daily_usd
            ),
            current_spend: daily_spend,
            limit: limits.daily_usd,
        });
    }

    let monthly_spend = ledger.spend_in_current_month(project_id)?;
    if monthly_spend + estimated_cost > limits.monthly_usd {
        return Ok(BudgetDecision::Reject {
            gate: BudgetGateScope::Monthly,
            reason: format!(
                "monthly spend {:.2} + estimated {:.2} exceeds monthly limit {:.2}",
                monthly_spend, estimated_cost, limits.monthly_usd
            ),
            current_spend: monthly_spend,
            limit: limits.monthly_usd,
        });
    }

    if estimated_cost > limits.per_task_usd {
        return Ok(BudgetDecision::Reject {
            gate: BudgetGateScope::PerTask,
            reason: format!("estimated cost {:.2} exceeds per-task limit {:.2}", estimated_cost, limits.per_task_usd),
            current_spend: estimated_cost,
            limit: limits.per_task_usd,
        });
    }

    if queue_size >= limits.max_queue {
        return Ok(BudgetDecision::Reject {
            gate: BudgetGateScope::QueueSize,
            reason: format!("queue size {} at or above max {}", queue_size, limits.max_queue),
            current_spend: queue_size as f64,
            limit: limits.max_queue as f64,
        });
    }

    // Warn if any gate has crossed warning_fraction x limit.
    if let Some((gate, reason)) = warning_gate(daily_spend, monthly_spend, estimated_cost, queue_size, limits) {
        return Ok(BudgetDecision::Warn { gate, reason });
    }

    Ok(BudgetDecision::Admit)
}

fn warning_gate(
    daily_spend: f64,
    monthly_spend: f64,
    estimated_cost: f64,
    queue_size: u32,
    limits: &ResolvedLimits,
) -> Option<(BudgetGateScope, String)> {
    let daily_after = daily_spend + estimated_cost;
    if daily_after > limits.warning_fraction * limits.daily_usd {
        return Some((
            BudgetGateScope::Daily,
            format!("daily spend {:.2} crosses {:.0}% warning threshold", daily_after, limits.warning_fraction * 100.0),
        ));
    }
    let monthly_after = monthly_spend + estimated_cost;
    if monthly_after > limits.warning_fraction * limits.monthly_usd {
        return Some((
            BudgetGateScope::Monthly,
            format!(
                "monthly spend {:.2} crosses {:.0}% warning threshold",
                monthly_after,
                limits.warning_fraction * 100.0
            ),
        ));
    }
    if estimated_cost > limits.warning_fraction * limits.per_task_usd {
        return Some((
            BudgetGateScope::PerTask,
            format!("estimated cost {:.2} crosses per-task warning threshold", estimated_cost),
        ));
    }
    if (queue_size as f64) > limits.warning_fraction * (limits.max_queue as f64) {
        return Some((
            BudgetGateScope::QueueSize,
            format!("queue size {} crosses warning threshold", queue_size),
        ));
    }
    None
}
