//! Per-tier OC / IC evaluation for one payment date.
//!
//! Tiers are evaluated in increasing seniority order (most senior first). A tier is
//! any non-equity tranche carrying an `oc_threshold` or `ic_threshold`; its liability
//! and interest due include every tranche senior to it. A failing test is not an
//! error: it produces cure requirements that the waterfall routes cash to.

use std::time::Instant;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::cure::{carry_forward, CoverageHistory, CureDemand};
use super::ic::{measure_ic, net_interest, tier_interest_due, AccrualPeriod};
use super::oc::{collateral_balance, measure_oc, CollateralBreakdown, CoverageConventions, TierMeasurement};
use super::trigger::{CoverageKind, CoverageTrigger, TriggerState};
use crate::cash_flow::aggregator::{aggregate_pool, AggregationRequest, AssetSnapshot};
use crate::deal::asset::{Asset, CashFlowPeriod};
use crate::deal::tranche::{by_seniority, validate_capital_structure, Tranche};
use crate::error::CloEngineError;
use crate::types::{with_metadata, ComputationOutput, Money, Rate, Ratio};
use crate::CloEngineResult;

// ---------------------------------------------------------------------------
// Input / Output types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct CoverageRequest<'a> {
    pub deal_id: &'a str,
    pub period: u32,
    pub payment_date: NaiveDate,
    pub accrual: AccrualPeriod,
    pub tranches: &'a [Tranche],
    pub snapshot: &'a AssetSnapshot,
    pub interest_collections: Money,
    /// Fees and expenses paid ahead of note interest.
    pub senior_expenses: Money,
    /// Principal account cash, counted as collateral when the convention allows.
    pub principal_cash: Money,
    pub available_interest_override: Option<Money>,
    pub conventions: &'a CoverageConventions,
    /// Finalized rows of earlier periods.
    pub history: &'a CoverageHistory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageResult {
    pub deal_id: String,
    pub period: u32,
    pub payment_date: NaiveDate,
    pub collateral: CollateralBreakdown,
    /// Most senior tier first; OC before IC within a tier.
    pub triggers: Vec<CoverageTrigger>,
}

impl CoverageResult {
    pub fn trigger(&self, tier: &str, kind: CoverageKind) -> Option<&CoverageTrigger> {
        self.triggers.iter().find(|t| t.tier == tier && t.kind == kind)
    }

    pub fn failing(&self) -> impl Iterator<Item = &CoverageTrigger> {
        self.triggers.iter().filter(|t| t.failed())
    }

    pub fn all_passed(&self) -> bool {
        self.failing().next().is_none()
    }
}

/// Self-contained input for [`run_coverage`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoverageInput {
    pub deal_id: String,
    pub period: u32,
    pub payment_date: NaiveDate,
    pub accrual_start: NaiveDate,
    pub reference_rate: Rate,
    pub tranches: Vec<Tranche>,
    pub positions: Vec<Asset>,
    pub cash_flows: Vec<CashFlowPeriod>,
    #[serde(default)]
    pub senior_expenses: Money,
    #[serde(default)]
    pub principal_cash: Money,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available_interest_override: Option<Money>,
    #[serde(default)]
    pub conventions: CoverageConventions,
    /// Finalized rows of earlier periods, for cure carry-forward.
    #[serde(default)]
    pub prior_rows: Vec<CoverageTrigger>,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

fn validate_threshold(deal_id: &str, tranche: &Tranche, kind: CoverageKind, threshold: Ratio) -> CloEngineResult<()> {
    if threshold <= Ratio::ZERO {
        return Err(CloEngineError::config(
            deal_id,
            format!("{} threshold for tranche {} must be positive", kind, tranche.id),
        ));
    }
    Ok(())
}

pub fn evaluate_coverage(request: &CoverageRequest<'_>) -> CloEngineResult<CoverageResult> {
    validate_capital_structure(request.tranches)?;
    let ordered = by_seniority(request.tranches);
    let conventions = request.conventions;
    let collateral = collateral_balance(request.snapshot, conventions, request.principal_cash);

    let mut triggers = Vec::new();
    for tier in ordered.iter().filter(|t| !t.is_equity) {
        let tests = [
            (CoverageKind::Oc, tier.oc_threshold),
            (CoverageKind::Ic, tier.ic_threshold),
        ];
        if tests.iter().all(|(_, th)| th.is_none()) {
            continue;
        }

        let interest_due = tier_interest_due(&ordered, tier.seniority_level, &request.accrual);
        let available_interest = request.available_interest_override.unwrap_or_else(|| {
            (net_interest(request.interest_collections, request.senior_expenses) - interest_due).max(Money::ZERO)
        });

        for (kind, threshold) in tests {
            let Some(threshold) = threshold else {
                continue;
            };
            validate_threshold(request.deal_id, tier, kind, threshold)?;

            let m: TierMeasurement = match kind {
                CoverageKind::Oc => measure_oc(&collateral, &ordered, tier.seniority_level, threshold, conventions),
                CoverageKind::Ic => measure_ic(
                    request.interest_collections,
                    request.senior_expenses,
                    interest_due,
                    threshold,
                ),
            };
            let previous = request
                .history
                .previous(request.deal_id, &tier.id, kind, request.period);
            let tracks = carry_forward(
                kind,
                previous,
                CureDemand {
                    deficiency: m.deficiency,
                    available_interest,
                    split: conventions.cure_split,
                    measurement: conventions.cure_measurement,
                },
            );
            let state = if m.passed {
                TriggerState::EvaluatedPass
            } else {
                TriggerState::EvaluatedFail
            };

            let trigger = CoverageTrigger {
                deal_id: request.deal_id.to_string(),
                tier: tier.id.clone(),
                tier_seniority: tier.seniority_level,
                kind,
                period: request.period,
                payment_date: request.payment_date,
                numerator: m.numerator,
                denominator: m.denominator,
                ratio: m.ratio,
                threshold,
                state,
                deficiency: m.deficiency,
                denominator_zero: m.denominator_zero,
                tracks,
            };
            if trigger.failed() {
                tracing::warn!(
                    deal_id = request.deal_id,
                    period = request.period,
                    tier = %trigger.tier,
                    kind = %kind,
                    ratio = %trigger.ratio,
                    threshold = %threshold,
                    required_cure = %trigger.required_cure(),
                    "coverage test failing"
                );
            } else {
                tracing::debug!(
                    deal_id = request.deal_id,
                    tier = %trigger.tier,
                    kind = %kind,
                    ratio = %trigger.ratio,
                    "coverage test passing"
                );
            }
            triggers.push(trigger);
        }
    }

    Ok(CoverageResult {
        deal_id: request.deal_id.to_string(),
        period: request.period,
        payment_date: request.payment_date,
        collateral,
        triggers,
    })
}

/// Aggregate the pool and evaluate coverage, wrapped in the output envelope.
pub fn run_coverage(input: &CoverageInput) -> CloEngineResult<ComputationOutput<CoverageResult>> {
    let start = Instant::now();

    let aggregate = aggregate_pool(&AggregationRequest {
        deal_id: &input.deal_id,
        period: input.period,
        as_of: input.payment_date,
        positions: &input.positions,
        cash_flows: &input.cash_flows,
    })?;
    let history = CoverageHistory::from_rows(input.prior_rows.iter().cloned())?;

    let result = evaluate_coverage(&CoverageRequest {
        deal_id: &input.deal_id,
        period: input.period,
        payment_date: input.payment_date,
        accrual: AccrualPeriod {
            start: input.accrual_start,
            end: input.payment_date,
            reference_rate: input.reference_rate,
        },
        tranches: &input.tranches,
        snapshot: &aggregate.snapshot,
        interest_collections: aggregate.totals.interest_proceeds(),
        senior_expenses: input.senior_expenses,
        principal_cash: input.principal_cash,
        available_interest_override: input.available_interest_override,
        conventions: &input.conventions,
        history: &history,
    })?;

    let mut warnings = aggregate.warnings;
    for t in result.failing() {
        warnings.push(format!(
            "{} test for tier {} failing: ratio {} below {}, cure required {}",
            t.kind,
            t.tier,
            t.ratio.round_dp(4),
            t.threshold,
            t.required_cure()
        ));
    }

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "CLO OC/IC Coverage Tests with Cure Carry-Forward",
        &serde_json::json!({
            "conventions": input.conventions,
            "reference_rate": input.reference_rate.to_string(),
            "senior_expenses": input.senior_expenses.to_string(),
            "prior_rows": input.prior_rows.len(),
        }),
        warnings,
        elapsed,
        result,
    ))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
