//! Waterfall execution: a sequential cash-application state machine.
//!
//! 1. `total_available = collection_amount + beginning_cash + eligible_reserve_draws`.
//! 2. Steps run in ascending `step_sequence`. Each computes `amount_due`, pays
//!    `min(amount_due, remaining_cash)`, then applies its side effects.
//! 3. Cure steps whose coverage test passed are skipped; deferrable interest shortfalls
//!    are capitalised into the tranche's deferred balance; other shortfalls are recorded.
//! 4. The final residual step takes whatever is left, so every unit of cash is
//!    accounted for: `sum(amount_paid) + remaining_cash == total_available`.

use std::collections::HashMap;
use std::time::Instant;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::config::{
    resolve_configuration, CureDestination, FeeBasis, PaymentStep, PrincipalAmount, PriorityClass, StepKind,
    WaterfallConfiguration,
};
use super::context::{ContextOutput, ExecutionContext};
use super::execution::{ExecutionStatus, PaymentAllocation, PaymentRecord, StepNote, WaterfallExecution};
use crate::coverage::engine::CoverageResult;
use crate::deal::account::{AccountBalance, AccountKind, AccountLedger};
use crate::deal::structure::Deal;
use crate::deal::tranche::{validate_capital_structure, DayCount, Tranche};
use crate::error::CloEngineError;
use crate::types::{round_money, with_metadata, ComputationOutput, Money, Rate};
use crate::CloEngineResult;

// ---------------------------------------------------------------------------
// Input types
// ---------------------------------------------------------------------------

/// Everything one execution reads, resolved up front as immutable snapshots.
#[derive(Debug, Clone, Copy)]
pub struct WaterfallRequest<'a> {
    pub deal: &'a Deal,
    pub period: u32,
    pub payment_date: NaiveDate,
    pub accrual_start: NaiveDate,
    pub reference_rate: Rate,
    pub tranches: &'a [Tranche],
    pub configuration: &'a WaterfallConfiguration,
    pub collection_amount: Money,
    /// Principal part of the collection, available to principal and reinvestment steps.
    pub principal_proceeds: Money,
    /// Basis for fees quoted on collateral par.
    pub collateral_par: Money,
    pub accounts: &'a [AccountBalance],
    pub coverage: &'a CoverageResult,
    /// Failing compliance tests this date, for reinvestment gating.
    pub compliance_failures: usize,
}

/// Self-contained input for [`run_waterfall`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaterfallInput {
    pub deal: Deal,
    pub period: u32,
    pub payment_date: NaiveDate,
    /// Defaults to one payment period before `payment_date`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accrual_start: Option<NaiveDate>,
    pub reference_rate: Rate,
    pub tranches: Vec<Tranche>,
    pub configurations: Vec<WaterfallConfiguration>,
    pub collection_amount: Money,
    #[serde(default)]
    pub principal_proceeds: Money,
    pub collateral_par: Money,
    #[serde(default)]
    pub accounts: Vec<AccountBalance>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coverage: Option<CoverageResult>,
    #[serde(default)]
    pub compliance_failures: usize,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Opening cash position of an execution.
#[derive(Debug, Clone, Copy)]
struct Opening {
    beginning_cash: Money,
    reserve_draws: Money,
}

#[derive(Debug, Clone)]
struct Plan {
    due: Money,
    note: Option<StepNote>,
}

impl Plan {
    fn due(due: Money) -> Self {
        Self {
            due: due.max(Money::ZERO),
            note: None,
        }
    }

    fn skipped(note: StepNote) -> Self {
        Self {
            due: Money::ZERO,
            note: Some(note),
        }
    }
}

fn fee_amount(basis: &FeeBasis, cap: Option<Money>, tranches: &[Tranche], collateral_par: Money, start: NaiveDate, end: NaiveDate) -> Money {
    let yf = DayCount::Actual360.year_fraction(start, end);
    let raw = match basis {
        FeeBasis::Fixed { amount } => *amount,
        FeeBasis::RateOnCollateralPar { rate } => round_money(collateral_par * *rate * yf),
        FeeBasis::RateOnTrancheBalance { tranche, rate } => tranches
            .iter()
            .find(|t| &t.id == tranche)
            .map(|t| round_money(t.current_balance * *rate * yf))
            .unwrap_or(Money::ZERO),
    };
    match cap {
        Some(cap) => raw.min(cap),
        None => raw,
    }
    .max(Money::ZERO)
}

/// Fees paid ahead of note interest, as the coverage engine's senior expenses.
pub fn estimate_senior_expenses(
    configuration: &WaterfallConfiguration,
    tranches: &[Tranche],
    collateral_par: Money,
    accrual_start: NaiveDate,
    payment_date: NaiveDate,
) -> Money {
    configuration
        .steps
        .iter()
        .filter(|s| s.priority_class == PriorityClass::Fees)
        .filter_map(|s| match &s.kind {
            StepKind::Fee { basis, cap, .. } => Some(fee_amount(
                basis,
                *cap,
                tranches,
                collateral_par,
                accrual_start,
                payment_date,
            )),
            _ => None,
        })
        .sum()
}

fn validate_request(request: &WaterfallRequest<'_>) -> CloEngineResult<()> {
    let deal_id = request.deal.id.as_str();
    if request.configuration.deal_id != deal_id {
        return Err(CloEngineError::config(
            deal_id,
            format!(
                "configuration version {} belongs to deal {}",
                request.configuration.version, request.configuration.deal_id
            ),
        ));
    }
    if request.collection_amount < Money::ZERO {
        return Err(CloEngineError::invalid("collection_amount", "Collection amount cannot be negative."));
    }
    if request.principal_proceeds < Money::ZERO || request.principal_proceeds > request.collection_amount {
        return Err(CloEngineError::invalid(
            "principal_proceeds",
            "Principal proceeds must be between zero and the collection amount.",
        ));
    }
    if request.accrual_start > request.payment_date {
        return Err(CloEngineError::invalid("accrual_start", "Accrual start is after the payment date."));
    }
    validate_capital_structure(request.tranches)?;
    request.configuration.validate(request.tranches)?;

    for step in &request.configuration.steps {
        if let StepKind::CoverageCure { tier, test, .. } = &step.kind {
            if request.coverage.trigger(tier, *test).is_none() {
                return Err(CloEngineError::config(
                    deal_id,
                    format!(
                        "step '{}' needs the {} test for tier {}, which was not evaluated for {}",
                        step.name, test, tier, request.payment_date
                    ),
                ));
            }
        }
    }
    Ok(())
}

fn plan_step(request: &WaterfallRequest<'_>, ctx: &ExecutionContext, step: &PaymentStep) -> Plan {
    match &step.kind {
        StepKind::Fee { basis, cap, .. } => Plan::due(fee_amount(
            basis,
            *cap,
            request.tranches,
            request.collateral_par,
            request.accrual_start,
            request.payment_date,
        )),
        StepKind::Interest { tranches } => Plan::due(ctx.interest_due(tranches)),
        StepKind::DeferredInterest { tranche } => Plan::due(ctx.deferred_balance(tranche)),
        StepKind::CoverageCure {
            tier,
            test,
            track,
            destination,
        } => {
            let Some(trigger) = ctx.coverage(tier, *test).filter(|t| t.failed()) else {
                return Plan::skipped(StepNote::CoverageTestPassed);
            };
            let owed = trigger.outstanding(*track);
            match destination {
                CureDestination::SequentialPaydown { .. } => {
                    Plan::due(owed.min(ctx.outstanding_principal(&cure_targets(ctx, tier, destination))))
                }
                CureDestination::Account { .. } => Plan::due(owed),
            }
        }
        StepKind::Principal { tranches, amount } => {
            let outstanding = ctx.outstanding_principal(tranches);
            let wanted = match amount {
                PrincipalAmount::PrincipalProceeds => ctx.principal_proceeds_left(),
                PrincipalAmount::Fixed { amount } => *amount,
                PrincipalAmount::Outstanding => outstanding,
            };
            Plan::due(wanted.min(outstanding))
        }
        StepKind::ReserveDeposit { account, target_balance } => {
            Plan::due(*target_balance - ctx.ledger.balance(*account))
        }
        StepKind::Reinvestment {
            max_compliance_failures,
            amount,
            ..
        } => {
            if !request.deal.in_reinvestment_period(request.payment_date) {
                return Plan::skipped(StepNote::Gated {
                    reason: format!("reinvestment period ended {}", request.deal.reinvestment_end_date),
                });
            }
            if request.compliance_failures > *max_compliance_failures {
                return Plan::skipped(StepNote::Gated {
                    reason: format!(
                        "{} compliance tests failing, at most {} allowed",
                        request.compliance_failures, max_compliance_failures
                    ),
                });
            }
            Plan::due(amount.unwrap_or_else(|| ctx.principal_proceeds_left()))
        }
        StepKind::IncentiveFee { rate, hurdle, .. } => {
            Plan::due(round_money(*rate * (ctx.remaining() - *hurdle).max(Money::ZERO)))
        }
        StepKind::Residual { .. } => Plan::due(ctx.remaining()),
    }
}

fn cure_targets(ctx: &ExecutionContext, tier: &str, destination: &CureDestination) -> Vec<String> {
    match destination {
        CureDestination::SequentialPaydown { tranches } if !tranches.is_empty() => tranches.clone(),
        _ => ctx
            .tranche(tier)
            .map(|t| ctx.senior_ids(t.seniority_level))
            .unwrap_or_default(),
    }
}

/// Apply a paid amount's side effects. Returns allocations and the amount deferred.
fn apply_step(ctx: &mut ExecutionContext, step: &PaymentStep, paid: Money, defer: bool) -> (Vec<PaymentAllocation>, Money) {
    let mut deferred = Money::ZERO;
    let allocations = match &step.kind {
        StepKind::Fee { account, .. } => {
            ctx.totals.fees_paid += paid;
            ctx.deposit(*account, paid)
        }
        StepKind::Interest { tranches } => {
            ctx.totals.interest_paid += paid;
            let (alloc, d) = ctx.pay_interest(tranches, paid, defer);
            deferred = d;
            alloc
        }
        StepKind::DeferredInterest { tranche } => {
            ctx.totals.interest_paid += paid;
            ctx.repay_deferred(tranche, paid)
        }
        StepKind::CoverageCure {
            tier,
            test,
            track,
            destination,
        } => {
            ctx.totals.cure_paid += paid;
            let alloc = match destination {
                CureDestination::Account { account } => ctx.deposit(*account, paid),
                CureDestination::SequentialPaydown { .. } => {
                    let targets = cure_targets(ctx, tier, destination);
                    ctx.pay_principal(&targets, paid)
                }
            };
            ctx.record_cure(tier, *test, *track, paid);
            alloc
        }
        StepKind::Principal { tranches, .. } => {
            ctx.totals.principal_paid += paid;
            ctx.consume_principal_proceeds(paid);
            ctx.pay_principal(tranches, paid)
        }
        StepKind::ReserveDeposit { account, .. } => {
            ctx.totals.reserve_deposits += paid;
            ctx.deposit(*account, paid)
        }
        StepKind::Reinvestment { account, .. } => {
            ctx.totals.reinvested += paid;
            ctx.consume_principal_proceeds(paid);
            ctx.deposit(*account, paid)
        }
        StepKind::IncentiveFee { account, .. } => {
            ctx.totals.incentive_fees += paid;
            ctx.deposit(*account, paid)
        }
        StepKind::Residual { tranche } => {
            ctx.totals.residual_paid += paid;
            ctx.distribute(tranche, paid)
        }
    };
    ctx.totals.total_paid += paid;
    ctx.totals.total_deferred += deferred;
    (allocations.into_iter().filter(|a| !a.amount.is_zero()).collect(), deferred)
}

fn assemble(
    request: &WaterfallRequest<'_>,
    opening: Opening,
    total_available: Money,
    out: ContextOutput,
    status: ExecutionStatus,
    failure: Option<String>,
) -> WaterfallExecution {
    WaterfallExecution {
        deal_id: request.deal.id.clone(),
        payment_date: request.payment_date,
        period: request.period,
        version: 1,
        supersedes: None,
        configuration_version: request.configuration.version,
        status,
        collection_amount: request.collection_amount,
        beginning_cash: opening.beginning_cash,
        reserve_draws: opening.reserve_draws,
        total_available,
        records: out.records,
        remaining_cash: out.remaining,
        totals: out.totals,
        coverage_snapshot: out.coverage,
        compliance_failures: request.compliance_failures,
        tranche_balances: out.balances,
        account_rows: out.ledger.into_rows(&request.deal.id, request.payment_date),
        failure,
    }
}

/// Debit running cash for a step, or fail the execution with the partial record.
fn settle(
    ctx: &mut ExecutionContext,
    request: &WaterfallRequest<'_>,
    opening: Opening,
    step: &PaymentStep,
    paid: Money,
) -> CloEngineResult<()> {
    let Err(violation) = ctx.debit(paid) else {
        return Ok(());
    };
    tracing::error!(
        deal_id = %request.deal.id,
        payment_date = %request.payment_date,
        step = %step.name,
        attempted = %violation.attempted,
        remaining_after = %violation.remaining_after,
        "negative cash invariant violated"
    );
    let failure = format!(
        "step '{}' would pay {} leaving {}",
        step.name, violation.attempted, violation.remaining_after
    );
    let partial = assemble(
        request,
        opening,
        ctx.total_available(),
        ctx.clone().finish(),
        ExecutionStatus::Failed,
        Some(failure),
    );
    Err(CloEngineError::NegativeCashInvariantViolation {
        deal_id: request.deal.id.clone(),
        payment_date: request.payment_date,
        step: step.name.clone(),
        remaining_cash: violation.remaining_after,
        partial: Box::new(partial),
    })
}

/// Check cash conservation and every account identity of an assembled execution.
/// A breach fails the execution and returns it as the partial record.
fn verify_execution(mut execution: WaterfallExecution) -> CloEngineResult<WaterfallExecution> {
    let checked = execution
        .check_conservation()
        .and_then(|()| execution.account_rows.iter().try_for_each(|row| row.check_identity()));
    let Err(e) = checked else {
        return Ok(execution);
    };
    let context = match e {
        CloEngineError::InvariantViolation { context } => context,
        other => other.to_string(),
    };
    tracing::error!(
        deal_id = %execution.deal_id,
        payment_date = %execution.payment_date,
        context = %context,
        "execution invariant violated"
    );
    execution.status = ExecutionStatus::Failed;
    execution.failure = Some(context.clone());
    Err(CloEngineError::ExecutionInvariantViolation {
        deal_id: execution.deal_id.clone(),
        payment_date: execution.payment_date,
        context,
        partial: Box::new(execution),
    })
}

/// Run the waterfall for one deal and payment date.
///
/// Configuration problems are reported before any cash is applied. Shortfalls and
/// deferrals are recorded outcomes, not errors.
pub fn execute_waterfall(request: &WaterfallRequest<'_>) -> CloEngineResult<WaterfallExecution> {
    validate_request(request)?;
    let deal_id = request.deal.id.as_str();

    let interest_due: HashMap<String, Money> = request
        .tranches
        .iter()
        .map(|t| {
            (
                t.id.clone(),
                t.accrued_interest(request.reference_rate, request.accrual_start, request.payment_date),
            )
        })
        .collect();

    let mut ledger = AccountLedger::open(request.accounts)?;
    let beginning_cash = ledger.balance(AccountKind::Collection);
    ledger.deposit(AccountKind::Collection, request.collection_amount);
    ledger.withdraw(AccountKind::Collection, request.collection_amount + beginning_cash)?;

    let mut reserve_draws = Money::ZERO;
    for account in request.accounts.iter().filter(|a| a.kind != AccountKind::Collection) {
        let Some(limit) = account.draw_limit else {
            continue;
        };
        let draw = limit.max(Money::ZERO).min(ledger.balance(account.kind));
        if draw > Money::ZERO {
            ledger.withdraw(account.kind, draw)?;
            reserve_draws += draw;
        }
    }
    let opening = Opening {
        beginning_cash,
        reserve_draws,
    };
    let total_available = request.collection_amount + beginning_cash + reserve_draws;

    tracing::info!(
        deal_id,
        payment_date = %request.payment_date,
        configuration_version = request.configuration.version,
        collection = %request.collection_amount,
        total_available = %total_available,
        "waterfall execution started"
    );

    let mut ctx = ExecutionContext::new(
        total_available,
        request.principal_proceeds,
        request.tranches,
        &interest_due,
        ledger,
        request.coverage.triggers.clone(),
    );

    for step in request.configuration.ordered_steps() {
        let cash_before = ctx.remaining();
        let plan = plan_step(request, &ctx, step);
        let due = plan.due;
        let defer = step.is_deferrable && cash_before < due;
        let paid = due.min(cash_before);

        settle(&mut ctx, request, opening, step, paid)?;
        let (allocations, amount_deferred) = apply_step(&mut ctx, step, paid, defer);
        let shortfall = if defer { Money::ZERO } else { due - paid };
        ctx.totals.total_shortfall += shortfall;

        let note = plan.note.or_else(|| {
            if amount_deferred > Money::ZERO {
                Some(StepNote::Deferred)
            } else if shortfall > Money::ZERO {
                Some(StepNote::Shortfall)
            } else {
                None
            }
        });
        match &note {
            Some(StepNote::Deferred) => tracing::warn!(
                deal_id,
                step = %step.name,
                due = %due,
                paid = %paid,
                deferred = %amount_deferred,
                "interest deferred"
            ),
            Some(StepNote::Shortfall) => tracing::warn!(
                deal_id,
                step = %step.name,
                due = %due,
                paid = %paid,
                shortfall = %shortfall,
                "contractual shortfall"
            ),
            _ => tracing::debug!(
                deal_id,
                step = %step.name,
                sequence = step.step_sequence,
                due = %due,
                paid = %paid,
                remaining = %ctx.remaining(),
                "step applied"
            ),
        }

        let record = PaymentRecord {
            step_sequence: step.step_sequence,
            step_name: step.name.clone(),
            priority_class: step.priority_class,
            kind: step.kind.label().to_string(),
            amount_due: due,
            amount_paid: paid,
            amount_deferred,
            shortfall,
            cash_before,
            remaining_cash: ctx.remaining(),
            allocations,
            note,
        };
        ctx.records.push(record);
    }

    let execution = verify_execution(assemble(
        request,
        opening,
        total_available,
        ctx.finish(),
        ExecutionStatus::Completed,
        None,
    ))?;

    tracing::info!(
        deal_id,
        payment_date = %request.payment_date,
        paid = %execution.totals.total_paid,
        deferred = %execution.totals.total_deferred,
        shortfall = %execution.totals.total_shortfall,
        residual = %execution.totals.residual_paid,
        "waterfall execution completed"
    );
    Ok(execution)
}

/// Resolve the configuration for the date and execute, wrapped in the output envelope.
pub fn run_waterfall(input: &WaterfallInput) -> CloEngineResult<ComputationOutput<WaterfallExecution>> {
    let start = Instant::now();
    let configuration = resolve_configuration(&input.configurations, &input.deal.id, input.payment_date)?;
    let accrual_start = match input.accrual_start {
        Some(d) => d,
        None => input.deal.default_accrual_start(input.payment_date)?,
    };
    let empty = CoverageResult {
        deal_id: input.deal.id.clone(),
        period: input.period,
        payment_date: input.payment_date,
        collateral: Default::default(),
        triggers: Vec::new(),
    };
    let coverage = input.coverage.as_ref().unwrap_or(&empty);

    let execution = execute_waterfall(&WaterfallRequest {
        deal: &input.deal,
        period: input.period,
        payment_date: input.payment_date,
        accrual_start,
        reference_rate: input.reference_rate,
        tranches: &input.tranches,
        configuration,
        collection_amount: input.collection_amount,
        principal_proceeds: input.principal_proceeds,
        collateral_par: input.collateral_par,
        accounts: &input.accounts,
        coverage,
        compliance_failures: input.compliance_failures,
    })?;

    let mut warnings = Vec::new();
    for r in &execution.records {
        match r.note {
            Some(StepNote::Shortfall) => warnings.push(format!(
                "Step '{}' short by {} (due {}, paid {}).",
                r.step_name, r.shortfall, r.amount_due, r.amount_paid
            )),
            Some(StepNote::Deferred) => warnings.push(format!(
                "Step '{}' deferred {} into PIK balance.",
                r.step_name, r.amount_deferred
            )),
            _ => {}
        }
    }
    if execution.total_available > Money::ZERO && execution.totals.residual_paid == execution.total_available {
        warnings.push("All available cash flowed to the residual step.".into());
    }

    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata(
        "CLO Payment-Date Waterfall (sequential, coverage-gated)",
        &serde_json::json!({
            "configuration_version": configuration.version,
            "accrual_start": accrual_start,
            "reference_rate": input.reference_rate.to_string(),
            "day_count_fees": "Actual/360",
            "rounding": "cents, banker's",
        }),
        warnings,
        elapsed,
        execution,
    ))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coverage::cure::{carry_forward, CureDemand, CureMeasurement, CureSplitPolicy};
    use crate::coverage::trigger::{CoverageKind, CoverageTrigger, CureTrack, TriggerState};
    use crate::test_support::{date, sample_deal, sample_tranches};
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    fn step(seq: u32, name: &str, class: PriorityClass, kind: StepKind) -> PaymentStep {
        PaymentStep {
            name: name.into(),
            step_sequence: seq,
            priority_class: class,
            kind,
            is_deferrable: false,
        }
    }

    /// Class A carries a fixed 8% coupon on 30/360 so a quarter accrues exactly 120,000.
    fn scenario_tranches() -> Vec<Tranche> {
        let mut t = sample_tranches();
        t[0].coupon = crate::deal::tranche::CouponTerms::Fixed { rate: dec!(0.08) };
        t[0].day_count = DayCount::Thirty360;
        t[1].coupon = crate::deal::tranche::CouponTerms::Fixed { rate: dec!(0.10) };
        t[1].day_count = DayCount::Thirty360;
        t
    }

    fn sample_config() -> WaterfallConfiguration {
        WaterfallConfiguration {
            deal_id: "CLO-1".into(),
            version: 1,
            effective_date: date(2023, 1, 15),
            steps: vec![
                step(
                    10,
                    "Senior fees",
                    PriorityClass::Fees,
                    StepKind::Fee {
                        basis: FeeBasis::Fixed { amount: dec!(50_000) },
                        account: AccountKind::Payable,
                        cap: None,
                    },
                ),
                step(
                    20,
                    "Class A interest",
                    PriorityClass::SeniorInterest,
                    StepKind::Interest {
                        tranches: vec!["A".into()],
                    },
                ),
                step(
                    30,
                    "Class A OC cure",
                    PriorityClass::CoverageCure,
                    StepKind::CoverageCure {
                        tier: "A".into(),
                        test: CoverageKind::Oc,
                        track: CureTrack::Principal,
                        destination: CureDestination::default(),
                    },
                ),
                PaymentStep {
                    is_deferrable: true,
                    ..step(
                        40,
                        "Class B interest",
                        PriorityClass::SubordinateInterest,
                        StepKind::Interest {
                            tranches: vec!["B".into()],
                        },
                    )
                },
                step(
                    90,
                    "Residual",
                    PriorityClass::Residual,
                    StepKind::Residual { tranche: "Sub".into() },
                ),
            ],
        }
    }

    fn oc_trigger(deficiency: Money) -> CoverageTrigger {
        let state = if deficiency.is_zero() {
            TriggerState::EvaluatedPass
        } else {
            TriggerState::EvaluatedFail
        };
        CoverageTrigger {
            deal_id: "CLO-1".into(),
            tier: "A".into(),
            tier_seniority: 1,
            kind: CoverageKind::Oc,
            period: 5,
            payment_date: date(2024, 4, 15),
            numerator: dec!(7_120_000),
            denominator: dec!(6_000_000),
            ratio: dec!(7_120_000) / dec!(6_000_000),
            threshold: dec!(1.20),
            state,
            deficiency,
            denominator_zero: false,
            tracks: carry_forward(
                CoverageKind::Oc,
                None,
                CureDemand {
                    deficiency,
                    available_interest: Money::ZERO,
                    split: CureSplitPolicy::InterestFirst,
                    measurement: CureMeasurement::CreditPaidCures,
                },
            ),
        }
    }

    fn coverage(deficiency: Money) -> CoverageResult {
        CoverageResult {
            deal_id: "CLO-1".into(),
            period: 5,
            payment_date: date(2024, 4, 15),
            collateral: Default::default(),
            triggers: vec![oc_trigger(deficiency)],
        }
    }

    fn run(collection: Money, deficiency: Money) -> WaterfallExecution {
        let deal = sample_deal();
        let tranches = scenario_tranches();
        let config = sample_config();
        let coverage = coverage(deficiency);
        execute_waterfall(&WaterfallRequest {
            deal: &deal,
            period: 5,
            payment_date: date(2024, 4, 15),
            accrual_start: date(2024, 1, 15),
            reference_rate: dec!(0.05),
            tranches: &tranches,
            configuration: &config,
            collection_amount: collection,
            principal_proceeds: Money::ZERO,
            collateral_par: dec!(10_000_000),
            accounts: &[],
            coverage: &coverage,
            compliance_failures: 0,
        })
        .unwrap()
    }

    #[test]
    fn test_cure_scenario() {
        let ex = run(dec!(1_000_000), dec!(80_000));
        assert_eq!(ex.status, ExecutionStatus::Completed);
        assert_eq!(ex.record("Senior fees").unwrap().amount_paid, dec!(50_000));
        assert_eq!(ex.record("Class A interest").unwrap().amount_paid, dec!(120_000));
        let cure = ex.record("Class A OC cure").unwrap();
        assert_eq!(cure.amount_paid, dec!(80_000));
        assert_eq!(cure.remaining_cash, dec!(750_000));
        let a = ex.tranche("A").unwrap();
        assert_eq!(a.beginning_balance - a.ending_balance, dec!(80_000));

        let row = &ex.coverage_snapshot[0];
        assert_eq!(row.cure_paid(), dec!(80_000));
        assert_eq!(row.outstanding(CureTrack::Principal), dec!(0));
        ex.check_conservation().unwrap();
    }

    #[test]
    fn test_cure_skipped_when_test_passes() {
        let ex = run(dec!(1_000_000), dec!(0));
        let cure = ex.record("Class A OC cure").unwrap();
        assert_eq!(cure.amount_due, dec!(0));
        assert_eq!(cure.note, Some(StepNote::CoverageTestPassed));
        assert_eq!(ex.tranche("A").unwrap().ending_balance, dec!(6_000_000));
    }

    #[test]
    fn test_deferrable_interest_defers_shortfall() {
        // Fees 50k, A 120k, cure 80k: 20k left for B's 50k of interest.
        let ex = run(dec!(270_000), dec!(80_000));
        let b = ex.record("Class B interest").unwrap();
        assert_eq!(b.amount_due, dec!(50_000));
        assert_eq!(b.amount_paid, dec!(20_000));
        assert_eq!(b.amount_deferred, dec!(30_000));
        assert_eq!(b.note, Some(StepNote::Deferred));
        assert_eq!(ex.tranche("B").unwrap().ending_deferred, dec!(30_000));
        assert_eq!(ex.remaining_cash, dec!(0));
    }

    #[test]
    fn test_senior_shortfall_is_recorded_not_raised() {
        let ex = run(dec!(100_000), dec!(80_000));
        let a = ex.record("Class A interest").unwrap();
        assert_eq!(a.amount_paid, dec!(50_000));
        assert_eq!(a.shortfall, dec!(70_000));
        assert_eq!(a.note, Some(StepNote::Shortfall));
        assert_eq!(ex.totals.total_shortfall, dec!(150_000));
        assert_eq!(ex.record("Class B interest").unwrap().amount_deferred, dec!(50_000));
        ex.check_conservation().unwrap();
    }

    #[test]
    fn test_collection_and_reserve_draw_sources() {
        let deal = sample_deal();
        let tranches = scenario_tranches();
        let config = sample_config();
        let coverage = coverage(dec!(0));
        let accounts = vec![
            AccountBalance {
                kind: AccountKind::Collection,
                beginning_balance: dec!(25_000),
                draw_limit: None,
            },
            AccountBalance {
                kind: AccountKind::InterestReserve,
                beginning_balance: dec!(40_000),
                draw_limit: Some(dec!(30_000)),
            },
        ];
        let ex = execute_waterfall(&WaterfallRequest {
            deal: &deal,
            period: 5,
            payment_date: date(2024, 4, 15),
            accrual_start: date(2024, 1, 15),
            reference_rate: dec!(0.05),
            tranches: &tranches,
            configuration: &config,
            collection_amount: dec!(500_000),
            principal_proceeds: Money::ZERO,
            collateral_par: dec!(10_000_000),
            accounts: &accounts,
            coverage: &coverage,
            compliance_failures: 0,
        })
        .unwrap();
        assert_eq!(ex.beginning_cash, dec!(25_000));
        assert_eq!(ex.reserve_draws, dec!(30_000));
        assert_eq!(ex.total_available, dec!(555_000));
        let reserve = ex
            .account_rows
            .iter()
            .find(|r| r.kind == AccountKind::InterestReserve)
            .unwrap();
        assert_eq!(reserve.ending_balance, dec!(10_000));
        let payable = ex.account_rows.iter().find(|r| r.kind == AccountKind::Payable).unwrap();
        assert_eq!(payable.deposits, dec!(50_000));
    }

    #[test]
    fn test_missing_coverage_is_configuration_error() {
        let deal = sample_deal();
        let tranches = scenario_tranches();
        let config = sample_config();
        let mut coverage = coverage(dec!(0));
        coverage.triggers.clear();
        let err = execute_waterfall(&WaterfallRequest {
            deal: &deal,
            period: 5,
            payment_date: date(2024, 4, 15),
            accrual_start: date(2024, 1, 15),
            reference_rate: dec!(0.05),
            tranches: &tranches,
            configuration: &config,
            collection_amount: dec!(1),
            principal_proceeds: Money::ZERO,
            collateral_par: dec!(0),
            accounts: &[],
            coverage: &coverage,
            compliance_failures: 0,
        })
        .unwrap_err();
        assert!(matches!(err, CloEngineError::ConfigurationError { .. }));
    }

    #[test]
    fn test_reinvestment_gated_by_compliance_and_date() {
        let deal = sample_deal();
        let tranches = scenario_tranches();
        let mut config = sample_config();
        config.steps.push(step(
            60,
            "Reinvest principal",
            PriorityClass::Principal,
            StepKind::Reinvestment {
                account: AccountKind::PrincipalReserve,
                max_compliance_failures: 0,
                amount: None,
            },
        ));
        let coverage = coverage(dec!(0));
        let request = |failures: usize, payment_date: NaiveDate| WaterfallRequest {
            deal: &deal,
            period: 5,
            payment_date,
            accrual_start: date(2024, 1, 15),
            reference_rate: dec!(0.05),
            tranches: &tranches,
            configuration: &config,
            collection_amount: dec!(1_000_000),
            principal_proceeds: dec!(400_000),
            collateral_par: dec!(10_000_000),
            accounts: &[],
            coverage: &coverage,
            compliance_failures: failures,
        };

        let ok = execute_waterfall(&request(0, date(2024, 4, 15))).unwrap();
        assert_eq!(ok.record("Reinvest principal").unwrap().amount_paid, dec!(400_000));

        let gated = execute_waterfall(&request(2, date(2024, 4, 15))).unwrap();
        let r = gated.record("Reinvest principal").unwrap();
        assert_eq!(r.amount_paid, dec!(0));
        assert!(matches!(r.note, Some(StepNote::Gated { .. })));

        let late = execute_waterfall(&request(0, date(2027, 4, 15))).unwrap();
        assert_eq!(late.record("Reinvest principal").unwrap().amount_paid, dec!(0));
    }

    #[test]
    fn test_settle_overdraw_fails_with_partial_record() {
        let deal = sample_deal();
        let tranches = scenario_tranches();
        let config = sample_config();
        let coverage = coverage(dec!(0));
        let request = WaterfallRequest {
            deal: &deal,
            period: 5,
            payment_date: date(2024, 4, 15),
            accrual_start: date(2024, 1, 15),
            reference_rate: dec!(0.05),
            tranches: &tranches,
            configuration: &config,
            collection_amount: dec!(100),
            principal_proceeds: Money::ZERO,
            collateral_par: dec!(0),
            accounts: &[],
            coverage: &coverage,
            compliance_failures: 0,
        };
        let mut ctx = ExecutionContext::new(
            dec!(100),
            Money::ZERO,
            &tranches,
            &HashMap::new(),
            AccountLedger::default(),
            Vec::new(),
        );
        let opening = Opening {
            beginning_cash: Money::ZERO,
            reserve_draws: Money::ZERO,
        };
        let err = settle(&mut ctx, &request, opening, &config.steps[0], dec!(150)).unwrap_err();
        match err {
            CloEngineError::NegativeCashInvariantViolation {
                step,
                remaining_cash,
                partial,
                ..
            } => {
                assert_eq!(step, "Senior fees");
                assert_eq!(remaining_cash, dec!(-50));
                assert_eq!(partial.status, ExecutionStatus::Failed);
                assert!(partial.failure.is_some());
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(ctx.remaining(), dec!(100));
    }

    #[test]
    fn test_unbalanced_execution_fails_with_partial_record() {
        let mut ex = run(dec!(1_000_000), dec!(80_000));
        ex.remaining_cash += dec!(1);
        let err = verify_execution(ex).unwrap_err();
        assert!(matches!(err, CloEngineError::ExecutionInvariantViolation { .. }));
        let partial = err.partial_execution().unwrap();
        assert_eq!(partial.status, ExecutionStatus::Failed);
        assert!(partial.failure.as_deref().unwrap().contains("!= available"));
        assert_eq!(partial.records.len(), 5);
    }

    #[test]
    fn test_broken_account_identity_fails_with_partial_record() {
        let mut ex = run(dec!(1_000_000), dec!(80_000));
        assert!(!ex.account_rows.is_empty());
        ex.account_rows[0].ending_balance += dec!(5);
        let err = verify_execution(ex).unwrap_err();
        let partial = err.partial_execution().unwrap();
        assert_eq!(partial.status, ExecutionStatus::Failed);
        assert!(!partial.is_completed());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_senior_expense_estimate() {
        let config = sample_config();
        let fees = estimate_senior_expenses(
            &config,
            &scenario_tranches(),
            dec!(10_000_000),
            date(2024, 1, 15),
            date(2024, 4, 15),
        );
        assert_eq!(fees, dec!(50_000));
    }
}
