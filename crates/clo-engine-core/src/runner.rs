//! Payment-date orchestration: aggregate, compliance, coverage, waterfall, persist.
//!
//! All reads from the store happen before computation and all writes after it, so a
//! batch of deals can compute in parallel while sharing one store behind a lock.

use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::cash_flow::aggregator::{AggregationRequest, CashFlowAggregator, PoolTotals};
use crate::compliance::definition::ComplianceTest;
use crate::compliance::engine::{evaluate_compliance, ComplianceRequest, ComplianceSummary};
use crate::compliance::library::standard_test_library;
use crate::coverage::cure::CoverageHistory;
use crate::coverage::engine::{evaluate_coverage, CoverageRequest, CoverageResult};
use crate::coverage::ic::AccrualPeriod;
use crate::coverage::oc::CoverageConventions;
use crate::deal::account::{AccountBalance, AccountKind};
use crate::deal::asset::{Asset, CashFlowPeriod};
use crate::deal::structure::Deal;
use crate::deal::tranche::Tranche;
use crate::error::CloEngineError;
use crate::store::ExecutionStore;
use crate::types::{Money, Rate};
use crate::waterfall::config::{resolve_configuration, WaterfallConfiguration};
use crate::waterfall::engine::{estimate_senior_expenses, execute_waterfall, WaterfallRequest};
use crate::waterfall::execution::WaterfallExecution;
use crate::CloEngineResult;

// ---------------------------------------------------------------------------
// Input / Output types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// A completed execution for the date is an error.
    #[default]
    RejectIfCompleted,
    /// Append a new version that supersedes the latest one.
    Supersede,
}

/// Everything needed to run one deal for one payment date.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeriodRequest {
    pub deal: Deal,
    pub period: u32,
    pub payment_date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accrual_start: Option<NaiveDate>,
    pub reference_rate: Rate,
    pub tranches: Vec<Tranche>,
    pub positions: Vec<Asset>,
    pub cash_flows: Vec<CashFlowPeriod>,
    pub configurations: Vec<WaterfallConfiguration>,
    /// Defaults to the standard library.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compliance_tests: Option<Vec<ComplianceTest>>,
    #[serde(default)]
    pub conventions: CoverageConventions,
    #[serde(default)]
    pub accounts: Vec<AccountBalance>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available_interest_override: Option<Money>,
    #[serde(default)]
    pub mode: RunMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeriodOutcome {
    pub totals: PoolTotals,
    pub compliance: ComplianceSummary,
    /// Coverage as evaluated before the waterfall; finalized rows are on the execution.
    pub coverage: CoverageResult,
    pub execution: WaterfallExecution,
    pub warnings: Vec<String>,
}

#[derive(Debug)]
pub struct BatchItem {
    pub deal_id: String,
    pub payment_date: NaiveDate,
    pub result: CloEngineResult<PeriodOutcome>,
}

// ---------------------------------------------------------------------------
// Phases
// ---------------------------------------------------------------------------

/// State read from the store before computing.
#[derive(Debug)]
struct Prepared {
    history: CoverageHistory,
    version: u32,
    supersedes: Option<u32>,
}

fn prepare<S: ExecutionStore + ?Sized>(store: &S, request: &PeriodRequest) -> CloEngineResult<Prepared> {
    let deal = &request.deal;
    if deal.status.is_terminal() {
        return Err(CloEngineError::invalid(
            "deal.status",
            format!("Deal {} is {:?}; no further payment dates run.", deal.id, deal.status),
        ));
    }
    let (version, supersedes) = match store.latest_execution(&deal.id, request.payment_date) {
        Some(latest) if latest.is_completed() && request.mode == RunMode::RejectIfCompleted => {
            return Err(CloEngineError::ExecutionAlreadyCompleted {
                deal_id: deal.id.clone(),
                payment_date: request.payment_date,
            });
        }
        Some(latest) => (latest.version + 1, Some(latest.version)),
        None => (1, None),
    };
    Ok(Prepared {
        history: store.coverage_history(&deal.id)?,
        version,
        supersedes,
    })
}

fn compute(
    aggregator: &CashFlowAggregator,
    request: &PeriodRequest,
    prepared: &Prepared,
) -> CloEngineResult<PeriodOutcome> {
    let deal = &request.deal;
    deal.validate()?;
    let configuration = resolve_configuration(&request.configurations, &deal.id, request.payment_date)?;
    let accrual_start = match request.accrual_start {
        Some(d) => d,
        None => deal.default_accrual_start(request.payment_date)?,
    };

    let aggregate = aggregator.aggregate(&AggregationRequest {
        deal_id: &deal.id,
        period: request.period,
        as_of: request.payment_date,
        positions: &request.positions,
        cash_flows: &request.cash_flows,
    })?;
    let totals = &aggregate.totals;

    let library;
    let tests: &[ComplianceTest] = match &request.compliance_tests {
        Some(t) => t,
        None => {
            library = standard_test_library();
            &library
        }
    };
    let compliance = evaluate_compliance(&ComplianceRequest {
        deal_id: &deal.id,
        period: request.period,
        snapshot: &aggregate.snapshot,
        tests,
    })?;

    let senior_expenses = estimate_senior_expenses(
        configuration,
        &request.tranches,
        totals.total_par_outstanding,
        accrual_start,
        request.payment_date,
    );
    let principal_cash: Money = request
        .accounts
        .iter()
        .filter(|a| a.kind == AccountKind::PrincipalReserve)
        .map(|a| a.beginning_balance)
        .sum();
    let coverage = evaluate_coverage(&CoverageRequest {
        deal_id: &deal.id,
        period: request.period,
        payment_date: request.payment_date,
        accrual: AccrualPeriod {
            start: accrual_start,
            end: request.payment_date,
            reference_rate: request.reference_rate,
        },
        tranches: &request.tranches,
        snapshot: &aggregate.snapshot,
        interest_collections: totals.interest_proceeds(),
        senior_expenses,
        principal_cash,
        available_interest_override: request.available_interest_override,
        conventions: &request.conventions,
        history: &prepared.history,
    })?;

    let mut execution = execute_waterfall(&WaterfallRequest {
        deal,
        period: request.period,
        payment_date: request.payment_date,
        accrual_start,
        reference_rate: request.reference_rate,
        tranches: &request.tranches,
        configuration,
        collection_amount: totals.collection_amount(),
        principal_proceeds: totals.principal_proceeds(),
        collateral_par: totals.total_par_outstanding,
        accounts: &request.accounts,
        coverage: &coverage,
        compliance_failures: compliance.failed,
    })?;
    execution.version = prepared.version;
    execution.supersedes = prepared.supersedes;

    Ok(PeriodOutcome {
        totals: totals.clone(),
        compliance,
        coverage,
        execution,
        warnings: aggregate.warnings.clone(),
    })
}

fn commit<S: ExecutionStore + ?Sized>(store: &mut S, outcome: &PeriodOutcome) -> CloEngineResult<()> {
    let execution = &outcome.execution;
    store.append_execution(execution.clone())?;
    store.append_compliance(&outcome.compliance.results);
    store.append_coverage(&execution.coverage_snapshot);
    store.append_account_rows(&execution.account_rows);
    Ok(())
}

/// Keep the partial record of a failed run for diagnosis.
fn retain_failure<S: ExecutionStore + ?Sized>(store: &mut S, prepared: &Prepared, error: &CloEngineError) {
    if let Some(partial) = error.partial_execution() {
        let mut failed = partial.clone();
        failed.version = prepared.version;
        failed.supersedes = prepared.supersedes;
        if let Err(e) = store.append_execution(failed) {
            tracing::error!(error = %e, "could not retain failed execution");
        }
    }
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Run one deal for one payment date and persist the outputs.
pub fn run_payment_date<S: ExecutionStore + ?Sized>(
    store: &mut S,
    aggregator: &CashFlowAggregator,
    request: &PeriodRequest,
) -> CloEngineResult<PeriodOutcome> {
    let prepared = prepare(store, request)?;
    match compute(aggregator, request, &prepared) {
        Ok(outcome) => {
            commit(store, &outcome)?;
            Ok(outcome)
        }
        Err(e) => {
            retain_failure(store, &prepared, &e);
            Err(e)
        }
    }
}

fn run_locked<S: ExecutionStore>(
    store: &Mutex<S>,
    aggregator: &CashFlowAggregator,
    request: &PeriodRequest,
) -> CloEngineResult<PeriodOutcome> {
    let prepared = {
        let guard = store.lock().unwrap_or_else(|e| e.into_inner());
        prepare(&*guard, request)?
    };
    let computed = compute(aggregator, request, &prepared);
    let mut guard = store.lock().unwrap_or_else(|e| e.into_inner());
    match computed {
        Ok(outcome) => {
            commit(&mut *guard, &outcome)?;
            Ok(outcome)
        }
        Err(e) => {
            retain_failure(&mut *guard, &prepared, &e);
            Err(e)
        }
    }
}

/// Run many (deal, date) requests. Deals run in parallel on scoped worker threads;
/// dates of the same deal run in order on one worker. A failure is reported in its
/// own item and never stops the others. Results keep the input order.
pub fn run_batch<S: ExecutionStore + Send>(
    store: &Mutex<S>,
    aggregator: &CashFlowAggregator,
    requests: &[PeriodRequest],
) -> Vec<BatchItem> {
    let mut by_deal: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (i, r) in requests.iter().enumerate() {
        by_deal.entry(r.deal.id.as_str()).or_default().push(i);
    }
    for indices in by_deal.values_mut() {
        indices.sort_by_key(|&i| (requests[i].payment_date, requests[i].period));
    }

    let mut results: Vec<(usize, BatchItem)> = std::thread::scope(|scope| {
        let handles: Vec<_> = by_deal
            .into_values()
            .map(|indices| {
                let owned = indices.clone();
                let handle = scope.spawn(move || {
                    owned
                        .into_iter()
                        .map(|i| {
                            let r = &requests[i];
                            let result = run_locked(store, aggregator, r);
                            if let Err(e) = &result {
                                tracing::warn!(
                                    deal_id = %r.deal.id,
                                    payment_date = %r.payment_date,
                                    error = %e,
                                    retryable = e.is_retryable(),
                                    "payment date failed"
                                );
                            }
                            (
                                i,
                                BatchItem {
                                    deal_id: r.deal.id.clone(),
                                    payment_date: r.payment_date,
                                    result,
                                },
                            )
                        })
                        .collect::<Vec<_>>()
                });
                (indices, handle)
            })
            .collect();

        handles
            .into_iter()
            .flat_map(|(indices, h)| {
                h.join().unwrap_or_else(|_| {
                    tracing::error!("batch worker panicked");
                    indices
                        .into_iter()
                        .map(|i| {
                            let r = &requests[i];
                            let result = Err(CloEngineError::InvariantViolation {
                                context: format!("worker for deal {} panicked", r.deal.id),
                            });
                            (
                                i,
                                BatchItem {
                                    deal_id: r.deal.id.clone(),
                                    payment_date: r.payment_date,
                                    result,
                                },
                            )
                        })
                        .collect()
                })
            })
            .collect()
    });

    results.sort_by_key(|(i, _)| *i);
    results.into_iter().map(|(_, item)| item).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::test_support::{date, sample_asset, sample_deal, sample_flow, sample_tranches};
    use crate::waterfall::config::{PaymentStep, PriorityClass, StepKind};
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    fn sample_request() -> PeriodRequest {
        PeriodRequest {
            deal: sample_deal(),
            period: 1,
            payment_date: date(2023, 4, 15),
            accrual_start: None,
            reference_rate: dec!(0.05),
            tranches: sample_tranches(),
            positions: vec![
                sample_asset("L1", "Alpha", "Software", "B2"),
                sample_asset("L2", "Beta", "Retail", "B1"),
            ],
            cash_flows: vec![
                sample_flow("L1", 1, dec!(6_000_000), dec!(130_000)),
                sample_flow("L2", 1, dec!(5_000_000), dec!(110_000)),
            ],
            configurations: vec![WaterfallConfiguration {
                deal_id: "CLO-1".into(),
                version: 1,
                effective_date: date(2023, 1, 15),
                steps: vec![
                    PaymentStep {
                        name: "Class A interest".into(),
                        step_sequence: 1,
                        priority_class: PriorityClass::SeniorInterest,
                        kind: StepKind::Interest {
                            tranches: vec!["A".into()],
                        },
                        is_deferrable: false,
                    },
                    PaymentStep {
                        name: "Residual".into(),
                        step_sequence: 2,
                        priority_class: PriorityClass::Residual,
                        kind: StepKind::Residual { tranche: "Sub".into() },
                        is_deferrable: false,
                    },
                ],
            }],
            compliance_tests: Some(Vec::new()),
            conventions: CoverageConventions::default(),
            accounts: Vec::new(),
            available_interest_override: None,
            mode: RunMode::RejectIfCompleted,
        }
    }

    #[test]
    fn test_run_persists_outputs() {
        let mut store = MemoryStore::new();
        let aggregator = CashFlowAggregator::new();
        let outcome = run_payment_date(&mut store, &aggregator, &sample_request()).unwrap();
        assert_eq!(outcome.execution.version, 1);
        assert_eq!(outcome.execution.total_available, dec!(240_000));
        assert_eq!(store.executions("CLO-1").len(), 1);
        assert_eq!(store.coverage_history("CLO-1").unwrap().len(), 3);
    }

    #[test]
    fn test_rerun_rejected_then_superseded() {
        let mut store = MemoryStore::new();
        let aggregator = CashFlowAggregator::new();
        let mut request = sample_request();
        run_payment_date(&mut store, &aggregator, &request).unwrap();

        let err = run_payment_date(&mut store, &aggregator, &request).unwrap_err();
        assert!(matches!(err, CloEngineError::ExecutionAlreadyCompleted { .. }));

        request.mode = RunMode::Supersede;
        let second = run_payment_date(&mut store, &aggregator, &request).unwrap();
        assert_eq!(second.execution.version, 2);
        assert_eq!(second.execution.supersedes, Some(1));
        assert_eq!(store.versions("CLO-1", date(2023, 4, 15)).len(), 2);
    }

    #[test]
    fn test_supersede_uses_corrected_cash_flows() {
        let mut store = MemoryStore::new();
        let aggregator = CashFlowAggregator::new();
        let mut request = sample_request();
        let first = run_payment_date(&mut store, &aggregator, &request).unwrap();
        assert_eq!(first.execution.total_available, dec!(240_000));

        request.cash_flows[0].interest = dec!(330_000);
        request.mode = RunMode::Supersede;
        let second = run_payment_date(&mut store, &aggregator, &request).unwrap();
        assert_eq!(second.execution.total_available, dec!(440_000));
        assert_eq!(second.totals.total_interest_collected, dec!(440_000));
        assert_eq!(second.execution.supersedes, Some(1));

        let latest = store.latest_execution("CLO-1", date(2023, 4, 15)).unwrap();
        assert_eq!(latest.version, 2);
        assert_eq!(latest.total_available, dec!(440_000));
    }

    #[test]
    fn test_failed_checks_keep_partial_record() {
        let request = sample_request();
        let mut scratch = MemoryStore::new();
        let mut partial = run_payment_date(&mut scratch, &CashFlowAggregator::new(), &request)
            .unwrap()
            .execution;
        partial.status = crate::waterfall::execution::ExecutionStatus::Failed;
        let error = CloEngineError::ExecutionInvariantViolation {
            deal_id: "CLO-1".into(),
            payment_date: date(2023, 4, 15),
            context: "paid 1 + remaining 0 != available 2".into(),
            partial: Box::new(partial),
        };

        let mut store = MemoryStore::new();
        let prepared = prepare(&store, &request).unwrap();
        retain_failure(&mut store, &prepared, &error);
        let kept = store.latest_execution("CLO-1", date(2023, 4, 15)).unwrap();
        assert_eq!(kept.version, 1);
        assert!(!kept.is_completed());

        let retried = run_payment_date(&mut store, &CashFlowAggregator::new(), &request).unwrap();
        assert_eq!(retried.execution.version, 2);
        assert_eq!(retried.execution.supersedes, Some(1));
    }

    #[test]
    fn test_terminal_deal_rejected() {
        let mut request = sample_request();
        request.deal.status = crate::deal::structure::DealStatus::Matured;
        let err = run_payment_date(&mut MemoryStore::new(), &CashFlowAggregator::new(), &request).unwrap_err();
        assert!(matches!(err, CloEngineError::InvalidInput { .. }));
    }

    #[test]
    fn test_batch_isolates_failures() {
        let good = sample_request();
        let mut other = sample_request();
        other.deal.id = "CLO-2".into();
        other.configurations[0].deal_id = "CLO-2".into();
        other.cash_flows.pop();
        let store = Mutex::new(MemoryStore::new());
        let aggregator = CashFlowAggregator::new();

        let items = run_batch(&store, &aggregator, &[other, good]);
        assert_eq!(items[0].deal_id, "CLO-2");
        assert!(matches!(items[0].result, Err(CloEngineError::IncompleteData { .. })));
        assert!(items[1].result.is_ok());
        let store = store.into_inner().unwrap();
        assert_eq!(store.executions("CLO-1").len(), 1);
        assert!(store.executions("CLO-2").is_empty());
    }
}
