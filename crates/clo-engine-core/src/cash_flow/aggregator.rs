//! Pool-level cash-flow aggregation.
//!
//! Sums per-asset [`CashFlowPeriod`] records into [`PoolTotals`] and builds the
//! [`AssetSnapshot`] that compliance and coverage tests filter over. Aggregation is
//! pure; [`CashFlowAggregator`] memoises results per (deal, period) and input digest,
//! and may be shared read-only across threads.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::filter::AssetFilter;
use crate::deal::asset::{Asset, CashFlowPeriod};
use crate::deal::rating::is_ccc_or_below;
use crate::error::CloEngineError;
use crate::types::{with_metadata, ComputationOutput, Money};
use crate::CloEngineResult;

// ---------------------------------------------------------------------------
// Input / Output types
// ---------------------------------------------------------------------------

/// Everything needed to aggregate one deal's pool for one period.
#[derive(Debug, Clone, Copy)]
pub struct AggregationRequest<'a> {
    pub deal_id: &'a str,
    pub period: u32,
    /// Date remaining lives are measured from (the payment date).
    pub as_of: NaiveDate,
    /// The deal's active position list.
    pub positions: &'a [Asset],
    /// Projected cash flows; rows for other periods are ignored.
    pub cash_flows: &'a [CashFlowPeriod],
}

/// Owned form of [`AggregationRequest`] for file and binding callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationInput {
    pub deal_id: String,
    pub period: u32,
    pub as_of: NaiveDate,
    pub positions: Vec<Asset>,
    pub cash_flows: Vec<CashFlowPeriod>,
}

/// Pool totals for one period.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolTotals {
    pub total_interest_collected: Money,
    pub total_scheduled_principal: Money,
    pub total_unscheduled_principal: Money,
    pub total_defaults: Money,
    pub total_recoveries: Money,
    pub total_purchases: Money,
    pub total_sales: Money,
    /// Sum of ending par balances, defaulted positions included.
    pub total_par_outstanding: Money,
    pub total_market_value: Money,
    pub performing_par: Money,
    pub defaulted_par: Money,
    /// Performing par rated CCC/Caa or below.
    pub ccc_par: Money,
    pub asset_count: usize,
}

impl PoolTotals {
    pub fn interest_proceeds(&self) -> Money {
        self.total_interest_collected
    }

    /// Principal cash received, net of purchases settled in the period.
    pub fn principal_proceeds(&self) -> Money {
        let gross = self.total_scheduled_principal
            + self.total_unscheduled_principal
            + self.total_recoveries
            + self.total_sales;
        (gross - self.total_purchases).max(Money::ZERO)
    }

    /// Cash collected for the payment date.
    pub fn collection_amount(&self) -> Money {
        self.interest_proceeds() + self.principal_proceeds()
    }
}

/// A pool position joined with its cash flow for the period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetPosition {
    pub asset: Asset,
    /// Ending par balance for the period.
    pub par_balance: Money,
    pub market_value: Money,
    /// Years to maturity from the snapshot date.
    pub remaining_life: Decimal,
    pub cash_flow: CashFlowPeriod,
}

/// Queryable view of the pool at the end of a period.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssetSnapshot {
    pub as_of: Option<NaiveDate>,
    pub positions: Vec<AssetPosition>,
}

impl AssetSnapshot {
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AssetPosition> {
        self.positions.iter()
    }

    pub fn filter<'a>(&'a self, filter: &'a AssetFilter) -> impl Iterator<Item = &'a AssetPosition> {
        self.positions.iter().filter(move |p| filter.matches(p))
    }

    pub fn total_par(&self) -> Money {
        self.positions.iter().map(|p| p.par_balance).sum()
    }

    pub fn par_matching(&self, filter: &AssetFilter) -> Money {
        self.filter(filter).map(|p| p.par_balance).sum()
    }
}

/// Aggregated pool for one (deal, period).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolAggregate {
    pub deal_id: String,
    pub period: u32,
    pub totals: PoolTotals,
    pub snapshot: AssetSnapshot,
    pub warnings: Vec<String>,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Aggregate a deal's pool for one period.
///
/// Fails with `IncompleteData` when an active position has no cash flow for the
/// period, and with `InvalidInput` on duplicate rows or rows for unknown assets.
pub fn aggregate_pool(request: &AggregationRequest<'_>) -> CloEngineResult<PoolAggregate> {
    let mut flows: HashMap<&str, &CashFlowPeriod> = HashMap::new();
    let active: HashSet<&str> = request.positions.iter().map(|a| a.id.as_str()).collect();
    if active.len() != request.positions.len() {
        return Err(CloEngineError::invalid(
            "positions",
            format!("Deal {} lists an asset id more than once.", request.deal_id),
        ));
    }

    for cf in request.cash_flows.iter().filter(|cf| cf.period == request.period) {
        cf.validate()?;
        if !active.contains(cf.asset_id.as_str()) {
            return Err(CloEngineError::invalid(
                format!("cash_flow.{}", cf.asset_id),
                format!(
                    "Cash flow supplied for asset not in deal {}'s active positions.",
                    request.deal_id
                ),
            ));
        }
        if flows.insert(cf.asset_id.as_str(), cf).is_some() {
            return Err(CloEngineError::invalid(
                format!("cash_flow.{}.{}", cf.asset_id, cf.period),
                "Duplicate cash flow row for asset and period.",
            ));
        }
    }

    let missing: Vec<&str> = request
        .positions
        .iter()
        .map(|a| a.id.as_str())
        .filter(|id| !flows.contains_key(id))
        .collect();
    if !missing.is_empty() {
        return Err(CloEngineError::IncompleteData {
            deal_id: request.deal_id.to_string(),
            period: request.period,
            detail: format!("no cash flow for asset(s) {}", missing.join(", ")),
        });
    }

    let mut totals = PoolTotals::default();
    let mut positions = Vec::with_capacity(request.positions.len());
    let mut warnings = Vec::new();

    for asset in request.positions {
        asset.validate()?;
        // Presence checked above.
        let Some(cf) = flows.get(asset.id.as_str()) else {
            continue;
        };

        let roll_gap = cf.balance_roll_difference();
        if !roll_gap.is_zero() {
            tracing::warn!(
                deal_id = request.deal_id,
                period = request.period,
                asset_id = %asset.id,
                gap = %roll_gap,
                "cash flow balance roll does not reconcile"
            );
            warnings.push(format!(
                "Asset {}: ending balance differs from implied balance by {}.",
                asset.id, roll_gap
            ));
        }

        let par = cf.ending_balance;
        let market_value = par * asset.price;

        totals.total_interest_collected += cf.interest;
        totals.total_scheduled_principal += cf.scheduled_principal;
        totals.total_unscheduled_principal += cf.unscheduled_principal;
        totals.total_defaults += cf.default_amount;
        totals.total_recoveries += cf.recoveries;
        totals.total_purchases += cf.purchases;
        totals.total_sales += cf.sales;
        totals.total_par_outstanding += par;
        totals.total_market_value += market_value;
        if asset.is_defaulted {
            totals.defaulted_par += par;
        } else {
            totals.performing_par += par;
            if is_ccc_or_below(&asset.rating) {
                totals.ccc_par += par;
            }
        }
        totals.asset_count += 1;

        positions.push(AssetPosition {
            asset: asset.clone(),
            par_balance: par,
            market_value,
            remaining_life: asset.remaining_life(request.as_of),
            cash_flow: (*cf).clone(),
        });
    }

    tracing::debug!(
        deal_id = request.deal_id,
        period = request.period,
        assets = totals.asset_count,
        par = %totals.total_par_outstanding,
        interest = %totals.total_interest_collected,
        "pool aggregated"
    );

    Ok(PoolAggregate {
        deal_id: request.deal_id.to_string(),
        period: request.period,
        totals,
        snapshot: AssetSnapshot {
            as_of: Some(request.as_of),
            positions,
        },
        warnings,
    })
}

/// Aggregate a pool, wrapped in the output envelope.
pub fn run_aggregation(input: &AggregationInput) -> CloEngineResult<ComputationOutput<PoolAggregate>> {
    let start = Instant::now();
    let aggregate = aggregate_pool(&AggregationRequest {
        deal_id: &input.deal_id,
        period: input.period,
        as_of: input.as_of,
        positions: &input.positions,
        cash_flows: &input.cash_flows,
    })?;
    let warnings = aggregate.warnings.clone();
    let assumptions = serde_json::json!({
        "par_basis": "ending_balance",
        "principal_proceeds": "scheduled + unscheduled + recoveries + sales - purchases",
        "ccc_classification": "Caa1/CCC+ and below",
    });
    let elapsed = start.elapsed().as_micros() as u64;
    Ok(with_metadata("CLO Pool Cash-Flow Aggregation", &assumptions, warnings, elapsed, aggregate))
}

/// Per-(deal, period) memo of [`aggregate_pool`].
///
/// Each entry carries a digest of the positions and cash flows it was built from. A
/// request for the same (deal, period) with different inputs, such as a superseding
/// run over corrected data, recomputes and replaces the entry.
#[derive(Debug, Default)]
pub struct CashFlowAggregator {
    cache: RwLock<HashMap<(String, u32), (u64, Arc<PoolAggregate>)>>,
}

fn input_digest(request: &AggregationRequest<'_>) -> CloEngineResult<u64> {
    let mut hasher = DefaultHasher::new();
    serde_json::to_vec(request.positions)?.hash(&mut hasher);
    serde_json::to_vec(request.cash_flows)?.hash(&mut hasher);
    request.as_of.hash(&mut hasher);
    Ok(hasher.finish())
}

impl CashFlowAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn aggregate(&self, request: &AggregationRequest<'_>) -> CloEngineResult<Arc<PoolAggregate>> {
        let digest = input_digest(request)?;
        if let Some(hit) = self.cached(request.deal_id, request.period, digest) {
            return Ok(hit);
        }
        let computed = Arc::new(aggregate_pool(request)?);
        let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
        let key = (request.deal_id.to_string(), request.period);
        if let Some((d, hit)) = cache.get(&key) {
            if *d == digest {
                return Ok(Arc::clone(hit));
            }
            tracing::debug!(
                deal_id = request.deal_id,
                period = request.period,
                "pool inputs changed; replacing cached aggregate"
            );
        }
        cache.insert(key, (digest, Arc::clone(&computed)));
        Ok(computed)
    }

    fn cached(&self, deal_id: &str, period: u32, digest: u64) -> Option<Arc<PoolAggregate>> {
        let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
        match cache.get(&(deal_id.to_string(), period)) {
            Some((d, hit)) if *d == digest => Some(Arc::clone(hit)),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.cache.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
