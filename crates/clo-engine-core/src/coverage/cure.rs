//! Cure carry-forward and the append-only coverage history.
//!
//! Period N's cure rows are derived from period N-1's finalized row. Nothing is shared
//! or mutated across periods: the previous row is read, the new row is built.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::trigger::{CoverageKind, CoverageTrigger, CureTrack, CureTrackRow};
use crate::error::CloEngineError;
use crate::types::Money;
use crate::CloEngineResult;

/// How an OC deficiency is split between the interest and principal tracks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CureSplitPolicy {
    /// Retained interest covers the deficiency first; the rest falls to principal.
    #[default]
    InterestFirst,
    PrincipalOnly,
}

/// Whether cures paid earlier in a breach episode are credited against the current
/// deficiency.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CureMeasurement {
    /// `required = max(0, deficiency - prior_cure_paid_cumulative)`.
    #[default]
    CreditPaidCures,
    /// `required = deficiency`; for deals whose deficiency is measured after paydowns.
    CurrentDeficiency,
}

/// Key of one coverage row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RowKey {
    deal_id: String,
    tier: String,
    kind: CoverageKind,
    period: u32,
}

impl RowKey {
    fn of(row: &CoverageTrigger) -> Self {
        Self {
            deal_id: row.deal_id.clone(),
            tier: row.tier.clone(),
            kind: row.kind,
            period: row.period,
        }
    }
}

/// Arena of coverage rows indexed by (deal, tier, kind, period).
#[derive(Debug, Clone, Default)]
pub struct CoverageHistory {
    rows: Vec<CoverageTrigger>,
    index: HashMap<RowKey, usize>,
}

impl CoverageHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rows(rows: impl IntoIterator<Item = CoverageTrigger>) -> CloEngineResult<Self> {
        let mut history = Self::new();
        for row in rows {
            history.insert(row)?;
        }
        Ok(history)
    }

    /// Append a row. A second row for the same key is an invariant violation.
    pub fn insert(&mut self, row: CoverageTrigger) -> CloEngineResult<()> {
        let key = RowKey::of(&row);
        if self.index.contains_key(&key) {
            return Err(CloEngineError::InvariantViolation {
                context: format!(
                    "coverage row for deal {} tier {} {} period {} already recorded",
                    row.deal_id, row.tier, row.kind, row.period
                ),
            });
        }
        self.index.insert(key, self.rows.len());
        self.rows.push(row);
        Ok(())
    }

    pub fn get(&self, deal_id: &str, tier: &str, kind: CoverageKind, period: u32) -> Option<&CoverageTrigger> {
        let key = RowKey {
            deal_id: deal_id.to_string(),
            tier: tier.to_string(),
            kind,
            period,
        };
        self.index.get(&key).map(|&i| &self.rows[i])
    }

    /// Row for the period immediately before `period`.
    pub fn previous(&self, deal_id: &str, tier: &str, kind: CoverageKind, period: u32) -> Option<&CoverageTrigger> {
        period
            .checked_sub(1)
            .and_then(|p| self.get(deal_id, tier, kind, p))
    }

    pub fn rows(&self) -> &[CoverageTrigger] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Cure requirement for one tier, split across tracks.
#[derive(Debug, Clone, Copy)]
pub(crate) struct CureDemand {
    pub deficiency: Money,
    pub available_interest: Money,
    pub split: CureSplitPolicy,
    pub measurement: CureMeasurement,
}

/// Build this period's cure tracks from the previous period's finalized row.
///
/// Carry-forward: a track's `prior_cure_outstanding` is the previous row's unpaid
/// requirement on that track; `prior_cure_paid_cumulative` accumulates while the test
/// keeps failing and resets once it passes.
pub(crate) fn carry_forward(
    kind: CoverageKind,
    previous: Option<&CoverageTrigger>,
    demand: CureDemand,
) -> Vec<CureTrackRow> {
    let tracks: &[CureTrack] = match kind {
        CoverageKind::Oc => &[CureTrack::Interest, CureTrack::Principal],
        CoverageKind::Ic => &[CureTrack::Single],
    };
    let in_episode = previous.filter(|p| p.failed());

    let prior_outstanding = |track| previous.map(|p| p.outstanding(track)).unwrap_or(Money::ZERO);
    let prior_paid = |track| {
        in_episode
            .and_then(|p| p.track(track))
            .map(|t| t.cure_paid_cumulative)
            .unwrap_or(Money::ZERO)
    };

    let credited: Money = match demand.measurement {
        CureMeasurement::CreditPaidCures => tracks.iter().map(|t| prior_paid(*t)).sum(),
        CureMeasurement::CurrentDeficiency => Money::ZERO,
    };
    let required = (demand.deficiency - credited).max(Money::ZERO);

    let split: Vec<(CureTrack, Money)> = match kind {
        CoverageKind::Ic => vec![(CureTrack::Single, required)],
        CoverageKind::Oc => {
            let interest = match demand.split {
                CureSplitPolicy::InterestFirst => required.min(demand.available_interest.max(Money::ZERO)),
                CureSplitPolicy::PrincipalOnly => Money::ZERO,
            };
            vec![(CureTrack::Interest, interest), (CureTrack::Principal, required - interest)]
        }
    };

    split
        .into_iter()
        .map(|(track, amount)| {
            let prior_cure_outstanding = prior_outstanding(track);
            let prior_cure_paid_cumulative = prior_paid(track);
            CureTrackRow {
                track,
                prior_cure_outstanding,
                prior_cure_paid_cumulative,
                cure_amount_this_period: amount,
                newly_arising_deficiency: (amount - prior_cure_outstanding).max(Money::ZERO),
                cure_paid_this_period: Money::ZERO,
                cure_paid_cumulative: prior_cure_paid_cumulative,
            }
        })
        .collect()
}

/// Record a cure payment against a track, capped at what is still required.
/// Returns the amount applied.
pub(crate) fn record_cure_payment(row: &mut CoverageTrigger, track: CureTrack, amount: Money) -> Money {
    let Some(t) = row.track_mut(track) else {
        return Money::ZERO;
    };
    let applied = amount.min(t.unpaid()).max(Money::ZERO);
    t.cure_paid_this_period += applied;
    t.cure_paid_cumulative += applied;
    applied
}
