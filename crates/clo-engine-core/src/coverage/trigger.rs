//! Per-period coverage trigger rows.
//!
//! A [`CoverageTrigger`] is one immutable record keyed by (deal, tier, kind, period).
//! Cure bookkeeping lives in one [`CureTrackRow`] per track: OC carries an interest
//! track and a principal track, IC a single track.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::{Money, Ratio, TrancheId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CoverageKind {
    Oc,
    Ic,
}

impl std::fmt::Display for CoverageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CoverageKind::Oc => write!(f, "OC"),
            CoverageKind::Ic => write!(f, "IC"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerState {
    #[default]
    NotEvaluated,
    EvaluatedPass,
    EvaluatedFail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CureTrack {
    /// OC deficiency covered by retained interest.
    Interest,
    /// OC deficiency covered by principal paydown.
    Principal,
    /// The IC test's only track.
    Single,
}

/// Cure bookkeeping for one track in one period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CureTrackRow {
    pub track: CureTrack,
    /// Unpaid requirement carried from the previous period.
    pub prior_cure_outstanding: Money,
    /// Cure paid earlier in the current breach episode.
    pub prior_cure_paid_cumulative: Money,
    /// Required cure for this period.
    pub cure_amount_this_period: Money,
    /// Part of this period's requirement not explained by the carried amount.
    pub newly_arising_deficiency: Money,
    pub cure_paid_this_period: Money,
    pub cure_paid_cumulative: Money,
}

impl CureTrackRow {
    pub fn unpaid(&self) -> Money {
        (self.cure_amount_this_period - self.cure_paid_this_period).max(Money::ZERO)
    }
}

/// One OC or IC evaluation for a tranche tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageTrigger {
    pub deal_id: String,
    /// Junior-most tranche of the tier.
    pub tier: TrancheId,
    pub tier_seniority: u32,
    pub kind: CoverageKind,
    pub period: u32,
    pub payment_date: NaiveDate,
    pub numerator: Money,
    pub denominator: Money,
    pub ratio: Ratio,
    pub threshold: Ratio,
    pub state: TriggerState,
    /// Shortfall against the threshold; zero when passing.
    pub deficiency: Money,
    pub denominator_zero: bool,
    pub tracks: Vec<CureTrackRow>,
}

impl CoverageTrigger {
    pub fn passed(&self) -> bool {
        self.state == TriggerState::EvaluatedPass
    }

    pub fn failed(&self) -> bool {
        self.state == TriggerState::EvaluatedFail
    }

    pub fn track(&self, track: CureTrack) -> Option<&CureTrackRow> {
        self.tracks.iter().find(|t| t.track == track)
    }

    pub(crate) fn track_mut(&mut self, track: CureTrack) -> Option<&mut CureTrackRow> {
        self.tracks.iter_mut().find(|t| t.track == track)
    }

    pub fn required_cure(&self) -> Money {
        self.tracks.iter().map(|t| t.cure_amount_this_period).sum()
    }

    pub fn cure_paid(&self) -> Money {
        self.tracks.iter().map(|t| t.cure_paid_this_period).sum()
    }

    pub fn cure_paid_cumulative(&self) -> Money {
        self.tracks.iter().map(|t| t.cure_paid_cumulative).sum()
    }

    /// Required but not yet paid on `track`.
    pub fn outstanding(&self, track: CureTrack) -> Money {
        self.track(track).map(CureTrackRow::unpaid).unwrap_or(Decimal::ZERO)
    }
}
