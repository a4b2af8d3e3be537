//! Versioned, effective-dated waterfall configurations.
//!
//! A configuration is an ordered list of [`PaymentStep`]s. Each step carries a tagged
//! [`StepKind`] holding only the fields that kind needs; new deal variants are new
//! configurations, not new code paths. Configurations are validated against the
//! capital structure before any cash is applied.

use std::collections::HashSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::coverage::trigger::{CoverageKind, CureTrack};
use crate::deal::account::AccountKind;
use crate::deal::tranche::Tranche;
use crate::error::CloEngineError;
use crate::types::{Money, Rate, TrancheId};
use crate::CloEngineResult;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityClass {
    Fees,
    SeniorInterest,
    CoverageCure,
    SubordinateInterest,
    Principal,
    Residual,
}

/// How a fee step's amount is determined. Rates accrue Actual/360 over the period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeeBasis {
    Fixed { amount: Money },
    RateOnCollateralPar { rate: Rate },
    RateOnTrancheBalance { tranche: TrancheId, rate: Rate },
}

/// Where cure cash goes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CureDestination {
    /// Pay down the listed tranches in seniority order. Empty means every non-equity
    /// tranche at or senior to the tier.
    SequentialPaydown {
        #[serde(default)]
        tranches: Vec<TrancheId>,
    },
    /// Deposit into an account (e.g. principal account for reinvestment).
    Account { account: AccountKind },
}

impl Default for CureDestination {
    fn default() -> Self {
        CureDestination::SequentialPaydown { tranches: Vec::new() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PrincipalAmount {
    /// The period's principal proceeds.
    PrincipalProceeds,
    Fixed { amount: Money },
    /// Whatever is outstanding on the targeted tranches.
    Outstanding,
}

fn payable() -> AccountKind {
    AccountKind::Payable
}

fn principal_reserve() -> AccountKind {
    AccountKind::PrincipalReserve
}

/// The rule a step applies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepKind {
    Fee {
        basis: FeeBasis,
        #[serde(default = "payable")]
        account: AccountKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cap: Option<Money>,
    },
    /// Current-period interest on the listed tranches, paid in seniority order.
    Interest { tranches: Vec<TrancheId> },
    /// Repays previously deferred (PIK) interest.
    DeferredInterest { tranche: TrancheId },
    CoverageCure {
        tier: TrancheId,
        test: CoverageKind,
        track: CureTrack,
        #[serde(default)]
        destination: CureDestination,
    },
    Principal {
        tranches: Vec<TrancheId>,
        amount: PrincipalAmount,
    },
    /// Tops an account up to a target balance.
    ReserveDeposit { account: AccountKind, target_balance: Money },
    /// Retains principal proceeds for asset purchases while the deal may reinvest.
    Reinvestment {
        #[serde(default = "principal_reserve")]
        account: AccountKind,
        /// Skipped when more compliance tests than this are failing.
        #[serde(default)]
        max_compliance_failures: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        amount: Option<Money>,
    },
    /// Share of cash above `hurdle` paid to the manager.
    IncentiveFee {
        rate: Rate,
        hurdle: Money,
        #[serde(default = "payable")]
        account: AccountKind,
    },
    /// Everything left, to the equity tranche.
    Residual { tranche: TrancheId },
}

impl StepKind {
    pub fn label(&self) -> &'static str {
        match self {
            StepKind::Fee { .. } => "fee",
            StepKind::Interest { .. } => "interest",
            StepKind::DeferredInterest { .. } => "deferred_interest",
            StepKind::CoverageCure { .. } => "coverage_cure",
            StepKind::Principal { .. } => "principal",
            StepKind::ReserveDeposit { .. } => "reserve_deposit",
            StepKind::Reinvestment { .. } => "reinvestment",
            StepKind::IncentiveFee { .. } => "incentive_fee",
            StepKind::Residual { .. } => "residual",
        }
    }

    fn allows(&self, class: PriorityClass) -> bool {
        use PriorityClass::*;
        match self {
            StepKind::Fee { .. } => class == Fees,
            StepKind::Interest { .. } | StepKind::DeferredInterest { .. } => {
                matches!(class, SeniorInterest | SubordinateInterest)
            }
            StepKind::CoverageCure { .. } => class == CoverageCure,
            StepKind::Principal { .. } | StepKind::Reinvestment { .. } => class == Principal,
            StepKind::ReserveDeposit { .. } => {
                matches!(class, Fees | SeniorInterest | SubordinateInterest | Principal)
            }
            StepKind::IncentiveFee { .. } => matches!(class, Fees | Residual),
            StepKind::Residual { .. } => class == Residual,
        }
    }

    fn tranche_refs(&self) -> Vec<&str> {
        match self {
            StepKind::Fee {
                basis: FeeBasis::RateOnTrancheBalance { tranche, .. },
                ..
            } => vec![tranche.as_str()],
            StepKind::Interest { tranches } | StepKind::Principal { tranches, .. } => {
                tranches.iter().map(String::as_str).collect()
            }
            StepKind::DeferredInterest { tranche } | StepKind::Residual { tranche } => vec![tranche.as_str()],
            StepKind::CoverageCure {
                tier,
                destination: CureDestination::SequentialPaydown { tranches },
                ..
            } => std::iter::once(tier.as_str())
                .chain(tranches.iter().map(String::as_str))
                .collect(),
            StepKind::CoverageCure { tier, .. } => vec![tier.as_str()],
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentStep {
    pub name: String,
    pub step_sequence: u32,
    pub priority_class: PriorityClass,
    #[serde(flatten)]
    pub kind: StepKind,
    /// Shortfalls defer into the tranche's PIK balance instead of being recorded.
    #[serde(default)]
    pub is_deferrable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaterfallConfiguration {
    pub deal_id: String,
    pub version: u32,
    pub effective_date: NaiveDate,
    pub steps: Vec<PaymentStep>,
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// The configuration in force on `payment_date`: latest `effective_date` on or before
/// it, highest version on ties.
pub fn resolve_configuration<'a>(
    configurations: &'a [WaterfallConfiguration],
    deal_id: &str,
    payment_date: NaiveDate,
) -> CloEngineResult<&'a WaterfallConfiguration> {
    configurations
        .iter()
        .filter(|c| c.deal_id == deal_id && c.effective_date <= payment_date)
        .max_by_key(|c| (c.effective_date, c.version))
        .ok_or_else(|| {
            CloEngineError::config(
                deal_id,
                format!("no waterfall configuration effective on {}", payment_date),
            )
        })
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl WaterfallConfiguration {
    /// Steps in ascending `step_sequence` order.
    pub fn ordered_steps(&self) -> Vec<&PaymentStep> {
        let mut steps: Vec<&PaymentStep> = self.steps.iter().collect();
        steps.sort_by_key(|s| s.step_sequence);
        steps
    }

    /// Pre-pass check against the capital structure. Nothing is paid if this fails.
    pub fn validate(&self, tranches: &[Tranche]) -> CloEngineResult<()> {
        let deal = self.deal_id.as_str();
        let err = |detail: String| CloEngineError::config(deal, format!("version {}: {}", self.version, detail));

        if self.steps.is_empty() {
            return Err(err("configuration has no steps".into()));
        }

        let mut sequences = HashSet::new();
        let mut names = HashSet::new();
        for s in &self.steps {
            if !sequences.insert(s.step_sequence) {
                return Err(err(format!("duplicate step_sequence {}", s.step_sequence)));
            }
            if !names.insert(s.name.as_str()) {
                return Err(err(format!("duplicate step name '{}'", s.name)));
            }
        }

        let find = |id: &str| tranches.iter().find(|t| t.id == id);
        let ordered = self.ordered_steps();
        let last = ordered.len() - 1;

        for (i, step) in ordered.iter().enumerate() {
            let at = |detail: String| err(format!("step '{}' ({}): {}", step.name, step.step_sequence, detail));

            if !step.kind.allows(step.priority_class) {
                return Err(at(format!(
                    "{} step cannot have priority class {:?}",
                    step.kind.label(),
                    step.priority_class
                )));
            }
            for id in step.kind.tranche_refs() {
                if find(id).is_none() {
                    return Err(at(format!("references unknown tranche '{}'", id)));
                }
            }

            match &step.kind {
                StepKind::Residual { tranche } => {
                    if i != last {
                        return Err(at("residual must be the final step".into()));
                    }
                    if find(tranche).is_some_and(|t| !t.is_equity) {
                        return Err(at(format!("residual tranche '{}' is not equity", tranche)));
                    }
                }
                StepKind::Interest { tranches: ids } | StepKind::Principal { tranches: ids, .. } => {
                    if ids.is_empty() {
                        return Err(at("no target tranches".into()));
                    }
                }
                StepKind::CoverageCure { tier, test, track, .. } => {
                    let t = find(tier).ok_or_else(|| at(format!("unknown tier '{}'", tier)))?;
                    let threshold = match test {
                        CoverageKind::Oc => t.oc_threshold,
                        CoverageKind::Ic => t.ic_threshold,
                    };
                    if threshold.is_none() {
                        return Err(at(format!("tier '{}' has no {} threshold", tier, test)));
                    }
                    let valid_track = match test {
                        CoverageKind::Oc => matches!(track, CureTrack::Interest | CureTrack::Principal),
                        CoverageKind::Ic => *track == CureTrack::Single,
                    };
                    if !valid_track {
                        return Err(at(format!("{} test has no {:?} cure track", test, track)));
                    }
                }
                StepKind::Fee { cap: Some(cap), .. } if *cap < Money::ZERO => {
                    return Err(at("fee cap cannot be negative".into()));
                }
                StepKind::IncentiveFee { rate, .. } if *rate < Rate::ZERO || *rate > Rate::ONE => {
                    return Err(at("incentive fee rate must be between 0 and 1".into()));
                }
                _ => {}
            }

            if step.is_deferrable {
                let deferrable = match &step.kind {
                    StepKind::Interest { tranches: ids } => ids
                        .iter()
                        .all(|id| find(id).is_some_and(|t| t.is_deferrable)),
                    _ => false,
                };
                if !deferrable {
                    return Err(at("only interest on deferrable tranches may defer".into()));
                }
            }
        }

        if !matches!(ordered[last].kind, StepKind::Residual { .. }) {
            return Err(err("final step must be residual".into()));
        }
        Ok(())
    }
}
