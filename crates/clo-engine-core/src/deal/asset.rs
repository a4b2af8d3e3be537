//! Collateral assets and their per-period cash flows.
//!
//! `Asset` holds the static terms of a pool position; `CashFlowPeriod` is the
//! projection supplied by the amortization engine for one asset and one period.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::CloEngineError;
use crate::types::{Money, Rate};
use crate::CloEngineResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Seniority {
    SeniorSecured,
    SecondLien,
    SeniorUnsecured,
    Subordinated,
}

impl Seniority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Seniority::SeniorSecured => "SeniorSecured",
            Seniority::SecondLien => "SecondLien",
            Seniority::SeniorUnsecured => "SeniorUnsecured",
            Seniority::Subordinated => "Subordinated",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssetType {
    Loan,
    Bond,
}

impl AssetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetType::Loan => "Loan",
            AssetType::Bond => "Bond",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CouponType {
    #[default]
    Floating,
    Fixed,
}

impl CouponType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CouponType::Floating => "Floating",
            CouponType::Fixed => "Fixed",
        }
    }
}

fn default_price() -> Decimal {
    Decimal::ONE
}

fn default_recovery_rate() -> Rate {
    dec!(0.45)
}

/// Static terms of a pool position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub id: String,
    pub obligor: String,
    pub industry: String,
    pub country: String,
    pub rating: String,
    pub seniority: Seniority,
    pub asset_type: AssetType,
    #[serde(default)]
    pub coupon_type: CouponType,
    /// All-in coupon for fixed assets, current all-in rate for floaters.
    pub coupon_rate: Rate,
    /// Spread over the reference rate (zero for fixed assets).
    #[serde(default)]
    pub spread: Rate,
    pub maturity_date: NaiveDate,
    /// Market price as a fraction of par (0.985 = 98.5).
    #[serde(default = "default_price")]
    pub price: Decimal,
    #[serde(default = "default_recovery_rate")]
    pub recovery_rate: Rate,
    #[serde(default)]
    pub is_defaulted: bool,
}

impl Asset {
    /// Remaining life in years (Actual/365), floored at zero.
    pub fn remaining_life(&self, as_of: NaiveDate) -> Decimal {
        if self.maturity_date <= as_of {
            return Decimal::ZERO;
        }
        Decimal::from((self.maturity_date - as_of).num_days()) / dec!(365)
    }

    pub fn validate(&self) -> CloEngineResult<()> {
        if self.id.trim().is_empty() {
            return Err(CloEngineError::invalid("asset.id", "Asset id cannot be empty."));
        }
        if self.price < Decimal::ZERO {
            return Err(CloEngineError::invalid(
                format!("asset.{}.price", self.id),
                "Price cannot be negative.",
            ));
        }
        if self.recovery_rate < Decimal::ZERO || self.recovery_rate > Decimal::ONE {
            return Err(CloEngineError::invalid(
                format!("asset.{}.recovery_rate", self.id),
                "Recovery rate must be in [0, 1].",
            ));
        }
        Ok(())
    }
}

/// One asset's cash flows for one period. Immutable once the period is closed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CashFlowPeriod {
    pub asset_id: String,
    pub period: u32,
    pub beginning_balance: Money,
    pub ending_balance: Money,
    #[serde(default)]
    pub interest: Money,
    #[serde(default)]
    pub scheduled_principal: Money,
    #[serde(default)]
    pub unscheduled_principal: Money,
    #[serde(default)]
    pub default_amount: Money,
    #[serde(default)]
    pub recoveries: Money,
    #[serde(default)]
    pub purchases: Money,
    #[serde(default)]
    pub sales: Money,
}

impl CashFlowPeriod {
    pub fn validate(&self) -> CloEngineResult<()> {
        let fields = [
            ("beginning_balance", self.beginning_balance),
            ("ending_balance", self.ending_balance),
            ("interest", self.interest),
            ("scheduled_principal", self.scheduled_principal),
            ("unscheduled_principal", self.unscheduled_principal),
            ("default_amount", self.default_amount),
            ("recoveries", self.recoveries),
            ("purchases", self.purchases),
            ("sales", self.sales),
        ];
        for (name, value) in fields {
            if value < Money::ZERO {
                return Err(CloEngineError::invalid(
                    format!("cash_flow.{}.{}.{}", self.asset_id, self.period, name),
                    "Cash flow amounts cannot be negative.",
                ));
            }
        }
        Ok(())
    }

    /// Difference between the reported ending balance and the balance implied by the
    /// period's flows. Zero for an internally consistent projection.
    pub fn balance_roll_difference(&self) -> Money {
        let implied = self.beginning_balance - self.scheduled_principal
            - self.unscheduled_principal
            - self.default_amount
            - self.sales
            + self.purchases;
        self.ending_balance - implied
    }

    /// Cash received as principal: amortization, prepayments, recoveries and sale proceeds.
    pub fn principal_proceeds(&self) -> Money {
        self.scheduled_principal + self.unscheduled_principal + self.recoveries + self.sales
    }
}
