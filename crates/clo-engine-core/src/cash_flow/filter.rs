//! Asset filter predicates as data.
//!
//! Filters are a small expression tree of `(field, operator, value)` predicates
//! combined with `all` / `any` / `not`, evaluated against an [`AssetPosition`].
//! Text comparisons ignore ASCII case.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::aggregator::AssetPosition;
use crate::deal::rating::{is_ccc_or_below, rating_factor};
use crate::error::CloEngineError;
use crate::CloEngineResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetField {
    Rating,
    Industry,
    Country,
    Obligor,
    Seniority,
    AssetType,
    CouponType,
    IsDefaulted,
    IsCcc,
    ParBalance,
    MarketValue,
    Price,
    Spread,
    CouponRate,
    RemainingLife,
    RatingFactor,
    RecoveryRate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Numeric,
    Flag,
}

impl AssetField {
    pub fn kind(&self) -> FieldKind {
        match self {
            AssetField::Rating
            | AssetField::Industry
            | AssetField::Country
            | AssetField::Obligor
            | AssetField::Seniority
            | AssetField::AssetType
            | AssetField::CouponType => FieldKind::Text,
            AssetField::IsDefaulted | AssetField::IsCcc => FieldKind::Flag,
            AssetField::ParBalance
            | AssetField::MarketValue
            | AssetField::Price
            | AssetField::Spread
            | AssetField::CouponRate
            | AssetField::RemainingLife
            | AssetField::RatingFactor
            | AssetField::RecoveryRate => FieldKind::Numeric,
        }
    }
}

/// Value of a field on one position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue<'a> {
    Text(&'a str),
    Number(Decimal),
    Flag(bool),
}

impl AssetPosition {
    pub fn field(&self, field: AssetField) -> FieldValue<'_> {
        let a = &self.asset;
        match field {
            AssetField::Rating => FieldValue::Text(&a.rating),
            AssetField::Industry => FieldValue::Text(&a.industry),
            AssetField::Country => FieldValue::Text(&a.country),
            AssetField::Obligor => FieldValue::Text(&a.obligor),
            AssetField::Seniority => FieldValue::Text(a.seniority.as_str()),
            AssetField::AssetType => FieldValue::Text(a.asset_type.as_str()),
            AssetField::CouponType => FieldValue::Text(a.coupon_type.as_str()),
            AssetField::IsDefaulted => FieldValue::Flag(a.is_defaulted),
            AssetField::IsCcc => FieldValue::Flag(is_ccc_or_below(&a.rating)),
            AssetField::ParBalance => FieldValue::Number(self.par_balance),
            AssetField::MarketValue => FieldValue::Number(self.market_value),
            AssetField::Price => FieldValue::Number(a.price),
            AssetField::Spread => FieldValue::Number(a.spread),
            AssetField::CouponRate => FieldValue::Number(a.coupon_rate),
            AssetField::RemainingLife => FieldValue::Number(self.remaining_life),
            AssetField::RatingFactor => FieldValue::Number(rating_factor(&a.rating)),
            AssetField::RecoveryRate => FieldValue::Number(a.recovery_rate),
        }
    }

    /// Numeric value of a field, `None` for text and flag fields.
    pub fn numeric(&self, field: AssetField) -> Option<Decimal> {
        match self.field(field) {
            FieldValue::Number(n) => Some(n),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    Eq,
    Ne,
    In,
    NotIn,
    Gt,
    Ge,
    Lt,
    Le,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterValue {
    Text(String),
    Set(Vec<String>),
    Number(Decimal),
    Flag(bool),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    pub field: AssetField,
    pub op: FilterOp,
    pub value: FilterValue,
}

impl Predicate {
    fn validate(&self) -> CloEngineResult<()> {
        let ok = match (self.field.kind(), self.op, &self.value) {
            (FieldKind::Text, FilterOp::Eq | FilterOp::Ne, FilterValue::Text(_)) => true,
            (FieldKind::Text, FilterOp::In | FilterOp::NotIn, FilterValue::Set(_)) => true,
            (FieldKind::Flag, FilterOp::Eq | FilterOp::Ne, FilterValue::Flag(_)) => true,
            (
                FieldKind::Numeric,
                FilterOp::Eq | FilterOp::Ne | FilterOp::Gt | FilterOp::Ge | FilterOp::Lt | FilterOp::Le,
                FilterValue::Number(_),
            ) => true,
            _ => false,
        };
        if ok {
            Ok(())
        } else {
            Err(CloEngineError::invalid(
                format!("filter.{:?}", self.field),
                format!("Operator {:?} cannot compare this field with {:?}.", self.op, self.value),
            ))
        }
    }

    fn matches(&self, position: &AssetPosition) -> bool {
        match (position.field(self.field), &self.value) {
            (FieldValue::Text(actual), FilterValue::Text(expected)) => {
                let eq = actual.eq_ignore_ascii_case(expected);
                match self.op {
                    FilterOp::Eq => eq,
                    FilterOp::Ne => !eq,
                    _ => false,
                }
            }
            (FieldValue::Text(actual), FilterValue::Set(set)) => {
                let found = set.iter().any(|s| actual.eq_ignore_ascii_case(s));
                match self.op {
                    FilterOp::In => found,
                    FilterOp::NotIn => !found,
                    _ => false,
                }
            }
            (FieldValue::Flag(actual), FilterValue::Flag(expected)) => match self.op {
                FilterOp::Eq => actual == *expected,
                FilterOp::Ne => actual != *expected,
                _ => false,
            },
            (FieldValue::Number(actual), FilterValue::Number(expected)) => match self.op {
                FilterOp::Eq => actual == *expected,
                FilterOp::Ne => actual != *expected,
                FilterOp::Gt => actual > *expected,
                FilterOp::Ge => actual >= *expected,
                FilterOp::Lt => actual < *expected,
                FilterOp::Le => actual <= *expected,
                _ => false,
            },
            _ => false,
        }
    }
}

/// Composable asset filter. `All(vec![])` matches every asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetFilter {
    All(Vec<AssetFilter>),
    Any(Vec<AssetFilter>),
    Not(Box<AssetFilter>),
    Predicate(Predicate),
}

impl Default for AssetFilter {
    fn default() -> Self {
        AssetFilter::everything()
    }
}

impl AssetFilter {
    pub fn everything() -> Self {
        AssetFilter::All(Vec::new())
    }

    pub fn text_eq(field: AssetField, value: &str) -> Self {
        Self::predicate(field, FilterOp::Eq, FilterValue::Text(value.to_string()))
    }

    pub fn text_ne(field: AssetField, value: &str) -> Self {
        Self::predicate(field, FilterOp::Ne, FilterValue::Text(value.to_string()))
    }

    pub fn text_in(field: AssetField, values: &[&str]) -> Self {
        Self::predicate(
            field,
            FilterOp::In,
            FilterValue::Set(values.iter().map(|v| v.to_string()).collect()),
        )
    }

    pub fn flag(field: AssetField, value: bool) -> Self {
        Self::predicate(field, FilterOp::Eq, FilterValue::Flag(value))
    }

    pub fn number(field: AssetField, op: FilterOp, value: Decimal) -> Self {
        Self::predicate(field, op, FilterValue::Number(value))
    }

    fn predicate(field: AssetField, op: FilterOp, value: FilterValue) -> Self {
        AssetFilter::Predicate(Predicate { field, op, value })
    }

    /// Conjunction of `self` and `other`, flattening nested `All`.
    pub fn and(self, other: AssetFilter) -> Self {
        match self {
            AssetFilter::All(mut parts) => {
                parts.push(other);
                AssetFilter::All(parts)
            }
            first => AssetFilter::All(vec![first, other]),
        }
    }

    pub fn validate(&self) -> CloEngineResult<()> {
        match self {
            AssetFilter::All(parts) | AssetFilter::Any(parts) => {
                parts.iter().try_for_each(AssetFilter::validate)
            }
            AssetFilter::Not(inner) => inner.validate(),
            AssetFilter::Predicate(p) => p.validate(),
        }
    }

    pub fn matches(&self, position: &AssetPosition) -> bool {
        match self {
            AssetFilter::All(parts) => parts.iter().all(|f| f.matches(position)),
            AssetFilter::Any(parts) => parts.iter().any(|f| f.matches(position)),
            AssetFilter::Not(inner) => !inner.matches(position),
            AssetFilter::Predicate(p) => p.matches(position),
        }
    }
}
