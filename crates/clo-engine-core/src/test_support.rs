//! Shared fixtures for unit tests.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::cash_flow::aggregator::{AssetPosition, AssetSnapshot};
use crate::deal::asset::{Asset, AssetType, CashFlowPeriod, CouponType, Seniority};
use crate::deal::structure::{Deal, DealStatus, PaymentFrequency};
use crate::deal::tranche::{CouponTerms, DayCount, Tranche};

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn sample_deal() -> Deal {
    Deal {
        id: "CLO-1".into(),
        name: "Sample CLO 2023-1".into(),
        closing_date: date(2023, 1, 15),
        reinvestment_end_date: date(2027, 1, 15),
        maturity_date: date(2035, 1, 15),
        target_par: dec!(10_000_000),
        payment_frequency: PaymentFrequency::Quarterly,
        status: DealStatus::Active,
    }
}

pub fn sample_asset(id: &str, obligor: &str, industry: &str, rating: &str) -> Asset {
    Asset {
        id: id.into(),
        obligor: obligor.into(),
        industry: industry.into(),
        country: "US".into(),
        rating: rating.into(),
        seniority: Seniority::SeniorSecured,
        asset_type: AssetType::Loan,
        coupon_type: CouponType::Floating,
        coupon_rate: dec!(0.09),
        spread: dec!(0.0375),
        maturity_date: date(2029, 1, 15),
        price: dec!(0.98),
        recovery_rate: dec!(0.45),
        is_defaulted: false,
    }
}

pub fn sample_flow(asset_id: &str, period: u32, balance: Decimal, interest: Decimal) -> CashFlowPeriod {
    CashFlowPeriod {
        asset_id: asset_id.into(),
        period,
        beginning_balance: balance,
        ending_balance: balance,
        interest,
        scheduled_principal: Decimal::ZERO,
        unscheduled_principal: Decimal::ZERO,
        default_amount: Decimal::ZERO,
        recoveries: Decimal::ZERO,
        purchases: Decimal::ZERO,
        sales: Decimal::ZERO,
    }
}

pub fn sample_position(asset: Asset, par: Decimal) -> AssetPosition {
    let cash_flow = sample_flow(&asset.id, 1, par, Decimal::ZERO);
    AssetPosition {
        market_value: par * asset.price,
        remaining_life: asset.remaining_life(date(2024, 1, 15)),
        par_balance: par,
        asset,
        cash_flow,
    }
}

/// Four loans, 10mm par: one CCC, one non-US, one second lien.
pub fn sample_snapshot() -> AssetSnapshot {
    let mut ccc = sample_asset("L2", "Beta", "Retail", "Caa1");
    ccc.price = dec!(0.70);
    let mut non_us = sample_asset("L3", "Gamma", "Healthcare", "B1");
    non_us.country = "DE".into();
    let mut lien = sample_asset("L4", "Delta", "Software", "B3");
    lien.seniority = Seniority::SecondLien;
    AssetSnapshot {
        as_of: Some(date(2024, 1, 15)),
        positions: vec![
            sample_position(sample_asset("L1", "Alpha", "Software", "B2"), dec!(4_000_000)),
            sample_position(ccc, dec!(1_000_000)),
            sample_position(non_us, dec!(3_000_000)),
            sample_position(lien, dec!(2_000_000)),
        ],
    }
}

pub fn sample_tranche(id: &str, seniority: u32, balance: Decimal, spread: Decimal) -> Tranche {
    Tranche {
        id: id.into(),
        seniority_level: seniority,
        current_balance: balance,
        deferred_balance: Decimal::ZERO,
        coupon: CouponTerms::Floating { spread },
        day_count: DayCount::Actual360,
        is_deferrable: false,
        is_equity: false,
        oc_threshold: None,
        ic_threshold: None,
    }
}

/// Class A (senior, OC 1.20 / IC 1.20), Class B (deferrable, OC 1.10), Sub (equity).
pub fn sample_tranches() -> Vec<Tranche> {
    let mut a = sample_tranche("A", 1, dec!(6_000_000), dec!(0.015));
    a.oc_threshold = Some(dec!(1.20));
    a.ic_threshold = Some(dec!(1.20));
    let mut b = sample_tranche("B", 2, dec!(2_000_000), dec!(0.03));
    b.is_deferrable = true;
    b.oc_threshold = Some(dec!(1.10));
    let mut sub = sample_tranche("Sub", 3, dec!(2_000_000), Decimal::ZERO);
    sub.is_equity = true;
    vec![a, b, sub]
}
