use std::collections::HashMap;

use chrono::{Months, NaiveDate};
use clo_engine_core::cash_flow::{AssetField, AssetFilter, CashFlowAggregator};
use clo_engine_core::compliance::{
    run_compliance, ComparisonKind, ComplianceInput, ComplianceTest, Formula, TestCategory,
};
use clo_engine_core::coverage::{CoverageConventions, CoverageKind, CoverageTrigger, CureTrack};
use clo_engine_core::deal::{
    AccountKind, Asset, AssetType, CashFlowPeriod, CouponTerms, CouponType, DayCount, Deal, DealStatus,
    PaymentFrequency, Seniority, Tranche,
};
use clo_engine_core::runner::{run_payment_date, PeriodOutcome, PeriodRequest, RunMode};
use clo_engine_core::store::MemoryStore;
use clo_engine_core::waterfall::{
    CureDestination, FeeBasis, PaymentStep, PrincipalAmount, PriorityClass, StepKind, WaterfallConfiguration,
};
use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn loan(id: &str, industry: &str, rating: &str) -> Asset {
    Asset {
        id: id.into(),
        obligor: format!("{} Obligor", id),
        industry: industry.into(),
        country: "US".into(),
        rating: rating.into(),
        seniority: Seniority::SeniorSecured,
        asset_type: AssetType::Loan,
        coupon_type: CouponType::Floating,
        coupon_rate: dec!(0.085),
        spread: dec!(0.035),
        maturity_date: date(2030, 7, 15),
        price: dec!(0.97),
        recovery_rate: dec!(0.45),
        is_defaulted: false,
    }
}

fn flow(asset_id: &str, par: Decimal, interest: Decimal, principal: Decimal) -> CashFlowPeriod {
    CashFlowPeriod {
        asset_id: asset_id.into(),
        period: 1,
        beginning_balance: par + principal,
        ending_balance: par,
        interest,
        scheduled_principal: principal,
        unscheduled_principal: Decimal::ZERO,
        default_amount: Decimal::ZERO,
        recoveries: Decimal::ZERO,
        purchases: Decimal::ZERO,
        sales: Decimal::ZERO,
    }
}

fn tranches() -> Vec<Tranche> {
    let tranche = |id: &str, seniority: u32, balance: Decimal, spread: Decimal| Tranche {
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
    };
    let mut a = tranche("A", 1, dec!(6_000_000), dec!(0.014));
    a.oc_threshold = Some(dec!(1.25));
    a.ic_threshold = Some(dec!(1.20));
    let mut b = tranche("B", 2, dec!(1_500_000), dec!(0.035));
    b.is_deferrable = true;
    b.oc_threshold = Some(dec!(1.10));
    let mut sub = tranche("Sub", 3, dec!(1_000_000), Decimal::ZERO);
    sub.is_equity = true;
    vec![a, b, sub]
}

fn configuration(fee: Decimal) -> WaterfallConfiguration {
    let step = |seq: u32, name: &str, class: PriorityClass, kind: StepKind| PaymentStep {
        name: name.into(),
        step_sequence: seq,
        priority_class: class,
        kind,
        is_deferrable: false,
    };
    WaterfallConfiguration {
        deal_id: "CLO-P".into(),
        version: 1,
        effective_date: date(2024, 1, 1),
        steps: vec![
            step(
                1,
                "Trustee fee",
                PriorityClass::Fees,
                StepKind::Fee {
                    basis: FeeBasis::Fixed { amount: fee },
                    account: AccountKind::Payable,
                    cap: None,
                },
            ),
            step(
                2,
                "Class A interest",
                PriorityClass::SeniorInterest,
                StepKind::Interest {
                    tranches: vec!["A".into()],
                },
            ),
            step(
                3,
                "Class A OC cure",
                PriorityClass::CoverageCure,
                StepKind::CoverageCure {
                    tier: "A".into(),
                    test: CoverageKind::Oc,
                    track: CureTrack::Interest,
                    destination: CureDestination::default(),
                },
            ),
            PaymentStep {
                is_deferrable: true,
                ..step(
                    4,
                    "Class B interest",
                    PriorityClass::SubordinateInterest,
                    StepKind::Interest {
                        tranches: vec!["B".into()],
                    },
                )
            },
            step(
                5,
                "Principal",
                PriorityClass::Principal,
                StepKind::Principal {
                    tranches: vec!["A".into(), "B".into()],
                    amount: PrincipalAmount::PrincipalProceeds,
                },
            ),
            step(
                6,
                "Residual",
                PriorityClass::Residual,
                StepKind::Residual { tranche: "Sub".into() },
            ),
        ],
    }
}

fn request(pars: [u64; 3], interest: [u64; 3], principal: u64, fee: u64) -> PeriodRequest {
    let ids = ["L1", "L2", "L3"];
    let industries = ["Software", "Retail", "Chemicals"];
    let ratings = ["B1", "B3", "Caa2"];
    let positions: Vec<Asset> = (0..3).map(|i| loan(ids[i], industries[i], ratings[i])).collect();
    let cash_flows = (0..3)
        .map(|i| {
            let p = if i == 0 { Decimal::from(principal) } else { Decimal::ZERO };
            flow(ids[i], Decimal::from(pars[i]), Decimal::from(interest[i]), p)
        })
        .collect();
    PeriodRequest {
        deal: Deal {
            id: "CLO-P".into(),
            name: "Property CLO".into(),
            closing_date: date(2024, 1, 15),
            reinvestment_end_date: date(2026, 1, 15),
            maturity_date: date(2036, 1, 15),
            target_par: dec!(9_000_000),
            payment_frequency: PaymentFrequency::Quarterly,
            status: DealStatus::Active,
        },
        period: 1,
        payment_date: date(2024, 4, 15),
        accrual_start: None,
        reference_rate: dec!(0.053),
        tranches: tranches(),
        positions,
        cash_flows,
        configurations: vec![configuration(Decimal::from(fee))],
        compliance_tests: None,
        conventions: CoverageConventions::default(),
        accounts: Vec::new(),
        available_interest_override: None,
        mode: RunMode::RejectIfCompleted,
    }
}

fn run(req: &PeriodRequest) -> PeriodOutcome {
    run_payment_date(&mut MemoryStore::new(), &CashFlowAggregator::new(), req).unwrap()
}

/// Period `period` of the same deal, starting from the tranche state left by the previous run.
fn next_period(tranches: Vec<Tranche>, period: u32, pars: [u64; 3], interest: [u64; 3], fee: u64) -> PeriodRequest {
    let mut req = request(pars, interest, 0, fee);
    req.period = period;
    req.payment_date = date(2024, 4, 15)
        .checked_add_months(Months::new(3 * (period - 1)))
        .unwrap();
    for cf in &mut req.cash_flows {
        cf.period = period;
    }
    req.tranches = tranches;
    req
}

fn par_strategy() -> impl Strategy<Value = [u64; 3]> {
    [1_000_000u64..5_000_000, 500_000u64..3_000_000, 100_000u64..1_500_000]
}

fn interest_strategy() -> impl Strategy<Value = [u64; 3]> {
    [0u64..150_000, 0u64..100_000, 0u64..50_000]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_cash_is_conserved(
        pars in par_strategy(),
        interest in interest_strategy(),
        principal in 0u64..500_000,
        fee in 0u64..100_000,
    ) {
        let out = run(&request(pars, interest, principal, fee));
        let ex = &out.execution;
        prop_assert!(ex.check_conservation().is_ok());
        prop_assert!(ex.remaining_cash >= Decimal::ZERO);
        let paid: Decimal = ex.records.iter().map(|r| r.amount_paid).sum();
        prop_assert_eq!(paid + ex.remaining_cash, ex.total_available);
        for r in &ex.records {
            prop_assert!(r.remaining_cash >= Decimal::ZERO);
            prop_assert!(r.amount_paid <= r.amount_due);
            prop_assert_eq!(r.amount_paid + r.amount_deferred + r.shortfall, r.amount_due);
        }
    }

    #[test]
    fn prop_deferral_moves_unpaid_interest_to_deferred_balance(
        pars in par_strategy(),
        interest in interest_strategy(),
        fee in 0u64..100_000,
    ) {
        let out = run(&request(pars, interest, 0, fee));
        let ex = &out.execution;
        let step = ex.record("Class B interest").unwrap();
        prop_assert_eq!(step.shortfall, Decimal::ZERO);
        let b = ex.tranche("B").unwrap();
        prop_assert_eq!(b.ending_deferred - b.beginning_deferred, step.amount_deferred);
        if step.amount_deferred > Decimal::ZERO {
            prop_assert_eq!(step.remaining_cash, Decimal::ZERO);
        }
    }

    #[test]
    fn prop_unpaid_cure_carries_into_next_period(
        periods in prop::collection::vec((par_strategy(), interest_strategy(), 0u64..100_000), 2..6),
    ) {
        let mut store = MemoryStore::new();
        let aggregator = CashFlowAggregator::new();
        let mut tranches = tranches();
        let mut previous: HashMap<(String, CoverageKind), CoverageTrigger> = HashMap::new();

        for (i, (pars, interest, fee)) in periods.into_iter().enumerate() {
            let req = next_period(tranches.clone(), i as u32 + 1, pars, interest, fee);
            let out = run_payment_date(&mut store, &aggregator, &req).unwrap();
            let ex = &out.execution;
            prop_assert!(!ex.coverage_snapshot.is_empty());

            for row in &ex.coverage_snapshot {
                prop_assert!(row.cure_paid() <= row.required_cure());
                let prior = previous.get(&(row.tier.clone(), row.kind));
                for track in &row.tracks {
                    prop_assert!(track.prior_cure_outstanding >= Decimal::ZERO);
                    prop_assert!(track.cure_paid_this_period <= track.cure_amount_this_period);
                    let expected = prior
                        .and_then(|p| p.track(track.track))
                        .map(|t| t.cure_amount_this_period - t.cure_paid_this_period)
                        .unwrap_or(Decimal::ZERO);
                    prop_assert_eq!(track.prior_cure_outstanding, expected);
                }
            }

            previous = ex
                .coverage_snapshot
                .iter()
                .map(|row| ((row.tier.clone(), row.kind), row.clone()))
                .collect();
            tranches = ex.next_tranches(&tranches);
        }
    }

    #[test]
    fn prop_runs_are_repeatable(
        pars in par_strategy(),
        interest in interest_strategy(),
        principal in 0u64..500_000,
    ) {
        let req = request(pars, interest, principal, 25_000);
        let first = serde_json::to_value(&run(&req)).unwrap();
        let second = serde_json::to_value(&run(&req)).unwrap();
        prop_assert_eq!(first, second);
    }

    #[test]
    fn prop_max_test_passes_iff_within_threshold(
        pars in par_strategy(),
        threshold_bps in 0u32..10_000,
    ) {
        let req = request(pars, [1, 1, 1], 0, 0);
        let threshold = Decimal::new(i64::from(threshold_bps), 4);
        let test = ComplianceTest {
            name: "Max CCC".into(),
            category: TestCategory::CollateralQuality,
            filter: AssetFilter::text_in(AssetField::Rating, &["Caa1", "Caa2", "Caa3", "Ca", "C"]),
            formula: Formula::ParPercentage { denominator_filter: None },
            threshold_value: threshold,
            comparison: ComparisonKind::Max,
            active: true,
        };
        let out = run_compliance(&ComplianceInput {
            deal_id: req.deal.id.clone(),
            period: 1,
            as_of: req.payment_date,
            positions: req.positions.clone(),
            cash_flows: req.cash_flows.clone(),
            tests: Some(vec![test]),
        })
        .unwrap();
        let r = &out.result.results[0];
        prop_assert_eq!(r.pass_fail, r.calculated_value <= threshold);
        prop_assert_eq!(r.pass_fail, r.margin >= Decimal::ZERO);
        prop_assert_eq!(r.numerator, Decimal::from(pars[2]));
    }
}
