//! Compliance / concentration tests evaluated against the pool snapshot.

pub mod definition;
pub mod engine;
pub mod formulas;
pub mod library;

pub use definition::{
    ComparisonKind, ComplianceTest, DerivedStatistic, Formula, GroupField, TestCategory,
    EXACT_TOLERANCE,
};
pub use engine::{
    evaluate_compliance, evaluate_test, run_compliance, ComplianceInput, ComplianceRequest,
    ComplianceSummary, ComplianceTestResult,
};
pub use library::standard_test_library;
