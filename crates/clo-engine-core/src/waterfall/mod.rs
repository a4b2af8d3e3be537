//! Payment-date waterfall: versioned step configurations and the cash-application loop.

pub mod config;
pub mod context;
pub mod engine;
pub mod execution;

pub use config::{
    resolve_configuration, CureDestination, FeeBasis, PaymentStep, PrincipalAmount, PriorityClass, StepKind,
    WaterfallConfiguration,
};
pub use engine::{estimate_senior_expenses, execute_waterfall, run_waterfall, WaterfallInput, WaterfallRequest};
pub use execution::{
    ExecutionStatus, ExecutionTotals, PaymentAllocation, PaymentRecord, StepNote, TrancheBalance, WaterfallExecution,
};
