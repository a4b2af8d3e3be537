pub mod cash_flow;
pub mod compliance;
pub mod coverage;
pub mod deal;
pub mod error;
pub mod store;
pub mod types;
pub mod waterfall;

#[cfg(feature = "runner")]
pub mod runner;

#[cfg(test)]
mod test_support;

pub use error::CloEngineError;
pub use types::*;

/// Standard result type for all CLO engine operations
pub type CloEngineResult<T> = Result<T, CloEngineError>;
