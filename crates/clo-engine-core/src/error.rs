use chrono::NaiveDate;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::waterfall::execution::WaterfallExecution;

#[derive(Debug, Error)]
pub enum CloEngineError {
    #[error("Invalid input for {field}: {reason}")]
    InvalidInput { field: String, reason: String },

    #[error("Incomplete data for deal {deal_id}, period {period}: {detail}")]
    IncompleteData {
        deal_id: String,
        period: u32,
        detail: String,
    },

    #[error("Configuration error for deal {deal_id}: {detail}")]
    ConfigurationError { deal_id: String, detail: String },

    #[error(
        "Negative cash invariant violated for deal {deal_id} on {payment_date} at step '{step}' \
         (remaining cash would be {remaining_cash})"
    )]
    NegativeCashInvariantViolation {
        deal_id: String,
        payment_date: NaiveDate,
        step: String,
        remaining_cash: Decimal,
        /// Execution record up to and including the failing step.
        partial: Box<WaterfallExecution>,
    },

    #[error("Invariant violation: {context}")]
    InvariantViolation { context: String },

    #[error("Execution for deal {deal_id} on {payment_date} failed its checks: {context}")]
    ExecutionInvariantViolation {
        deal_id: String,
        payment_date: NaiveDate,
        context: String,
        /// Fully applied execution, marked failed.
        partial: Box<WaterfallExecution>,
    },

    #[error("Execution for deal {deal_id} on {payment_date} is already completed")]
    ExecutionAlreadyCompleted {
        deal_id: String,
        payment_date: NaiveDate,
    },

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl CloEngineError {
    /// True for errors caused by upstream data or configuration, which a caller can
    /// retry once the inputs are fixed. Invariant breaches are logic faults.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CloEngineError::IncompleteData { .. }
                | CloEngineError::ConfigurationError { .. }
                | CloEngineError::InvalidInput { .. }
                | CloEngineError::InsufficientData(_)
        )
    }

    /// The partial execution record carried by a waterfall invariant breach.
    pub fn partial_execution(&self) -> Option<&WaterfallExecution> {
        match self {
            CloEngineError::NegativeCashInvariantViolation { partial, .. }
            | CloEngineError::ExecutionInvariantViolation { partial, .. } => Some(partial),
            _ => None,
        }
    }

    pub(crate) fn config(deal_id: &str, detail: impl Into<String>) -> Self {
        CloEngineError::ConfigurationError {
            deal_id: deal_id.to_string(),
            detail: detail.into(),
        }
    }

    pub(crate) fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        CloEngineError::InvalidInput {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for CloEngineError {
    fn from(e: serde_json::Error) -> Self {
        CloEngineError::SerializationError(e.to_string())
    }
}
