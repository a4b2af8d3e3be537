use napi::Result as NapiResult;
use napi_derive::napi;

use clo_engine_core::cash_flow::{run_aggregation, AggregationInput, CashFlowAggregator};
use clo_engine_core::compliance::{run_compliance, standard_test_library, ComplianceInput};
use clo_engine_core::coverage::{run_coverage, CoverageInput, CoverageTrigger};
use clo_engine_core::deal::Tranche;
use clo_engine_core::runner::{run_payment_date, PeriodRequest};
use clo_engine_core::store::{ExecutionStore, MemoryStore};
use clo_engine_core::waterfall::{run_waterfall, WaterfallConfiguration, WaterfallInput};

/// Convert any Display error into a napi::Error.
fn to_napi_error(e: impl std::fmt::Display) -> napi::Error {
    napi::Error::from_reason(e.to_string())
}

// ---------------------------------------------------------------------------
// Aggregation and compliance
// ---------------------------------------------------------------------------

#[napi]
pub fn aggregate_pool(input_json: String) -> NapiResult<String> {
    let input: AggregationInput = serde_json::from_str(&input_json).map_err(to_napi_error)?;
    let output = run_aggregation(&input).map_err(to_napi_error)?;
    serde_json::to_string(&output).map_err(to_napi_error)
}

#[napi]
pub fn compliance_tests(input_json: String) -> NapiResult<String> {
    let input: ComplianceInput = serde_json::from_str(&input_json).map_err(to_napi_error)?;
    let output = run_compliance(&input).map_err(to_napi_error)?;
    serde_json::to_string(&output).map_err(to_napi_error)
}

#[napi]
pub fn standard_compliance_tests() -> NapiResult<String> {
    serde_json::to_string(&standard_test_library()).map_err(to_napi_error)
}

// ---------------------------------------------------------------------------
// Coverage
// ---------------------------------------------------------------------------

#[napi]
pub fn coverage_tests(input_json: String) -> NapiResult<String> {
    let input: CoverageInput = serde_json::from_str(&input_json).map_err(to_napi_error)?;
    let output = run_coverage(&input).map_err(to_napi_error)?;
    serde_json::to_string(&output).map_err(to_napi_error)
}

// ---------------------------------------------------------------------------
// Waterfall
// ---------------------------------------------------------------------------

#[napi]
pub fn execute_waterfall(input_json: String) -> NapiResult<String> {
    let input: WaterfallInput = serde_json::from_str(&input_json).map_err(to_napi_error)?;
    let output = run_waterfall(&input).map_err(to_napi_error)?;
    serde_json::to_string(&output).map_err(to_napi_error)
}

/// Validate a configuration against a capital structure. Returns `"ok"` or throws.
#[napi]
pub fn validate_waterfall_configuration(config_json: String, tranches_json: String) -> NapiResult<String> {
    let config: WaterfallConfiguration = serde_json::from_str(&config_json).map_err(to_napi_error)?;
    let tranches: Vec<Tranche> = serde_json::from_str(&tranches_json).map_err(to_napi_error)?;
    config.validate(&tranches).map_err(to_napi_error)?;
    Ok("ok".to_string())
}

// ---------------------------------------------------------------------------
// Payment date
// ---------------------------------------------------------------------------

/// Run one payment date end to end. The caller owns persistence: prior finalized
/// coverage rows come in, the full outcome (including this date's rows) goes out.
#[napi]
pub fn run_period(request_json: String, prior_coverage_json: Option<String>) -> NapiResult<String> {
    let request: PeriodRequest = serde_json::from_str(&request_json).map_err(to_napi_error)?;
    let mut store = MemoryStore::new();
    if let Some(rows_json) = prior_coverage_json {
        let rows: Vec<CoverageTrigger> = serde_json::from_str(&rows_json).map_err(to_napi_error)?;
        store.append_coverage(&rows);
    }
    let outcome = run_payment_date(&mut store, &CashFlowAggregator::new(), &request).map_err(to_napi_error)?;
    serde_json::to_string(&outcome).map_err(to_napi_error)
}
