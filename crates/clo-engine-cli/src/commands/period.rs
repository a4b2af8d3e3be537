use std::sync::Mutex;
use std::time::Instant;

use clap::Args;
use serde_json::{json, Value};

use clo_engine_core::cash_flow::CashFlowAggregator;
use clo_engine_core::coverage::CoverageTrigger;
use clo_engine_core::runner::{run_batch, run_payment_date, PeriodRequest, RunMode};
use clo_engine_core::store::{ExecutionStore, MemoryStore};
use clo_engine_core::with_metadata;

use crate::input;

#[derive(Args)]
pub struct RunPeriodArgs {
    /// One period request, or a list of requests to run as a batch
    #[arg(long)]
    pub input: Option<String>,

    /// Finalized coverage rows from earlier payment dates (JSON or YAML list)
    #[arg(long)]
    pub prior_coverage: Option<String>,

    /// Append a superseding execution instead of rejecting a re-run
    #[arg(long)]
    pub supersede: bool,
}

fn seeded_store(args: &RunPeriodArgs) -> Result<MemoryStore, Box<dyn std::error::Error>> {
    let mut store = MemoryStore::new();
    if let Some(ref path) = args.prior_coverage {
        let rows: Vec<CoverageTrigger> = input::file::read_document(path)?;
        tracing::debug!(rows = rows.len(), "loaded prior coverage rows");
        store.append_coverage(&rows);
    }
    Ok(store)
}

pub fn run_period(args: RunPeriodArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let document = input::read_value(args.input.as_deref())?;
    let mut store = seeded_store(&args)?;
    let aggregator = CashFlowAggregator::new();
    let mode = if args.supersede {
        RunMode::Supersede
    } else {
        RunMode::RejectIfCompleted
    };
    let start = Instant::now();

    if document.is_array() {
        let mut requests: Vec<PeriodRequest> = serde_json::from_value(document)?;
        for r in &mut requests {
            r.mode = mode;
        }
        let store = Mutex::new(store);
        let items = run_batch(&store, &aggregator, &requests);
        let failed = items.iter().filter(|i| i.result.is_err()).count();
        let rows = items
            .into_iter()
            .map(|item| {
                let mut row = json!({
                    "deal_id": item.deal_id,
                    "payment_date": item.payment_date.to_string(),
                });
                match item.result {
                    Ok(outcome) => {
                        row["status"] = json!("completed");
                        row["outcome"] = serde_json::to_value(outcome)?;
                    }
                    Err(e) => {
                        row["status"] = json!("failed");
                        row["retryable"] = json!(e.is_retryable());
                        row["error"] = json!(e.to_string());
                    }
                }
                Ok(row)
            })
            .collect::<Result<Vec<Value>, serde_json::Error>>()?;
        let warnings = if failed > 0 {
            vec![format!("{} of {} payment dates failed", failed, rows.len())]
        } else {
            Vec::new()
        };
        let elapsed = start.elapsed().as_micros() as u64;
        let assumptions = json!({ "mode": mode, "requests": rows.len() });
        return Ok(serde_json::to_value(with_metadata(
            "CLO Payment-Date Batch",
            &assumptions,
            warnings,
            elapsed,
            rows,
        ))?);
    }

    let mut request: PeriodRequest = serde_json::from_value(document)?;
    request.mode = mode;
    let outcome = run_payment_date(&mut store, &aggregator, &request)?;
    let warnings = outcome.warnings.clone();
    let elapsed = start.elapsed().as_micros() as u64;
    let assumptions = json!({
        "mode": mode,
        "cure_split": request.conventions.cure_split,
        "cure_measurement": request.conventions.cure_measurement,
        "reference_rate": request.reference_rate.to_string(),
    });
    Ok(serde_json::to_value(with_metadata(
        "CLO Payment-Date Run: aggregation, compliance, coverage, waterfall",
        &assumptions,
        warnings,
        elapsed,
        outcome,
    ))?)
}
