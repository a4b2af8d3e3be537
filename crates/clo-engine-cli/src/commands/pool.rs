use clap::Args;
use serde_json::Value;

use clo_engine_core::cash_flow::{run_aggregation, AggregationInput};

use crate::input;

#[derive(Args)]
pub struct AggregateArgs {
    /// Positions and cash-flow periods (JSON or YAML)
    #[arg(long)]
    pub input: Option<String>,
}

pub fn run_aggregate(args: AggregateArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let input_data: AggregationInput = input::read_input(args.input.as_deref())?;
    let result = run_aggregation(&input_data)?;
    Ok(serde_json::to_value(result)?)
}
