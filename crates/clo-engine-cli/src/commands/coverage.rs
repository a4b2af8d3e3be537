use clap::Args;
use serde_json::Value;

use clo_engine_core::coverage::{run_coverage, CoverageInput};

use crate::input;

#[derive(Args)]
pub struct CoverageArgs {
    #[arg(long)]
    pub input: Option<String>,
}

pub fn run_coverage_tests(args: CoverageArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let input_data: CoverageInput = input::read_input(args.input.as_deref())?;
    let result = run_coverage(&input_data)?;
    Ok(serde_json::to_value(result)?)
}
