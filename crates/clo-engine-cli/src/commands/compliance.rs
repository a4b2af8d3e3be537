use clap::Args;
use serde_json::Value;

use clo_engine_core::compliance::{run_compliance, standard_test_library, ComplianceInput};

use crate::input;

#[derive(Args)]
pub struct ComplianceArgs {
    #[arg(long)]
    pub input: Option<String>,

    /// Replace the input's test list with definitions from this file
    #[arg(long)]
    pub tests: Option<String>,
}

pub fn run_compliance_tests(args: ComplianceArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let mut input_data: ComplianceInput = input::read_input(args.input.as_deref())?;
    if let Some(ref path) = args.tests {
        input_data.tests = Some(input::file::read_document(path)?);
    }
    let result = run_compliance(&input_data)?;
    Ok(serde_json::to_value(result)?)
}

pub fn run_standard_tests() -> Result<Value, Box<dyn std::error::Error>> {
    Ok(serde_json::to_value(standard_test_library())?)
}
