use clap::Args;
use serde_json::Value;

use clo_engine_core::waterfall::{run_waterfall, WaterfallInput};

use crate::input;

#[derive(Args)]
pub struct WaterfallArgs {
    #[arg(long)]
    pub input: Option<String>,
}

pub fn run_waterfall_execution(args: WaterfallArgs) -> Result<Value, Box<dyn std::error::Error>> {
    let input_data: WaterfallInput = input::read_input(args.input.as_deref())?;
    match run_waterfall(&input_data) {
        Ok(result) => Ok(serde_json::to_value(result)?),
        Err(e) => {
            // Surface the partial record so the failing step can be inspected.
            if let Some(partial) = e.partial_execution() {
                eprintln!("{}", serde_json::to_string_pretty(partial)?);
            }
            Err(e.into())
        }
    }
}
