mod commands;
mod input;
mod output;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::process;
use tracing_subscriber::EnvFilter;

use commands::compliance::ComplianceArgs;
use commands::coverage::CoverageArgs;
use commands::period::RunPeriodArgs;
use commands::pool::AggregateArgs;
use commands::waterfall::WaterfallArgs;

/// CLO payment-date engine
#[derive(Parser)]
#[command(
    name = "cloe",
    version,
    about = "CLO cash-flow aggregation, compliance, coverage and waterfall runs",
    long_about = "A CLI for running a CLO deal's payment date with decimal precision: \
                  pool aggregation, concentration and collateral quality tests, OC/IC \
                  coverage with cure tracking, and the priority-of-payments waterfall. \
                  Inputs are JSON or YAML files, or a document piped on stdin."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format
    #[arg(long, default_value = "json", global = true)]
    output: OutputFormat,
}

#[derive(Subcommand)]
enum Commands {
    /// Aggregate asset cash flows into pool totals
    Aggregate(AggregateArgs),
    /// Run compliance / concentration tests
    Compliance(ComplianceArgs),
    /// Evaluate OC and IC coverage tests with cure tracking
    Coverage(CoverageArgs),
    /// Execute a waterfall against prepared coverage results
    Waterfall(WaterfallArgs),
    /// Run a full payment date (or a batch of them)
    RunPeriod(RunPeriodArgs),
    /// Print the standard compliance test library
    StandardTests,
    /// Print version information
    Version,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Csv,
    Minimal,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing();

    let result: Result<serde_json::Value, Box<dyn std::error::Error>> = match cli.command {
        Commands::Aggregate(args) => commands::pool::run_aggregate(args),
        Commands::Compliance(args) => commands::compliance::run_compliance_tests(args),
        Commands::Coverage(args) => commands::coverage::run_coverage_tests(args),
        Commands::Waterfall(args) => commands::waterfall::run_waterfall_execution(args),
        Commands::RunPeriod(args) => commands::period::run_period(args),
        Commands::StandardTests => commands::compliance::run_standard_tests(),
        Commands::Version => {
            println!("cloe {}", env!("CARGO_PKG_VERSION"));
            return;
        }
    };

    match result {
        Ok(value) => {
            output::format_output(&cli.output, &value);
            process::exit(0);
        }
        Err(e) => {
            eprintln!("{}: {}", "error".red().bold(), e);
            process::exit(1);
        }
    }
}
