//! Fleet Scheduler CLI
//!
//! A command-line tool for inspecting assignments, overflow routing and
//! autoscaler cycles, and for summarizing provisioning benchmarks.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{bench, state};
use std::path::PathBuf;

/// Fallback benchmark log when neither the flag nor the config file set one
const DEFAULT_BENCHMARK_FILE: &str = "/data/benchmark.csv";

/// Fleet Scheduler CLI
#[derive(Parser)]
#[command(name = "fleetctl")]
#[command(author, version, about = "CLI for the Fleet Scheduler", long_about = None)]
pub struct Cli {
    /// API endpoint URL (can also be set via FLEET_API_URL env var)
    #[arg(long, env = "FLEET_API_URL")]
    pub api_url: Option<String>,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    /// Enable verbose output
    #[arg(long, short)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Get scheduler state
    #[command(subcommand)]
    Get(GetCommands),

    /// Show scheduler health and readiness
    Status,

    /// Provisioning benchmark commands
    #[command(subcommand)]
    Bench(BenchCommands),
}

#[derive(Subcommand)]
pub enum GetCommands {
    /// Show the machine-to-processor assignment
    Assignments,

    /// Show machines routed to the overflow processor
    Overflow,

    /// Show the most recent autoscaler cycle
    Cycle,
}

#[derive(Subcommand)]
pub enum BenchCommands {
    /// Summarize cold-start and prewarm activation latencies
    Summary {
        /// Benchmark CSV to read
        #[arg(long)]
        file: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::Config::load()?;

    if cli.verbose {
        eprintln!("Config: {:?}", cfg);
    }

    match cli.command {
        Commands::Get(get_cmd) => {
            let api_url = cfg.resolve_api_url(cli.api_url);
            if cli.verbose {
                eprintln!("API URL: {}", api_url);
            }
            let client = client::ApiClient::new(&api_url)?;
            match get_cmd {
                GetCommands::Assignments => state::get_assignments(&client, cli.format).await?,
                GetCommands::Overflow => state::get_overflow(&client, cli.format).await?,
                GetCommands::Cycle => state::get_cycle(&client, cli.format).await?,
            }
        }
        Commands::Status => {
            let api_url = cfg.resolve_api_url(cli.api_url);
            let client = client::ApiClient::new(&api_url)?;
            state::show_status(&client, cli.format).await?;
        }
        Commands::Bench(BenchCommands::Summary { file }) => {
            let file = file
                .or_else(|| cfg.benchmark_file.clone().map(PathBuf::from))
                .unwrap_or_else(|| PathBuf::from(DEFAULT_BENCHMARK_FILE));
            bench::summary(&file, cli.format)?;
        }
    }

    Ok(())
}
