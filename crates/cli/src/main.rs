//! GC Monitor CLI
//!
//! A command-line tool for reading samples, checking health and driving
//! load tests against a running gc-monitor.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{loadtest, monitor};

/// GC Monitor CLI
#[derive(Parser)]
#[command(name = "gcm")]
#[command(author, version, about = "CLI for the GC Monitor", long_about = None)]
pub struct Cli {
    /// API endpoint URL (can also be set via GCM_API_URL env var or the config file)
    #[arg(long, env = "GCM_API_URL")]
    pub api_url: Option<String>,

    /// Output format
    #[arg(long, short)]
    pub format: Option<output::OutputFormat>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the latest heap sample
    Metrics,

    /// Check that the monitor is running
    Health,

    /// Start a load test, or show the state of the current one
    Loadtest {
        /// Show the load generator state instead of starting a run
        #[arg(long)]
        status: bool,
    },

    /// Poll the latest sample repeatedly
    Watch {
        /// Polling interval in milliseconds
        #[arg(long, default_value_t = 1000)]
        interval_ms: u64,

        /// Stop after this many samples (runs until interrupted if unset)
        #[arg(long)]
        count: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let file_config = config::Config::load()?;
    let api_url = file_config.resolve_api_url(cli.api_url.as_deref());
    let format = cli
        .format
        .or_else(|| file_config.default_format())
        .unwrap_or_default();

    // Initialize client
    let client = client::ApiClient::new(&api_url)?;

    // Execute command
    match cli.command {
        Commands::Metrics => monitor::show_metrics(&client, format).await?,
        Commands::Health => monitor::check_health(&client).await?,
        Commands::Loadtest { status: true } => loadtest::show_status(&client, format).await?,
        Commands::Loadtest { status: false } => loadtest::start(&client).await?,
        Commands::Watch { interval_ms, count } => {
            monitor::watch(&client, interval_ms, count, format).await?
        }
    }

    Ok(())
}
