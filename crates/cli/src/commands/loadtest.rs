//! Load test CLI commands

use anyhow::Result;
use colored::Colorize;
use reqwest::StatusCode;

use crate::client::{ApiClient, LoadPhase, LoadTestStatus};
use crate::output::{color_threat, print_error, print_success, print_warning, OutputFormat};

/// Whether a start request began a run
#[derive(Debug, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
    Disabled,
}

/// Request a load run; a run already in progress is reported, not retried
pub async fn start(client: &ApiClient) -> Result<()> {
    match request_start(client).await? {
        StartOutcome::Started => print_success("Load test started"),
        StartOutcome::AlreadyRunning => print_warning("Load test already running"),
        StartOutcome::Disabled => {
            print_error("Load testing is disabled on this monitor");
            anyhow::bail!("load testing disabled");
        }
    }
    Ok(())
}

pub async fn request_start(client: &ApiClient) -> Result<StartOutcome> {
    let response = client.post("loadtest").await?;

    match response.status {
        StatusCode::OK => Ok(StartOutcome::Started),
        StatusCode::CONFLICT => Ok(StartOutcome::AlreadyRunning),
        StatusCode::NOT_FOUND => Ok(StartOutcome::Disabled),
        status => anyhow::bail!("API error ({}): {}", status, response.body),
    }
}

/// Show the load generator state
pub async fn show_status(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let status: LoadTestStatus = client.get_json("loadtest/status").await?;

    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&status)?;
            println!("{}", json);
        }
        OutputFormat::Table => {
            println!("{}", "Load Test".bold());
            println!("{}", "=".repeat(40));
            let active = if status.active {
                "yes".green().to_string()
            } else {
                "no".dimmed().to_string()
            };
            println!("Active: {}", active);
            println!("Phase:  {}", describe_phase(&status.phase));
        }
    }

    Ok(())
}

fn describe_phase(phase: &LoadPhase) -> String {
    match (phase.index, phase.target.as_deref()) {
        (Some(index), Some(target)) => {
            format!("{} {} (target {})", phase.state, index + 1, color_threat(target))
        }
        _ => phase.state.clone(),
    }
}
