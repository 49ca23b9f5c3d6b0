//! Sample and health CLI commands

use anyhow::Result;
use colored::Colorize;
use std::time::Duration;
use tabled::Tabled;

use crate::client::{ApiClient, Sample};
use crate::output::{
    color_threat, color_utilization, format_bytes, format_pause, format_rate,
    format_timestamp_ms, print_success, print_warning, OutputFormat,
};

/// Row for the sample table
#[derive(Tabled)]
struct SampleRow {
    #[tabled(rename = "Time")]
    time: String,
    #[tabled(rename = "Heap Size")]
    heap_size: String,
    #[tabled(rename = "Heap Used")]
    heap_used: String,
    #[tabled(rename = "Util")]
    utilization: String,
    #[tabled(rename = "Objects")]
    objects: u64,
    #[tabled(rename = "Next GC")]
    next_gc: String,
    #[tabled(rename = "Alloc Rate")]
    allocation_rate: String,
    #[tabled(rename = "Threat")]
    threat: String,
}

impl From<&Sample> for SampleRow {
    fn from(sample: &Sample) -> Self {
        Self {
            time: format_timestamp_ms(sample.timestamp),
            heap_size: format_bytes(sample.heap_size),
            heap_used: format_bytes(sample.heap_used),
            utilization: color_utilization(sample.utilization(), &sample.threat_level),
            objects: sample.heap_objects,
            next_gc: format_bytes(sample.next_gc),
            allocation_rate: format_rate(sample.allocation_rate),
            threat: color_threat(&sample.threat_level),
        }
    }
}

/// Show the latest sample
pub async fn show_metrics(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let sample: Sample = client.get_json("metrics").await?;

    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&sample)?;
            println!("{}", json);
        }
        OutputFormat::Table => {
            println!("{}", "Heap Sample".bold());
            println!("{}", "=".repeat(60));

            if sample.timestamp == 0 {
                print_warning("No sample taken yet");
                return Ok(());
            }

            let table = tabled::Table::new([SampleRow::from(&sample)])
                .with(tabled::settings::Style::rounded())
                .to_string();
            println!("{}", table);

            if sample.gc_pauses.is_empty() {
                println!("\nRecent pauses: none");
            } else {
                let pauses: Vec<String> =
                    sample.gc_pauses.iter().map(|ns| format_pause(*ns)).collect();
                println!("\nRecent pauses: {}", pauses.join(", "));
            }
        }
    }

    Ok(())
}

/// Check the health endpoint
pub async fn check_health(client: &ApiClient) -> Result<()> {
    let message = client.get_text("health").await?;
    print_success(message.trim());
    Ok(())
}

/// Poll `/metrics` every `interval_ms`, printing one line per sample
pub async fn watch(
    client: &ApiClient,
    interval_ms: u64,
    count: Option<u64>,
    format: OutputFormat,
) -> Result<()> {
    let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms.max(1)));
    let mut seen = 0u64;

    loop {
        if count.is_some_and(|limit| seen >= limit) {
            break;
        }

        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => break,
        }

        let sample: Sample = client.get_json("metrics").await?;
        match format {
            OutputFormat::Json => println!("{}", serde_json::to_string(&sample)?),
            OutputFormat::Table => println!("{}", watch_line(&sample)),
        }
        seen += 1;
    }

    Ok(())
}

fn watch_line(sample: &Sample) -> String {
    format!(
        "{}  used {:>10} / {:>10} ({})  rate {:>12}  objects {:>8}  {}",
        format_timestamp_ms(sample.timestamp),
        format_bytes(sample.heap_used),
        format_bytes(sample.heap_size),
        color_utilization(sample.utilization(), &sample.threat_level),
        format_rate(sample.allocation_rate),
        sample.heap_objects,
        color_threat(&sample.threat_level),
    )
}
