//! Output formatting utilities

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use colored::{Color, ColoredString, Colorize};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2}Gi", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2}Mi", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2}Ki", bytes as f64 / KB as f64)
    } else {
        format!("{}B", bytes)
    }
}

/// Format a signed allocation rate in bytes per second
pub fn format_rate(bytes_per_sec: f64) -> String {
    let sign = if bytes_per_sec < 0.0 { "-" } else { "" };
    format!("{}{}/s", sign, format_bytes(bytes_per_sec.abs() as u64))
}

/// Format a pause duration in nanoseconds
pub fn format_pause(ns: u64) -> String {
    if ns >= 1_000_000 {
        format!("{:.2}ms", ns as f64 / 1_000_000.0)
    } else if ns >= 1_000 {
        format!("{:.1}µs", ns as f64 / 1_000.0)
    } else {
        format!("{}ns", ns)
    }
}

/// Format milliseconds since the epoch; 0 means no sample yet
pub fn format_timestamp_ms(ms: i64) -> String {
    if ms == 0 {
        return "-".to_string();
    }
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S%.3f").to_string())
        .unwrap_or_else(|| ms.to_string())
}

/// Display color for a threat level as reported by the monitor
pub fn threat_color(level: &str) -> Option<Color> {
    match level.to_uppercase().as_str() {
        "GREEN" => Some(Color::Green),
        "YELLOW" => Some(Color::Yellow),
        "ORANGE" => Some(Color::TrueColor {
            r: 255,
            g: 140,
            b: 0,
        }),
        "RED" => Some(Color::Red),
        _ => None,
    }
}

/// Color a threat level by severity
pub fn color_threat(level: &str) -> String {
    match threat_color(level) {
        Some(color) => level.color(color).bold().to_string(),
        None => level.to_string(),
    }
}

/// Color a utilization percentage with the threat level the monitor
/// assigned to the same sample
pub fn color_utilization(percent: f64, level: &str) -> String {
    paint_utilization(percent, level).to_string()
}

fn paint_utilization(percent: f64, level: &str) -> ColoredString {
    let formatted = format!("{:.1}%", percent);
    match threat_color(level) {
        Some(color) => formatted.color(color),
        None => formatted.normal(),
    }
}
