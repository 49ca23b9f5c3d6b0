//! Monitor configuration

use anyhow::Result;
use config::builder::DefaultState;
use config::ConfigBuilder;
use monitor_lib::LoadProfile;
use serde::Deserialize;
use std::time::Duration;

/// Monitor configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// Name attached to structured log events
    #[serde(default = "default_instance_name")]
    pub instance_name: String,

    /// API server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Sampling interval in milliseconds
    #[serde(default = "default_sample_interval")]
    pub sample_interval_ms: u64,

    /// Number of samples kept in history
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// Heap growth over the post-collection heap before the next
    /// collection is expected, in percent
    #[serde(default = "default_gc_percent")]
    pub gc_percent: u64,

    /// Hold period of a load run in seconds
    #[serde(default = "default_load_hold")]
    pub load_hold_secs: u64,

    /// Load run schedule: "standard" or "aggressive"
    #[serde(default)]
    pub load_profile: LoadProfile,

    /// Mount the load test endpoints; disable for monitor-only mode
    #[serde(default = "default_loadtest_enabled")]
    pub loadtest_enabled: bool,
}

fn default_instance_name() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "gc-monitor".to_string())
}

fn default_port() -> u16 {
    8080
}

fn default_sample_interval() -> u64 {
    100
}

fn default_history_capacity() -> usize {
    monitor_lib::history::DEFAULT_HISTORY_CAPACITY
}

fn default_gc_percent() -> u64 {
    monitor_lib::source::DEFAULT_GC_PERCENT
}

fn default_load_hold() -> u64 {
    10
}

fn default_loadtest_enabled() -> bool {
    true
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            instance_name: default_instance_name(),
            port: default_port(),
            sample_interval_ms: default_sample_interval(),
            history_capacity: default_history_capacity(),
            gc_percent: default_gc_percent(),
            load_hold_secs: default_load_hold(),
            load_profile: LoadProfile::default(),
            loadtest_enabled: default_loadtest_enabled(),
        }
    }
}

impl MonitorConfig {
    /// Load configuration from `gc-monitor.toml` (optional) and `GCMON_*`
    /// environment variables, the latter taking precedence
    pub fn load() -> Result<Self> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name("gc-monitor").required(false))
            .add_source(config::Environment::with_prefix("GCMON").try_parsing(true));

        Self::from_builder(builder)
    }

    /// Build from explicit sources
    pub fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self> {
        let config = builder.build()?;
        Ok(config.try_deserialize()?)
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    pub fn load_hold(&self) -> Duration {
        Duration::from_secs(self.load_hold_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::{File, FileFormat};

    #[test]
    fn test_defaults_when_no_source_is_set() {
        let config = MonitorConfig::from_builder(config::Config::builder()).unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.sample_interval(), Duration::from_millis(100));
        assert_eq!(config.history_capacity, 100);
        assert_eq!(config.gc_percent, 100);
        assert_eq!(config.load_hold(), Duration::from_secs(10));
        assert_eq!(config.load_profile, LoadProfile::Standard);
        assert!(config.loadtest_enabled);
    }

    #[test]
    fn test_file_values_override_defaults() {
        let toml = r#"
            port = 9090
            sample_interval_ms = 250
            history_capacity = 20
            loadtest_enabled = false
            instance_name = "canary"
        "#;
        let builder = config::Config::builder().add_source(File::from_str(toml, FileFormat::Toml));

        let config = MonitorConfig::from_builder(builder).unwrap();

        assert_eq!(config.port, 9090);
        assert_eq!(config.sample_interval_ms, 250);
        assert_eq!(config.history_capacity, 20);
        assert!(!config.loadtest_enabled);
        assert_eq!(config.instance_name, "canary");
        assert_eq!(config.gc_percent, 100);
    }

    #[test]
    fn test_aggressive_load_profile() {
        let builder = config::Config::builder()
            .add_source(File::from_str("load_profile = \"aggressive\"", FileFormat::Toml));

        let config = MonitorConfig::from_builder(builder).unwrap();

        assert_eq!(config.load_profile, LoadProfile::Aggressive);
    }

    #[test]
    fn test_unknown_load_profile_is_an_error() {
        let builder = config::Config::builder()
            .add_source(File::from_str("load_profile = \"extreme\"", FileFormat::Toml));

        assert!(MonitorConfig::from_builder(builder).is_err());
    }

    #[test]
    fn test_invalid_value_is_an_error() {
        let builder = config::Config::builder()
            .add_source(File::from_str("port = \"not-a-port\"", FileFormat::Toml));

        assert!(MonitorConfig::from_builder(builder).is_err());
    }
}
