//! Observability infrastructure for the GC monitor
//!
//! Provides:
//! - Prometheus metrics (heap gauges, threat level, sample latency, forced collections, load runs)
//! - Structured JSON logging with tracing

use crate::models::Sample;
use crate::threat::ThreatLevel;
use prometheus::{
    register_gauge, register_histogram, register_int_counter, register_int_gauge, Gauge,
    Histogram, IntCounter, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for sampling latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.00001, 0.00005, 0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<MonitorMetricsInner> = OnceLock::new();

struct MonitorMetricsInner {
    sample_latency_seconds: Histogram,
    samples_total: IntCounter,
    heap_size_bytes: IntGauge,
    heap_used_bytes: IntGauge,
    heap_objects: IntGauge,
    next_gc_bytes: IntGauge,
    allocation_rate: Gauge,
    threat_level: IntGauge,
    forced_collections: IntCounter,
    collection_errors: IntCounter,
    load_runs: IntCounter,
    load_run_active: IntGauge,
}

impl MonitorMetricsInner {
    fn new() -> Self {
        Self {
            sample_latency_seconds: register_histogram!(
                "gc_monitor_sample_latency_seconds",
                "Time spent taking and classifying one sample",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register sample_latency_seconds"),

            samples_total: register_int_counter!(
                "gc_monitor_samples_total",
                "Total number of samples taken"
            )
            .expect("Failed to register samples_total"),

            heap_size_bytes: register_int_gauge!(
                "gc_monitor_heap_size_bytes",
                "Heap bytes reserved from the OS at the last sample"
            )
            .expect("Failed to register heap_size_bytes"),

            heap_used_bytes: register_int_gauge!(
                "gc_monitor_heap_used_bytes",
                "Heap bytes in use at the last sample"
            )
            .expect("Failed to register heap_used_bytes"),

            heap_objects: register_int_gauge!(
                "gc_monitor_heap_objects",
                "Live allocations at the last sample"
            )
            .expect("Failed to register heap_objects"),

            next_gc_bytes: register_int_gauge!(
                "gc_monitor_next_gc_bytes",
                "Heap size at which the next collection is expected"
            )
            .expect("Failed to register next_gc_bytes"),

            allocation_rate: register_gauge!(
                "gc_monitor_allocation_rate_bytes_per_second",
                "Allocation rate derived from the last two samples"
            )
            .expect("Failed to register allocation_rate"),

            threat_level: register_int_gauge!(
                "gc_monitor_threat_level",
                "Current threat level (0=GREEN, 1=YELLOW, 2=ORANGE, 3=RED)"
            )
            .expect("Failed to register threat_level"),

            forced_collections: register_int_counter!(
                "gc_monitor_forced_collections_total",
                "Total number of forced collection cycles"
            )
            .expect("Failed to register forced_collections"),

            collection_errors: register_int_counter!(
                "gc_monitor_collection_errors_total",
                "Total number of failed forced collections"
            )
            .expect("Failed to register collection_errors"),

            load_runs: register_int_counter!(
                "gc_monitor_load_runs_total",
                "Total number of load test runs started"
            )
            .expect("Failed to register load_runs"),

            load_run_active: register_int_gauge!(
                "gc_monitor_load_run_active",
                "1 while a load test run is in progress"
            )
            .expect("Failed to register load_run_active"),
        }
    }
}

/// Monitor metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct MonitorMetrics {
    _private: (),
}

impl Default for MonitorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MonitorMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorMetrics").finish()
    }
}

impl MonitorMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(MonitorMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &MonitorMetricsInner {
        GLOBAL_METRICS.get_or_init(MonitorMetricsInner::new)
    }

    /// Record one completed sample
    pub fn observe_sample(&self, sample: &Sample, duration_secs: f64) {
        let inner = self.inner();
        inner.sample_latency_seconds.observe(duration_secs);
        inner.samples_total.inc();
        inner.heap_size_bytes.set(clamp_i64(sample.heap_size));
        inner.heap_used_bytes.set(clamp_i64(sample.heap_used));
        inner.heap_objects.set(clamp_i64(sample.heap_objects));
        inner.next_gc_bytes.set(clamp_i64(sample.next_gc));
        inner.allocation_rate.set(sample.allocation_rate);
        inner.threat_level.set(sample.threat_level.as_gauge());
    }

    /// Increment forced collections counter
    pub fn inc_forced_collections(&self) {
        self.inner().forced_collections.inc();
    }

    /// Increment failed collections counter
    pub fn inc_collection_errors(&self) {
        self.inner().collection_errors.inc();
    }

    /// Increment load runs counter
    pub fn inc_load_runs(&self) {
        self.inner().load_runs.inc();
    }

    pub fn set_load_run_active(&self, active: bool) {
        self.inner().load_run_active.set(i64::from(active));
    }
}

fn clamp_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Structured logger for monitor events
///
/// Provides consistent JSON-formatted logging for lifecycle, threat
/// transitions and load runs.
#[derive(Debug, Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    /// Log monitor startup
    pub fn log_startup(&self, version: &str, port: u16, sample_interval_ms: u64) {
        info!(
            event = "monitor_started",
            instance = %self.instance,
            version = %version,
            port = port,
            sample_interval_ms = sample_interval_ms,
            "GC monitor started"
        );
    }

    /// Log monitor shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "monitor_shutdown",
            instance = %self.instance,
            reason = %reason,
            "GC monitor shutting down"
        );
    }

    /// Log a change of threat level between consecutive samples
    pub fn log_threat_change(&self, from: ThreatLevel, to: ThreatLevel, sample: &Sample) {
        if to > from {
            warn!(
                event = "threat_level_changed",
                instance = %self.instance,
                from = %from,
                to = %to,
                heap_used = sample.heap_used,
                heap_size = sample.heap_size,
                allocation_rate = sample.allocation_rate,
                "Threat level raised"
            );
        } else {
            info!(
                event = "threat_level_changed",
                instance = %self.instance,
                from = %from,
                to = %to,
                heap_used = sample.heap_used,
                heap_size = sample.heap_size,
                "Threat level lowered"
            );
        }
    }

    /// Log the start of a load run
    pub fn log_load_run_started(&self, phases: usize) {
        info!(
            event = "load_run_started",
            instance = %self.instance,
            phases = phases,
            "Load test started"
        );
    }

    /// Log the end of one escalation phase
    pub fn log_phase_completed(
        &self,
        phase: usize,
        target: ThreatLevel,
        iterations: usize,
        bytes_allocated: u64,
        target_reached: bool,
    ) {
        info!(
            event = "load_phase_completed",
            instance = %self.instance,
            phase = phase,
            target = %target,
            iterations = iterations,
            allocated_mb = bytes_allocated / 1024 / 1024,
            target_reached = target_reached,
            "Load phase completed"
        );
    }

    /// Log the end of a load run
    pub fn log_load_run_completed(&self, bytes_released: u64, cancelled: bool) {
        if cancelled {
            warn!(
                event = "load_run_completed",
                instance = %self.instance,
                released_mb = bytes_released / 1024 / 1024,
                cancelled = true,
                "Load test cancelled, buffers released"
            );
        } else {
            info!(
                event = "load_run_completed",
                instance = %self.instance,
                released_mb = bytes_released / 1024 / 1024,
                cancelled = false,
                "Load test completed"
            );
        }
    }
}
