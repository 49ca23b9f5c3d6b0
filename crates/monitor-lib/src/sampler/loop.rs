//! Sampling loop
//!
//! Runs the sampler on a fixed interval. Each tick is strictly
//! sample → append → publish → dispatch; the next tick never starts before
//! the previous one's mitigation has returned.

use super::Sampler;
use crate::history::DEFAULT_HISTORY_CAPACITY;
use crate::mitigation::Mitigator;
use crate::models::Sample;
use crate::observability::{MonitorMetrics, StructuredLogger};
use crate::source::{MemorySource, SourceError};
use crate::threat::{ThreatLevel, Thresholds};
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

/// Configuration for the sampling loop
#[derive(Debug, Clone)]
pub struct SamplingConfig {
    /// Tick period (default: 100 ms)
    pub interval: Duration,
    /// Samples kept in history (default: 100)
    pub history_capacity: usize,
    /// Classification thresholds
    pub thresholds: Thresholds,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(100),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            thresholds: Thresholds::default(),
        }
    }
}

/// Background task sampling the heap and dispatching mitigation
pub struct SamplingLoop {
    sampler: Sampler,
    mitigator: Mitigator,
    interval: Duration,
    latest_tx: watch::Sender<Option<Sample>>,
    metrics: MonitorMetrics,
    logger: Option<StructuredLogger>,
    last_level: Option<ThreatLevel>,
}

impl SamplingLoop {
    /// Create a new sampling loop and the receiver observing its latest sample
    pub fn new(
        source: Arc<dyn MemorySource>,
        config: SamplingConfig,
        metrics: MonitorMetrics,
    ) -> (Self, watch::Receiver<Option<Sample>>) {
        let (latest_tx, latest_rx) = watch::channel(None);

        let loop_instance = Self {
            sampler: Sampler::new(source.clone(), config.thresholds, config.history_capacity),
            mitigator: Mitigator::new(source, metrics.clone()),
            interval: config.interval.max(Duration::from_millis(1)),
            latest_tx,
            metrics,
            logger: None,
            last_level: None,
        };

        (loop_instance, latest_rx)
    }

    /// Attach a structured logger for threat transitions
    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Another receiver for the latest sample
    pub fn subscribe(&self) -> watch::Receiver<Option<Sample>> {
        self.latest_tx.subscribe()
    }

    pub fn sampler(&self) -> &Sampler {
        &self.sampler
    }

    /// Run a single tick
    pub fn tick(&mut self) -> Result<Sample, SourceError> {
        let start = Instant::now();

        let sample = self.sampler.sample()?;
        self.latest_tx.send_replace(Some(sample.clone()));

        if let (Some(logger), Some(previous)) = (&self.logger, self.last_level) {
            if previous != sample.threat_level {
                logger.log_threat_change(previous, sample.threat_level, &sample);
            }
        }
        self.last_level = Some(sample.threat_level);

        self.mitigator.dispatch(sample.threat_level);

        self.metrics
            .observe_sample(&sample, start.elapsed().as_secs_f64());

        Ok(sample)
    }

    /// Start the sampling loop
    ///
    /// Returns when `shutdown` fires, or with an error if the memory source
    /// fails: without readings nothing can be classified, so there is no
    /// retry.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> Result<(), SourceError> {
        info!(
            interval_ms = self.interval.as_millis() as u64,
            history_capacity = self.sampler.history().capacity(),
            "Starting sampling loop"
        );

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut tick_count = 0u64;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.tick() {
                        Ok(sample) => {
                            tick_count += 1;

                            // Roughly every 10 seconds at the default interval
                            if tick_count % 100 == 0 {
                                debug!(
                                    ticks = tick_count,
                                    heap_used = sample.heap_used,
                                    heap_size = sample.heap_size,
                                    threat_level = %sample.threat_level,
                                    "Sampling cycle complete"
                                );
                            }
                        }
                        Err(e) => {
                            error!(error = %e, "Memory source unavailable, stopping sampling loop");
                            return Err(e);
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!(ticks = tick_count, "Shutting down sampling loop");
                    break;
                }
            }
        }

        Ok(())
    }
}

/// Builder for creating the sampling loop
pub struct SamplingLoopBuilder {
    source: Option<Arc<dyn MemorySource>>,
    config: SamplingConfig,
    metrics: Option<MonitorMetrics>,
    logger: Option<StructuredLogger>,
}

impl SamplingLoopBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self {
            source: None,
            config: SamplingConfig::default(),
            metrics: None,
            logger: None,
        }
    }

    /// Set the memory source
    pub fn source(mut self, source: Arc<dyn MemorySource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Set the tick interval
    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.interval = interval;
        self
    }

    /// Set the history capacity
    pub fn history_capacity(mut self, capacity: usize) -> Self {
        self.config.history_capacity = capacity;
        self
    }

    /// Set the classification thresholds
    pub fn thresholds(mut self, thresholds: Thresholds) -> Self {
        self.config.thresholds = thresholds;
        self
    }

    pub fn metrics(mut self, metrics: MonitorMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Build the sampling loop
    pub fn build(self) -> Result<(SamplingLoop, watch::Receiver<Option<Sample>>)> {
        let source = self
            .source
            .ok_or_else(|| anyhow::anyhow!("Memory source is required"))?;
        let metrics = self.metrics.unwrap_or_default();

        let (mut sampling_loop, latest_rx) = SamplingLoop::new(source, self.config, metrics);
        if let Some(logger) = self.logger {
            sampling_loop = sampling_loop.with_logger(logger);
        }

        Ok((sampling_loop, latest_rx))
    }
}

impl Default for SamplingLoopBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::ManualSource;

    const MIB: u64 = 1024 * 1024;

    #[test]
    fn test_sampling_config_default() {
        let config = SamplingConfig::default();
        assert_eq!(config.interval, Duration::from_millis(100));
        assert_eq!(config.history_capacity, 100);
        assert_eq!(config.thresholds, Thresholds::DEFAULT);
    }

    #[test]
    fn test_builder_missing_source() {
        let result = SamplingLoopBuilder::new().build();
        assert!(result.is_err());
    }

    #[test]
    fn test_builder_applies_settings() {
        let source = Arc::new(ManualSource::with_heap(100, 1));
        let (sampling_loop, _rx) = SamplingLoopBuilder::new()
            .source(source)
            .interval(Duration::from_millis(5))
            .history_capacity(7)
            .build()
            .unwrap();

        assert_eq!(sampling_loop.interval, Duration::from_millis(5));
        assert_eq!(sampling_loop.sampler().history().capacity(), 7);
    }

    #[tokio::test]
    async fn test_tick_publishes_then_dispatches() {
        let source = Arc::new(ManualSource::with_heap(100 * MIB, 80 * MIB));
        let (mut sampling_loop, rx) = SamplingLoopBuilder::new()
            .source(source.clone())
            .build()
            .unwrap();

        assert!(rx.borrow().is_none());

        let sample = sampling_loop.tick().unwrap();

        assert_eq!(sample.threat_level, ThreatLevel::Orange);
        assert_eq!(rx.borrow().as_ref(), Some(&sample));
        assert_eq!(source.collections(), 1);
        assert_eq!(sampling_loop.sampler().history().len(), 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let source = Arc::new(ManualSource::with_heap(100 * MIB, 10 * MIB));
        let (sampling_loop, mut rx) = SamplingLoopBuilder::new()
            .source(source)
            .interval(Duration::from_millis(5))
            .build()
            .unwrap();

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(sampling_loop.run(shutdown_rx));

        rx.changed().await.unwrap();
        assert!(rx.borrow().is_some());

        shutdown_tx.send(()).unwrap();
        let result = handle.await.unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_run_ends_when_source_fails() {
        let source = Arc::new(ManualSource::with_heap(100 * MIB, 10 * MIB));
        source.set_failing(true);
        let (sampling_loop, rx) = SamplingLoopBuilder::new()
            .source(source)
            .interval(Duration::from_millis(5))
            .build()
            .unwrap();

        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let result = sampling_loop.run(shutdown_rx).await;

        assert!(matches!(result, Err(SourceError::Stats(_))));
        assert!(rx.borrow().is_none());
    }

    #[tokio::test]
    async fn test_samples_are_published_in_order() {
        let source = Arc::new(ManualSource::with_heap(100 * MIB, 10 * MIB));
        let (mut sampling_loop, _rx) = SamplingLoopBuilder::new()
            .source(source)
            .build()
            .unwrap();

        for _ in 0..5 {
            sampling_loop.tick().unwrap();
        }

        let timestamps: Vec<i64> = sampling_loop
            .sampler()
            .history()
            .iter()
            .map(|s| s.timestamp)
            .collect();
        let mut sorted = timestamps.clone();
        sorted.sort();
        assert_eq!(timestamps, sorted);
    }
}
