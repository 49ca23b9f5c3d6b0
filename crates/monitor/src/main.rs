//! GC Monitor - heap pressure monitor
//!
//! Samples the process allocator every tick, classifies the threat of heap
//! exhaustion, forces collections when it climbs, and serves the latest
//! sample over HTTP. An on-demand load test drives the heap through every
//! threat level.

use anyhow::Result;
use gc_monitor::{api, config};
use monitor_lib::{
    loadgen::CleanupMode,
    source::{CountingAllocator, JemallocSource},
    LoadGenConfig, LoadGenerator, MemorySource, MonitorMetrics, SamplingLoopBuilder,
    StructuredLogger,
};
use std::sync::Arc;
use tikv_jemallocator::Jemalloc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[global_allocator]
static GLOBAL: CountingAllocator<Jemalloc> = CountingAllocator::new(Jemalloc);

const MONITOR_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting gc-monitor");

    // Load configuration
    let config = config::MonitorConfig::load()?;
    info!(
        instance = %config.instance_name,
        loadtest_enabled = config.loadtest_enabled,
        "Monitor configured"
    );

    let metrics = MonitorMetrics::new();
    let logger = StructuredLogger::new(&config.instance_name);

    let source: Arc<dyn MemorySource> = Arc::new(
        JemallocSource::new(config.gc_percent).with_object_count(|| GLOBAL.live_objects()),
    );

    let (sampling_loop, latest_rx) = SamplingLoopBuilder::new()
        .source(source.clone())
        .interval(config.sample_interval())
        .history_capacity(config.history_capacity)
        .metrics(metrics.clone())
        .logger(logger.clone())
        .build()?;

    let load_generator = config.loadtest_enabled.then(|| {
        LoadGenerator::with_logger(
            source.clone(),
            LoadGenConfig::for_profile(config.load_profile).with_hold(config.load_hold()),
            metrics.clone(),
            logger.clone(),
        )
    });
    if let Some(generator) = &load_generator {
        let load_config = generator.config();
        info!(
            profile = ?config.load_profile,
            phases = load_config.phases.len(),
            hold_secs = load_config.hold.as_secs(),
            gradual_cleanup = matches!(load_config.cleanup, CleanupMode::Gradual { .. }),
            "Load generator ready"
        );
    }

    let app_state = Arc::new(api::AppState::new(latest_rx, load_generator, metrics));

    let (shutdown_tx, _) = broadcast::channel(1);
    let sampler_handle = tokio::spawn(sampling_loop.run(shutdown_tx.subscribe()));

    logger.log_startup(MONITOR_VERSION, config.port, config.sample_interval_ms);

    let shutdown_signal = {
        let shutdown_tx = shutdown_tx.clone();
        let logger = logger.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for SIGINT, running until killed");
                std::future::pending::<()>().await;
            }
            logger.log_shutdown("SIGINT received");
            let _ = shutdown_tx.send(());
        }
    };

    let served = api::serve(config.port, app_state, shutdown_signal).await;

    // The sampler also stops when the server fails on its own
    let _ = shutdown_tx.send(());
    match sampler_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "Sampling loop ended with an error"),
        Err(e) => error!(error = %e, "Sampling loop task failed"),
    }

    info!("Shutting down");
    served
}
