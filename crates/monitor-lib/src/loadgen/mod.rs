//! Phased synthetic load generator
//!
//! Escalates heap pressure through a multi-phase open-loop schedule:
//!
//! ```text
//! IDLE → PHASE_1 (YELLOW) → PHASE_2 (ORANGE) → PHASE_3 (RED) → HOLD → CLEANUP → IDLE
//! ```
//!
//! Each phase allocates randomly sized buffers filled with random bytes and
//! keeps them alive for the whole run, optionally with side allocations
//! (blocks, keyed tables, or nested tables dropped within the iteration).
//! Every few iterations it reads heap utilization from the memory source and
//! moves on as soon as the phase's target threshold is exceeded. After a hold
//! period the buffers are released, at once or every `stride`-th at a time,
//! and two collections are forced.
//!
//! Only one run may be active at a time; a second `start()` is rejected.

mod pressure;
mod schedule;

pub use schedule::{CleanupMode, LoadGenConfig, LoadPhase, LoadProfile, PhaseSpec, SideAllocation};

use pressure::PressureSet;

use crate::observability::{MonitorMetrics, StructuredLogger};
use crate::source::MemorySource;
use crate::threat::{heap_utilization, ThreatLevel};
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Errors raised by the load generator
#[derive(Debug, Error)]
pub enum LoadGenError {
    /// A run is already in progress
    #[error("load test already running")]
    AlreadyRunning,

    /// The run task panicked or was aborted
    #[error("load test task failed: {0}")]
    TaskFailed(String),
}

/// Result of one escalation phase
#[derive(Debug, Clone, Default, Serialize)]
pub struct PhaseOutcome {
    pub index: usize,
    pub target: ThreatLevel,
    pub iterations: usize,
    /// Bytes kept alive until cleanup
    pub bytes_allocated: u64,
    /// Bytes built and dropped within an iteration
    pub transient_bytes: u64,
    pub target_reached: bool,
}

/// Summary of a completed load run
#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadRunReport {
    pub phases: Vec<PhaseOutcome>,
    /// Highest utilization observed at a checkpoint, in percent
    pub peak_utilization: f64,
    /// Whether the hold period ran to completion
    pub held: bool,
    pub bytes_released: u64,
    /// Steps taken by a gradual cleanup
    pub release_steps: usize,
    /// Forced collections that succeeded during cleanup
    pub collections: u8,
    pub cancelled: bool,
}

impl LoadRunReport {
    pub fn bytes_allocated(&self) -> u64 {
        self.phases.iter().map(|p| p.bytes_allocated).sum()
    }
}

struct Inner {
    source: Arc<dyn MemorySource>,
    config: LoadGenConfig,
    active: AtomicBool,
    phase_tx: watch::Sender<LoadPhase>,
    metrics: MonitorMetrics,
    logger: StructuredLogger,
}

/// Starts and tracks load runs. Cheap to clone; clones share the same
/// active flag.
#[derive(Clone)]
pub struct LoadGenerator {
    inner: Arc<Inner>,
}

impl LoadGenerator {
    pub fn new(source: Arc<dyn MemorySource>, config: LoadGenConfig, metrics: MonitorMetrics) -> Self {
        Self::with_logger(source, config, metrics, StructuredLogger::new("gc-monitor"))
    }

    pub fn with_logger(
        source: Arc<dyn MemorySource>,
        config: LoadGenConfig,
        metrics: MonitorMetrics,
        logger: StructuredLogger,
    ) -> Self {
        let (phase_tx, _) = watch::channel(LoadPhase::Idle);
        Self {
            inner: Arc::new(Inner {
                source,
                config,
                active: AtomicBool::new(false),
                phase_tx,
                metrics,
                logger,
            }),
        }
    }

    /// Start a run in the background.
    ///
    /// Must be called from within a tokio runtime. Returns
    /// [`LoadGenError::AlreadyRunning`] if a run is in progress. Dropping the
    /// returned handle detaches the run.
    pub fn start(&self) -> Result<LoadRunHandle, LoadGenError> {
        if self
            .inner
            .active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(LoadGenError::AlreadyRunning);
        }

        let guard = ActiveGuard {
            inner: self.inner.clone(),
        };
        self.inner.metrics.inc_load_runs();
        self.inner.metrics.set_load_run_active(true);
        self.inner
            .logger
            .log_load_run_started(self.inner.config.phases.len());

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let inner = self.inner.clone();
        let join = tokio::spawn(async move {
            let report = run_schedule(&inner, cancel_rx).await;
            drop(guard);
            report
        });

        Ok(LoadRunHandle {
            cancel: cancel_tx,
            join,
        })
    }

    /// True while a run is in progress
    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::Acquire)
    }

    /// Current state of the generator
    pub fn phase(&self) -> LoadPhase {
        *self.inner.phase_tx.borrow()
    }

    /// Watch state transitions
    pub fn subscribe(&self) -> watch::Receiver<LoadPhase> {
        self.inner.phase_tx.subscribe()
    }

    pub fn config(&self) -> &LoadGenConfig {
        &self.inner.config
    }
}

/// Releases the active flag when a run ends, including on abort or panic
struct ActiveGuard {
    inner: Arc<Inner>,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.inner.phase_tx.send_replace(LoadPhase::Idle);
        self.inner.active.store(false, Ordering::Release);
        self.inner.metrics.set_load_run_active(false);
    }
}

/// Handle on a running load test
pub struct LoadRunHandle {
    cancel: watch::Sender<bool>,
    join: JoinHandle<LoadRunReport>,
}

impl LoadRunHandle {
    /// Skip the rest of the schedule and go straight to cleanup
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    /// Wait for the run to finish, cleanup included
    pub async fn wait(self) -> Result<LoadRunReport, LoadGenError> {
        let LoadRunHandle { cancel, join } = self;
        let result = join
            .await
            .map_err(|e| LoadGenError::TaskFailed(e.to_string()));
        drop(cancel);
        result
    }
}

async fn run_schedule(inner: &Inner, mut cancel: watch::Receiver<bool>) -> LoadRunReport {
    let config = &inner.config;
    let mut rng = StdRng::from_entropy();
    // Every buffer of the run; released at cleanup
    let mut pressure = PressureSet::default();
    let mut report = LoadRunReport::default();

    for (index, phase) in config.phases.iter().enumerate() {
        inner.phase_tx.send_replace(LoadPhase::Escalating {
            index,
            target: phase.target,
        });
        info!(
            phase = index + 1,
            target = %phase.target,
            threshold = config.thresholds.utilization_threshold(phase.target),
            "Load phase started"
        );

        let mut outcome = PhaseOutcome {
            index,
            target: phase.target,
            ..Default::default()
        };
        let mut interrupted = false;

        for iteration in 0..phase.max_iterations {
            let size = rng.gen_range(phase.chunk_range());
            let seed = rng.next_u64();
            let side = phase.side;
            let allocation = match tokio::task::spawn_blocking(move || {
                pressure::allocate(size, side, iteration, seed)
            })
            .await
            {
                Ok(allocation) => allocation,
                Err(e) => {
                    warn!(error = %e, "Buffer allocation task failed, ending escalation");
                    interrupted = true;
                    break;
                }
            };
            outcome.iterations += 1;
            outcome.transient_bytes += allocation.transient_bytes;
            outcome.bytes_allocated += pressure.retain(allocation);

            if phase.is_checkpoint(iteration) {
                match inner.source.snapshot() {
                    Ok(snapshot) => {
                        let utilization =
                            heap_utilization(snapshot.heap_reserved, snapshot.heap_in_use);
                        report.peak_utilization = report.peak_utilization.max(utilization);

                        debug!(
                            phase = index + 1,
                            iteration = iteration,
                            heap_mb = snapshot.heap_in_use / 1024 / 1024,
                            utilization = utilization,
                            objects = snapshot.heap_objects,
                            "Load phase progress"
                        );

                        if config.thresholds.utilization_exceeds(phase.target, utilization) {
                            info!(
                                phase = index + 1,
                                target = %phase.target,
                                utilization = utilization,
                                "Target threat level reached"
                            );
                            outcome.target_reached = true;
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "Failed to read heap utilization"),
                }
            }

            if pause(phase.delay, &mut cancel).await {
                report.cancelled = true;
                interrupted = true;
                break;
            }
        }

        inner.logger.log_phase_completed(
            index + 1,
            phase.target,
            outcome.iterations,
            outcome.bytes_allocated,
            outcome.target_reached,
        );
        report.phases.push(outcome);

        if interrupted {
            break;
        }
    }

    if !report.cancelled {
        inner.phase_tx.send_replace(LoadPhase::Hold);
        info!(hold_secs = config.hold.as_secs(), "Holding pressure");
        if pause(config.hold, &mut cancel).await {
            report.cancelled = true;
        } else {
            report.held = true;
        }
    }

    inner.phase_tx.send_replace(LoadPhase::Cleanup);
    report.bytes_released = pressure.bytes();

    if let CleanupMode::Gradual {
        stride,
        step_delay,
        log_every,
    } = config.cleanup
    {
        if !report.cancelled {
            let (steps, cancelled) =
                release_gradually(inner, &mut pressure, stride, step_delay, log_every, &mut cancel)
                    .await;
            report.release_steps = steps;
            report.cancelled = cancelled;
        }
    }
    drop(pressure);

    for _ in 0..2 {
        match inner.source.force_collect() {
            Ok(()) => report.collections += 1,
            Err(e) => warn!(error = %e, "Forced collection after load run failed"),
        }
    }

    match inner.source.snapshot() {
        Ok(snapshot) => info!(
            heap_mb = snapshot.heap_in_use / 1024 / 1024,
            utilization = heap_utilization(snapshot.heap_reserved, snapshot.heap_in_use),
            objects = snapshot.heap_objects,
            collections = report.collections,
            "Final heap statistics"
        ),
        Err(e) => warn!(error = %e, "Failed to read final heap statistics"),
    }

    inner
        .logger
        .log_load_run_completed(report.bytes_released, report.cancelled);

    report
}

/// Release every `stride`-th buffer with a pause between steps. Returns the
/// number of steps taken and whether the run was cancelled meanwhile.
async fn release_gradually(
    inner: &Inner,
    pressure: &mut PressureSet,
    stride: usize,
    step_delay: Duration,
    log_every: usize,
    cancel: &mut watch::Receiver<bool>,
) -> (usize, bool) {
    let stride = stride.max(1);
    let total = pressure.len();
    let mut steps = 0;

    info!(buffers = total, stride = stride, "Gradual cleanup started");

    for index in (0..total).step_by(stride) {
        let freed = pressure.release_step(index, stride);
        steps += 1;

        if log_every > 0 && index % log_every == 0 {
            match inner.source.snapshot() {
                Ok(snapshot) => info!(
                    iteration = index,
                    freed_bytes = freed,
                    heap_mb = snapshot.heap_in_use / 1024 / 1024,
                    utilization = heap_utilization(snapshot.heap_reserved, snapshot.heap_in_use),
                    objects = snapshot.heap_objects,
                    "Gradual cleanup progress"
                ),
                Err(e) => warn!(error = %e, "Failed to read heap during cleanup"),
            }
        }

        if pause(step_delay, cancel).await {
            return (steps, true);
        }
    }

    (steps, false)
}

/// Sleep for `delay`; returns true if the run was cancelled meanwhile
async fn pause(delay: Duration, cancel: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        biased;
        _ = cancelled(cancel) => true,
        _ = tokio::time::sleep(delay) => false,
    }
}

/// Resolves once cancellation is requested. A dropped handle never cancels.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MemorySnapshot;
    use crate::source::{ManualSource, SourceError};
    use std::sync::atomic::AtomicU64;

    fn tiny_config(max_iterations: usize, check_every: usize, hold: Duration) -> LoadGenConfig {
        let phases = LoadGenConfig::default_phases()
            .into_iter()
            .map(|phase| PhaseSpec {
                min_chunk: 16,
                max_chunk: 64,
                max_iterations,
                check_every,
                delay: Duration::from_millis(1),
                ..phase
            })
            .collect();

        LoadGenConfig {
            phases,
            hold,
            ..Default::default()
        }
    }

    fn generator(source: Arc<dyn MemorySource>, config: LoadGenConfig) -> LoadGenerator {
        LoadGenerator::new(source, config, MonitorMetrics::new())
    }

    /// Utilization rises by 30 points on every snapshot
    struct RampSource {
        calls: AtomicU64,
        collections: AtomicU64,
    }

    impl MemorySource for RampSource {
        fn snapshot(&self) -> Result<MemorySnapshot, SourceError> {
            let calls = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(MemorySnapshot {
                heap_reserved: 100,
                heap_in_use: calls * 30,
                ..Default::default()
            })
        }

        fn force_collect(&self) -> Result<(), SourceError> {
            self.collections.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_phases_exit_early_when_target_exceeded() {
        let source = Arc::new(ManualSource::with_heap(100, 95));
        let generator = generator(source.clone(), tiny_config(10, 5, Duration::ZERO));

        let report = generator.start().unwrap().wait().await.unwrap();

        assert_eq!(report.phases.len(), 3);
        for phase in &report.phases {
            assert_eq!(phase.iterations, 1);
            assert!(phase.target_reached);
        }
        assert!(report.held);
        assert!(!report.cancelled);
        assert_eq!(report.collections, 2);
        assert_eq!(source.collections(), 2);
        assert_eq!(report.bytes_released, report.bytes_allocated());
        assert!((report.peak_utilization - 95.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_phases_run_to_cap_below_threshold() {
        let source = Arc::new(ManualSource::with_heap(100, 10));
        let generator = generator(source, tiny_config(4, 2, Duration::ZERO));

        let report = generator.start().unwrap().wait().await.unwrap();

        assert_eq!(report.phases.len(), 3);
        for phase in &report.phases {
            assert_eq!(phase.iterations, 4);
            assert!(!phase.target_reached);
            assert!(phase.bytes_allocated >= 4 * 16);
            assert!(phase.bytes_allocated <= 4 * 64);
        }
    }

    #[tokio::test]
    async fn test_checkpoint_threshold_is_strict() {
        let source = Arc::new(RampSource {
            calls: AtomicU64::new(0),
            collections: AtomicU64::new(0),
        });
        let generator = generator(source.clone(), tiny_config(10, 2, Duration::ZERO));

        let report = generator.start().unwrap().wait().await.unwrap();

        // Phase 1 sees 30 % at iteration 0, exactly 60 % at 2 and 90 % at 4
        assert_eq!(report.phases[0].iterations, 5);
        assert!(report.phases[0].target_reached);
        // Later phases exceed their targets on the first checkpoint
        assert_eq!(report.phases[1].iterations, 1);
        assert_eq!(report.phases[2].iterations, 1);
        assert_eq!(source.collections.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_second_start_is_rejected_while_active() {
        let source = Arc::new(ManualSource::with_heap(100, 95));
        let generator = generator(source, tiny_config(1, 1, Duration::from_millis(50)));

        let first = generator.start().unwrap();
        assert!(generator.is_active());

        let second = generator.start();
        assert!(matches!(second, Err(LoadGenError::AlreadyRunning)));

        first.wait().await.unwrap();
        assert!(!generator.is_active());
        assert_eq!(generator.phase(), LoadPhase::Idle);

        // A new run may start once the previous one has finished
        let third = generator.start().unwrap();
        third.wait().await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_during_hold_still_cleans_up() {
        let source = Arc::new(ManualSource::with_heap(100, 95));
        let generator = generator(source.clone(), tiny_config(1, 1, Duration::from_secs(600)));
        let mut phases = generator.subscribe();

        let handle = generator.start().unwrap();
        phases
            .wait_for(|phase| *phase == LoadPhase::Hold)
            .await
            .unwrap();

        handle.cancel();
        let report = handle.wait().await.unwrap();

        assert!(report.cancelled);
        assert!(!report.held);
        assert_eq!(report.phases.len(), 3);
        assert_eq!(source.collections(), 2);
        assert!(!generator.is_active());
    }

    #[tokio::test]
    async fn test_detached_run_still_completes() {
        let source = Arc::new(ManualSource::with_heap(100, 95));
        let generator = generator(source.clone(), tiny_config(1, 1, Duration::ZERO));

        drop(generator.start().unwrap());

        while generator.is_active() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert!(generator.phase().is_idle());
        assert_eq!(source.collections(), 2);
    }

    #[tokio::test]
    async fn test_source_failures_do_not_abort_run() {
        let source = Arc::new(ManualSource::with_heap(100, 95));
        source.set_failing(true);
        let generator = generator(source, tiny_config(3, 1, Duration::ZERO));

        let report = generator.start().unwrap().wait().await.unwrap();

        for phase in &report.phases {
            assert_eq!(phase.iterations, 3);
            assert!(!phase.target_reached);
        }
        assert_eq!(report.collections, 0);
    }

    /// Aggressive schedule shrunk to test sizes
    fn tiny_aggressive_config(max_iterations: usize) -> LoadGenConfig {
        let sides = [
            SideAllocation::Block { bytes: 8 },
            SideAllocation::Table {
                entries: 4,
                value_bytes: 8,
            },
            SideAllocation::Nested {
                groups: 2,
                entries: 2,
                value_bytes: 8,
            },
        ];
        let phases = LoadGenConfig::aggressive_phases()
            .into_iter()
            .zip(sides)
            .map(|(phase, side)| PhaseSpec {
                min_chunk: 16,
                max_chunk: 64,
                max_iterations,
                delay: Duration::from_millis(1),
                side,
                ..phase
            })
            .collect();

        LoadGenConfig {
            phases,
            hold: Duration::ZERO,
            cleanup: CleanupMode::Gradual {
                stride: 2,
                step_delay: Duration::from_millis(1),
                log_every: 2,
            },
            ..LoadGenConfig::aggressive()
        }
    }

    #[tokio::test]
    async fn test_aggressive_run_releases_gradually() {
        let source = Arc::new(ManualSource::with_heap(100, 10));
        let generator = generator(source.clone(), tiny_aggressive_config(3));
        assert!(matches!(
            generator.config().cleanup,
            CleanupMode::Gradual { stride: 2, .. }
        ));

        let report = generator.start().unwrap().wait().await.unwrap();

        assert_eq!(report.phases.len(), 3);
        assert!(report.phases.iter().all(|p| p.iterations == 3));
        // Side blocks and tables are retained on top of the chunks
        assert!(report.phases[0].bytes_allocated >= 3 * (16 + 8));
        assert!(report.phases[1].bytes_allocated >= 3 * (16 + 4 * 8));
        assert!(report.phases[2].transient_bytes >= 3 * 2 * 2 * 8);
        assert_eq!(report.bytes_released, report.bytes_allocated());
        // Nine buffers at stride 2: indices 0, 2, 4, 6, 8
        assert_eq!(report.release_steps, 5);
        assert!(!report.cancelled);
        assert_eq!(report.collections, 2);
        assert_eq!(source.collections(), 2);
    }

    #[tokio::test]
    async fn test_immediate_cleanup_takes_no_release_steps() {
        let source = Arc::new(ManualSource::with_heap(100, 10));
        let generator = generator(source, tiny_config(2, 1, Duration::ZERO));
        assert_eq!(generator.config().cleanup, CleanupMode::Immediate);

        let report = generator.start().unwrap().wait().await.unwrap();

        assert_eq!(report.release_steps, 0);
        assert_eq!(report.collections, 2);
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl CapturedLogs {
        fn count(&self, needle: &str) -> usize {
            String::from_utf8_lossy(&self.0.lock().unwrap())
                .matches(needle)
                .count()
        }
    }

    #[tokio::test]
    async fn test_cancelled_phase_still_reports_completion() {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let source = Arc::new(ManualSource::with_heap(100, 10));
        let mut config = tiny_config(1000, 1000, Duration::ZERO);
        for phase in &mut config.phases {
            phase.delay = Duration::from_secs(600);
        }
        let generator = generator(source.clone(), config);
        let mut phases = generator.subscribe();

        let handle = generator.start().unwrap();
        phases
            .wait_for(|phase| matches!(phase, LoadPhase::Escalating { index: 0, .. }))
            .await
            .unwrap();
        handle.cancel();
        let report = handle.wait().await.unwrap();

        assert!(report.cancelled);
        assert_eq!(report.phases.len(), 1);
        assert_eq!(report.phases[0].iterations, 1);
        assert_eq!(logs.count("load_phase_completed"), 1);
        assert_eq!(source.collections(), 2);
    }
}
