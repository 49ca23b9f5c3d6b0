//! Heap sampling and classification
//!
//! The [`Sampler`] turns raw allocator readings into classified
//! [`Sample`]s, deriving the allocation rate from the previous reading and
//! keeping a bounded history. [`SamplingLoop`] drives it on a fixed cadence
//! and feeds every result to the mitigation dispatcher.

mod r#loop;

pub use r#loop::{SamplingConfig, SamplingLoop, SamplingLoopBuilder};

use crate::history::HistoryBuffer;
use crate::models::{Sample, MAX_SAMPLE_PAUSES};
use crate::source::{MemorySource, SourceError};
use crate::threat::Thresholds;
use std::sync::Arc;

/// Takes classified samples from a memory source
pub struct Sampler {
    source: Arc<dyn MemorySource>,
    thresholds: Thresholds,
    last_heap_used: u64,
    /// Unset until the first sample
    last_timestamp: Option<i64>,
    history: HistoryBuffer,
}

impl Sampler {
    pub fn new(source: Arc<dyn MemorySource>, thresholds: Thresholds, history_capacity: usize) -> Self {
        Self {
            source,
            thresholds,
            last_heap_used: 0,
            last_timestamp: None,
            history: HistoryBuffer::new(history_capacity),
        }
    }

    /// Take a sample stamped with the current wall-clock time
    pub fn sample(&mut self) -> Result<Sample, SourceError> {
        self.sample_at(chrono::Utc::now().timestamp_millis())
    }

    /// Take a sample stamped `now_ms` (milliseconds since the epoch)
    pub fn sample_at(&mut self, now_ms: i64) -> Result<Sample, SourceError> {
        let snapshot = self.source.snapshot()?;

        let allocation_rate = match self.last_timestamp {
            Some(last) => {
                let elapsed_secs = (now_ms - last) as f64 / 1000.0;
                if elapsed_secs > 0.0 {
                    let delta = snapshot.heap_in_use as f64 - self.last_heap_used as f64;
                    delta / elapsed_secs
                } else {
                    0.0
                }
            }
            None => 0.0,
        };

        let gc_pauses: Vec<u64> = snapshot
            .pause_ns
            .iter()
            .copied()
            .filter(|pause| *pause > 0)
            .take(MAX_SAMPLE_PAUSES)
            .collect();

        let threat_level = self.thresholds.classify(
            snapshot.heap_reserved,
            snapshot.heap_in_use,
            allocation_rate,
        );

        let sample = Sample {
            timestamp: now_ms,
            heap_size: snapshot.heap_reserved,
            heap_used: snapshot.heap_in_use,
            heap_objects: snapshot.heap_objects,
            gc_pauses,
            next_gc: snapshot.next_collection,
            allocation_rate,
            threat_level,
        };

        self.history.push(sample.clone());
        self.last_heap_used = snapshot.heap_in_use;
        self.last_timestamp = Some(now_ms);

        Ok(sample)
    }

    pub fn history(&self) -> &HistoryBuffer {
        &self.history
    }

    pub fn latest(&self) -> Option<&Sample> {
        self.history.latest()
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }
}
