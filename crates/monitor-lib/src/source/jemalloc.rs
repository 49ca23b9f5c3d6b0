//! jemalloc-backed memory source
//!
//! Heap figures come from jemalloc's statistics (`stats.mapped` as the
//! reservation, `stats.allocated` as bytes in use). A forced collection
//! purges the dirty pages of every arena. jemalloc has no pacer of its own,
//! so the source tracks the pause durations of its own purges and derives
//! the next-collection target from the heap left after the last one.

use super::{MemorySource, SourceError};
use crate::models::MemorySnapshot;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tikv_jemalloc_ctl::{epoch, stats};
use tracing::{debug, warn};

/// Target growth over the post-collection heap, in percent
pub const DEFAULT_GC_PERCENT: u64 = 100;

/// Floor for the next-collection target (4 MiB)
pub const MIN_COLLECTION_TARGET: u64 = 4 * 1024 * 1024;

/// Number of pause durations retained
const PAUSE_LOG_CAPACITY: usize = 256;

/// `arena.<MALLCTL_ARENAS_ALL>.purge`
const PURGE_ALL_ARENAS: &[u8] = b"arena.4096.purge\0";

/// Recent pause durations, newest first
#[derive(Debug, Clone, Default)]
pub struct PauseLog {
    pauses: VecDeque<u64>,
}

impl PauseLog {
    pub fn record(&mut self, pause: Duration) {
        let nanos = u64::try_from(pause.as_nanos()).unwrap_or(u64::MAX);
        self.pauses.push_front(nanos);
        self.pauses.truncate(PAUSE_LOG_CAPACITY);
    }

    pub fn to_vec(&self) -> Vec<u64> {
        self.pauses.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.pauses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pauses.is_empty()
    }
}

#[derive(Debug, Default)]
struct PacerState {
    pauses: PauseLog,
    /// Heap in use right after the last forced collection
    live_after_collection: Option<u64>,
}

/// Reads allocator state from jemalloc
pub struct JemallocSource {
    gc_percent: u64,
    live_objects: Box<dyn Fn() -> u64 + Send + Sync>,
    pacer: Mutex<PacerState>,
}

impl JemallocSource {
    pub fn new(gc_percent: u64) -> Self {
        Self {
            gc_percent,
            live_objects: Box::new(|| 0),
            pacer: Mutex::new(PacerState::default()),
        }
    }

    /// Set the function reporting the live allocation count, usually
    /// [`CountingAllocator::live_objects`](super::CountingAllocator::live_objects)
    /// on the installed global allocator.
    pub fn with_object_count<F>(mut self, live_objects: F) -> Self
    where
        F: Fn() -> u64 + Send + Sync + 'static,
    {
        self.live_objects = Box::new(live_objects);
        self
    }

    fn read_heap() -> Result<(u64, u64), SourceError> {
        // Statistics are cached by jemalloc until the epoch advances
        epoch::advance().map_err(|e| SourceError::Stats(e.to_string()))?;
        let mapped = stats::mapped::read().map_err(|e| SourceError::Stats(e.to_string()))?;
        let allocated = stats::allocated::read().map_err(|e| SourceError::Stats(e.to_string()))?;
        Ok((mapped as u64, allocated as u64))
    }

    fn next_target(&self, reference: u64) -> u64 {
        let target = reference.saturating_mul(100 + self.gc_percent) / 100;
        target.max(MIN_COLLECTION_TARGET)
    }

    /// Record a completed purge. The next-collection target keeps its old
    /// reference when the heap could not be re-read.
    fn record_collection(&self, pause: Duration, heap_after: Result<u64, SourceError>) {
        let mut pacer = self.pacer.lock().unwrap_or_else(|e| e.into_inner());
        pacer.pauses.record(pause);

        match heap_after {
            Ok(heap_in_use) => {
                pacer.live_after_collection = Some(heap_in_use);
                debug!(
                    pause_us = pause.as_micros() as u64,
                    heap_in_use = heap_in_use,
                    "Purged allocator arenas"
                );
            }
            Err(e) => warn!(
                pause_us = pause.as_micros() as u64,
                error = %e,
                "Purged allocator arenas but could not re-read the heap"
            ),
        }
    }

    fn purge_all_arenas() -> Result<(), SourceError> {
        // SAFETY: the name is NUL-terminated and the purge control takes no
        // input or output, so all pointer arguments are null.
        let code = unsafe {
            tikv_jemalloc_sys::mallctl(
                PURGE_ALL_ARENAS.as_ptr().cast(),
                std::ptr::null_mut(),
                std::ptr::null_mut(),
                std::ptr::null_mut(),
                0,
            )
        };
        if code != 0 {
            return Err(SourceError::Collect(format!("mallctl returned {}", code)));
        }
        Ok(())
    }
}

impl Default for JemallocSource {
    fn default() -> Self {
        Self::new(DEFAULT_GC_PERCENT)
    }
}

impl MemorySource for JemallocSource {
    fn snapshot(&self) -> Result<MemorySnapshot, SourceError> {
        let (heap_reserved, heap_in_use) = Self::read_heap()?;
        let pacer = self.pacer.lock().unwrap_or_else(|e| e.into_inner());

        let reference = pacer.live_after_collection.unwrap_or(heap_in_use);

        Ok(MemorySnapshot {
            heap_reserved,
            heap_in_use,
            heap_objects: (self.live_objects)(),
            pause_ns: pacer.pauses.to_vec(),
            next_collection: self.next_target(reference),
        })
    }

    fn force_collect(&self) -> Result<(), SourceError> {
        let started = Instant::now();
        Self::purge_all_arenas()?;
        let pause = started.elapsed();

        self.record_collection(pause, Self::read_heap().map(|(_, in_use)| in_use));
        Ok(())
    }
}
