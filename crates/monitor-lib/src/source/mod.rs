//! Memory snapshot sources
//!
//! A [`MemorySource`] is the monitor's only view of the allocator. The
//! production implementation reads jemalloc statistics; [`ManualSource`]
//! returns whatever reading the caller last stored and is used for tests and
//! embedding code that wants deterministic readings.

mod counting;
mod jemalloc;

pub use counting::CountingAllocator;
pub use jemalloc::{JemallocSource, PauseLog, DEFAULT_GC_PERCENT, MIN_COLLECTION_TARGET};

use crate::models::MemorySnapshot;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use thiserror::Error;

/// Errors raised by memory sources
#[derive(Debug, Error)]
pub enum SourceError {
    /// Allocator statistics could not be read
    #[error("allocator statistics unavailable: {0}")]
    Stats(String),

    /// A forced collection did not complete
    #[error("forced collection failed: {0}")]
    Collect(String),
}

/// Trait for allocator introspection implementations
///
/// Both calls are synchronous. `force_collect` may block for the duration of
/// a full pass and must be safe to call twice in a row.
pub trait MemorySource: Send + Sync {
    /// Read the current allocator state
    fn snapshot(&self) -> Result<MemorySnapshot, SourceError>;

    /// Run one collection cycle now
    fn force_collect(&self) -> Result<(), SourceError>;
}

/// Memory source driven by the caller
#[derive(Debug, Default)]
pub struct ManualSource {
    snapshot: Mutex<MemorySnapshot>,
    collections: AtomicU64,
    failing: Mutex<bool>,
}

impl ManualSource {
    pub fn new(snapshot: MemorySnapshot) -> Self {
        Self {
            snapshot: Mutex::new(snapshot),
            ..Default::default()
        }
    }

    /// Shorthand for a reading with only heap figures set
    pub fn with_heap(heap_reserved: u64, heap_in_use: u64) -> Self {
        Self::new(MemorySnapshot {
            heap_reserved,
            heap_in_use,
            ..Default::default()
        })
    }

    /// Replace the reading returned by subsequent snapshots
    pub fn set(&self, snapshot: MemorySnapshot) {
        *self.snapshot.lock().unwrap_or_else(|e| e.into_inner()) = snapshot;
    }

    /// Update only the heap figures
    pub fn set_heap(&self, heap_reserved: u64, heap_in_use: u64) {
        let mut snapshot = self.snapshot.lock().unwrap_or_else(|e| e.into_inner());
        snapshot.heap_reserved = heap_reserved;
        snapshot.heap_in_use = heap_in_use;
    }

    /// Make every subsequent call fail (or succeed again)
    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap_or_else(|e| e.into_inner()) = failing;
    }

    /// Number of completed forced collections
    pub fn collections(&self) -> u64 {
        self.collections.load(Ordering::SeqCst)
    }

    fn is_failing(&self) -> bool {
        *self.failing.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl MemorySource for ManualSource {
    fn snapshot(&self) -> Result<MemorySnapshot, SourceError> {
        if self.is_failing() {
            return Err(SourceError::Stats("manual source set to fail".to_string()));
        }
        Ok(self.snapshot.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    fn force_collect(&self) -> Result<(), SourceError> {
        if self.is_failing() {
            return Err(SourceError::Collect("manual source set to fail".to_string()));
        }
        self.collections.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_source_returns_stored_reading() {
        let source = ManualSource::with_heap(200, 50);
        let snapshot = source.snapshot().unwrap();
        assert_eq!(snapshot.heap_reserved, 200);
        assert_eq!(snapshot.heap_in_use, 50);

        source.set_heap(400, 300);
        let snapshot = source.snapshot().unwrap();
        assert_eq!(snapshot.heap_reserved, 400);
        assert_eq!(snapshot.heap_in_use, 300);
    }

    #[test]
    fn test_manual_source_counts_collections() {
        let source = ManualSource::default();
        source.force_collect().unwrap();
        source.force_collect().unwrap();
        assert_eq!(source.collections(), 2);
    }

    #[test]
    fn test_manual_source_failure_mode() {
        let source = ManualSource::default();
        source.set_failing(true);
        assert!(matches!(source.snapshot(), Err(SourceError::Stats(_))));
        assert!(matches!(source.force_collect(), Err(SourceError::Collect(_))));
        assert_eq!(source.collections(), 0);

        source.set_failing(false);
        assert!(source.snapshot().is_ok());
    }
}
