//! GC monitor library
//!
//! This crate provides the core functionality for:
//! - Allocator introspection (jemalloc statistics, live allocation counting)
//! - Heap sampling and threat classification
//! - Automatic mitigation through forced collections
//! - Phased synthetic load generation
//! - Prometheus metrics and structured logging

pub mod history;
pub mod loadgen;
pub mod mitigation;
pub mod models;
pub mod observability;
pub mod sampler;
pub mod source;
pub mod threat;

pub use history::HistoryBuffer;
pub use loadgen::{
    LoadGenConfig, LoadGenError, LoadGenerator, LoadPhase, LoadProfile, LoadRunHandle, LoadRunReport,
};
pub use mitigation::{MitigationAction, Mitigator};
pub use models::*;
pub use observability::{MonitorMetrics, StructuredLogger};
pub use sampler::{Sampler, SamplingLoop, SamplingLoopBuilder};
pub use source::{MemorySource, SourceError};
pub use threat::{classify, ThreatLevel, Thresholds};

#[cfg(test)]
#[global_allocator]
static TEST_ALLOCATOR: source::CountingAllocator<tikv_jemallocator::Jemalloc> =
    source::CountingAllocator::new(tikv_jemallocator::Jemalloc);
