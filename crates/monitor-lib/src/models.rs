//! Core data models for the GC monitor

use crate::threat::ThreatLevel;
use serde::{Deserialize, Serialize};

/// Maximum number of pause durations carried by a [`Sample`]
pub const MAX_SAMPLE_PAUSES: usize = 10;

/// Point-in-time reading of the allocator, as returned by a
/// [`MemorySource`](crate::source::MemorySource)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemorySnapshot {
    /// Heap bytes reserved from the OS
    pub heap_reserved: u64,
    /// Heap bytes currently in use by live allocations
    pub heap_in_use: u64,
    /// Number of live allocations
    pub heap_objects: u64,
    /// Recent collection pause durations in nanoseconds, most recent first.
    /// May contain zero entries for unused slots.
    pub pause_ns: Vec<u64>,
    /// Heap size at which the next collection is expected
    pub next_collection: u64,
}

/// One classified observation produced by the sampler.
///
/// The JSON field names are part of the `/metrics` contract. The zero-valued
/// record returned before the first tick is `Sample::default()`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    pub heap_size: u64,
    pub heap_used: u64,
    pub heap_objects: u64,
    /// Most recent first, at most [`MAX_SAMPLE_PAUSES`], no zero entries
    pub gc_pauses: Vec<u64>,
    pub next_gc: u64,
    /// Bytes per second; negative after memory has been released
    pub allocation_rate: f64,
    pub threat_level: ThreatLevel,
}

impl Sample {
    /// Heap utilization in percent, 0 when nothing is reserved
    pub fn heap_utilization(&self) -> f64 {
        crate::threat::heap_utilization(self.heap_size, self.heap_used)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_json_field_names() {
        let sample = Sample {
            timestamp: 1_700_000_000_000,
            heap_size: 200,
            heap_used: 100,
            heap_objects: 7,
            gc_pauses: vec![1500, 900],
            next_gc: 400,
            allocation_rate: -12.5,
            threat_level: ThreatLevel::Orange,
        };

        let json = serde_json::to_value(&sample).unwrap();
        assert_eq!(json["timestamp"], 1_700_000_000_000i64);
        assert_eq!(json["heap_size"], 200);
        assert_eq!(json["heap_used"], 100);
        assert_eq!(json["heap_objects"], 7);
        assert_eq!(json["gc_pauses"], serde_json::json!([1500, 900]));
        assert_eq!(json["next_gc"], 400);
        assert_eq!(json["allocation_rate"], -12.5);
        assert_eq!(json["threat_level"], "ORANGE");
    }

    #[test]
    fn test_default_sample_is_zero_valued() {
        let json = serde_json::to_value(Sample::default()).unwrap();
        assert_eq!(json["timestamp"], 0);
        assert_eq!(json["heap_used"], 0);
        assert_eq!(json["gc_pauses"], serde_json::json!([]));
        assert_eq!(json["allocation_rate"], 0.0);
        assert_eq!(json["threat_level"], "GREEN");
    }

    #[test]
    fn test_sample_utilization() {
        let sample = Sample {
            heap_size: 200,
            heap_used: 50,
            ..Default::default()
        };
        assert!((sample.heap_utilization() - 25.0).abs() < f64::EPSILON);
    }
}
