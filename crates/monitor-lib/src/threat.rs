//! Threat classification policy
//!
//! A single threshold table shared by the sampler and the load generator.
//! Classification is memoryless: each call looks only at the instantaneous
//! heap utilization and allocation rate. All comparisons are strict, so a
//! value sitting exactly on a threshold classifies as the lower level.

use serde::{Deserialize, Serialize};
use std::fmt;

const MIB: f64 = 1024.0 * 1024.0;

/// Risk of heap exhaustion, ordered from lowest to highest
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum ThreatLevel {
    #[default]
    Green,
    Yellow,
    Orange,
    Red,
}

impl ThreatLevel {
    /// All levels in ascending order
    pub const ALL: [ThreatLevel; 4] = [
        ThreatLevel::Green,
        ThreatLevel::Yellow,
        ThreatLevel::Orange,
        ThreatLevel::Red,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ThreatLevel::Green => "GREEN",
            ThreatLevel::Yellow => "YELLOW",
            ThreatLevel::Orange => "ORANGE",
            ThreatLevel::Red => "RED",
        }
    }

    /// Numeric value used for the Prometheus gauge (0..=3)
    pub fn as_gauge(&self) -> i64 {
        *self as i64
    }
}

impl fmt::Display for ThreatLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trigger levels for one threat level. Either condition is sufficient.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Trigger {
    /// Heap utilization percentage that must be exceeded
    pub utilization_percent: f64,
    /// Allocation rate in bytes per second that must be exceeded
    pub allocation_rate: f64,
}

/// Threshold table for YELLOW, ORANGE and RED
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub yellow: Trigger,
    pub orange: Trigger,
    pub red: Trigger,
}

impl Thresholds {
    /// 60/75/90 % utilization, 20/50/100 MiB/s allocation rate
    pub const DEFAULT: Thresholds = Thresholds {
        yellow: Trigger {
            utilization_percent: 60.0,
            allocation_rate: 20.0 * MIB,
        },
        orange: Trigger {
            utilization_percent: 75.0,
            allocation_rate: 50.0 * MIB,
        },
        red: Trigger {
            utilization_percent: 90.0,
            allocation_rate: 100.0 * MIB,
        },
    };

    /// Trigger for a level; GREEN has none
    pub fn trigger(&self, level: ThreatLevel) -> Option<&Trigger> {
        match level {
            ThreatLevel::Green => None,
            ThreatLevel::Yellow => Some(&self.yellow),
            ThreatLevel::Orange => Some(&self.orange),
            ThreatLevel::Red => Some(&self.red),
        }
    }

    /// Classify from raw heap figures and an allocation rate (bytes/s)
    pub fn classify(&self, heap_reserved: u64, heap_in_use: u64, allocation_rate: f64) -> ThreatLevel {
        let utilization = heap_utilization(heap_reserved, heap_in_use);

        // First match wins, highest level first
        for level in [ThreatLevel::Red, ThreatLevel::Orange, ThreatLevel::Yellow] {
            if let Some(trigger) = self.trigger(level) {
                if utilization > trigger.utilization_percent
                    || allocation_rate > trigger.allocation_rate
                {
                    return level;
                }
            }
        }

        ThreatLevel::Green
    }

    /// Utilization percentage associated with a level (0 for GREEN)
    pub fn utilization_threshold(&self, level: ThreatLevel) -> f64 {
        self.trigger(level)
            .map(|t| t.utilization_percent)
            .unwrap_or(0.0)
    }

    /// True when `utilization` strictly exceeds the level's utilization threshold
    pub fn utilization_exceeds(&self, level: ThreatLevel, utilization: f64) -> bool {
        utilization > self.utilization_threshold(level)
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Heap utilization in percent. A zero reservation yields 0 instead of a
/// division by zero.
pub fn heap_utilization(heap_reserved: u64, heap_in_use: u64) -> f64 {
    if heap_reserved == 0 {
        return 0.0;
    }
    heap_in_use as f64 / heap_reserved as f64 * 100.0
}

/// Classify with the default threshold table
pub fn classify(heap_reserved: u64, heap_in_use: u64, allocation_rate: f64) -> ThreatLevel {
    Thresholds::DEFAULT.classify(heap_reserved, heap_in_use, allocation_rate)
}
