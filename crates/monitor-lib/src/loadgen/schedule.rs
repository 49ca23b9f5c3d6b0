//! Escalation schedule for load runs

use crate::threat::{ThreatLevel, Thresholds};
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::time::Duration;

const MIB: usize = 1024 * 1024;

/// One escalation phase
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseSpec {
    /// Threat level this phase tries to provoke
    pub target: ThreatLevel,
    /// Smallest buffer allocated per iteration, in bytes
    pub min_chunk: usize,
    /// Largest buffer allocated per iteration, in bytes
    pub max_chunk: usize,
    /// Iteration cap
    pub max_iterations: usize,
    /// Utilization is checked on every iteration divisible by this
    pub check_every: usize,
    /// Pause between iterations
    pub delay: Duration,
    /// Extra allocation made next to the buffer on every iteration
    pub side: SideAllocation,
}

impl PhaseSpec {
    pub(crate) fn chunk_range(&self) -> RangeInclusive<usize> {
        let max = self.max_chunk.max(self.min_chunk);
        self.min_chunk..=max
    }

    pub(crate) fn is_checkpoint(&self, iteration: usize) -> bool {
        iteration % self.check_every.max(1) == 0
    }
}

/// Secondary allocation shape of a phase
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SideAllocation {
    #[default]
    None,
    /// One random block of `bytes`, kept for the run
    Block { bytes: usize },
    /// A keyed table of `entries` random values, kept for the run
    Table { entries: usize, value_bytes: usize },
    /// `groups` keyed tables built and dropped within the iteration
    Nested {
        groups: usize,
        entries: usize,
        value_bytes: usize,
    },
}

/// How buffers are released after the hold
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CleanupMode {
    /// Drop everything at once
    #[default]
    Immediate,
    /// Release every `stride`-th buffer, pausing `step_delay` between steps
    /// and reporting heap state every `log_every` buffers
    Gradual {
        stride: usize,
        step_delay: Duration,
        log_every: usize,
    },
}

impl CleanupMode {
    pub const GRADUAL: CleanupMode = CleanupMode::Gradual {
        stride: 10,
        step_delay: Duration::from_millis(50),
        log_every: 100,
    };
}

/// Named schedule presets
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadProfile {
    /// Moderate buffers, immediate release
    #[default]
    Standard,
    /// Large buffers with side allocations, gradual release
    Aggressive,
}

/// Configuration for the load generator
#[derive(Debug, Clone)]
pub struct LoadGenConfig {
    pub phases: Vec<PhaseSpec>,
    /// Dwell after the last phase, before cleanup (default: 10 seconds)
    pub hold: Duration,
    pub thresholds: Thresholds,
    pub cleanup: CleanupMode,
}

impl LoadGenConfig {
    /// YELLOW, ORANGE then RED with growing buffers and shrinking delays
    pub fn default_phases() -> Vec<PhaseSpec> {
        vec![
            PhaseSpec {
                target: ThreatLevel::Yellow,
                min_chunk: MIB,
                max_chunk: 10 * MIB,
                max_iterations: 50,
                check_every: 10,
                delay: Duration::from_millis(100),
                side: SideAllocation::None,
            },
            PhaseSpec {
                target: ThreatLevel::Orange,
                min_chunk: 10 * MIB,
                max_chunk: 30 * MIB,
                max_iterations: 100,
                check_every: 20,
                delay: Duration::from_millis(50),
                side: SideAllocation::None,
            },
            PhaseSpec {
                target: ThreatLevel::Red,
                min_chunk: 20 * MIB,
                max_chunk: 70 * MIB,
                max_iterations: 200,
                check_every: 30,
                delay: Duration::from_millis(25),
                side: SideAllocation::None,
            },
        ]
    }

    /// Much larger buffers, faster cadence and side allocations per phase
    pub fn aggressive_phases() -> Vec<PhaseSpec> {
        vec![
            PhaseSpec {
                target: ThreatLevel::Yellow,
                min_chunk: 5 * MIB,
                max_chunk: 50 * MIB,
                max_iterations: 200,
                check_every: 20,
                delay: Duration::from_millis(5),
                side: SideAllocation::Block { bytes: MIB },
            },
            PhaseSpec {
                target: ThreatLevel::Orange,
                min_chunk: 10 * MIB,
                max_chunk: 100 * MIB,
                max_iterations: 300,
                check_every: 25,
                delay: Duration::from_millis(3),
                side: SideAllocation::Table {
                    entries: 10_000,
                    value_bytes: 1024,
                },
            },
            PhaseSpec {
                target: ThreatLevel::Red,
                min_chunk: 50 * MIB,
                max_chunk: 200 * MIB,
                max_iterations: 500,
                check_every: 30,
                delay: Duration::from_millis(1),
                side: SideAllocation::Nested {
                    groups: 1000,
                    entries: 100,
                    value_bytes: 10 * 1024,
                },
            },
        ]
    }

    /// Aggressive schedule with gradual cleanup
    pub fn aggressive() -> Self {
        Self {
            phases: Self::aggressive_phases(),
            cleanup: CleanupMode::GRADUAL,
            ..Self::default()
        }
    }

    pub fn for_profile(profile: LoadProfile) -> Self {
        match profile {
            LoadProfile::Standard => Self::default(),
            LoadProfile::Aggressive => Self::aggressive(),
        }
    }

    pub fn with_hold(mut self, hold: Duration) -> Self {
        self.hold = hold;
        self
    }
}

impl Default for LoadGenConfig {
    fn default() -> Self {
        Self {
            phases: Self::default_phases(),
            hold: Duration::from_secs(10),
            thresholds: Thresholds::default(),
            cleanup: CleanupMode::Immediate,
        }
    }
}

/// Observable state of the load generator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LoadPhase {
    Idle,
    /// Allocating towards `target`; `index` counts from 0
    Escalating { index: usize, target: ThreatLevel },
    Hold,
    Cleanup,
}

impl LoadPhase {
    pub fn is_idle(&self) -> bool {
        matches!(self, LoadPhase::Idle)
    }
}
