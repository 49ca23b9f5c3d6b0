//! Mitigation dispatch
//!
//! Maps a threat level to an escalating action:
//!
//! | level  | action                       | log level |
//! |--------|------------------------------|-----------|
//! | GREEN  | none                         | none      |
//! | YELLOW | none                         | info      |
//! | ORANGE | one forced collection        | warn      |
//! | RED    | two forced collections       | error     |
//!
//! Collections run synchronously on the caller's task with no timeout; a
//! slow collection delays the next sampling tick.

use crate::observability::MonitorMetrics;
use crate::source::MemorySource;
use crate::threat::ThreatLevel;
use std::sync::Arc;
use tracing::{error, info, warn};

/// What the dispatcher did for one threat level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MitigationAction {
    /// Nothing to do
    None,
    /// Reported only
    Observe,
    /// Forced collection cycles attempted
    Collect { cycles: u8 },
}

/// Reacts to threat levels by forcing collections
pub struct Mitigator {
    source: Arc<dyn MemorySource>,
    metrics: MonitorMetrics,
}

impl Mitigator {
    pub fn new(source: Arc<dyn MemorySource>, metrics: MonitorMetrics) -> Self {
        Self { source, metrics }
    }

    /// Number of forced collection cycles for a level
    pub fn cycles_for(level: ThreatLevel) -> u8 {
        match level {
            ThreatLevel::Red => 2,
            ThreatLevel::Orange => 1,
            ThreatLevel::Yellow | ThreatLevel::Green => 0,
        }
    }

    /// Perform the mitigation for `level`
    pub fn dispatch(&self, level: ThreatLevel) -> MitigationAction {
        match level {
            ThreatLevel::Green => return MitigationAction::None,
            ThreatLevel::Yellow => {
                info!(threat_level = %level, "YELLOW alert: monitoring closely");
                return MitigationAction::Observe;
            }
            ThreatLevel::Orange => {
                warn!(threat_level = %level, "ORANGE alert: triggering preemptive collection");
            }
            ThreatLevel::Red => {
                error!(threat_level = %level, "RED alert: triggering emergency collection");
            }
        }

        let cycles = Self::cycles_for(level);
        for cycle in 1..=cycles {
            match self.source.force_collect() {
                Ok(()) => self.metrics.inc_forced_collections(),
                Err(e) => {
                    self.metrics.inc_collection_errors();
                    warn!(error = %e, cycle = cycle, "Forced collection failed");
                }
            }
        }

        MitigationAction::Collect { cycles }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::ManualSource;

    fn mitigator() -> (Mitigator, Arc<ManualSource>) {
        let source = Arc::new(ManualSource::default());
        let mitigator = Mitigator::new(source.clone(), MonitorMetrics::new());
        (mitigator, source)
    }

    #[test]
    fn test_green_does_nothing() {
        let (mitigator, source) = mitigator();
        assert_eq!(mitigator.dispatch(ThreatLevel::Green), MitigationAction::None);
        assert_eq!(source.collections(), 0);
    }

    #[test]
    fn test_yellow_only_observes() {
        let (mitigator, source) = mitigator();
        assert_eq!(
            mitigator.dispatch(ThreatLevel::Yellow),
            MitigationAction::Observe
        );
        assert_eq!(source.collections(), 0);
    }

    #[test]
    fn test_orange_collects_once() {
        let (mitigator, source) = mitigator();
        assert_eq!(
            mitigator.dispatch(ThreatLevel::Orange),
            MitigationAction::Collect { cycles: 1 }
        );
        assert_eq!(source.collections(), 1);
    }

    #[test]
    fn test_red_collects_twice() {
        let (mitigator, source) = mitigator();
        assert_eq!(
            mitigator.dispatch(ThreatLevel::Red),
            MitigationAction::Collect { cycles: 2 }
        );
        assert_eq!(source.collections(), 2);
    }

    #[test]
    fn test_failed_collection_is_not_retried() {
        let (mitigator, source) = mitigator();
        source.set_failing(true);

        let action = mitigator.dispatch(ThreatLevel::Red);

        assert_eq!(action, MitigationAction::Collect { cycles: 2 });
        source.set_failing(false);
        assert_eq!(source.collections(), 0);
    }
}
