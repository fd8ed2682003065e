//! Operation phases.
//!
//! Every controller operation walks the same ordered phases. The tracker
//! refuses to move backwards, so traffic is never committed before the
//! gate has run and old nodes are never dropped before the commit.

use serde::Serialize;
use tracing::{debug, info, warn};

/// Where an operation currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationPhase {
    /// Nothing running.
    Idle,
    /// Operation lock held.
    Locked,
    /// Launching new nodes.
    Provisioning,
    /// Waiting for new nodes to answer the health check.
    Gating,
    /// Pointing traffic at the new nodes.
    TrafficCommit,
    /// Removing old nodes from traffic or reclaiming resources.
    Decommission,
}

/// Tracks the phase of one running operation.
#[derive(Debug)]
pub struct PhaseTracker {
    operation: &'static str,
    current: OperationPhase,
    reached: OperationPhase,
}

impl PhaseTracker {
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            current: OperationPhase::Idle,
            reached: OperationPhase::Idle,
        }
    }

    pub fn current(&self) -> OperationPhase {
        self.current
    }

    /// Move to `next`. Returns false and stays put when `next` would go
    /// backwards or repeat the current phase.
    pub fn advance(&mut self, next: OperationPhase) -> bool {
        if next <= self.current {
            warn!(
                operation = self.operation,
                current = ?self.current,
                requested = ?next,
                "ignoring backwards phase transition"
            );
            return false;
        }
        debug!(operation = self.operation, from = ?self.current, to = ?next, "phase transition");
        self.current = next;
        self.reached = next;
        true
    }

    /// End the operation and return the furthest phase it reached.
    pub fn finish(&mut self) -> OperationPhase {
        info!(operation = self.operation, reached = ?self.reached, "operation finished");
        self.current = OperationPhase::Idle;
        self.reached
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_only_move_forward() {
        let mut tracker = PhaseTracker::new("deploy");
        assert!(tracker.advance(OperationPhase::Locked));
        assert!(tracker.advance(OperationPhase::Gating));
        assert!(!tracker.advance(OperationPhase::Provisioning));
        assert!(!tracker.advance(OperationPhase::Gating));
        assert_eq!(tracker.current(), OperationPhase::Gating);
        assert!(tracker.advance(OperationPhase::Decommission));
    }

    #[test]
    fn finish_reports_furthest_phase() {
        let mut tracker = PhaseTracker::new("scale-in");
        tracker.advance(OperationPhase::Locked);
        tracker.advance(OperationPhase::TrafficCommit);
        assert_eq!(tracker.finish(), OperationPhase::TrafficCommit);
        assert_eq!(tracker.current(), OperationPhase::Idle);
    }
}
