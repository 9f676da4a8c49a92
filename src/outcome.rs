//! The result of one reconcile step.
//!
//! Wait conditions are not errors. A step that cannot make progress yet
//! returns a requeue outcome; the caller stops the current cycle and tries
//! again later. Only remote-operation failures travel through `Error`.

use std::time::Duration;

/// Outcome of a reconcile step or a whole cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The step completed; continue with the next step.
    Done,
    /// Retry the cycle after the caller's default backoff.
    Requeue,
    /// Retry the cycle after at least this long.
    RequeueAfter(Duration),
}

impl ReconcileOutcome {
    /// True when this outcome should stop the current cycle. Sub-steps are
    /// chained with this check so a wait in the middle of a path propagates
    /// out unchanged.
    pub fn aborts(&self) -> bool {
        !matches!(self, ReconcileOutcome::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aborts() {
        assert!(!ReconcileOutcome::Done.aborts());
        assert!(ReconcileOutcome::Requeue.aborts());
        assert!(ReconcileOutcome::RequeueAfter(Duration::from_secs(10)).aborts());
    }
}
