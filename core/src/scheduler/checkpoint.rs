//! Checkpoint write throttling.
//!
//! Plan changes arrive far faster than a sink should be hammered. The
//! throttle collapses bursts: every change is marked, but a write is only
//! due when the minimum interval has elapsed since the last one, when the
//! marked state is urgent (a failure or an interactive pause), or when the
//! caller forces the final flush at shutdown. Whatever is flushed always
//! reflects the most recent marked state, so the sink never ends up behind.

use std::time::{Duration, Instant};

use crate::backend::RunStatus;

/// The most recent marked state, waiting for its flush window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingCheckpoint {
    pub step_order: usize,
    pub status: RunStatus,
}

#[derive(Debug)]
pub struct CheckpointThrottle {
    min_interval: Duration,
    last_flush: Option<Instant>,
    pending: Option<PendingCheckpoint>,
    urgent: bool,
}

impl CheckpointThrottle {
    pub fn new(min_interval: Duration) -> Self {
        CheckpointThrottle {
            min_interval,
            last_flush: None,
            pending: None,
            urgent: false,
        }
    }

    /// Record a plan change. Later marks supersede earlier unflushed ones;
    /// the step order only ever moves forward.
    pub fn mark(&mut self, step_order: usize, status: RunStatus) {
        let order = match self.pending {
            Some(p) => p.step_order.max(step_order),
            None => step_order,
        };
        self.pending = Some(PendingCheckpoint {
            step_order: order,
            status,
        });
        if matches!(status, RunStatus::Failed | RunStatus::Waiting) {
            self.urgent = true;
        }
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Take the pending state if a write is due now. `force` bypasses the
    /// interval, used for the unconditional shutdown flush.
    pub fn take_due(&mut self, force: bool) -> Option<PendingCheckpoint> {
        let pending = self.pending?;
        let elapsed_ok = match self.last_flush {
            Some(at) => at.elapsed() >= self.min_interval,
            None => true,
        };
        if force || self.urgent || elapsed_ok {
            self.pending = None;
            self.urgent = false;
            self.last_flush = Some(Instant::now());
            Some(pending)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rapid_marks_collapse_to_few_writes() {
        let mut throttle = CheckpointThrottle::new(Duration::from_secs(10));
        let mut writes = Vec::new();
        for order in 0..50 {
            throttle.mark(order, RunStatus::Done);
            if let Some(p) = throttle.take_due(false) {
                writes.push(p);
            }
        }
        if let Some(p) = throttle.take_due(true) {
            writes.push(p);
        }
        assert!(writes.len() < 50, "throttle let {} writes through", writes.len());
        // The last flushed state reflects the newest mark.
        assert_eq!(writes.last().unwrap().step_order, 49);
        assert!(!throttle.has_pending());
    }

    #[test]
    fn failure_flushes_immediately() {
        let mut throttle = CheckpointThrottle::new(Duration::from_secs(10));
        throttle.mark(0, RunStatus::Done);
        assert!(throttle.take_due(false).is_some());

        // Inside the interval a routine mark is held back...
        throttle.mark(1, RunStatus::Done);
        assert!(throttle.take_due(false).is_none());

        // ...but a failure goes straight through.
        throttle.mark(2, RunStatus::Failed);
        let p = throttle.take_due(false).unwrap();
        assert_eq!(p.status, RunStatus::Failed);
        assert_eq!(p.step_order, 2);
    }

    #[test]
    fn waiting_is_urgent_too() {
        let mut throttle = CheckpointThrottle::new(Duration::from_secs(10));
        throttle.mark(0, RunStatus::Done);
        throttle.take_due(false);
        throttle.mark(1, RunStatus::Waiting);
        assert!(throttle.take_due(false).is_some());
    }

    #[test]
    fn step_order_never_regresses() {
        let mut throttle = CheckpointThrottle::new(Duration::from_secs(10));
        throttle.mark(5, RunStatus::Done);
        throttle.mark(3, RunStatus::Done);
        assert_eq!(throttle.take_due(true).unwrap().step_order, 5);
    }

    #[test]
    fn nothing_pending_means_nothing_due() {
        let mut throttle = CheckpointThrottle::new(Duration::ZERO);
        assert!(throttle.take_due(true).is_none());
    }

    #[test]
    fn interval_elapses() {
        let mut throttle = CheckpointThrottle::new(Duration::from_millis(5));
        throttle.mark(0, RunStatus::Done);
        throttle.take_due(false);
        throttle.mark(1, RunStatus::Done);
        assert!(throttle.take_due(false).is_none());
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(throttle.take_due(false).unwrap().step_order, 1);
    }
}
