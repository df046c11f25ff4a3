// Transition bookkeeping: records, events, timed phases and cancellation

use super::state::StateInfo;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Completed state change kept in the machine's history ring
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransitionRecord {
    pub from: StateInfo,
    pub to: StateInfo,
    /// Seconds the change took (exit phase included for timed transitions)
    pub duration: f32,
    /// Monotonic time since the machine was created
    pub at: Duration,
    /// Wall clock, milliseconds since the Unix epoch
    pub timestamp_ms: u64,
}

/// Notifications delivered to machine listeners
#[derive(Debug, Clone, PartialEq)]
pub enum MachineEvent {
    StateEntered(StateInfo),
    StateExited(StateInfo),
    TransitionStarted {
        from: Option<StateInfo>,
        to: StateInfo,
        forced: bool,
    },
    TransitionCompleted {
        from: Option<StateInfo>,
        to: StateInfo,
        /// Seconds across both timed phases
        elapsed: f32,
    },
}

/// Result of starting or advancing a timed transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionStatus {
    /// No transition in flight
    Idle,
    Running,
    Cancelled,
    Completed,
    /// Request refused (unregistered, uninitialized, guarded or already current)
    Rejected,
}

/// Phase of an in-flight timed transition
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TransitionPhase {
    /// Waiting out the current state's exit duration; the swap happens at the end
    Exiting { elapsed: f32, total: f32 },
    /// Swap done, waiting out the new state's enter duration
    Entering { elapsed: f32, total: f32 },
}

impl TransitionPhase {
    pub fn elapsed(&self) -> f32 {
        match *self {
            TransitionPhase::Exiting { elapsed, .. } | TransitionPhase::Entering { elapsed, .. } => elapsed,
        }
    }

    pub fn total(&self) -> f32 {
        match *self {
            TransitionPhase::Exiting { total, .. } | TransitionPhase::Entering { total, .. } => total,
        }
    }

    /// 0.0..=1.0; a zero-length phase counts as done
    pub fn progress(&self) -> f32 {
        let total = self.total();
        if total <= 0.0 {
            1.0
        } else {
            (self.elapsed() / total).clamp(0.0, 1.0)
        }
    }

    /// Advance by `dt`; returns true once the phase has run its full length
    pub(crate) fn advance(&mut self, dt: f32) -> bool {
        match self {
            TransitionPhase::Exiting { elapsed, total } | TransitionPhase::Entering { elapsed, total } => {
                *elapsed += dt.max(0.0);
                *elapsed >= *total
            }
        }
    }
}

/// Snapshot of an in-flight timed transition
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionProgress {
    pub from: Option<StateInfo>,
    pub to: StateInfo,
    pub phase: TransitionPhase,
    /// Seconds since the transition started, across phases
    pub elapsed: f32,
}

/// Shared cancellation flag for a timed transition
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_advance() {
        let mut phase = TransitionPhase::Exiting { elapsed: 0.0, total: 0.5 };
        assert!(!phase.advance(0.2));
        assert!((phase.progress() - 0.4).abs() < 1e-6);
        assert!(phase.advance(0.3));
        assert_eq!(phase.progress(), 1.0);
    }

    #[test]
    fn test_zero_length_phase_finishes_immediately() {
        let mut phase = TransitionPhase::Entering { elapsed: 0.0, total: 0.0 };
        assert_eq!(phase.progress(), 1.0);
        assert!(phase.advance(0.0));
    }

    #[test]
    fn test_negative_dt_is_ignored() {
        let mut phase = TransitionPhase::Exiting { elapsed: 0.1, total: 1.0 };
        phase.advance(-5.0);
        assert_eq!(phase.elapsed(), 0.1);
    }

    #[test]
    fn test_cancellation_token_is_shared() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!token.is_cancelled());
        clone.cancel();
        assert!(token.is_cancelled());
    }
}
