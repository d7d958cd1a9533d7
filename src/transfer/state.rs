//! Transfer worker FSM states
//!
//! ```text
//! RECEIVED → RESOLVING → DEBITING → CREDITING → COMMITTED
//!     │          │           │
//!     │          ├───────────┴──→ REJECTED   (terminal, recorded, acked)
//!     │          └──────────────→ FAILED     (transient, not acked)
//!     └── existing ledger record ──→ outcome of that record
//! ```
//!
//! Debiting and Crediting are both covered by one atomic directory call; the
//! worker never observes one without the other.

use std::fmt;

use crate::ledger::TransferOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum WorkerState {
    /// Delivery taken from the queue
    Received = 0,

    /// Authoritative read of both cards
    Resolving = 10,

    /// Atomic mutation in progress (sender side)
    Debiting = 20,

    /// Atomic mutation in progress (recipient side)
    Crediting = 30,

    /// Terminal: balances moved, record written
    Committed = 40,

    /// Terminal: business rejection recorded
    Rejected = -10,

    /// Infrastructure failure, left for redelivery
    Failed = -20,
}

impl WorkerState {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkerState::Committed | WorkerState::Rejected | WorkerState::Failed
        )
    }

    /// Legal edges of the FSM
    pub fn can_transition_to(&self, next: WorkerState) -> bool {
        use WorkerState::*;
        matches!(
            (self, next),
            (Received, Resolving)
                | (Received, Committed)
                | (Received, Rejected)
                | (Received, Failed)
                | (Resolving, Debiting)
                | (Resolving, Rejected)
                | (Resolving, Failed)
                | (Debiting, Crediting)
                | (Debiting, Committed)
                | (Debiting, Rejected)
                | (Debiting, Failed)
                | (Crediting, Committed)
        )
    }

    /// Terminal state matching a settled outcome
    pub fn for_outcome(outcome: TransferOutcome) -> Self {
        match outcome {
            TransferOutcome::Committed => WorkerState::Committed,
            TransferOutcome::SystemFailure => WorkerState::Failed,
            _ => WorkerState::Rejected,
        }
    }

    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(WorkerState::Received),
            10 => Some(WorkerState::Resolving),
            20 => Some(WorkerState::Debiting),
            30 => Some(WorkerState::Crediting),
            40 => Some(WorkerState::Committed),
            -10 => Some(WorkerState::Rejected),
            -20 => Some(WorkerState::Failed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerState::Received => "RECEIVED",
            WorkerState::Resolving => "RESOLVING",
            WorkerState::Debiting => "DEBITING",
            WorkerState::Crediting => "CREDITING",
            WorkerState::Committed => "COMMITTED",
            WorkerState::Rejected => "REJECTED",
            WorkerState::Failed => "FAILED",
        }
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<i16> for WorkerState {
    type Error = ();

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        WorkerState::from_id(value).ok_or(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(WorkerState::Committed.is_terminal());
        assert!(WorkerState::Rejected.is_terminal());
        assert!(WorkerState::Failed.is_terminal());

        assert!(!WorkerState::Received.is_terminal());
        assert!(!WorkerState::Resolving.is_terminal());
        assert!(!WorkerState::Debiting.is_terminal());
        assert!(!WorkerState::Crediting.is_terminal());
    }

    #[test]
    fn test_transitions() {
        assert!(WorkerState::Received.can_transition_to(WorkerState::Resolving));
        assert!(WorkerState::Crediting.can_transition_to(WorkerState::Committed));
        assert!(!WorkerState::Crediting.can_transition_to(WorkerState::Rejected));
        assert!(!WorkerState::Resolving.can_transition_to(WorkerState::Committed));
        assert!(!WorkerState::Committed.can_transition_to(WorkerState::Resolving));
    }

    #[test]
    fn test_state_id_roundtrip() {
        let states = [
            WorkerState::Received,
            WorkerState::Resolving,
            WorkerState::Debiting,
            WorkerState::Crediting,
            WorkerState::Committed,
            WorkerState::Rejected,
            WorkerState::Failed,
        ];
        for state in states {
            assert_eq!(WorkerState::from_id(state.id()), Some(state));
            assert_eq!(WorkerState::try_from(state.id()), Ok(state));
        }
        assert!(WorkerState::from_id(99).is_none());
    }

    #[test]
    fn test_state_for_outcome() {
        assert_eq!(
            WorkerState::for_outcome(TransferOutcome::Committed),
            WorkerState::Committed
        );
        assert_eq!(
            WorkerState::for_outcome(TransferOutcome::InsufficientFunds),
            WorkerState::Rejected
        );
        assert_eq!(
            WorkerState::for_outcome(TransferOutcome::SystemFailure),
            WorkerState::Failed
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(WorkerState::Debiting.to_string(), "DEBITING");
    }
}
