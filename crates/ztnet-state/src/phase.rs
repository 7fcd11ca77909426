//! Member phase machine
//!
//! The controller only stores a boolean `authorized` flag. Locally each member
//! carries an explicit phase so that a partially applied batch has a defined
//! resting state ([`MemberPhase::Drifted`]) instead of a half-true boolean.

use std::fmt;

use thiserror::Error;
use ztnet_core::MemberId;

/// Reconciliation phase of one member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MemberPhase {
    /// Never seen by a registration/add event or a controller read
    #[default]
    Unknown,
    /// Known locally, not (yet) authorized on the controller
    PendingAuthorization,
    /// Authorized and converged with the last confirmed read
    Authorized,
    /// Controller state diverges from desired, or a batch was only partly applied
    Drifted,
    /// Gone from the controller; the local record is retained
    Orphaned,
}

impl MemberPhase {
    /// Orphaned members take no part in diffing until they reappear
    pub fn is_orphaned(self) -> bool {
        self == MemberPhase::Orphaned
    }

    /// Check if the controller has confirmed this member as authorized
    pub fn is_authorized(self) -> bool {
        self == MemberPhase::Authorized
    }
}

impl fmt::Display for MemberPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MemberPhase::Unknown => "unknown",
            MemberPhase::PendingAuthorization => "pending",
            MemberPhase::Authorized => "authorized",
            MemberPhase::Drifted => "drifted",
            MemberPhase::Orphaned => "orphaned",
        };
        f.write_str(name)
    }
}

/// Inputs that move a member between phases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseEvent {
    /// A registration or add event created the desired record
    Registered,
    /// A confirmed read matches desired state
    Confirmed { authorized: bool },
    /// A confirmed read differs from desired state
    Diverged,
    /// The controller accepted only part of a batch
    BatchPartial,
    /// The controller rejected a batch or the call failed
    BatchFailed,
    /// A confirmed read no longer lists the member
    Missing,
    /// An orphaned member is listed again
    Reappeared,
}

/// Transition not defined for the current phase
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("No transition from {from} on {event:?}")]
pub struct PhaseError {
    pub from: MemberPhase,
    pub event: PhaseEvent,
}

impl MemberPhase {
    /// Apply an event, returning the next phase
    pub fn transition(self, event: PhaseEvent) -> Result<MemberPhase, PhaseError> {
        use MemberPhase::*;
        use PhaseEvent::*;

        let next = match (self, event) {
            (Unknown, Registered) => PendingAuthorization,
            (PendingAuthorization, Registered) => PendingAuthorization,

            (PendingAuthorization | Authorized | Drifted, Confirmed { authorized: true }) => Authorized,
            (PendingAuthorization | Authorized | Drifted, Confirmed { authorized: false }) => {
                PendingAuthorization
            }

            (PendingAuthorization, Diverged) => PendingAuthorization,
            (Authorized | Drifted, Diverged) => Drifted,

            (PendingAuthorization | Authorized | Drifted, BatchPartial) => Drifted,

            (PendingAuthorization, BatchFailed) => PendingAuthorization,
            (Authorized | Drifted, BatchFailed) => Drifted,

            (PendingAuthorization, Missing) => PendingAuthorization,
            (Authorized | Drifted | Orphaned, Missing) => Orphaned,

            (Orphaned, Reappeared) => Drifted,

            (from, event) => return Err(PhaseError { from, event }),
        };

        Ok(next)
    }
}

/// A recorded phase change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseChange {
    pub member: MemberId,
    pub from: MemberPhase,
    pub to: MemberPhase,
}

#[cfg(test)]
mod tests {
    use super::*;
    use MemberPhase::*;

    #[test]
    fn test_happy_path() {
        let phase = Unknown.transition(PhaseEvent::Registered).unwrap();
        assert_eq!(phase, PendingAuthorization);

        let phase = phase.transition(PhaseEvent::Confirmed { authorized: true }).unwrap();
        assert_eq!(phase, Authorized);
    }

    #[test]
    fn test_drift_and_recovery() {
        let phase = Authorized.transition(PhaseEvent::Diverged).unwrap();
        assert_eq!(phase, Drifted);

        // A failed correction keeps the member drifted
        assert_eq!(phase.transition(PhaseEvent::BatchFailed).unwrap(), Drifted);
        assert_eq!(phase.transition(PhaseEvent::Confirmed { authorized: true }).unwrap(), Authorized);
    }

    #[test]
    fn test_partial_never_authorizes() {
        for phase in [PendingAuthorization, Authorized, Drifted] {
            assert_eq!(phase.transition(PhaseEvent::BatchPartial).unwrap(), Drifted);
        }
    }

    #[test]
    fn test_failure_keeps_pending() {
        assert_eq!(
            PendingAuthorization.transition(PhaseEvent::BatchFailed).unwrap(),
            PendingAuthorization
        );
    }

    #[test]
    fn test_orphan_lifecycle() {
        assert_eq!(Authorized.transition(PhaseEvent::Missing).unwrap(), Orphaned);
        assert_eq!(Drifted.transition(PhaseEvent::Missing).unwrap(), Orphaned);
        assert_eq!(Orphaned.transition(PhaseEvent::Reappeared).unwrap(), Drifted);
        // Pending members may simply not have joined yet
        assert_eq!(PendingAuthorization.transition(PhaseEvent::Missing).unwrap(), PendingAuthorization);
    }

    #[test]
    fn test_undefined_transitions() {
        assert!(Unknown.transition(PhaseEvent::Confirmed { authorized: true }).is_err());
        assert!(Orphaned.transition(PhaseEvent::Confirmed { authorized: true }).is_err());
        assert!(Authorized.transition(PhaseEvent::Reappeared).is_err());
    }
}
