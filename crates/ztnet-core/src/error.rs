//! Error types for the ZTNet policy engine
//!
//! The taxonomy follows how each class of failure is handled:
//! - [`ValidationError`]: local policy violation, never retried
//! - [`AllocationError`]: addressing conflict or exhaustion, surfaced to the operator
//! - [`ConvergenceError`]: the controller rejected or timed out on a batch,
//!   retried by the next reconciliation pass
//! - [`PolicyWarning`]: non-fatal, reported for operator visibility only

use std::net::IpAddr;
use std::time::Duration;

use thiserror::Error;

use crate::{IpAssignmentPool, MemberId, NetworkId, Route};

/// Policy model violations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    // Identifier errors
    #[error("Invalid network id: {0:?}")]
    InvalidNetworkId(String),

    #[error("Invalid member id: {0:?}")]
    InvalidMemberId(String),

    // Catalog errors
    #[error("Invalid tag range for {tag}: {reason}")]
    InvalidTagRange { tag: String, reason: String },

    #[error("Duplicate tag id {id}: used by {first} and {second}")]
    DuplicateTagId { id: u32, first: String, second: String },

    #[error("Invalid capability {capability}: {reason}")]
    InvalidCapability { capability: String, reason: String },

    #[error("Invalid pool {start}-{end}")]
    InvalidPool { start: IpAddr, end: IpAddr },

    // Member errors
    #[error("Unknown tag: {0}")]
    UnknownTag(String),

    #[error("Tag {tag} value {value} is outside its enum range")]
    TagValueOutOfRange { tag: String, value: u32 },

    #[error("Address {0} is outside every assignment pool")]
    AddressOutsideAnyPool(IpAddr),

    #[error("Member {member} belongs to {actual}, not {expected}")]
    NetworkMismatch {
        member: MemberId,
        expected: NetworkId,
        actual: NetworkId,
    },
}

/// Addressing errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AllocationError {
    #[error("Address pools exhausted for network {0}")]
    PoolExhausted(NetworkId),

    #[error("Overlapping routes: {a} and {b}")]
    OverlappingRoute { a: Route, b: Route },

    #[error("Overlapping pools: {a} and {b}")]
    OverlappingPool {
        a: IpAssignmentPool,
        b: IpAssignmentPool,
    },

    #[error("Address {address} is already held by {holder}")]
    AddressInUse { address: IpAddr, holder: MemberId },
}

/// Controller convergence failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConvergenceError {
    #[error("Controller rejected intent batch: {0}")]
    Rejected(String),

    #[error("Controller accepted only part of the intent batch")]
    PartialApplication,

    #[error("Controller call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Controller transport error: {0}")]
    Transport(String),

    #[error("Network {0} not found on controller")]
    NetworkGone(NetworkId),

    #[error("No confirmed controller read for network {0}")]
    NotObserved(NetworkId),
}

impl ConvergenceError {
    /// Transient failures are expected to clear on a later pass
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ConvergenceError::Timeout(_)
                | ConvergenceError::Transport(_)
                | ConvergenceError::NotObserved(_)
        )
    }
}

/// Non-fatal policy findings
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyWarning {
    /// A member holds a tag that is no longer in its network's catalog
    StaleTagAssignment {
        member: MemberId,
        tag: String,
        value: u32,
    },
    /// The controller reports a tag id that no catalog entry maps to
    StaleTagId {
        member: MemberId,
        id: u32,
        value: u32,
    },
}

/// Top-level ZTNet errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ZtError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Allocation(#[from] AllocationError),

    #[error(transparent)]
    Convergence(#[from] ConvergenceError),

    #[error("Network not found: {0}")]
    NetworkNotFound(NetworkId),

    #[error("Network already exists: {0}")]
    NetworkExists(NetworkId),

    #[error("Member {member} not found in network {nwid}")]
    MemberNotFound { nwid: NetworkId, member: MemberId },

    #[error("Member {member} already exists in network {nwid}")]
    MemberExists { nwid: NetworkId, member: MemberId },

    #[error("Actor {0} is not allowed to modify policy")]
    Forbidden(String),

    #[error("Invitation rejected: {0}")]
    Invitation(String),

    #[error("Store error: {0}")]
    Store(String),
}

/// Result type for ZTNet operations
pub type ZtResult<T> = Result<T, ZtError>;
