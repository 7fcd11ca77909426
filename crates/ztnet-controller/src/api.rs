//! Controller API contract

use std::sync::Arc;

use async_trait::async_trait;
use ztnet_core::{
    ControllerMemberState, ControllerNetworkState, ConvergenceError, MemberId, MemberIntent,
    NetworkId, NetworkIntent,
};

/// Controller answer to an intent batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Every intent was applied
    Accepted,
    /// Some intents were applied, without saying which
    Partial,
    Rejected(String),
}

impl ApplyOutcome {
    /// Collapse to success or failure of the whole batch
    pub fn into_result(self) -> Result<(), ConvergenceError> {
        match self {
            ApplyOutcome::Accepted => Ok(()),
            ApplyOutcome::Partial => Err(ConvergenceError::PartialApplication),
            ApplyOutcome::Rejected(reason) => Err(ConvergenceError::Rejected(reason)),
        }
    }
}

/// Remote network controller
///
/// Reads reflect controller truth at call time. Writes are not atomic across
/// fields, hence [`ApplyOutcome::Partial`]. Transport-level retries, if any,
/// happen inside the implementation.
#[async_trait]
pub trait ControllerApi: Send + Sync {
    /// Read a network's configuration
    async fn read_network(&self, nwid: NetworkId) -> Result<ControllerNetworkState, ConvergenceError>;

    /// Read every member the controller knows for a network
    async fn read_members(&self, nwid: NetworkId) -> Result<Vec<ControllerMemberState>, ConvergenceError>;

    /// Apply one member's batch; creates the member if the controller lacks it
    async fn apply_member_intents(
        &self,
        nwid: NetworkId,
        member: MemberId,
        intents: &[MemberIntent],
    ) -> Result<ApplyOutcome, ConvergenceError>;

    /// Apply network configuration intents
    async fn apply_network_intents(
        &self,
        nwid: NetworkId,
        intents: &[NetworkIntent],
    ) -> Result<ApplyOutcome, ConvergenceError>;
}

#[async_trait]
impl<T: ControllerApi + ?Sized> ControllerApi for Arc<T> {
    async fn read_network(&self, nwid: NetworkId) -> Result<ControllerNetworkState, ConvergenceError> {
        (**self).read_network(nwid).await
    }

    async fn read_members(&self, nwid: NetworkId) -> Result<Vec<ControllerMemberState>, ConvergenceError> {
        (**self).read_members(nwid).await
    }

    async fn apply_member_intents(
        &self,
        nwid: NetworkId,
        member: MemberId,
        intents: &[MemberIntent],
    ) -> Result<ApplyOutcome, ConvergenceError> {
        (**self).apply_member_intents(nwid, member, intents).await
    }

    async fn apply_network_intents(
        &self,
        nwid: NetworkId,
        intents: &[NetworkIntent],
    ) -> Result<ApplyOutcome, ConvergenceError> {
        (**self).apply_network_intents(nwid, intents).await
    }
}
