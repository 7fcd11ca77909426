//! In-process controller
//!
//! Applies intents verbatim, the way a healthy controller would. Networks come
//! into existence on their first network intent batch; members on their first
//! member batch.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use parking_lot::RwLock;
use ztnet_core::{
    ControllerMemberState, ControllerNetworkState, ConvergenceError, MemberId, MemberIntent,
    NetworkId, NetworkIntent,
};

use crate::{ApplyOutcome, ControllerApi};

#[derive(Debug, Clone)]
struct HostedNetwork {
    config: ControllerNetworkState,
    members: BTreeMap<MemberId, ControllerMemberState>,
}

/// Controller held in memory
#[derive(Debug, Default)]
pub struct MemoryController {
    networks: RwLock<HashMap<NetworkId, HostedNetwork>>,
}

impl MemoryController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Host an empty network
    pub fn create_network(&self, nwid: NetworkId) {
        self.networks.write().entry(nwid).or_insert_with(|| HostedNetwork {
            config: ControllerNetworkState::new(nwid),
            members: BTreeMap::new(),
        });
    }

    pub fn has_network(&self, nwid: NetworkId) -> bool {
        self.networks.read().contains_key(&nwid)
    }

    /// Drop a network as if deleted on the controller itself
    pub fn drop_network(&self, nwid: NetworkId) -> bool {
        self.networks.write().remove(&nwid).is_some()
    }

    pub fn member(&self, nwid: NetworkId, member: MemberId) -> Option<ControllerMemberState> {
        self.networks.read().get(&nwid)?.members.get(&member).cloned()
    }

    pub fn network(&self, nwid: NetworkId) -> Option<ControllerNetworkState> {
        self.networks.read().get(&nwid).map(|n| n.config.clone())
    }

    /// Edit a member directly, bypassing the engine
    pub fn edit_member<F>(&self, nwid: NetworkId, member: MemberId, edit: F) -> bool
    where
        F: FnOnce(&mut ControllerMemberState),
    {
        match self.networks.write().get_mut(&nwid).and_then(|n| n.members.get_mut(&member)) {
            Some(state) => {
                edit(state);
                state.revision += 1;
                true
            }
            None => false,
        }
    }

    /// Remove a member directly, bypassing the engine
    pub fn remove_member(&self, nwid: NetworkId, member: MemberId) -> bool {
        self.networks
            .write()
            .get_mut(&nwid)
            .map_or(false, |n| n.members.remove(&member).is_some())
    }
}

#[async_trait]
impl ControllerApi for MemoryController {
    async fn read_network(&self, nwid: NetworkId) -> Result<ControllerNetworkState, ConvergenceError> {
        self.network(nwid).ok_or(ConvergenceError::NetworkGone(nwid))
    }

    async fn read_members(&self, nwid: NetworkId) -> Result<Vec<ControllerMemberState>, ConvergenceError> {
        let networks = self.networks.read();
        let network = networks.get(&nwid).ok_or(ConvergenceError::NetworkGone(nwid))?;
        Ok(network.members.values().cloned().collect())
    }

    async fn apply_member_intents(
        &self,
        nwid: NetworkId,
        member: MemberId,
        intents: &[MemberIntent],
    ) -> Result<ApplyOutcome, ConvergenceError> {
        let mut networks = self.networks.write();
        let network = networks.get_mut(&nwid).ok_or(ConvergenceError::NetworkGone(nwid))?;
        let state = network
            .members
            .entry(member)
            .or_insert_with(|| ControllerMemberState::new(nwid, member));
        for intent in intents {
            state.apply(intent);
        }
        Ok(ApplyOutcome::Accepted)
    }

    async fn apply_network_intents(
        &self,
        nwid: NetworkId,
        intents: &[NetworkIntent],
    ) -> Result<ApplyOutcome, ConvergenceError> {
        let mut networks = self.networks.write();
        let network = networks.entry(nwid).or_insert_with(|| HostedNetwork {
            config: ControllerNetworkState::new(nwid),
            members: BTreeMap::new(),
        });
        for intent in intents {
            network.config.apply(intent);
        }
        Ok(ApplyOutcome::Accepted)
    }
}
