//! Persistence contract
//!
//! Records carry a `revision` used for optimistic staleness detection: a save
//! whose revision is older than the stored one is refused.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use parking_lot::RwLock;
use ztnet_core::{Member, MemberId, Network, NetworkId, ZtError, ZtResult};

/// Durable store for networks and members
#[async_trait]
pub trait PolicyStore: Send + Sync {
    async fn load_network(&self, nwid: NetworkId) -> ZtResult<Option<Network>>;

    async fn save_network(&self, network: &Network) -> ZtResult<()>;

    async fn list_networks(&self) -> ZtResult<Vec<NetworkId>>;

    /// Remove a network and all of its members
    async fn delete_network(&self, nwid: NetworkId) -> ZtResult<bool>;

    async fn load_members(&self, nwid: NetworkId) -> ZtResult<Vec<Member>>;

    async fn load_member(&self, nwid: NetworkId, member: MemberId) -> ZtResult<Option<Member>>;

    async fn save_member(&self, member: &Member) -> ZtResult<()>;

    /// Store a new member; fails with `MemberExists` if the id is taken
    async fn insert_member(&self, member: &Member) -> ZtResult<()>;

    async fn delete_member(&self, nwid: NetworkId, member: MemberId) -> ZtResult<bool>;
}

fn check_revision(kind: &str, stored: u64, incoming: u64) -> ZtResult<()> {
    if incoming < stored {
        return Err(ZtError::Store(format!(
            "stale {} write: revision {} is behind stored {}",
            kind, incoming, stored
        )));
    }
    Ok(())
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryStore {
    networks: RwLock<HashMap<NetworkId, Network>>,
    members: RwLock<HashMap<NetworkId, BTreeMap<MemberId, Member>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn network_count(&self) -> usize {
        self.networks.read().len()
    }

    pub fn member_count(&self, nwid: NetworkId) -> usize {
        self.members.read().get(&nwid).map_or(0, BTreeMap::len)
    }
}

#[async_trait]
impl PolicyStore for MemoryStore {
    async fn load_network(&self, nwid: NetworkId) -> ZtResult<Option<Network>> {
        Ok(self.networks.read().get(&nwid).cloned())
    }

    async fn save_network(&self, network: &Network) -> ZtResult<()> {
        let mut networks = self.networks.write();
        if let Some(stored) = networks.get(&network.nwid) {
            check_revision("network", stored.revision, network.revision)?;
        }
        networks.insert(network.nwid, network.clone());
        Ok(())
    }

    async fn list_networks(&self) -> ZtResult<Vec<NetworkId>> {
        let mut ids: Vec<NetworkId> = self.networks.read().keys().copied().collect();
        ids.sort();
        Ok(ids)
    }

    async fn delete_network(&self, nwid: NetworkId) -> ZtResult<bool> {
        self.members.write().remove(&nwid);
        Ok(self.networks.write().remove(&nwid).is_some())
    }

    async fn load_members(&self, nwid: NetworkId) -> ZtResult<Vec<Member>> {
        Ok(self
            .members
            .read()
            .get(&nwid)
            .map(|members| members.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn load_member(&self, nwid: NetworkId, member: MemberId) -> ZtResult<Option<Member>> {
        Ok(self.members.read().get(&nwid).and_then(|m| m.get(&member)).cloned())
    }

    async fn save_member(&self, member: &Member) -> ZtResult<()> {
        if !self.networks.read().contains_key(&member.nwid) {
            return Err(ZtError::NetworkNotFound(member.nwid));
        }

        let mut members = self.members.write();
        let network = members.entry(member.nwid).or_default();
        if let Some(stored) = network.get(&member.id) {
            check_revision("member", stored.revision, member.revision)?;
        }
        network.insert(member.id, member.clone());
        Ok(())
    }

    async fn insert_member(&self, member: &Member) -> ZtResult<()> {
        if !self.networks.read().contains_key(&member.nwid) {
            return Err(ZtError::NetworkNotFound(member.nwid));
        }

        let mut members = self.members.write();
        let network = members.entry(member.nwid).or_default();
        if network.contains_key(&member.id) {
            return Err(ZtError::MemberExists {
                nwid: member.nwid,
                member: member.id,
            });
        }
        network.insert(member.id, member.clone());
        Ok(())
    }

    async fn delete_member(&self, nwid: NetworkId, member: MemberId) -> ZtResult<bool> {
        Ok(self
            .members
            .write()
            .get_mut(&nwid)
            .map_or(false, |m| m.remove(&member).is_some()))
    }
}
