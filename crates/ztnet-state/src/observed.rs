//! Last-observed controller state
//!
//! One immutable snapshot per network, replaced wholesale after each confirmed
//! controller read. Readers clone the `Arc` and diff against it without
//! holding any lock.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use ztnet_core::{ControllerMemberState, ControllerNetworkState, MemberId, NetworkId};

/// One confirmed controller read of a network
#[derive(Debug, Clone, PartialEq)]
pub struct ObservedSnapshot {
    pub network: ControllerNetworkState,
    pub members: BTreeMap<MemberId, ControllerMemberState>,
    /// Monotonic per network, bumped on every recorded read
    pub sequence: u64,
}

impl ObservedSnapshot {
    pub fn new(network: ControllerNetworkState, members: Vec<ControllerMemberState>) -> Self {
        ObservedSnapshot {
            network,
            members: members.into_iter().map(|m| (m.id, m)).collect(),
            sequence: 0,
        }
    }

    pub fn member(&self, id: MemberId) -> Option<&ControllerMemberState> {
        self.members.get(&id)
    }
}

/// Per-network snapshots
#[derive(Debug, Default)]
pub struct ObservedState {
    snapshots: RwLock<HashMap<NetworkId, Arc<ObservedSnapshot>>>,
}

impl ObservedState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, nwid: NetworkId) -> Option<Arc<ObservedSnapshot>> {
        self.snapshots.read().get(&nwid).cloned()
    }

    /// Replace a network's snapshot
    pub(crate) fn record(&self, nwid: NetworkId, mut snapshot: ObservedSnapshot) -> Arc<ObservedSnapshot> {
        let mut snapshots = self.snapshots.write();
        snapshot.sequence = snapshots.get(&nwid).map_or(1, |s| s.sequence + 1);
        let snapshot = Arc::new(snapshot);
        snapshots.insert(nwid, snapshot.clone());
        snapshot
    }

    pub(crate) fn forget(&self, nwid: NetworkId) {
        self.snapshots.write().remove(&nwid);
    }

    pub fn len(&self) -> usize {
        self.snapshots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ztnet_core::Network;

    #[test]
    fn test_record_bumps_sequence() {
        let nwid = NetworkId::new(0x8056_c2e2_1c00_0001);
        let network = ControllerNetworkState::from_desired(&Network::new(nwid, "lab"));
        let observed = ObservedState::new();

        let first = observed.record(nwid, ObservedSnapshot::new(network.clone(), vec![]));
        let member = ControllerMemberState::new(nwid, MemberId::new(0x42));
        let second = observed.record(nwid, ObservedSnapshot::new(network, vec![member]));

        assert_eq!(first.sequence, 1);
        assert_eq!(second.sequence, 2);
        assert!(observed.get(nwid).unwrap().member(MemberId::new(0x42)).is_some());
        // Earlier readers keep their own snapshot
        assert!(first.members.is_empty());
    }
}
