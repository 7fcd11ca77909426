//! Per-network address book with an exclusive allocation section
//!
//! Each network owns one [`AddressBook`] behind its own mutex. Allocation,
//! reservation and release hold that mutex from reading the held set through
//! committing the result, so two concurrent member-add operations can never
//! receive the same address. Different networks never contend.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::net::IpAddr;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};
use ztnet_core::{AllocationError, Member, MemberId, Network, NetworkId, Route};

use crate::{allocate_address, validate_pools, validate_routes};

/// Addresses held within one network
#[derive(Debug, Clone, Default)]
pub struct AddressBook {
    holders: BTreeMap<IpAddr, MemberId>,
}

impl AddressBook {
    /// Every held address
    pub fn addresses(&self) -> BTreeSet<IpAddr> {
        self.holders.keys().copied().collect()
    }

    pub fn holder(&self, addr: IpAddr) -> Option<MemberId> {
        self.holders.get(&addr).copied()
    }

    /// Addresses held by one member, ascending
    pub fn held_by(&self, member: MemberId) -> Vec<IpAddr> {
        self.holders
            .iter()
            .filter(|(_, holder)| **holder == member)
            .map(|(addr, _)| *addr)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.holders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.holders.is_empty()
    }

    fn reserve(&mut self, member: MemberId, addr: IpAddr) -> Result<(), AllocationError> {
        match self.holders.get(&addr) {
            Some(holder) if *holder != member => Err(AllocationError::AddressInUse {
                address: addr,
                holder: *holder,
            }),
            _ => {
                self.holders.insert(addr, member);
                Ok(())
            }
        }
    }
}

/// Allocator statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllocatorStats {
    pub networks: usize,
    pub held_addresses: usize,
    pub allocations: u64,
    pub exhaustions: u64,
}

/// Address allocation across networks
#[derive(Debug, Default)]
pub struct NetworkAllocator {
    books: RwLock<HashMap<NetworkId, Arc<Mutex<AddressBook>>>>,
    allocations: Mutex<(u64, u64)>,
}

impl NetworkAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    fn book(&self, nwid: NetworkId) -> Arc<Mutex<AddressBook>> {
        if let Some(book) = self.books.read().get(&nwid) {
            return book.clone();
        }
        self.books.write().entry(nwid).or_default().clone()
    }

    /// Seed a network's held set from stored member records
    ///
    /// Conflicting records keep the first holder; the conflict is returned.
    pub fn load(&self, nwid: NetworkId, members: &[Member]) -> Vec<AllocationError> {
        let book = self.book(nwid);
        let mut book = book.lock();
        let mut conflicts = Vec::new();

        for member in members {
            for addr in &member.ip_assignments {
                if let Err(e) = book.reserve(member.id, *addr) {
                    conflicts.push(e);
                }
            }
        }

        debug!(%nwid, held = book.len(), conflicts = conflicts.len(), "Loaded address book");
        conflicts
    }

    /// Pick and commit an address for a member, if it should get one
    ///
    /// Returns `Ok(None)` when the member opted out of automatic assignment,
    /// already holds a pool address, or no pool family is auto-assigned.
    pub fn auto_assign(&self, member: &Member, network: &Network) -> Result<Option<IpAddr>, AllocationError> {
        if member.no_auto_assign_ips {
            return Ok(None);
        }

        let has_auto_pool = network
            .ip_assignment_pools
            .iter()
            .any(|pool| network.auto_assigns(pool.range_start));
        if !has_auto_pool {
            return Ok(None);
        }

        let book = self.book(network.nwid);
        let mut book = book.lock();

        let in_pool = book
            .held_by(member.id)
            .into_iter()
            .chain(member.ip_assignments.iter().copied())
            .any(|addr| network.ip_assignment_pools.iter().any(|pool| pool.contains(addr)));
        if in_pool {
            return Ok(None);
        }

        match allocate_address(member, network, &book.addresses()) {
            Ok(addr) => {
                book.reserve(member.id, addr)?;
                self.allocations.lock().0 += 1;
                Ok(Some(addr))
            }
            Err(e) => {
                self.allocations.lock().1 += 1;
                info!(nwid = %network.nwid, member = %member.id, "Address pools exhausted");
                Err(e)
            }
        }
    }

    /// Commit a manually chosen address
    pub fn reserve(&self, nwid: NetworkId, member: MemberId, addr: IpAddr) -> Result<(), AllocationError> {
        self.book(nwid).lock().reserve(member, addr)
    }

    /// Replace a member's held addresses with `addrs` as one step
    ///
    /// Nothing changes if any address is held by another member.
    pub fn reassign(&self, nwid: NetworkId, member: MemberId, addrs: &[IpAddr]) -> Result<(), AllocationError> {
        let book = self.book(nwid);
        let mut book = book.lock();

        for addr in addrs {
            if let Some(holder) = book.holder(*addr) {
                if holder != member {
                    return Err(AllocationError::AddressInUse { address: *addr, holder });
                }
            }
        }

        book.holders.retain(|_, holder| *holder != member);
        for addr in addrs {
            book.holders.insert(*addr, member);
        }
        Ok(())
    }

    /// Release every address held by a member
    pub fn release(&self, nwid: NetworkId, member: MemberId) -> Vec<IpAddr> {
        let book = self.book(nwid);
        let mut book = book.lock();
        let released = book.held_by(member);
        book.holders.retain(|_, holder| *holder != member);
        released
    }

    /// Snapshot of a network's held addresses
    pub fn held(&self, nwid: NetworkId) -> BTreeMap<IpAddr, MemberId> {
        self.book(nwid).lock().holders.clone()
    }

    /// Validate a network's pools and routes under its exclusive section
    pub fn validate_addressing(&self, network: &Network) -> Result<Vec<Route>, AllocationError> {
        let book = self.book(network.nwid);
        let _guard = book.lock();
        validate_pools(&network.ip_assignment_pools)?;
        validate_routes(&network.routes)
    }

    /// Drop all state for a deleted network
    pub fn forget(&self, nwid: NetworkId) {
        self.books.write().remove(&nwid);
    }

    pub fn stats(&self) -> AllocatorStats {
        let books = self.books.read();
        let (allocations, exhaustions) = *self.allocations.lock();
        AllocatorStats {
            networks: books.len(),
            held_addresses: books.values().map(|b| b.lock().len()).sum(),
            allocations,
            exhaustions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::thread;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn network() -> Network {
        Network::new(NetworkId::new(0x8056_c2e2_1c00_0001), "lab").with_pool(ip("10.0.0.1"), ip("10.0.0.254"))
    }

    fn member(network: &Network, id: u64) -> Member {
        Member::new(network.nwid, MemberId::new(id))
    }

    #[test]
    fn test_auto_assign_sequence() {
        let allocator = NetworkAllocator::new();
        let network = network();

        assert_eq!(allocator.auto_assign(&member(&network, 1), &network).unwrap(), Some(ip("10.0.0.1")));
        assert_eq!(allocator.auto_assign(&member(&network, 2), &network).unwrap(), Some(ip("10.0.0.2")));
        // Already holds a pool address
        assert_eq!(allocator.auto_assign(&member(&network, 1), &network).unwrap(), None);
    }

    #[test]
    fn test_opt_out() {
        let allocator = NetworkAllocator::new();
        let network = network();
        let mut m = member(&network, 1);
        m.no_auto_assign_ips = true;

        assert_eq!(allocator.auto_assign(&m, &network).unwrap(), None);
        assert!(allocator.held(network.nwid).is_empty());
    }

    #[test]
    fn test_reserve_conflict() {
        let allocator = NetworkAllocator::new();
        let nwid = network().nwid;

        allocator.reserve(nwid, MemberId::new(1), ip("10.0.0.5")).unwrap();
        assert_eq!(
            allocator.reserve(nwid, MemberId::new(2), ip("10.0.0.5")),
            Err(AllocationError::AddressInUse {
                address: ip("10.0.0.5"),
                holder: MemberId::new(1),
            })
        );
        // Re-reserving your own address is fine
        allocator.reserve(nwid, MemberId::new(1), ip("10.0.0.5")).unwrap();
    }

    #[test]
    fn test_release_frees_address() {
        let allocator = NetworkAllocator::new();
        let network = network();

        allocator.auto_assign(&member(&network, 1), &network).unwrap();
        assert_eq!(allocator.release(network.nwid, MemberId::new(1)), vec![ip("10.0.0.1")]);
        assert_eq!(allocator.auto_assign(&member(&network, 2), &network).unwrap(), Some(ip("10.0.0.1")));
    }

    #[test]
    fn test_reassign_is_all_or_nothing() {
        let allocator = NetworkAllocator::new();
        let nwid = network().nwid;
        allocator.reserve(nwid, MemberId::new(1), ip("10.0.0.1")).unwrap();
        allocator.reserve(nwid, MemberId::new(2), ip("10.0.0.2")).unwrap();

        assert!(allocator
            .reassign(nwid, MemberId::new(1), &[ip("10.0.0.3"), ip("10.0.0.2")])
            .is_err());
        assert_eq!(allocator.held(nwid).get(&ip("10.0.0.1")), Some(&MemberId::new(1)));

        allocator.reassign(nwid, MemberId::new(1), &[ip("10.0.0.3")]).unwrap();
        assert_eq!(allocator.held(nwid).get(&ip("10.0.0.1")), None);
    }

    #[test]
    fn test_concurrent_allocations_unique() {
        let allocator = Arc::new(NetworkAllocator::new());
        let network = Arc::new(network());

        let handles: Vec<_> = (1..=64u64)
            .map(|id| {
                let allocator = allocator.clone();
                let network = network.clone();
                thread::spawn(move || allocator.auto_assign(&member(&network, id), &network).unwrap())
            })
            .collect();

        let addrs: BTreeSet<IpAddr> = handles
            .into_iter()
            .map(|h| h.join().unwrap().unwrap())
            .collect();

        assert_eq!(addrs.len(), 64);
        assert_eq!(allocator.stats().allocations, 64);
    }

    #[test]
    fn test_exhaustion_counted() {
        let allocator = NetworkAllocator::new();
        let network = Network::new(NetworkId::new(3), "tiny").with_pool(ip("10.0.0.1"), ip("10.0.0.1"));

        allocator.auto_assign(&member(&network, 1), &network).unwrap();
        assert!(allocator.auto_assign(&member(&network, 2), &network).is_err());
        assert_eq!(allocator.stats().exhaustions, 1);
    }

    proptest! {
        #[test]
        fn test_allocation_never_reuses(preheld in proptest::collection::btree_set(1u8..=30, 0..20), count in 1usize..40) {
            let allocator = NetworkAllocator::new();
            let network = Network::new(NetworkId::new(5), "prop")
                .with_pool(ip("10.1.0.1"), ip("10.1.0.10"))
                .with_pool(ip("10.1.0.21"), ip("10.1.0.30"));

            for (i, octet) in preheld.iter().enumerate() {
                let addr = IpAddr::from([10, 1, 0, *octet]);
                allocator.reserve(network.nwid, MemberId::new(1000 + i as u64), addr).unwrap();
            }

            let mut seen = BTreeSet::new();
            for id in 1..=count as u64 {
                match allocator.auto_assign(&member(&network, id), &network) {
                    Ok(Some(addr)) => {
                        prop_assert!(network.ip_assignment_pools.iter().any(|p| p.contains(addr)));
                        prop_assert!(seen.insert(addr));
                        let octet = match addr { IpAddr::V4(v4) => v4.octets()[3], IpAddr::V6(_) => 0 };
                        prop_assert!(!preheld.contains(&octet));
                    }
                    Ok(None) => prop_assert!(false, "member without address skipped"),
                    Err(AllocationError::PoolExhausted(_)) => {}
                    Err(e) => prop_assert!(false, "unexpected error {}", e),
                }
            }
        }
    }
}
