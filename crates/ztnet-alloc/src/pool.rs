//! Pool address arithmetic and lowest-free selection
//!
//! Addresses are handled as `u128` so IPv4 and IPv6 pools share one code
//! path. Pool bounds are inclusive on both ends.

use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use tracing::debug;
use ztnet_core::{AllocationError, IpAssignmentPool, Member, Network};

pub(crate) fn to_u128(addr: IpAddr) -> u128 {
    match addr {
        IpAddr::V4(v4) => u32::from(v4) as u128,
        IpAddr::V6(v6) => u128::from(v6),
    }
}

pub(crate) fn from_u128(value: u128, ipv4: bool) -> IpAddr {
    if ipv4 {
        IpAddr::V4(Ipv4Addr::from(value as u32))
    } else {
        IpAddr::V6(Ipv6Addr::from(value))
    }
}

/// Number of addresses in a pool, saturating for a full IPv6 range
pub fn pool_size(pool: &IpAssignmentPool) -> u128 {
    if !pool.is_well_formed() {
        return 0;
    }
    (to_u128(pool.range_end) - to_u128(pool.range_start)).saturating_add(1)
}

/// Lowest address of `pool` not present in `held`
///
/// Walks only the held addresses inside the pool, so the cost is bounded by
/// the number of assignments rather than the pool size.
pub fn lowest_free(pool: &IpAssignmentPool, held: &BTreeSet<IpAddr>) -> Option<IpAddr> {
    if !pool.is_well_formed() {
        return None;
    }

    let end = to_u128(pool.range_end);
    let mut candidate = to_u128(pool.range_start);

    for addr in held.range(pool.range_start..=pool.range_end) {
        let taken = to_u128(*addr);
        if taken > candidate {
            break;
        }
        if taken == candidate {
            if candidate == end {
                return None;
            }
            candidate += 1;
        }
    }

    Some(from_u128(candidate, pool.is_ipv4()))
}

/// Pick an address for `member` from the network's pools
///
/// Pools are tried in declaration order; pools of a family whose assign mode
/// is off are skipped. `held` must contain every address already assigned in
/// the network. Deterministic for a given pool list and held set.
pub fn allocate_address(
    member: &Member,
    network: &Network,
    held: &BTreeSet<IpAddr>,
) -> Result<IpAddr, AllocationError> {
    let addr = network
        .ip_assignment_pools
        .iter()
        .filter(|pool| network.auto_assigns(pool.range_start))
        .find_map(|pool| lowest_free(pool, held))
        .ok_or(AllocationError::PoolExhausted(network.nwid))?;

    debug!(nwid = %network.nwid, member = %member.id, %addr, "Allocated address");
    Ok(addr)
}
