//! Route and pool overlap checks
//!
//! Two CIDR targets overlap when one contains the other's network address.
//! Identical route entries are duplicates and are suppressed, keeping the
//! first occurrence; the same target with a different gateway is a conflict.

use ipnet::IpNet;
use ztnet_core::{AllocationError, IpAssignmentPool, Route};

fn targets_overlap(a: &IpNet, b: &IpNet) -> bool {
    let (a, b) = (a.trunc(), b.trunc());
    a.contains(&b.network()) || b.contains(&a.network())
}

/// Check routes pairwise, returning them with duplicates removed
pub fn validate_routes(routes: &[Route]) -> Result<Vec<Route>, AllocationError> {
    let mut kept: Vec<Route> = Vec::with_capacity(routes.len());

    for route in routes {
        let mut duplicate = false;
        for existing in &kept {
            if existing.target.trunc() == route.target.trunc() && existing.via == route.via {
                duplicate = true;
                break;
            }
            if targets_overlap(&existing.target, &route.target) {
                return Err(AllocationError::OverlappingRoute {
                    a: existing.clone(),
                    b: route.clone(),
                });
            }
        }
        if !duplicate {
            kept.push(route.clone());
        }
    }

    Ok(kept)
}

/// Check that no two pools share an address
pub fn validate_pools(pools: &[IpAssignmentPool]) -> Result<(), AllocationError> {
    for (i, a) in pools.iter().enumerate() {
        for b in &pools[i + 1..] {
            if a.overlaps(b) {
                return Err(AllocationError::OverlappingPool { a: *a, b: *b });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lan(target: &str) -> Route {
        Route::lan(target.parse().unwrap())
    }

    #[test]
    fn test_nested_routes_overlap() {
        let routes = vec![lan("10.0.0.0/24"), lan("10.0.0.128/25")];

        assert_eq!(
            validate_routes(&routes),
            Err(AllocationError::OverlappingRoute {
                a: lan("10.0.0.0/24"),
                b: lan("10.0.0.128/25"),
            })
        );
    }

    #[test]
    fn test_disjoint_routes() {
        let routes = vec![lan("10.0.0.0/25"), lan("10.0.0.128/25"), lan("fd00::/64")];
        assert_eq!(validate_routes(&routes).unwrap().len(), 3);
    }

    #[test]
    fn test_duplicate_suppressed() {
        let routes = vec![lan("10.0.0.0/24"), lan("172.16.0.0/16"), lan("10.0.0.0/24")];
        assert_eq!(
            validate_routes(&routes).unwrap(),
            vec![lan("10.0.0.0/24"), lan("172.16.0.0/16")]
        );
    }

    #[test]
    fn test_same_target_different_gateway() {
        let routes = vec![
            lan("0.0.0.0/0"),
            Route::via("0.0.0.0/0".parse().unwrap(), "10.0.0.1".parse().unwrap()),
        ];
        assert!(matches!(
            validate_routes(&routes),
            Err(AllocationError::OverlappingRoute { .. })
        ));
    }

    #[test]
    fn test_host_bits_ignored() {
        let routes = vec![lan("10.0.0.0/24"), lan("10.0.0.7/24")];
        assert_eq!(validate_routes(&routes).unwrap(), vec![lan("10.0.0.0/24")]);
    }

    #[test]
    fn test_overlapping_pools() {
        let a = IpAssignmentPool::new("10.0.0.1".parse().unwrap(), "10.0.0.100".parse().unwrap());
        let b = IpAssignmentPool::new("10.0.0.50".parse().unwrap(), "10.0.0.200".parse().unwrap());
        let c = IpAssignmentPool::new("10.0.1.1".parse().unwrap(), "10.0.1.100".parse().unwrap());

        assert_eq!(validate_pools(&[a, c]), Ok(()));
        assert_eq!(validate_pools(&[a, c, b]), Err(AllocationError::OverlappingPool { a, b }));
    }
}
