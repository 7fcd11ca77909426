//! Catalog and member validation
//!
//! Validation is fail-closed: the first violation found is returned and the
//! caller must not apply any part of the offending record. Checks walk the
//! catalogs in name order so the reported error is stable across runs.
//!
//! Pool and route overlap belong to the allocator (`ztnet-alloc`); this module
//! only checks that each pool is well formed.

use std::collections::{BTreeSet, HashMap};

use ztnet_core::{Member, Network, ValidationError};

/// Validate a network's tag catalog, capability catalog and pool shapes
pub fn validate_network(network: &Network) -> Result<(), ValidationError> {
    validate_tags(network)?;
    validate_capabilities(network)?;

    for pool in &network.ip_assignment_pools {
        if !pool.is_well_formed() {
            return Err(ValidationError::InvalidPool {
                start: pool.range_start,
                end: pool.range_end,
            });
        }
    }

    Ok(())
}

fn validate_tags(network: &Network) -> Result<(), ValidationError> {
    let mut ids: HashMap<u32, &str> = HashMap::new();

    for (name, tag) in &network.tags {
        if let Some(first) = ids.insert(tag.id, name) {
            return Err(ValidationError::DuplicateTagId {
                id: tag.id,
                first: first.to_string(),
                second: name.clone(),
            });
        }

        for (flag, bit) in &tag.flags {
            if *bit == 0 {
                return Err(ValidationError::InvalidTagRange {
                    tag: name.clone(),
                    reason: format!("flag {} has no bits set", flag),
                });
            }
        }

        if let Some(default) = tag.default {
            if !tag.accepts(default) {
                return Err(ValidationError::InvalidTagRange {
                    tag: name.clone(),
                    reason: format!("default {} is outside the enum range", default),
                });
            }
        }
    }

    Ok(())
}

fn validate_capabilities(network: &Network) -> Result<(), ValidationError> {
    let mut ids: HashMap<u32, &str> = HashMap::new();

    for (name, cap) in &network.capabilities {
        let invalid = |reason: String| ValidationError::InvalidCapability {
            capability: name.clone(),
            reason,
        };

        if let Some(first) = ids.insert(cap.id, name) {
            return Err(invalid(format!("id {} already used by {}", cap.id, first)));
        }

        for (index, rule_set) in cap.rule_sets.iter().enumerate() {
            // An empty rule-set would match every member
            if rule_set.is_empty() {
                return Err(invalid(format!("rule-set {} has no requirements", index)));
            }

            for (tag_name, required) in rule_set {
                let tag = network
                    .tags
                    .get(tag_name)
                    .ok_or_else(|| invalid(format!("rule-set {} references unknown tag {}", index, tag_name)))?;

                let value = tag.resolve(required).ok_or_else(|| {
                    invalid(format!("tag {} has no value named {}", tag_name, required))
                })?;

                if !tag.accepts(value) {
                    return Err(invalid(format!(
                        "rule-set {} requires {}={} outside the enum range",
                        index, tag_name, value
                    )));
                }
            }
        }
    }

    Ok(())
}

/// Validate a member against its network, strictly
///
/// Every assigned tag must be present in the current catalog.
pub fn validate_member(member: &Member, network: &Network) -> Result<(), ValidationError> {
    validate_member_held(member, network, &BTreeSet::new())
}

/// Validate a member, tolerating tags it already held before the catalog changed
///
/// `held` lists the tag names present on the member's previous record. A held
/// tag missing from the catalog is stale and left for the resolver to report;
/// any other tag missing from the catalog is [`ValidationError::UnknownTag`].
pub fn validate_member_held(
    member: &Member,
    network: &Network,
    held: &BTreeSet<String>,
) -> Result<(), ValidationError> {
    if member.nwid != network.nwid {
        return Err(ValidationError::NetworkMismatch {
            member: member.id,
            expected: network.nwid,
            actual: member.nwid,
        });
    }

    for (tag_name, value) in &member.tags {
        match network.tags.get(tag_name) {
            Some(tag) if !tag.accepts(*value) => {
                return Err(ValidationError::TagValueOutOfRange {
                    tag: tag_name.clone(),
                    value: *value,
                });
            }
            Some(_) => {}
            None if held.contains(tag_name) => {}
            None => return Err(ValidationError::UnknownTag(tag_name.clone())),
        }
    }

    for addr in &member.ip_assignments {
        if !network.ip_assignment_pools.iter().any(|pool| pool.contains(*addr)) {
            return Err(ValidationError::AddressOutsideAnyPool(*addr));
        }
    }

    Ok(())
}
