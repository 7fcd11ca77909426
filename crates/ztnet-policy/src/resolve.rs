//! Capability resolution
//!
//! A member's effective tag values are its explicit assignments, falling back
//! to each catalog tag's default. Capabilities are granted when at least one
//! of their rule-sets fully matches those effective values.
//!
//! Assignments to tags that left the catalog are stale: they take no part in
//! evaluation and are reported as [`PolicyWarning::StaleTagAssignment`].

use std::collections::{BTreeMap, BTreeSet};

use tracing::warn;
use ztnet_core::{Member, MemberId, Network, PolicyWarning, RuleSet};

/// Outcome of resolving one member
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Granted capability names
    pub capabilities: BTreeSet<String>,
    /// Tag name to effective value (explicit or default)
    pub effective_tags: BTreeMap<String, u32>,
    /// Non-fatal findings
    pub warnings: Vec<PolicyWarning>,
}

impl Resolution {
    /// Check if a capability was granted
    pub fn grants(&self, capability: &str) -> bool {
        self.capabilities.contains(capability)
    }

    /// Names of stale tags found during resolution
    pub fn stale_tags(&self) -> impl Iterator<Item = &str> {
        self.warnings.iter().filter_map(|w| match w {
            PolicyWarning::StaleTagAssignment { tag, .. } => Some(tag.as_str()),
            _ => None,
        })
    }
}

/// Resolves capabilities against one network's catalogs
#[derive(Debug, Clone, Copy)]
pub struct CapabilityResolver<'a> {
    network: &'a Network,
}

impl<'a> CapabilityResolver<'a> {
    pub fn new(network: &'a Network) -> Self {
        CapabilityResolver { network }
    }

    /// Resolve a member record
    pub fn resolve(&self, member: &Member) -> Resolution {
        self.resolve_tags(member.id, &member.tags)
    }

    /// Resolve an explicit tag assignment map
    pub fn resolve_tags(&self, member: MemberId, tags: &BTreeMap<String, u32>) -> Resolution {
        let mut resolution = Resolution::default();

        for (name, value) in tags {
            if !self.network.tags.contains_key(name) {
                warn!(%member, tag = %name, value, "Stale tag assignment ignored");
                resolution.warnings.push(PolicyWarning::StaleTagAssignment {
                    member,
                    tag: name.clone(),
                    value: *value,
                });
            }
        }

        for (name, tag) in &self.network.tags {
            if let Some(value) = tags.get(name).copied().or(tag.default) {
                resolution.effective_tags.insert(name.clone(), value);
            }
        }

        for (name, cap) in &self.network.capabilities {
            if cap
                .rule_sets
                .iter()
                .any(|rule_set| self.rule_set_matches(rule_set, &resolution.effective_tags))
            {
                resolution.capabilities.insert(name.clone());
            }
        }

        resolution
    }

    /// Every requirement must match; an empty set never matches
    fn rule_set_matches(&self, rule_set: &RuleSet, effective: &BTreeMap<String, u32>) -> bool {
        !rule_set.is_empty()
            && rule_set.iter().all(|(tag_name, required)| {
                let required = self
                    .network
                    .tags
                    .get(tag_name)
                    .and_then(|tag| tag.resolve(required));

                match required {
                    Some(required) => effective.get(tag_name) == Some(&required),
                    None => false,
                }
            })
    }

    /// Tag id to value pairs the controller should hold for a member
    ///
    /// Only explicit, non-stale assignments are sent; defaults stay implicit.
    pub fn controller_tags(&self, member: &Member) -> BTreeMap<u32, u32> {
        member
            .tags
            .iter()
            .filter_map(|(name, value)| self.network.tags.get(name).map(|tag| (tag.id, *value)))
            .collect()
    }
}

/// Resolve a member's capabilities against its network
pub fn resolve_capabilities(member: &Member, network: &Network) -> Resolution {
    CapabilityResolver::new(network).resolve(member)
}
