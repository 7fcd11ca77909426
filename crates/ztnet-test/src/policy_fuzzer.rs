//! Policy Fuzzer - Randomized catalogs and members
//!
//! Checks, for every generated member:
//! - Validation accepts what the generator considers valid
//! - Resolution is deterministic
//! - Every grant is backed by a fully matching rule-set
//! - Adding an assignment to a tag without a default never revokes a grant
//! - Valid members resolve without warnings

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use ztnet_core::{CapabilityDefinition, Member, MemberId, Network, NetworkId, TagDefinition, TagValue};
use ztnet_policy::{resolve_capabilities, validate_member, validate_network, Resolution};

/// Fuzzer configuration
#[derive(Clone, Debug)]
pub struct FuzzerConfig {
    pub networks: usize,
    pub tags: usize,
    /// Enum values per tag
    pub values_per_tag: u32,
    pub capabilities: usize,
    pub members: usize,
    /// Probability a member is assigned any given tag
    pub assign_prob: f64,
    pub seed: u64,
}

impl Default for FuzzerConfig {
    fn default() -> Self {
        FuzzerConfig {
            networks: 10,
            tags: 6,
            values_per_tag: 4,
            capabilities: 5,
            members: 50,
            assign_prob: 0.5,
            seed: 42,
        }
    }
}

impl FuzzerConfig {
    /// Light fuzzing for quick tests
    pub fn light() -> Self {
        FuzzerConfig {
            networks: 3,
            tags: 3,
            values_per_tag: 2,
            capabilities: 3,
            members: 20,
            assign_prob: 0.5,
            seed: 42,
        }
    }

    /// Heavy fuzzing for thorough testing
    pub fn heavy() -> Self {
        FuzzerConfig {
            networks: 50,
            tags: 16,
            values_per_tag: 8,
            capabilities: 24,
            members: 200,
            assign_prob: 0.4,
            seed: 42,
        }
    }
}

/// Fuzzing outcome
#[derive(Clone, Debug, Default)]
pub struct FuzzResult {
    pub networks: usize,
    pub members: usize,
    pub grants: usize,
    pub violations: Vec<String>,
}

impl FuzzResult {
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Policy fuzzer
pub struct PolicyFuzzer {
    config: FuzzerConfig,
    rng: StdRng,
}

impl PolicyFuzzer {
    pub fn new(config: FuzzerConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        PolicyFuzzer { config, rng }
    }

    fn tag_name(i: usize) -> String {
        format!("t{}", i)
    }

    /// Generate a valid network catalog
    pub fn generate_network(&mut self, n: usize) -> Network {
        let mut network = Network::new(NetworkId::new(0x8056_c2e2_1c00_0000 + n as u64), format!("fuzz-{}", n));

        for i in 0..self.config.tags {
            let mut tag = TagDefinition::new(100 + i as u32);
            for v in 0..self.config.values_per_tag {
                tag = tag.with_enum(format!("v{}", v), v);
            }
            if self.rng.gen_bool(0.3) {
                tag = tag.with_default(self.rng.gen_range(0..self.config.values_per_tag));
            }
            network = network.with_tag(Self::tag_name(i), tag);
        }

        for c in 0..self.config.capabilities {
            let mut cap = CapabilityDefinition::new(1 + c as u32);
            for _ in 0..self.rng.gen_range(1..=2) {
                let mut rule_set = BTreeMap::new();
                for _ in 0..self.rng.gen_range(1..=2) {
                    let tag = Self::tag_name(self.rng.gen_range(0..self.config.tags));
                    let value = self.rng.gen_range(0..self.config.values_per_tag);
                    let value = if self.rng.gen_bool(0.5) {
                        TagValue::Number(value)
                    } else {
                        TagValue::Name(format!("v{}", value))
                    };
                    rule_set.insert(tag, value);
                }
                cap.rule_sets.push(rule_set);
            }
            network = network.with_capability(format!("c{}", c), cap);
        }

        network
    }

    /// Generate a member with in-range assignments
    pub fn generate_member(&mut self, network: &Network, n: usize) -> Member {
        let mut member = Member::new(network.nwid, MemberId::new(0xaa_0000_0000 + n as u64));
        for i in 0..self.config.tags {
            if self.rng.gen_bool(self.config.assign_prob) {
                let value = self.rng.gen_range(0..self.config.values_per_tag);
                member.tags.insert(Self::tag_name(i), value);
            }
        }
        member
    }

    /// Run the fuzzer
    pub fn run(&mut self) -> FuzzResult {
        let mut result = FuzzResult::default();

        for n in 0..self.config.networks {
            let network = self.generate_network(n);
            result.networks += 1;
            if let Err(e) = validate_network(&network) {
                result.violations.push(format!("{}: generated network rejected: {}", network.nwid, e));
                continue;
            }

            for m in 0..self.config.members {
                let member = self.generate_member(&network, m);
                result.members += 1;
                self.check_member(&network, &member, &mut result);
            }
        }

        result
    }

    fn check_member(&mut self, network: &Network, member: &Member, result: &mut FuzzResult) {
        let who = format!("{}/{}", network.nwid, member.id);

        if let Err(e) = validate_member(member, network) {
            result.violations.push(format!("{}: generated member rejected: {}", who, e));
            return;
        }

        let resolution = resolve_capabilities(member, network);
        result.grants += resolution.capabilities.len();

        if resolution != resolve_capabilities(member, network) {
            result.violations.push(format!("{}: resolution not deterministic", who));
        }
        if !resolution.warnings.is_empty() {
            result.violations.push(format!("{}: warnings {:?}", who, resolution.warnings));
        }
        for cap in &resolution.capabilities {
            if !backed(network, cap, &resolution) {
                result.violations.push(format!("{}: {} granted without a matching rule-set", who, cap));
            }
        }

        let unassigned: Vec<&String> = network
            .tags
            .iter()
            .filter(|(name, tag)| tag.default.is_none() && !member.tags.contains_key(*name))
            .map(|(name, _)| name)
            .collect();
        if unassigned.is_empty() {
            return;
        }

        let tag = unassigned[self.rng.gen_range(0..unassigned.len())].clone();
        let value = self.rng.gen_range(0..self.config.values_per_tag);
        let mut grown = member.clone();
        grown.tags.insert(tag.clone(), value);

        let after = resolve_capabilities(&grown, network);
        for cap in resolution.capabilities.difference(&after.capabilities) {
            result
                .violations
                .push(format!("{}: assigning {}={} revoked {}", who, tag, value, cap));
        }
    }
}

/// Independent check that a grant has a fully matching rule-set
fn backed(network: &Network, capability: &str, resolution: &Resolution) -> bool {
    let Some(cap) = network.capabilities.get(capability) else {
        return false;
    };
    cap.rule_sets.iter().any(|rule_set| {
        !rule_set.is_empty()
            && rule_set.iter().all(|(name, required)| {
                let required = match required {
                    TagValue::Number(n) => Some(*n),
                    TagValue::Name(s) => s.strip_prefix('v').and_then(|v| v.parse().ok()),
                };
                required.is_some() && resolution.effective_tags.get(name).copied() == required
            })
    })
}
