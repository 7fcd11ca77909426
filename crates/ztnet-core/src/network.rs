//! Network definitions
//!
//! A network is the desired policy for one virtual network: addressing,
//! routes, the ordered flow-rule program and the tag/capability catalogs.
//! Field names follow the controller JSON (camelCase) so records can be
//! loaded straight from controller or store payloads.

use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;

use ipnet::IpNet;
use serde::{Deserialize, Serialize};

use crate::NetworkId;

/// Managed route pushed to members
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Route {
    pub target: IpNet,
    #[serde(default)]
    pub via: Option<IpAddr>,
}

impl Route {
    /// Route handled on the virtual LAN itself
    pub fn lan(target: IpNet) -> Self {
        Route { target, via: None }
    }

    pub fn via(target: IpNet, gateway: IpAddr) -> Self {
        Route {
            target,
            via: Some(gateway),
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.via {
            Some(via) => write!(f, "{} via {}", self.target, via),
            None => write!(f, "{} (lan)", self.target),
        }
    }
}

/// Inclusive address range used for automatic assignment
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IpAssignmentPool {
    #[serde(rename = "ipRangeStart")]
    pub range_start: IpAddr,
    #[serde(rename = "ipRangeEnd")]
    pub range_end: IpAddr,
}

impl IpAssignmentPool {
    pub fn new(range_start: IpAddr, range_end: IpAddr) -> Self {
        IpAssignmentPool {
            range_start,
            range_end,
        }
    }

    /// Both ends share a family and start <= end
    pub fn is_well_formed(&self) -> bool {
        self.range_start.is_ipv4() == self.range_end.is_ipv4() && self.range_start <= self.range_end
    }

    pub fn is_ipv4(&self) -> bool {
        self.range_start.is_ipv4()
    }

    /// Check if an address falls inside this pool
    pub fn contains(&self, addr: IpAddr) -> bool {
        addr.is_ipv4() == self.is_ipv4() && self.range_start <= addr && addr <= self.range_end
    }

    pub fn overlaps(&self, other: &IpAssignmentPool) -> bool {
        self.is_ipv4() == other.is_ipv4()
            && self.range_start <= other.range_end
            && other.range_start <= self.range_end
    }
}

impl fmt::Display for IpAssignmentPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.range_start, self.range_end)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct V4AssignMode {
    pub zt: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct V6AssignMode {
    #[serde(rename = "6plane")]
    pub sixplane: bool,
    pub rfc4193: bool,
    pub zt: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dns {
    pub domain: String,
    pub servers: Vec<IpAddr>,
}

/// One entry of the flow-rule program
///
/// Only `not`, `or` and `type` are interpreted; match and action fields are
/// carried opaquely so the program survives a round trip untouched.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FlowRule {
    #[serde(default)]
    pub not: bool,
    #[serde(default)]
    pub or: bool,
    #[serde(rename = "type")]
    pub rule_type: String,
    #[serde(flatten)]
    pub fields: BTreeMap<String, serde_json::Value>,
}

impl FlowRule {
    pub fn new(rule_type: impl Into<String>) -> Self {
        FlowRule {
            not: false,
            or: false,
            rule_type: rule_type.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn action_accept() -> Self {
        FlowRule::new("ACTION_ACCEPT")
    }

    pub fn action_drop() -> Self {
        FlowRule::new("ACTION_DROP")
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn negated(mut self) -> Self {
        self.not = true;
        self
    }

    pub fn is_action(&self) -> bool {
        self.rule_type.starts_with("ACTION_")
    }
}

/// Tag value as written in policy: numeric, or an enum/flag name
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TagValue {
    Number(u32),
    Name(String),
}

impl From<u32> for TagValue {
    fn from(value: u32) -> Self {
        TagValue::Number(value)
    }
}

impl From<&str> for TagValue {
    fn from(value: &str) -> Self {
        TagValue::Name(value.to_string())
    }
}

impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagValue::Number(n) => write!(f, "{}", n),
            TagValue::Name(s) => f.write_str(s),
        }
    }
}

/// Tag catalog entry
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagDefinition {
    pub id: u32,
    #[serde(default)]
    pub enums: BTreeMap<String, u32>,
    #[serde(default)]
    pub flags: BTreeMap<String, u32>,
    #[serde(default)]
    pub default: Option<u32>,
}

impl TagDefinition {
    pub fn new(id: u32) -> Self {
        TagDefinition {
            id,
            enums: BTreeMap::new(),
            flags: BTreeMap::new(),
            default: None,
        }
    }

    pub fn with_enum(mut self, name: impl Into<String>, value: u32) -> Self {
        self.enums.insert(name.into(), value);
        self
    }

    pub fn with_flag(mut self, name: impl Into<String>, bit: u32) -> Self {
        self.flags.insert(name.into(), bit);
        self
    }

    pub fn with_default(mut self, value: u32) -> Self {
        self.default = Some(value);
        self
    }

    /// A tag without enums or flags accepts any value
    pub fn is_unconstrained(&self) -> bool {
        self.enums.is_empty() && self.flags.is_empty()
    }

    fn flag_mask(&self) -> u32 {
        self.flags.values().fold(0, |mask, bit| mask | bit)
    }

    /// Check if a value is within this tag's range
    pub fn accepts(&self, value: u32) -> bool {
        if self.is_unconstrained() || self.enums.values().any(|v| *v == value) {
            return true;
        }
        !self.flags.is_empty() && value & !self.flag_mask() == 0
    }

    /// Resolve a policy value to its number (names go through enums, then flags)
    pub fn resolve(&self, value: &TagValue) -> Option<u32> {
        match value {
            TagValue::Number(n) => Some(*n),
            TagValue::Name(name) => self
                .enums
                .get(name)
                .or_else(|| self.flags.get(name))
                .copied(),
        }
    }
}

/// Tag-name to required value; every entry must match
pub type RuleSet = BTreeMap<String, TagValue>;

/// Capability catalog entry
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityDefinition {
    pub id: u32,
    #[serde(default, rename = "ruleSets")]
    pub rule_sets: Vec<RuleSet>,
}

impl CapabilityDefinition {
    pub fn new(id: u32) -> Self {
        CapabilityDefinition {
            id,
            rule_sets: Vec::new(),
        }
    }

    /// Add an alternative rule-set
    pub fn with_rule_set<I, K, V>(mut self, requirements: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<TagValue>,
    {
        self.rule_sets.push(
            requirements
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }
}

/// Controller-facing scalar settings of a network
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSettings {
    /// Private networks require member approval
    pub private: bool,
    pub enable_broadcast: bool,
    pub multicast_limit: u32,
    pub mtu: u32,
    pub v4_assign_mode: V4AssignMode,
    #[serde(default)]
    pub v6_assign_mode: V6AssignMode,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        NetworkSettings {
            private: true,
            enable_broadcast: true,
            multicast_limit: 32,
            mtu: 2800,
            v4_assign_mode: V4AssignMode { zt: true },
            v6_assign_mode: V6AssignMode::default(),
        }
    }
}

/// Desired network policy
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Network {
    pub nwid: NetworkId,
    #[serde(default)]
    pub name: String,
    #[serde(flatten)]
    pub settings: NetworkSettings,
    #[serde(default)]
    pub ip_assignment_pools: Vec<IpAssignmentPool>,
    #[serde(default)]
    pub routes: Vec<Route>,
    #[serde(default)]
    pub dns: Option<Dns>,
    #[serde(default)]
    pub rules: Vec<FlowRule>,
    #[serde(default, rename = "tagsByName")]
    pub tags: BTreeMap<String, TagDefinition>,
    #[serde(default, rename = "capabilitiesByName")]
    pub capabilities: BTreeMap<String, CapabilityDefinition>,
    #[serde(default)]
    pub revision: u64,
}

impl Network {
    pub fn new(nwid: NetworkId, name: impl Into<String>) -> Self {
        Network {
            nwid,
            name: name.into(),
            settings: NetworkSettings::default(),
            ip_assignment_pools: Vec::new(),
            routes: Vec::new(),
            dns: None,
            rules: vec![FlowRule::action_accept()],
            tags: BTreeMap::new(),
            capabilities: BTreeMap::new(),
            revision: 0,
        }
    }

    pub fn with_pool(mut self, start: IpAddr, end: IpAddr) -> Self {
        self.ip_assignment_pools.push(IpAssignmentPool::new(start, end));
        self
    }

    pub fn with_route(mut self, route: Route) -> Self {
        self.routes.push(route);
        self
    }

    pub fn with_tag(mut self, name: impl Into<String>, tag: TagDefinition) -> Self {
        self.tags.insert(name.into(), tag);
        self
    }

    pub fn with_capability(mut self, name: impl Into<String>, cap: CapabilityDefinition) -> Self {
        self.capabilities.insert(name.into(), cap);
        self
    }

    pub fn with_rules(mut self, rules: Vec<FlowRule>) -> Self {
        self.rules = rules;
        self
    }

    pub fn public(mut self) -> Self {
        self.settings.private = false;
        self
    }

    /// Private networks hold new members for approval
    pub fn requires_approval(&self) -> bool {
        self.settings.private
    }

    /// Look up a catalog tag by its numeric id
    pub fn tag_by_id(&self, id: u32) -> Option<(&str, &TagDefinition)> {
        self.tags
            .iter()
            .find(|(_, tag)| tag.id == id)
            .map(|(name, tag)| (name.as_str(), tag))
    }

    /// Check if an address may be auto-assigned for its family
    pub fn auto_assigns(&self, addr: IpAddr) -> bool {
        match addr {
            IpAddr::V4(_) => self.settings.v4_assign_mode.zt,
            IpAddr::V6(_) => self.settings.v6_assign_mode.zt,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_accepts_enum_values() {
        let tag = TagDefinition::new(1000)
            .with_enum("off", 0)
            .with_enum("on", 1)
            .with_default(0);

        assert!(tag.accepts(0));
        assert!(tag.accepts(1));
        assert!(!tag.accepts(2));
        assert_eq!(tag.resolve(&TagValue::from("on")), Some(1));
        assert_eq!(tag.resolve(&TagValue::from("maybe")), None);
    }

    #[test]
    fn test_tag_accepts_flag_combinations() {
        let tag = TagDefinition::new(2000).with_flag("ssh", 1).with_flag("http", 4);

        assert!(tag.accepts(0));
        assert!(tag.accepts(5));
        assert!(!tag.accepts(2));
    }

    #[test]
    fn test_unconstrained_tag() {
        let tag = TagDefinition::new(3);
        assert!(tag.accepts(u32::MAX));
    }

    #[test]
    fn test_pool_contains_and_overlap() {
        let a = IpAssignmentPool::new("10.0.0.1".parse().unwrap(), "10.0.0.100".parse().unwrap());
        let b = IpAssignmentPool::new("10.0.0.100".parse().unwrap(), "10.0.0.200".parse().unwrap());
        let c = IpAssignmentPool::new("fd00::1".parse().unwrap(), "fd00::ff".parse().unwrap());

        assert!(a.contains("10.0.0.50".parse().unwrap()));
        assert!(!a.contains("10.0.0.101".parse().unwrap()));
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));
        assert!(!a.contains("fd00::2".parse().unwrap()));
    }

    #[test]
    fn test_network_from_controller_json() {
        let json = r#"{
            "nwid": "8056c2e21c000001",
            "name": "lab",
            "private": true,
            "enableBroadcast": true,
            "multicastLimit": 32,
            "mtu": 2800,
            "v4AssignMode": { "zt": true },
            "v6AssignMode": { "6plane": false, "rfc4193": true, "zt": false },
            "ipAssignmentPools": [{ "ipRangeStart": "10.147.20.1", "ipRangeEnd": "10.147.20.254" }],
            "routes": [{ "target": "10.147.20.0/24", "via": null }],
            "rules": [{ "not": false, "or": false, "type": "ACTION_ACCEPT" }],
            "tagsByName": { "exit-node": { "id": 1000, "enums": { "no": 0, "yes": 1 }, "flags": {}, "default": 0 } }
        }"#;

        let network: Network = serde_json::from_str(json).unwrap();
        assert_eq!(network.nwid, NetworkId::new(0x8056_c2e2_1c00_0001));
        assert!(network.settings.v6_assign_mode.rfc4193);
        assert_eq!(network.ip_assignment_pools.len(), 1);
        assert_eq!(network.routes[0], Route::lan("10.147.20.0/24".parse().unwrap()));
        assert_eq!(network.tag_by_id(1000).map(|(name, _)| name), Some("exit-node"));
    }

    #[test]
    fn test_flow_rule_keeps_match_fields() {
        let json = r#"{ "type": "MATCH_TAGS_EQUAL", "id": 1000, "value": 1, "not": true }"#;
        let rule: FlowRule = serde_json::from_str(json).unwrap();

        assert!(rule.not);
        assert!(!rule.is_action());
        assert_eq!(rule.fields.get("id"), Some(&serde_json::json!(1000)));
    }
}
