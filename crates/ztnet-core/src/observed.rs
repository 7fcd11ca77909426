//! Controller-observed records
//!
//! These mirror what the controller reports at read time. The controller
//! knows tags only by numeric id, so member tags are `id -> value` pairs.

use std::collections::BTreeMap;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::{
    Dns, FlowRule, IpAssignmentPool, MemberId, MemberIntent, Network, NetworkId, NetworkIntent,
    NetworkSettings, Route,
};

/// Network as reported by the controller
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerNetworkState {
    pub nwid: NetworkId,
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
    #[serde(default)]
    pub revision: u64,
}

impl ControllerNetworkState {
    /// A network the controller has just created, with default settings
    pub fn new(nwid: NetworkId) -> Self {
        ControllerNetworkState {
            nwid,
            settings: NetworkSettings::default(),
            ip_assignment_pools: Vec::new(),
            routes: Vec::new(),
            dns: None,
            rules: Vec::new(),
            revision: 0,
        }
    }

    /// What the controller should hold for a desired network
    pub fn from_desired(network: &Network) -> Self {
        ControllerNetworkState {
            nwid: network.nwid,
            settings: network.settings,
            ip_assignment_pools: network.ip_assignment_pools.clone(),
            routes: network.routes.clone(),
            dns: network.dns.clone(),
            rules: network.rules.clone(),
            revision: 0,
        }
    }

    /// Apply one accepted intent, as the controller would
    pub fn apply(&mut self, intent: &NetworkIntent) {
        match intent {
            NetworkIntent::SetIpPools(pools) => self.ip_assignment_pools = pools.clone(),
            NetworkIntent::SetRoutes(routes) => self.routes = routes.clone(),
            NetworkIntent::SetDns(dns) => self.dns = dns.clone(),
            NetworkIntent::SetNetworkConfig(settings) => self.settings = *settings,
            NetworkIntent::SetRules(rules) => self.rules = rules.clone(),
        }
        self.revision += 1;
    }
}

/// Member as reported by the controller
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerMemberState {
    pub id: MemberId,
    pub nwid: NetworkId,
    #[serde(default)]
    pub authorized: bool,
    #[serde(default)]
    pub active_bridge: bool,
    #[serde(default)]
    pub no_auto_assign_ips: bool,
    /// Tag id to value
    #[serde(default, with = "tag_pairs")]
    pub tags: BTreeMap<u32, u32>,
    #[serde(default)]
    pub ip_assignments: Vec<IpAddr>,
    #[serde(default)]
    pub authentication_expiry_time: i64,
    #[serde(default)]
    pub revision: u64,
}

impl ControllerMemberState {
    /// A freshly joined, unauthorized member
    pub fn new(nwid: NetworkId, id: MemberId) -> Self {
        ControllerMemberState {
            id,
            nwid,
            authorized: false,
            active_bridge: false,
            no_auto_assign_ips: false,
            tags: BTreeMap::new(),
            ip_assignments: Vec::new(),
            authentication_expiry_time: 0,
            revision: 0,
        }
    }

    /// Apply one accepted intent, as the controller would
    pub fn apply(&mut self, intent: &MemberIntent) {
        match intent {
            MemberIntent::SetAuthorized(v) => self.authorized = *v,
            MemberIntent::SetTags(tags) => self.tags = tags.clone(),
            MemberIntent::SetIpAssignments(ips) => self.ip_assignments = ips.clone(),
            MemberIntent::SetActiveBridge(v) => self.active_bridge = *v,
        }
        self.revision += 1;
    }
}

/// Controller wire form for tags: `[[id, value], ...]`
mod tag_pairs {
    use std::collections::BTreeMap;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(tags: &BTreeMap<u32, u32>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(tags.iter().map(|(id, value)| [*id, *value]))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BTreeMap<u32, u32>, D::Error> {
        let pairs = Vec::<[u32; 2]>::deserialize(deserializer)?;
        Ok(pairs.into_iter().map(|[id, value]| (id, value)).collect())
    }
}
