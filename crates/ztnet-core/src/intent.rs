//! Mutation intents
//!
//! Intents are field-level mutation requests handed to the controller. One
//! differing field yields exactly one intent; all intents for one member (or
//! one network) travel together as a single batch.

use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::{Dns, FlowRule, IpAssignmentPool, MemberId, NetworkId, NetworkSettings, Route};

/// Member fields the reconciler converges
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MemberField {
    Tags,
    IpAssignments,
    ActiveBridge,
    Authorized,
}

/// Member-scoped intent
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", content = "value", rename_all = "camelCase")]
pub enum MemberIntent {
    SetAuthorized(bool),
    /// Complete tag set, id to value
    SetTags(BTreeMap<u32, u32>),
    SetIpAssignments(Vec<IpAddr>),
    SetActiveBridge(bool),
}

impl MemberIntent {
    pub fn field(&self) -> MemberField {
        match self {
            MemberIntent::SetAuthorized(_) => MemberField::Authorized,
            MemberIntent::SetTags(_) => MemberField::Tags,
            MemberIntent::SetIpAssignments(_) => MemberField::IpAssignments,
            MemberIntent::SetActiveBridge(_) => MemberField::ActiveBridge,
        }
    }
}

impl fmt::Display for MemberIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemberIntent::SetAuthorized(v) => write!(f, "authorized={}", v),
            MemberIntent::SetTags(tags) => write!(f, "tags={:?}", tags),
            MemberIntent::SetIpAssignments(ips) => write!(f, "ipAssignments={:?}", ips),
            MemberIntent::SetActiveBridge(v) => write!(f, "activeBridge={}", v),
        }
    }
}

/// Network fields the reconciler converges
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NetworkField {
    IpPools,
    Routes,
    Dns,
    Settings,
    Rules,
}

/// Network-scoped intent
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "value", rename_all = "camelCase")]
pub enum NetworkIntent {
    SetIpPools(Vec<IpAssignmentPool>),
    SetRoutes(Vec<Route>),
    SetDns(Option<Dns>),
    SetNetworkConfig(NetworkSettings),
    /// The complete ordered rule program
    SetRules(Vec<FlowRule>),
}

impl NetworkIntent {
    pub fn field(&self) -> NetworkField {
        match self {
            NetworkIntent::SetIpPools(_) => NetworkField::IpPools,
            NetworkIntent::SetRoutes(_) => NetworkField::Routes,
            NetworkIntent::SetDns(_) => NetworkField::Dns,
            NetworkIntent::SetNetworkConfig(_) => NetworkField::Settings,
            NetworkIntent::SetRules(_) => NetworkField::Rules,
        }
    }
}

/// All intents for one member, applied as one logical unit
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemberBatch {
    pub nwid: NetworkId,
    pub member: MemberId,
    pub intents: Vec<MemberIntent>,
}

impl MemberBatch {
    pub fn is_empty(&self) -> bool {
        self.intents.is_empty()
    }

    pub fn fields(&self) -> Vec<MemberField> {
        self.intents.iter().map(MemberIntent::field).collect()
    }
}
