//! Member definitions
//!
//! A member is one node's membership record within one network. The record
//! references its network by `nwid` only; lookups go through the store.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::{MemberId, NetworkId};

/// Desired membership record
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub id: MemberId,
    pub nwid: NetworkId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub authorized: bool,
    /// Milliseconds since the epoch, 0 when authentication never expires
    #[serde(default)]
    pub authentication_expiry_time: i64,
    #[serde(default)]
    pub active_bridge: bool,
    #[serde(default)]
    pub no_auto_assign_ips: bool,
    /// Tag name to concrete value
    #[serde(default)]
    pub tags: BTreeMap<String, u32>,
    #[serde(default)]
    pub ip_assignments: Vec<IpAddr>,
    /// Local revision, bumped on every stored change
    #[serde(default)]
    pub revision: u64,
}

impl Member {
    pub fn new(nwid: NetworkId, id: MemberId) -> Self {
        Member {
            id,
            nwid,
            name: String::new(),
            authorized: false,
            authentication_expiry_time: 0,
            active_bridge: false,
            no_auto_assign_ips: false,
            tags: BTreeMap::new(),
            ip_assignments: Vec::new(),
            revision: 0,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>, value: u32) -> Self {
        self.tags.insert(tag.into(), value);
        self
    }

    pub fn with_ip(mut self, addr: IpAddr) -> Self {
        if !self.ip_assignments.contains(&addr) {
            self.ip_assignments.push(addr);
        }
        self
    }

    pub fn authorized(mut self) -> Self {
        self.authorized = true;
        self
    }

    /// Check if authentication has lapsed at `now_ms`
    pub fn is_auth_expired(&self, now_ms: i64) -> bool {
        self.authentication_expiry_time > 0 && self.authentication_expiry_time <= now_ms
    }

    /// Authorization the controller should enforce at `now_ms`
    pub fn effective_authorized(&self, now_ms: i64) -> bool {
        self.authorized && !self.is_auth_expired(now_ms)
    }

    /// Record a local change
    pub fn touch(&mut self) {
        self.revision += 1;
    }
}

/// Current wall-clock time in milliseconds since the epoch
pub fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
