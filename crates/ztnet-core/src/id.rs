//! Identity types for the ZTNet policy engine
//!
//! Network ids are 64-bit, member (node) addresses are 40-bit. The controller
//! API carries both as fixed-width lowercase hex strings, so parsing is strict
//! about width and the serde form is always the hex string.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::ValidationError;

const ADDRESS_MASK: u64 = 0x00FF_FFFF_FFFF;
const RESERVED_PREFIX: u64 = 0xFF;

/// Network identity (`nwid`) - controller address plus network number
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct NetworkId(pub u64);

impl NetworkId {
    pub const ZERO: NetworkId = NetworkId(0);

    #[inline]
    pub fn new(id: u64) -> Self {
        NetworkId(id)
    }

    /// Create a network id from controller address and 24-bit network number
    /// Format: \[controller:40\]\[number:24\]
    #[inline]
    pub fn from_parts(controller: MemberId, number: u32) -> Self {
        NetworkId((controller.0 << 24) | (number as u64 & 0x00FF_FFFF))
    }

    /// Address of the controller that owns this network
    #[inline]
    pub fn controller(self) -> MemberId {
        MemberId((self.0 >> 24) & ADDRESS_MASK)
    }

    #[inline]
    pub fn number(self) -> u32 {
        (self.0 & 0x00FF_FFFF) as u32
    }
}

impl fmt::Debug for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Network({:016x})", self.0)
    }
}

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl FromStr for NetworkId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_fixed_hex(s, 16)
            .map(NetworkId)
            .ok_or_else(|| ValidationError::InvalidNetworkId(s.to_string()))
    }
}

/// Member identity - 40-bit node address
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct MemberId(pub u64);

impl MemberId {
    /// Create a member id, truncating to 40 bits
    #[inline]
    pub fn new(id: u64) -> Self {
        MemberId(id & ADDRESS_MASK)
    }

    /// Zero and the `ff` prefix are reserved by the controller
    #[inline]
    pub fn is_reserved(self) -> bool {
        self.0 == 0 || (self.0 >> 32) == RESERVED_PREFIX
    }
}

impl fmt::Debug for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Member({:010x})", self.0)
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:010x}", self.0)
    }
}

impl FromStr for MemberId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = parse_fixed_hex(s, 10)
            .map(MemberId)
            .ok_or_else(|| ValidationError::InvalidMemberId(s.to_string()))?;
        if id.is_reserved() {
            return Err(ValidationError::InvalidMemberId(s.to_string()));
        }
        Ok(id)
    }
}

fn parse_fixed_hex(s: &str, width: usize) -> Option<u64> {
    let s = s.trim();
    if s.len() != width || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u64::from_str_radix(s, 16).ok()
}

macro_rules! hex_serde {
    ($ty:ty) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

hex_serde!(NetworkId);
hex_serde!(MemberId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_id_parts() {
        let controller = MemberId::new(0x8056_c2e2_1c);
        let nwid = NetworkId::from_parts(controller, 0x00_0001);

        assert_eq!(nwid.to_string(), "8056c2e21c000001");
        assert_eq!(nwid.controller(), controller);
        assert_eq!(nwid.number(), 1);
    }

    #[test]
    fn test_network_id_parse() {
        let nwid: NetworkId = "8056C2E21C000001".parse().unwrap();
        assert_eq!(nwid, NetworkId::new(0x8056_c2e2_1c00_0001));

        assert!("8056c2e21c00001".parse::<NetworkId>().is_err());
        assert!("8056c2e21c00000g".parse::<NetworkId>().is_err());
    }

    #[test]
    fn test_member_id_parse() {
        let id: MemberId = "efcc1b0947".parse().unwrap();
        assert_eq!(id, MemberId::new(0xefcc1b0947));
        assert_eq!(id.to_string(), "efcc1b0947");

        // Wrong width
        assert!("efcc1b094".parse::<MemberId>().is_err());
        assert!("0efcc1b0947".parse::<MemberId>().is_err());
    }

    #[test]
    fn test_member_id_reserved() {
        assert!("0000000000".parse::<MemberId>().is_err());
        assert!("ff00000001".parse::<MemberId>().is_err());
        assert!(MemberId::new(0xff_1234_5678).is_reserved());
    }

    #[test]
    fn test_member_id_truncation() {
        // Only 40 bits are kept
        let id = MemberId::new(0xFFFF_FFFF_FFFF_FFFF);
        assert_eq!(id.0, 0x00FF_FFFF_FFFF);
    }

    #[test]
    fn test_id_serde_as_hex() {
        let id = MemberId::new(0x12_3456_789a);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"123456789a\"");

        let back: MemberId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn test_member_id_accepts_exactly_unreserved(value in 0u64..(1 << 40)) {
                let parsed = format!("{:010x}", value).parse::<MemberId>();
                prop_assert_eq!(parsed.is_ok(), !MemberId::new(value).is_reserved());
                if let Ok(id) = parsed {
                    prop_assert_eq!(id.0, value);
                }
            }

            #[test]
            fn test_parse_never_panics(input in "\\PC{0,20}") {
                let _ = input.parse::<MemberId>();
                let _ = input.parse::<NetworkId>();
            }
        }
    }
}
