//! Node address type: `zone.cluster.node` packed into 32 bits.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::TypesError;

const ZONE_SHIFT: u32 = 24;
const CLUSTER_SHIFT: u32 = 12;
const CLUSTER_MASK: u32 = 0xfff;
const NODE_MASK: u32 = 0xfff;

/// Network address of a node.
///
/// Layout is 8 bits of zone, 12 bits of cluster and 12 bits of node number.
/// Two addresses are directly reachable from each other only when they share
/// zone and cluster.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeAddr(u32);

impl NodeAddr {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Build an address from its components, truncating each to its field width.
    pub const fn from_parts(zone: u8, cluster: u16, node: u16) -> Self {
        Self(
            ((zone as u32) << ZONE_SHIFT)
                | (((cluster as u32) & CLUSTER_MASK) << CLUSTER_SHIFT)
                | ((node as u32) & NODE_MASK),
        )
    }

    pub const fn raw(&self) -> u32 {
        self.0
    }

    pub const fn zone(&self) -> u8 {
        (self.0 >> ZONE_SHIFT) as u8
    }

    pub const fn cluster(&self) -> u16 {
        ((self.0 >> CLUSTER_SHIFT) & CLUSTER_MASK) as u16
    }

    pub const fn node(&self) -> u16 {
        (self.0 & NODE_MASK) as u16
    }

    /// Whether `other` lives in exactly the same zone and cluster as `self`.
    pub const fn in_same_cluster(&self, other: NodeAddr) -> bool {
        (self.0 ^ other.0) >> CLUSTER_SHIFT == 0
    }
}

impl fmt::Display for NodeAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}.{}.{}>", self.zone(), self.cluster(), self.node())
    }
}

impl fmt::Debug for NodeAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeAddr({:#x})", self.0)
    }
}

impl FromStr for NodeAddr {
    type Err = TypesError;

    /// Accepts either dotted form (`"1.1.10"`, optionally wrapped in `<>`)
    /// or a raw hexadecimal value (`"0x1001010"`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || TypesError::InvalidAddress(s.to_string());
        let trimmed = s.trim().trim_start_matches('<').trim_end_matches('>');

        if let Some(hex) = trimmed.strip_prefix("0x") {
            return u32::from_str_radix(hex, 16).map(Self).map_err(|_| invalid());
        }

        let parts: Vec<&str> = trimmed.split('.').collect();
        if parts.len() != 3 {
            return Err(invalid());
        }
        let zone: u8 = parts[0].parse().map_err(|_| invalid())?;
        let cluster: u16 = parts[1].parse().map_err(|_| invalid())?;
        let node: u16 = parts[2].parse().map_err(|_| invalid())?;
        if u32::from(cluster) > CLUSTER_MASK || u32::from(node) > NODE_MASK {
            return Err(invalid());
        }
        Ok(Self::from_parts(zone, cluster, node))
    }
}

impl TryFrom<String> for NodeAddr {
    type Error = TypesError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<NodeAddr> for String {
    fn from(addr: NodeAddr) -> Self {
        format!("{}.{}.{}", addr.zone(), addr.cluster(), addr.node())
    }
}

impl From<u32> for NodeAddr {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}
