//! Bearer and link identities.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::TypesError;

/// Number of bearer slots a node can hold links on.
pub const MAX_BEARERS: usize = 3;

/// Index of a bearer (transmission medium) on the local host.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct BearerId(u8);

impl BearerId {
    pub fn new(id: u8) -> Result<Self, TypesError> {
        if (id as usize) < MAX_BEARERS {
            Ok(Self(id))
        } else {
            Err(TypesError::InvalidBearer(id))
        }
    }

    pub const fn get(&self) -> u8 {
        self.0
    }

    pub const fn index(&self) -> usize {
        self.0 as usize
    }

    /// All valid bearer ids in ascending order.
    pub fn all() -> impl Iterator<Item = BearerId> {
        (0..MAX_BEARERS as u8).map(BearerId)
    }
}

impl TryFrom<u8> for BearerId {
    type Error = TypesError;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        Self::new(id)
    }
}

impl From<BearerId> for u8 {
    fn from(id: BearerId) -> Self {
        id.0
    }
}

impl fmt::Display for BearerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of one link as published to the name table:
/// `peer_bearer << 16 | local_bearer`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LinkId(u32);

impl LinkId {
    pub fn new(peer_bearer: u8, local_bearer: BearerId) -> Self {
        Self((u32::from(peer_bearer) << 16) | u32::from(local_bearer.get()))
    }

    pub const fn raw(&self) -> u32 {
        self.0
    }

    pub const fn local_bearer(&self) -> u8 {
        (self.0 & 0xffff) as u8
    }

    pub const fn peer_bearer(&self) -> u8 {
        (self.0 >> 16) as u8
    }
}
