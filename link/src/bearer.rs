//! Bearer layer boundary: the medium a link's frames travel over.

use serde::{Deserialize, Serialize};

use peerlink_types::{BearerId, NodeAddr};

use crate::msg::Packet;

pub const MEDIA_ADDR_LEN: usize = 20;

/// Media-level destination address (MAC, UDP endpoint, ...) of a peer on
/// one bearer. Stored opaquely and compared byte for byte.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MediaAddr([u8; MEDIA_ADDR_LEN]);

impl MediaAddr {
    /// Copy up to [`MEDIA_ADDR_LEN`] bytes; the rest is zero-filled.
    pub fn from_slice(bytes: &[u8]) -> Self {
        let mut value = [0u8; MEDIA_ADDR_LEN];
        let len = bytes.len().min(MEDIA_ADDR_LEN);
        value[..len].copy_from_slice(&bytes[..len]);
        Self(value)
    }

    pub fn as_bytes(&self) -> &[u8; MEDIA_ADDR_LEN] {
        &self.0
    }
}

/// Transmission and destination bookkeeping offered by the bearer layer.
///
/// Called only with no node lock held.
pub trait Bearer: Send + Sync {
    fn xmit(&self, bearer: BearerId, packets: Vec<Packet>, dest: &MediaAddr);

    /// A peer became reachable on `bearer`; used for broadcast fan-out.
    fn add_dest(&self, bearer: BearerId, peer: NodeAddr);

    fn remove_dest(&self, bearer: BearerId, peer: NodeAddr);
}
