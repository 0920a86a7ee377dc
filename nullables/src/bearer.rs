//! Nullable bearer: record frames and destination changes instead of
//! putting anything on a wire.

use std::collections::BTreeSet;

use parking_lot::Mutex;

use peerlink_link::{Bearer, MediaAddr, Packet};
use peerlink_types::{BearerId, NodeAddr};

/// One `xmit` call as the bearer saw it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SentFrames {
    pub bearer: BearerId,
    pub dest: MediaAddr,
    pub packets: Vec<Packet>,
}

pub struct NullBearer {
    sent: Mutex<Vec<SentFrames>>,
    dests: Mutex<BTreeSet<(BearerId, NodeAddr)>>,
}

impl NullBearer {
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            dests: Mutex::new(BTreeSet::new()),
        }
    }

    /// Every transmission so far, oldest first.
    pub fn sent(&self) -> Vec<SentFrames> {
        self.sent.lock().clone()
    }

    /// All packets sent on `bearer`, flattened across calls.
    pub fn sent_packets(&self, bearer: BearerId) -> Vec<Packet> {
        self.sent
            .lock()
            .iter()
            .filter(|f| f.bearer == bearer)
            .flat_map(|f| f.packets.iter().cloned())
            .collect()
    }

    pub fn has_dest(&self, bearer: BearerId, peer: NodeAddr) -> bool {
        self.dests.lock().contains(&(bearer, peer))
    }

    pub fn clear(&self) {
        self.sent.lock().clear();
    }
}

impl Default for NullBearer {
    fn default() -> Self {
        Self::new()
    }
}

impl Bearer for NullBearer {
    fn xmit(&self, bearer: BearerId, packets: Vec<Packet>, dest: &MediaAddr) {
        self.sent.lock().push(SentFrames { bearer, dest: *dest, packets });
    }

    fn add_dest(&self, bearer: BearerId, peer: NodeAddr) {
        self.dests.lock().insert((bearer, peer));
    }

    fn remove_dest(&self, bearer: BearerId, peer: NodeAddr) {
        self.dests.lock().remove(&(bearer, peer));
    }
}
