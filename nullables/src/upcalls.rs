//! Nullable upper layers: record every notification and delivery the
//! control plane makes, in order.

use parking_lot::Mutex;

use peerlink_link::{Packet, Upcalls};
use peerlink_types::{BearerId, LinkId, NodeAddr};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Upcall {
    NodeDown(NodeAddr),
    WakeupBlockedSenders,
    NodeUp(NodeAddr),
    LinkUp(NodeAddr, LinkId),
    LinkDown(NodeAddr, LinkId),
    Deliver(Vec<Packet>),
    DeliverNamed(Vec<Packet>),
    BroadcastInput,
    NonSequenced(Packet, BearerId),
}

pub struct NullUpcalls {
    calls: Mutex<Vec<Upcall>>,
}

impl NullUpcalls {
    pub fn new() -> Self {
        Self { calls: Mutex::new(Vec::new()) }
    }

    pub fn calls(&self) -> Vec<Upcall> {
        self.calls.lock().clone()
    }

    /// Packets handed to the socket layer, flattened across calls.
    pub fn delivered(&self) -> Vec<Packet> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                Upcall::Deliver(p) => Some(p.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    /// Number of recorded calls matching `pred`.
    pub fn count(&self, pred: impl Fn(&Upcall) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| pred(c)).count()
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }

    fn record(&self, call: Upcall) {
        self.calls.lock().push(call);
    }
}

impl Default for NullUpcalls {
    fn default() -> Self {
        Self::new()
    }
}

impl Upcalls for NullUpcalls {
    fn node_down(&self, peer: NodeAddr) {
        self.record(Upcall::NodeDown(peer));
    }

    fn wakeup_blocked_senders(&self) {
        self.record(Upcall::WakeupBlockedSenders);
    }

    fn node_up(&self, peer: NodeAddr) {
        self.record(Upcall::NodeUp(peer));
    }

    fn link_up(&self, peer: NodeAddr, link: LinkId) {
        self.record(Upcall::LinkUp(peer, link));
    }

    fn link_down(&self, peer: NodeAddr, link: LinkId) {
        self.record(Upcall::LinkDown(peer, link));
    }

    fn deliver(&self, messages: Vec<Packet>) {
        self.record(Upcall::Deliver(messages));
    }

    fn deliver_named(&self, messages: Vec<Packet>) {
        self.record(Upcall::DeliverNamed(messages));
    }

    fn broadcast_input(&self) {
        self.record(Upcall::BroadcastInput);
    }

    fn non_sequenced(&self, packet: Packet, bearer: BearerId) {
        self.record(Upcall::NonSequenced(packet, bearer));
    }
}
