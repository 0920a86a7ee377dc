//! Side effects accumulated while a node is locked.
//!
//! Nothing that can reach another subsystem runs under the node lock. Guarded
//! operations record what must happen in an [`Effects`] value; the guard
//! hands it back on unlock and the caller applies it with no lock held.

use peerlink_link::{Bearer, MediaAddr, Packet, Upcalls};
use peerlink_types::{BearerId, LinkId, NodeAddr};

/// Frames a link produced that still have to be handed to the bearer.
#[derive(Debug, Clone, PartialEq)]
pub struct Transmission {
    pub bearer: BearerId,
    pub dest: MediaAddr,
    pub packets: Vec<Packet>,
}

#[derive(Debug, Default)]
#[must_use = "effects are lost unless applied"]
pub struct Effects {
    pub node_down: bool,
    pub wakeup_blocked_senders: bool,
    pub node_up: bool,
    pub links_up: Vec<LinkId>,
    pub links_down: Vec<LinkId>,
    pub messages: Vec<Packet>,
    pub named: Vec<Packet>,
    pub broadcast_input: bool,
    /// Ask for every link to the node to be reset once everything else ran.
    pub reset_links: bool,
    pub dests_added: Vec<BearerId>,
    pub dests_removed: Vec<BearerId>,
    pub transmissions: Vec<Transmission>,
}

impl Effects {
    pub fn is_empty(&self) -> bool {
        !self.node_down
            && !self.wakeup_blocked_senders
            && !self.node_up
            && self.links_up.is_empty()
            && self.links_down.is_empty()
            && self.messages.is_empty()
            && self.named.is_empty()
            && !self.broadcast_input
            && !self.reset_links
            && self.dests_added.is_empty()
            && self.dests_removed.is_empty()
            && self.transmissions.is_empty()
    }

    pub(crate) fn transmit(&mut self, bearer: BearerId, dest: MediaAddr, packets: Vec<Packet>) {
        if !packets.is_empty() {
            self.transmissions.push(Transmission {
                bearer,
                dest,
                packets,
            });
        }
    }

    /// Bearer destination changes and upper-layer notifications, in the
    /// fixed order: node down, sender wakeup, node up, link-up publication,
    /// link-down withdrawal, message delivery, named delivery, broadcast
    /// input.
    pub fn notify(&mut self, peer: NodeAddr, upcalls: &dyn Upcalls, bearer: &dyn Bearer) {
        for b in self.dests_added.drain(..) {
            bearer.add_dest(b, peer);
        }
        for b in self.dests_removed.drain(..) {
            bearer.remove_dest(b, peer);
        }
        if std::mem::take(&mut self.node_down) {
            upcalls.node_down(peer);
        }
        if std::mem::take(&mut self.wakeup_blocked_senders) {
            upcalls.wakeup_blocked_senders();
        }
        if std::mem::take(&mut self.node_up) {
            upcalls.node_up(peer);
        }
        for link in self.links_up.drain(..) {
            upcalls.link_up(peer, link);
        }
        for link in self.links_down.drain(..) {
            upcalls.link_down(peer, link);
        }
        if !self.messages.is_empty() {
            upcalls.deliver(std::mem::take(&mut self.messages));
        }
        if !self.named.is_empty() {
            upcalls.deliver_named(std::mem::take(&mut self.named));
        }
        if std::mem::take(&mut self.broadcast_input) {
            upcalls.broadcast_input();
        }
    }

    /// Hand queued frames to the bearer. Returns whether a reset of all the
    /// node's links was requested; the caller performs it last since it
    /// needs the node lock again.
    pub fn flush(self, bearer: &dyn Bearer) -> bool {
        for tx in self.transmissions {
            bearer.xmit(tx.bearer, tx.packets, &tx.dest);
        }
        self.reset_links
    }
}
