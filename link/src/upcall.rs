//! Notifications the control plane raises towards the layers above it:
//! name table, socket delivery and the broadcast subsystem.

use peerlink_types::{BearerId, LinkId, NodeAddr};

use crate::msg::Packet;

/// Receiver of deferred node side effects.
///
/// Every method is invoked with no node lock held, in the order declared
/// here, so an implementation may call straight back into the control plane.
pub trait Upcalls: Send + Sync {
    /// Contact with `peer` is lost; withdraw everything it published.
    fn node_down(&self, peer: NodeAddr);

    fn wakeup_blocked_senders(&self);

    /// Contact with `peer` is established; start name distribution.
    fn node_up(&self, peer: NodeAddr);

    /// Publish the link-state name for a link that came up.
    fn link_up(&self, peer: NodeAddr, link: LinkId);

    /// Withdraw the link-state name for a link that went down.
    fn link_down(&self, peer: NodeAddr, link: LinkId);

    fn deliver(&self, messages: Vec<Packet>);

    fn deliver_named(&self, messages: Vec<Packet>);

    fn broadcast_input(&self);

    /// Discovery and broadcast packets bypass node state entirely.
    fn non_sequenced(&self, packet: Packet, bearer: BearerId);
}
