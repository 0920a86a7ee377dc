//! Pre-built [`tracing::Span`] constructors for control plane operations.
//!
//! Consistent span names and field sets make it easy to follow one peer
//! through receive, link events and keepalive ticks in aggregated logs.

use tracing::{debug_span, info_span, Span};

use peerlink_types::{BearerId, NodeAddr};

/// Span covering one inbound packet from admission to delivery.
pub fn rcv_span(peer: NodeAddr, bearer: BearerId) -> Span {
    debug_span!("rcv", peer = %peer, bearer = %bearer)
}

/// Span covering a link-up or link-down transition on one bearer.
pub fn link_event_span(peer: NodeAddr, bearer: BearerId, event: &'static str) -> Span {
    info_span!("link_event", peer = %peer, bearer = %bearer, event)
}

/// Span covering one keepalive pass over a node's links.
pub fn keepalive_span(peer: NodeAddr) -> Span {
    debug_span!("keepalive", peer = %peer)
}

/// Span covering a send toward a peer.
pub fn xmit_span(peer: NodeAddr, packets: usize) -> Span {
    debug_span!("xmit", peer = %peer, packets)
}
