//! Entry points of the control plane.
//!
//! [`NodeManager`] is the service object every caller goes through: the
//! receive path, the send path, bearer management, socket connection
//! tracking and administrative listing. It owns the registry and the
//! collaborators effects are dispatched to, and it is cheap to clone so
//! background tasks can carry their own handle.

use std::sync::Arc;

use tracing::{debug, warn};

use peerlink_link::{Bearer, InputQueue, Link, LinkFactory, MediaAddr, Packet, Upcalls, MAX_MSG_SIZE};
use peerlink_types::{BearerId, NodeAddr};

use crate::config::NodeConfig;
use crate::effects::Effects;
use crate::filter::filter_pkt;
use crate::keepalive;
use crate::metrics::NodeMetrics;
use crate::node::{NodeGuard, PeerNode};
use crate::registry::{DumpPage, NodeRegistry};
use crate::shutdown::ShutdownController;
use crate::tracing_spans::{link_event_span, rcv_span, xmit_span};
use crate::NodeError;

/// What became of a received packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RcvOutcome {
    /// Passed admission and was handed to the link.
    Admitted,
    /// Refused by the admission filter or the state check.
    Rejected,
    /// Not link-sequenced; passed to the upcall untouched.
    Diverted,
    /// Malformed, or from a peer we do not know.
    Discarded,
}

/// Result of comparing a discovered peer address with what a node records.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DestStatus {
    pub link_up: bool,
    pub addr_match: bool,
}

#[derive(Clone)]
pub struct NodeManager {
    config: Arc<NodeConfig>,
    registry: Arc<NodeRegistry>,
    bearer: Arc<dyn Bearer>,
    factory: Arc<dyn LinkFactory>,
    upcalls: Arc<dyn Upcalls>,
    metrics: Arc<NodeMetrics>,
    shutdown: Arc<ShutdownController>,
}

impl NodeManager {
    pub fn new(
        config: NodeConfig,
        bearer: Arc<dyn Bearer>,
        factory: Arc<dyn LinkFactory>,
        upcalls: Arc<dyn Upcalls>,
    ) -> Self {
        let metrics = Arc::new(NodeMetrics::new());
        let registry = Arc::new(NodeRegistry::new(
            config.own_address,
            config.max_nodes,
            Arc::clone(&metrics),
        ));
        Self {
            config: Arc::new(config),
            registry,
            bearer,
            factory,
            upcalls,
            metrics,
            shutdown: Arc::new(ShutdownController::new()),
        }
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn metrics(&self) -> &NodeMetrics {
        &self.metrics
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    pub fn own_addr(&self) -> NodeAddr {
        self.config.own_address
    }

    pub fn find(&self, addr: NodeAddr) -> Option<Arc<PeerNode>> {
        self.registry.find(addr)
    }

    pub fn create_node(&self, addr: NodeAddr) -> Result<Arc<PeerNode>, NodeError> {
        self.registry.create(addr)
    }

    pub fn remove_node(&self, addr: NodeAddr) -> Option<Arc<PeerNode>> {
        self.registry.remove(addr)
    }

    /// Stop every keepalive task and drop all nodes.
    pub fn stop(&self) {
        self.shutdown.shutdown();
        self.registry.remove_all();
    }

    /// Run `f` under the node lock, then apply the effects it gathered.
    pub fn with_node<R>(&self, node: &Arc<PeerNode>, f: impl FnOnce(&mut NodeGuard<'_>) -> R) -> R {
        let mut guard = node.lock();
        let result = f(&mut guard);
        let effects = guard.unlock();
        self.settle(node, effects, None);
        result
    }

    /// Apply effects returned by [`NodeGuard::unlock`]. No node lock may be
    /// held by the caller. Packets waiting in `inputq` go to the socket layer
    /// after the notifications and before any transmission.
    pub fn settle(&self, node: &Arc<PeerNode>, mut effects: Effects, inputq: Option<&InputQueue>) {
        let up_delta = i64::from(effects.node_up) - i64::from(effects.node_down);
        if up_delta != 0 {
            self.metrics.nodes_up.add(up_delta);
        }
        effects.notify(node.addr(), self.upcalls.as_ref(), self.bearer.as_ref());
        if let Some(inputq) = inputq {
            let delivered = inputq.drain();
            if !delivered.is_empty() {
                self.upcalls.deliver(delivered);
            }
        }
        if effects.flush(self.bearer.as_ref()) {
            self.reset_links(node);
        }
    }

    /// Process one packet that arrived on `bearer`.
    pub fn rcv(&self, packet: Packet, bearer: BearerId) -> RcvOutcome {
        if !packet.validate() {
            debug!(bearer = %bearer, "discarding malformed packet");
            return RcvOutcome::Discarded;
        }
        if packet.header.non_seq {
            self.upcalls.non_sequenced(packet, bearer);
            return RcvOutcome::Diverted;
        }
        let peer = packet.header.prev_node;
        let Some(node) = self.registry.find(peer) else {
            debug!(peer = %peer, bearer = %bearer, "discarding packet from unknown node");
            return RcvOutcome::Discarded;
        };
        let _span = rcv_span(peer, bearer).entered();

        let mut guard = node.lock();
        let admitted = filter_pkt(guard.state(), &packet.header) && guard.check_state(&packet.header, bearer);
        let inputq = if admitted {
            let (events, inputq) = guard.link_receive(packet, bearer);
            if events.up {
                guard.link_up(bearer);
            }
            if events.down {
                guard.link_down(bearer);
            }
            Some(inputq)
        } else {
            None
        };
        let effects = guard.unlock();
        self.settle(&node, effects, inputq.as_deref());

        if admitted {
            RcvOutcome::Admitted
        } else {
            self.metrics.packets_rejected.inc();
            RcvOutcome::Rejected
        }
    }

    /// Send `packets` to `dnode` over the active link picked by `selector`.
    ///
    /// On [`NodeError::Congested`] the packets come back to the caller; every
    /// other outcome consumes them.
    pub fn xmit(&self, packets: Vec<Packet>, dnode: NodeAddr, selector: u32) -> Result<(), NodeError> {
        let _span = xmit_span(dnode, packets.len()).entered();
        if dnode == self.own_addr() {
            self.upcalls.deliver(packets);
            return Ok(());
        }
        let Some(node) = self.registry.find(dnode) else {
            return Err(NodeError::HostUnreachable(dnode));
        };
        self.with_node(&node, |g| g.xmit(packets, selector))
    }

    /// Send a single packet, dropping it silently if the link is congested.
    pub fn xmit_one(&self, packet: Packet, dnode: NodeAddr, selector: u32) -> Result<(), NodeError> {
        match self.xmit(vec![packet], dnode, selector) {
            Err(NodeError::Congested(dropped)) => {
                debug!(peer = %dnode, count = dropped.len(), "dropped packet on congested link");
                Ok(())
            }
            other => other,
        }
    }

    /// Largest message the socket layer may send toward `dnode`.
    pub fn mtu(&self, dnode: NodeAddr, selector: u32) -> usize {
        if dnode == self.own_addr() {
            return MAX_MSG_SIZE;
        }
        self.registry
            .find(dnode)
            .and_then(|node| node.mtu(selector))
            .unwrap_or(MAX_MSG_SIZE)
    }

    /// The link on `bearer` reported itself up outside the receive path.
    pub fn link_up(&self, node: &Arc<PeerNode>, bearer: BearerId) {
        let _span = link_event_span(node.addr(), bearer, "up").entered();
        self.with_node(node, |g| g.link_up(bearer));
    }

    /// Take the link on `bearer` down, failing traffic over if a parallel
    /// link remains.
    pub fn link_down(&self, node: &Arc<PeerNode>, bearer: BearerId) {
        let _span = link_event_span(node.addr(), bearer, "down").entered();
        self.with_node(node, |g| g.link_down(bearer));
    }

    pub fn check_dest(&self, node: &Arc<PeerNode>, bearer: BearerId, maddr: &MediaAddr) -> DestStatus {
        self.with_node(node, |g| {
            let entry = g.entry(bearer);
            match entry.link.as_ref() {
                Some(link) => DestStatus {
                    link_up: link.is_up(),
                    addr_match: entry.maddr == *maddr,
                },
                None => DestStatus::default(),
            }
        })
    }

    /// Record the peer's media address on `bearer`, creating the link first
    /// if there is none. Any change of address resets the link.
    pub fn update_dest(&self, node: &Arc<PeerNode>, bearer: BearerId, maddr: &MediaAddr) -> Result<(), NodeError> {
        let cap = self.config.keepalive_cap();
        let first_link = self.with_node(node, |g| -> Result<bool, NodeError> {
            let mut created = false;
            if !g.has_link(bearer) {
                let link = self.factory.create(g.addr(), bearer, maddr)?;
                debug!(peer = %g.addr(), bearer = %bearer, link = link.name(), "link created");
                g.attach_link(link);
                created = true;
            }
            g.recompute_keepalive(cap);
            g.set_media_addr(bearer, maddr);
            g.link_down(bearer);
            Ok(created && g.link_count() == 1)
        })?;

        if first_link && !node.is_armed() && !self.shutdown.is_triggered() {
            keepalive::arm(self, node, self.shutdown.subscribe());
        }
        Ok(())
    }

    /// Take down and detach the link on `bearer` for every node.
    pub fn delete_links(&self, bearer: BearerId) {
        for node in self.registry.snapshot() {
            let detached = self.with_node(&node, |g| {
                g.link_down(bearer);
                g.detach_link(bearer)
            });
            if let Some(link) = detached {
                debug!(peer = %node.addr(), link = link.name(), "link deleted");
            }
        }
    }

    /// Take down every link to the peer.
    pub fn reset_links(&self, node: &Arc<PeerNode>) {
        warn!(peer = %node.addr(), "resetting all links to peer");
        self.with_node(node, |g| {
            for bearer in BearerId::all() {
                g.link_down(bearer);
            }
        });
    }

    pub fn attach_link(&self, node: &Arc<PeerNode>, link: Box<dyn Link>) {
        self.with_node(node, |g| g.attach_link(link));
    }

    pub fn detach_link(&self, node: &Arc<PeerNode>, bearer: BearerId) -> Option<Box<dyn Link>> {
        self.with_node(node, |g| g.detach_link(bearer))
    }

    pub fn link_name(&self, addr: NodeAddr, bearer_id: u8) -> Result<String, NodeError> {
        let bearer = BearerId::new(bearer_id).map_err(|_| NodeError::InvalidBearer(bearer_id))?;
        let node = self.registry.find(addr).ok_or(NodeError::HostUnreachable(addr))?;
        self.with_node(&node, |g| g.link_name(bearer))
            .ok_or(NodeError::LinkNotFound { peer: addr, bearer: bearer_id })
    }

    /// Record a socket connection to `peer_port` on `dnode`, so the local
    /// `port` is told if the node goes away.
    pub fn add_conn(&self, dnode: NodeAddr, port: u32, peer_port: u32) -> Result<(), NodeError> {
        if dnode == self.own_addr() {
            return Ok(());
        }
        let node = self.registry.find(dnode).ok_or(NodeError::HostUnreachable(dnode))?;
        self.with_node(&node, |g| g.add_conn(port, peer_port));
        Ok(())
    }

    pub fn remove_conn(&self, dnode: NodeAddr, port: u32) {
        if dnode == self.own_addr() {
            return;
        }
        if let Some(node) = self.registry.find(dnode) {
            self.with_node(&node, |g| g.remove_conn(port));
        }
    }

    /// One page of the administrative node listing.
    pub fn dump(&self, resume_after: Option<NodeAddr>, limit: usize) -> Result<DumpPage, NodeError> {
        self.registry.dump(resume_after, limit)
    }
}
