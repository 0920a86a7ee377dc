//! Per-peer node object and its lock guard.
//!
//! A [`PeerNode`] is shared through `Arc`: the registry owns one handle,
//! every lookup hands out another, and an armed keepalive task holds one
//! more. All mutable state sits behind the node's own mutex and is only
//! reachable through a [`NodeGuard`], whose [`unlock`](NodeGuard::unlock)
//! releases the lock and returns the side effects gathered meanwhile.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use peerlink_link::{ExecMode, InputQueue, Link, LinkError, LinkEvents, MediaAddr, Packet, RcvQueues};
use peerlink_types::{BearerId, NodeAddr, SeqNo, MAX_BEARERS};

use crate::effects::Effects;
use crate::fsm::{next_state, FsmEvent, NodeState};
use crate::metrics::NodeMetrics;
use crate::slots::ActiveSlots;
use crate::NodeError;

/// A socket connection to a port on the peer, recorded so it can be aborted
/// when contact is lost.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct SockConn {
    pub(crate) port: u32,
    pub(crate) peer_port: u32,
}

/// One bearer slot of the link table.
pub(crate) struct LinkEntry {
    pub(crate) link: Option<Box<dyn Link>>,
    pub(crate) maddr: MediaAddr,
    pub(crate) inputq: Arc<InputQueue>,
    /// Payload room left once a tunnel header is added.
    pub(crate) mtu: usize,
    /// Counted among the node's working links.
    pub(crate) working: bool,
}

impl Default for LinkEntry {
    fn default() -> Self {
        Self {
            link: None,
            maddr: MediaAddr::default(),
            inputq: Arc::new(InputQueue::new()),
            mtu: 0,
            working: false,
        }
    }
}

pub(crate) struct NodeInner {
    pub(crate) state: NodeState,
    pub(crate) working_links: usize,
    pub(crate) sync_point: SeqNo,
    pub(crate) active: ActiveSlots,
    pub(crate) links: [LinkEntry; MAX_BEARERS],
    pub(crate) link_cnt: usize,
    pub(crate) conns: Vec<SockConn>,
    pub(crate) keepalive_intv: Option<Duration>,
    /// Name distribution messages waiting for delivery after unlock.
    pub(crate) namedq: Vec<Packet>,
}

impl NodeInner {
    fn new() -> Self {
        Self {
            state: NodeState::SelfDownPeerLeaving,
            working_links: 0,
            sync_point: SeqNo::default(),
            active: ActiveSlots::EMPTY,
            links: Default::default(),
            link_cnt: 0,
            conns: Vec::new(),
            keepalive_intv: None,
            namedq: Vec::new(),
        }
    }
}

/// Mutable borrows of two distinct link table entries at once.
pub(crate) fn pair_mut(
    links: &mut [LinkEntry; MAX_BEARERS],
    a: BearerId,
    b: BearerId,
) -> (&mut LinkEntry, &mut LinkEntry) {
    let (a, b) = (a.index(), b.index());
    assert_ne!(a, b, "link entry paired with itself");
    if a < b {
        let (lo, hi) = links.split_at_mut(b);
        (&mut lo[a], &mut hi[0])
    } else {
        let (lo, hi) = links.split_at_mut(a);
        (&mut hi[0], &mut lo[b])
    }
}

pub struct PeerNode {
    addr: NodeAddr,
    own_addr: NodeAddr,
    inner: Mutex<NodeInner>,
    keepalive: Mutex<Option<JoinHandle<()>>>,
    pub(crate) metrics: Arc<NodeMetrics>,
}

impl std::fmt::Debug for PeerNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerNode")
            .field("addr", &self.addr)
            .field("own_addr", &self.own_addr)
            .finish_non_exhaustive()
    }
}

impl PeerNode {
    pub(crate) fn new(addr: NodeAddr, own_addr: NodeAddr, metrics: Arc<NodeMetrics>) -> Self {
        Self {
            addr,
            own_addr,
            inner: Mutex::new(NodeInner::new()),
            keepalive: Mutex::new(None),
            metrics,
        }
    }

    pub fn addr(&self) -> NodeAddr {
        self.addr
    }

    /// Take the node lock. Effects gathered under it come back from
    /// [`NodeGuard::unlock`] and must be applied by the caller.
    pub fn lock(&self) -> NodeGuard<'_> {
        NodeGuard {
            node: self,
            inner: self.inner.lock(),
            effects: Effects::default(),
        }
    }

    pub fn state(&self) -> NodeState {
        self.inner.lock().state
    }

    pub fn is_up(&self) -> bool {
        self.inner.lock().active.is_valid()
    }

    pub fn active_slots(&self) -> ActiveSlots {
        self.inner.lock().active
    }

    pub fn sync_point(&self) -> SeqNo {
        self.inner.lock().sync_point
    }

    pub fn working_links(&self) -> usize {
        self.inner.lock().working_links
    }

    pub fn link_count(&self) -> usize {
        self.inner.lock().link_cnt
    }

    pub fn conn_count(&self) -> usize {
        self.inner.lock().conns.len()
    }

    pub fn keepalive_interval(&self) -> Option<Duration> {
        self.inner.lock().keepalive_intv
    }

    /// User-visible MTU toward the peer over the link chosen by `selector`.
    pub fn mtu(&self, selector: u32) -> Option<usize> {
        let inner = self.inner.lock();
        inner.active.get(selector).map(|b| inner.links[b.index()].mtu)
    }

    pub fn is_armed(&self) -> bool {
        self.keepalive.lock().as_ref().is_some_and(|h| !h.is_finished())
    }

    pub(crate) fn arm(&self, handle: JoinHandle<()>) {
        if let Some(old) = self.keepalive.lock().replace(handle) {
            old.abort();
        }
    }

    /// Stop the keepalive task; it drops its node handle when it unwinds.
    pub(crate) fn disarm(&self) {
        if let Some(handle) = self.keepalive.lock().take() {
            handle.abort();
            debug!(peer = %self.addr, "keepalive disarmed");
        }
    }
}

#[must_use = "dropping the guard without unlock() discards pending effects"]
pub struct NodeGuard<'a> {
    node: &'a PeerNode,
    pub(crate) inner: MutexGuard<'a, NodeInner>,
    pub(crate) effects: Effects,
}

impl<'a> NodeGuard<'a> {
    /// Release the lock and hand back everything that must now happen.
    pub fn unlock(mut self) -> Effects {
        let named = std::mem::take(&mut self.inner.namedq);
        self.effects.named.extend(named);
        let NodeGuard { inner, effects, .. } = self;
        drop(inner);
        effects
    }

    pub fn addr(&self) -> NodeAddr {
        self.node.addr
    }

    pub(crate) fn own_addr(&self) -> NodeAddr {
        self.node.own_addr
    }

    pub(crate) fn metrics(&self) -> &NodeMetrics {
        &self.node.metrics
    }

    pub fn state(&self) -> NodeState {
        self.inner.state
    }

    pub fn is_up(&self) -> bool {
        self.inner.active.is_valid()
    }

    pub fn active_slots(&self) -> ActiveSlots {
        self.inner.active
    }

    pub fn sync_point(&self) -> SeqNo {
        self.inner.sync_point
    }

    pub fn link_count(&self) -> usize {
        self.inner.link_cnt
    }

    /// Ask for blocked senders to be woken once the lock is released.
    pub fn request_sender_wakeup(&mut self) {
        self.effects.wakeup_blocked_senders = true;
    }

    pub fn request_broadcast_input(&mut self) {
        self.effects.broadcast_input = true;
    }

    /// Ask for all links to the peer to be reset after unlock.
    pub fn request_link_reset(&mut self) {
        self.effects.reset_links = true;
    }

    /// Feed `event` to the contact state machine. An event the current state
    /// does not accept is reported and leaves the state untouched.
    pub(crate) fn fsm_evt(&mut self, event: FsmEvent) -> bool {
        let old = self.inner.state;
        match next_state(old, event) {
            Ok(new) => {
                self.inner.state = new;
                if new != old {
                    debug!(peer = %self.addr(), from = %old, to = %new, ?event, "contact state change");
                    self.count_handoff(old, new, event);
                }
                true
            }
            Err(illegal) => {
                error!(peer = %self.addr(), error = %illegal, "illegal contact state event");
                self.metrics().illegal_fsm_events.inc();
                false
            }
        }
    }

    fn count_handoff(&self, old: NodeState, new: NodeState, event: FsmEvent) {
        let m = self.metrics();
        match (event, new) {
            (FsmEvent::FailoverBegin, NodeState::FailingOver) => m.failovers_started.inc(),
            (FsmEvent::SynchBegin, NodeState::Synching) => m.synchs_started.inc(),
            (FsmEvent::FailoverEnd, _) if old == NodeState::FailingOver => m.failovers_completed.inc(),
            (FsmEvent::SynchEnd, _) if old == NodeState::Synching => m.synchs_completed.inc(),
            _ => {}
        }
    }

    pub(crate) fn entry(&self, bearer: BearerId) -> &LinkEntry {
        &self.inner.links[bearer.index()]
    }

    pub(crate) fn entry_mut(&mut self, bearer: BearerId) -> &mut LinkEntry {
        &mut self.inner.links[bearer.index()]
    }

    pub fn has_link(&self, bearer: BearerId) -> bool {
        self.entry(bearer).link.is_some()
    }

    pub fn link_name(&self, bearer: BearerId) -> Option<String> {
        self.entry(bearer).link.as_ref().map(|l| l.name().to_string())
    }

    /// First bearer other than `bearer` that holds a link.
    pub(crate) fn parallel_link(&self, bearer: BearerId) -> Option<BearerId> {
        BearerId::all().find(|&b| b != bearer && self.has_link(b))
    }

    /// Queue frames for sending over `bearer` to the peer's recorded address.
    pub(crate) fn queue_xmit(&mut self, bearer: BearerId, packets: Vec<Packet>) {
        let dest = self.entry(bearer).maddr;
        self.effects.transmit(bearer, dest, packets);
    }

    pub(crate) fn attach_link(&mut self, link: Box<dyn Link>) {
        let bearer = link.bearer_id();
        let entry = self.entry_mut(bearer);
        if entry.link.replace(link).is_none() {
            self.inner.link_cnt += 1;
        }
    }

    pub(crate) fn detach_link(&mut self, bearer: BearerId) -> Option<Box<dyn Link>> {
        let link = self.entry_mut(bearer).link.take()?;
        self.inner.link_cnt -= 1;
        Some(link)
    }

    pub(crate) fn set_media_addr(&mut self, bearer: BearerId, maddr: &MediaAddr) {
        let entry = self.entry_mut(bearer);
        entry.maddr = *maddr;
        if let Some(link) = entry.link.as_mut() {
            link.set_media_addr(maddr);
        }
    }

    pub(crate) fn add_conn(&mut self, port: u32, peer_port: u32) {
        self.inner.conns.push(SockConn { port, peer_port });
    }

    pub(crate) fn remove_conn(&mut self, port: u32) -> bool {
        let before = self.inner.conns.len();
        self.inner.conns.retain(|c| c.port != port);
        self.inner.conns.len() != before
    }

    /// Hand `packet` to the link on `bearer`. Returns the clone of the input
    /// queue the link delivered into, for draining after unlock.
    pub(crate) fn link_receive(&mut self, packet: Packet, bearer: BearerId) -> (LinkEvents, Arc<InputQueue>) {
        let mut xmitq = Vec::new();
        let inner = &mut *self.inner;
        let entry = &mut inner.links[bearer.index()];
        let inputq = Arc::clone(&entry.inputq);
        let events = match entry.link.as_mut() {
            Some(link) => link.receive(
                packet,
                RcvQueues {
                    input: &inputq,
                    named: &mut inner.namedq,
                },
                &mut xmitq,
            ),
            None => LinkEvents::NONE,
        };
        self.queue_xmit(bearer, xmitq);
        (events, inputq)
    }

    /// Send `packets` over the active link picked by `selector`.
    pub(crate) fn xmit(&mut self, packets: Vec<Packet>, selector: u32) -> Result<(), NodeError> {
        let peer = self.addr();
        let Some(bearer) = self.inner.active.get(selector) else {
            return Err(NodeError::HostUnreachable(peer));
        };
        let mut xmitq = Vec::new();
        let result = match self.entry_mut(bearer).link.as_mut() {
            Some(link) => link.xmit(packets, &mut xmitq),
            None => return Err(NodeError::HostUnreachable(peer)),
        };
        self.queue_xmit(bearer, xmitq);
        if let Err(LinkError::NoBuffers) = result {
            info!(peer = %peer, bearer = %bearer, "link send buffers exhausted, resetting link");
            self.link_down(bearer);
        }
        result.map_err(NodeError::from)
    }

    pub(crate) fn established_contact(&mut self) {
        self.fsm_evt(FsmEvent::SelfEstablContact);
        self.effects.node_up = true;
    }

    /// Peer departure: links fall back to open mode with their handoff state
    /// discarded, and every connection to the peer gets a synthetic abort.
    pub(crate) fn lost_contact(&mut self) {
        let peer = self.addr();
        let own = self.own_addr();
        info!(peer = %peer, "lost contact with peer node");

        for entry in self.inner.links.iter_mut() {
            if let Some(link) = entry.link.as_mut() {
                link.set_exec_mode(ExecMode::Open);
                link.reset_failover_state();
            }
        }
        self.fsm_evt(FsmEvent::SelfLostContact);
        self.effects.node_down = true;

        let conns = std::mem::take(&mut self.inner.conns);
        self.effects.messages.extend(
            conns
                .into_iter()
                .map(|c| Packet::no_node_notice(own, peer, c.port, c.peer_port)),
        );
    }
}
