//! Traffic handoff between parallel links.
//!
//! Failover rescues the backlog of a link that went down by tunnelling it
//! over a survivor. Synchronization brings a newly added link into service
//! by holding its own traffic until the parallel link has delivered
//! everything the peer sent before the switch. Both end when a sequence
//! counter passes the node's sync point.

use tracing::{debug, info};

use peerlink_link::{ExecMode, MsgHeader, MsgUser, TunnelKind};
use peerlink_types::{BearerId, SeqNo};

use crate::fsm::{FsmEvent, NodeState};
use crate::node::{pair_mut, NodeGuard};

/// Distance ahead of the survivor's receive counter at which a locally
/// started failover is assumed complete: half the sequence space, less one.
pub const FAILOVER_MARGIN: u16 = SeqNo::MAX / 2 - 1;

/// Sync point for a failover started because a link went down, given the
/// next sequence number expected on the surviving link.
pub fn failover_sync_point(survivor_rcv_nxt: SeqNo) -> SeqNo {
    survivor_rcv_nxt + FAILOVER_MARGIN
}

/// Last sequence number of a tunnel burst of `count` packets starting at `first`.
pub fn burst_end(first: SeqNo, count: u16) -> SeqNo {
    first + count - 1
}

/// Sync point to apply when a new candidate is computed: while already
/// failing over, the earliest candidate wins.
pub fn merge_sync_point(state: NodeState, current: SeqNo, candidate: SeqNo) -> SeqNo {
    if state == NodeState::FailingOver {
        current.earliest(candidate)
    } else {
        candidate
    }
}

impl NodeGuard<'_> {
    /// Hand the backlog of the link on `failed` over to `survivor`, then
    /// reset the failed link.
    pub(crate) fn begin_failover(&mut self, failed: BearerId, survivor: BearerId) {
        let Some(rcv_nxt) = self.entry(survivor).link.as_ref().map(|l| l.rcv_nxt()) else {
            return;
        };
        let inner = &mut *self.inner;
        inner.sync_point = merge_sync_point(inner.state, inner.sync_point, failover_sync_point(rcv_nxt));
        info!(
            peer = %self.addr(),
            failed = %failed,
            survivor = %survivor,
            sync_point = %self.inner.sync_point,
            "starting failover"
        );
        self.fsm_evt(FsmEvent::FailoverBegin);

        let mut xmitq = Vec::new();
        let (l, tnl) = pair_mut(&mut self.inner.links, failed, survivor);
        if let (Some(l), Some(tnl)) = (l.link.as_mut(), tnl.link.as_mut()) {
            l.prepare_tunnel(&mut **tnl, TunnelKind::Failover, &mut xmitq);
            l.reset();
        }
        self.queue_xmit(survivor, xmitq);
    }

    /// The peer is failing traffic over to us: any parallel link still up is
    /// stale and gets blocked, and the sync point drops to the end of the
    /// announced burst if that comes earlier.
    pub(crate) fn failover_tunnel_received(&mut self, hdr: &MsgHeader, parallel: Option<BearerId>) {
        let syncpt = burst_end(hdr.seqno, hdr.msg_count);
        if let Some(pl) = parallel.filter(|&pl| self.entry(pl).working) {
            self.link_down(pl);
            if let Some(link) = self.entry_mut(pl).link.as_mut() {
                link.set_exec_mode(ExecMode::Blocked);
            }
        }
        if syncpt.less(self.inner.sync_point) {
            self.inner.sync_point = syncpt;
        }
    }

    /// Ends failover once the tunnel link has received past the sync point.
    pub(crate) fn failover_complete(&mut self, rcv_nxt: SeqNo, parallel: Option<BearerId>) -> bool {
        if self.inner.state != NodeState::FailingOver || !rcv_nxt.more(self.inner.sync_point) {
            return false;
        }
        debug!(peer = %self.addr(), rcv_nxt = %rcv_nxt, "failover complete");
        self.fsm_evt(FsmEvent::FailoverEnd);
        if let Some(pl) = parallel {
            if let Some(link) = self.entry_mut(pl).link.as_mut() {
                link.set_exec_mode(ExecMode::Open);
            }
        }
        true
    }

    /// A synch tunnel message arrived on `bearer`: it becomes the tunnel
    /// link, and a node in steady state starts synchronizing.
    pub(crate) fn synch_tunnel_received(&mut self, hdr: &MsgHeader, bearer: BearerId) {
        let first = hdr.wrapped_seqno.unwrap_or(hdr.seqno);
        let syncpt = burst_end(first, hdr.msg_count);
        if self.inner.state == NodeState::SelfUpPeerUp {
            self.inner.sync_point = syncpt;
            self.fsm_evt(FsmEvent::SynchBegin);
        }
        if let Some(link) = self.entry_mut(bearer).link.as_mut() {
            link.set_exec_mode(ExecMode::Tunnel);
        }
        if syncpt.less(self.inner.sync_point) {
            self.inner.sync_point = syncpt;
        }
    }

    /// Screen a packet arriving on a link in tunnel mode while synchronizing.
    ///
    /// Returns `None` when synchronization does not apply, otherwise whether
    /// the packet is admitted.
    pub(crate) fn synch_screen(&mut self, hdr: &MsgHeader, bearer: BearerId, parallel: Option<BearerId>) -> Option<bool> {
        let in_tunnel_mode = self
            .entry(bearer)
            .link
            .as_ref()
            .is_some_and(|l| l.exec_mode() == ExecMode::Tunnel);
        if self.inner.state != NodeState::Synching || !in_tunnel_mode {
            return None;
        }

        let dlv_nxt = parallel.and_then(|pl| {
            let entry = self.entry(pl);
            let link = entry.link.as_ref()?;
            Some(link.rcv_nxt() - entry.inputq.len() as u16)
        });
        let caught_up = match dlv_nxt {
            None => true,
            Some(dlv_nxt) => dlv_nxt.more(self.inner.sync_point),
        };
        if caught_up {
            debug!(peer = %self.addr(), bearer = %bearer, "synchronization complete");
            self.fsm_evt(FsmEvent::SynchEnd);
            if let Some(link) = self.entry_mut(bearer).link.as_mut() {
                link.set_exec_mode(ExecMode::Open);
            }
            return Some(true);
        }
        Some(matches!(hdr.user, MsgUser::Tunnel(TunnelKind::Synch) | MsgUser::LinkProtocol))
    }
}
