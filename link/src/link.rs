//! Link layer boundary.
//!
//! A link is one sequenced, acknowledged session to a peer over one bearer.
//! The node owns its links and drives them exclusively under the node lock,
//! so implementations need no internal locking of their own.

use std::time::Duration;

use peerlink_types::{BearerId, NodeAddr, SeqNo};

use crate::bearer::MediaAddr;
use crate::error::LinkError;
use crate::msg::{Packet, TunnelKind};
use crate::queue::InputQueue;

/// How a link treats traffic while a handoff is in progress.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ExecMode {
    #[default]
    Open,
    /// Only relays tunnel traffic until its parallel link catches up.
    Tunnel,
    /// Parallel link to a failing-over link; receives nothing.
    Blocked,
}

/// State changes reported back by a link after receive or timeout.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LinkEvents {
    pub up: bool,
    pub down: bool,
}

impl LinkEvents {
    pub const NONE: Self = Self { up: false, down: false };
    pub const UP: Self = Self { up: true, down: false };
    pub const DOWN: Self = Self { up: false, down: true };
}

/// Where a link deposits what it delivers upward.
pub struct RcvQueues<'a> {
    /// Data and connection messages for the socket layer.
    pub input: &'a InputQueue,
    /// Name distribution messages.
    pub named: &'a mut Vec<Packet>,
}

pub trait Link: Send {
    fn name(&self) -> &str;

    fn bearer_id(&self) -> BearerId;

    /// Bearer identity at the far end, used to build the published link id.
    fn peer_bearer_id(&self) -> u8;

    fn is_up(&self) -> bool;

    /// Higher is preferred when choosing active links.
    fn priority(&self) -> u32;

    /// How long the peer may stay silent before the link is declared down.
    fn tolerance(&self) -> Duration;

    /// Number of silent keepalive intervals tolerated before reset.
    fn set_abort_limit(&mut self, limit: u32);

    fn mtu(&self) -> usize;

    /// Next sequence number expected from the peer.
    fn rcv_nxt(&self) -> SeqNo;

    fn exec_mode(&self) -> ExecMode;

    fn set_exec_mode(&mut self, mode: ExecMode);

    fn set_media_addr(&mut self, maddr: &MediaAddr);

    fn reset(&mut self);

    /// Discard partially reassembled failover and fragment state.
    fn reset_failover_state(&mut self);

    /// Wrap this link's unacknowledged packets into tunnel messages of
    /// `kind` and send them over `tunnel`, appending frames to `xmitq`.
    fn prepare_tunnel(&self, tunnel: &mut dyn Link, kind: TunnelKind, xmitq: &mut Vec<Packet>);

    fn receive(&mut self, packet: Packet, queues: RcvQueues<'_>, xmitq: &mut Vec<Packet>) -> LinkEvents;

    /// Periodic supervision: probes, retransmits and tolerance accounting.
    fn timeout(&mut self, xmitq: &mut Vec<Packet>) -> LinkEvents;

    /// Queue `packets` for sending. On [`LinkError::Congested`] the packets
    /// are returned inside the error and nothing was queued.
    fn xmit(&mut self, packets: Vec<Packet>, xmitq: &mut Vec<Packet>) -> Result<(), LinkError>;
}

/// Creates links when a peer is first discovered on a bearer.
pub trait LinkFactory: Send + Sync {
    fn create(
        &self,
        peer: NodeAddr,
        bearer: BearerId,
        maddr: &MediaAddr,
    ) -> Result<Box<dyn Link>, LinkError>;
}
