//! Nullable link: a scripted link whose state the test reads and steers
//! through a [`NullLinkHandle`] while the node owns the link itself.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use peerlink_link::{ExecMode, Link, LinkError, LinkEvents, MediaAddr, MsgUser, Packet, RcvQueues, TunnelKind};
use peerlink_types::{BearerId, NodeAddr, SeqNo};

#[derive(Debug)]
struct State {
    up: bool,
    priority: u32,
    tolerance: Duration,
    abort_limit: u32,
    mtu: usize,
    rcv_nxt: SeqNo,
    exec_mode: ExecMode,
    media_addr: MediaAddr,
    /// Events reported by the next `receive` or `timeout`, oldest first.
    pending: VecDeque<LinkEvents>,
    congested: bool,
    no_buffers: bool,
    resets: usize,
    failover_resets: usize,
    timeouts: usize,
    tunnels: Vec<(TunnelKind, BearerId)>,
    received: Vec<Packet>,
    sent: Vec<Packet>,
}

pub struct NullLink {
    name: String,
    bearer: BearerId,
    peer_bearer: u8,
    owner: NodeAddr,
    state: Arc<Mutex<State>>,
}

/// Test-side view of a [`NullLink`] after it was moved into a node.
#[derive(Clone)]
pub struct NullLinkHandle {
    state: Arc<Mutex<State>>,
}

impl NullLink {
    /// A link on `bearer` that starts down, expects sequence number 1 next,
    /// and has a 1500 ms tolerance.
    pub fn new(owner: NodeAddr, bearer: BearerId, priority: u32) -> (Self, NullLinkHandle) {
        let state = Arc::new(Mutex::new(State {
            up: false,
            priority,
            tolerance: Duration::from_millis(1500),
            abort_limit: 0,
            mtu: 1500,
            rcv_nxt: SeqNo::new(1),
            exec_mode: ExecMode::Open,
            media_addr: MediaAddr::default(),
            pending: VecDeque::new(),
            congested: false,
            no_buffers: false,
            resets: 0,
            failover_resets: 0,
            timeouts: 0,
            tunnels: Vec::new(),
            received: Vec::new(),
            sent: Vec::new(),
        }));
        let link = Self {
            name: format!("{owner}:{bearer}"),
            bearer,
            peer_bearer: bearer.get(),
            owner,
            state: Arc::clone(&state),
        };
        (link, NullLinkHandle { state })
    }
}

impl Link for NullLink {
    fn name(&self) -> &str {
        &self.name
    }

    fn bearer_id(&self) -> BearerId {
        self.bearer
    }

    fn peer_bearer_id(&self) -> u8 {
        self.peer_bearer
    }

    fn is_up(&self) -> bool {
        self.state.lock().up
    }

    fn priority(&self) -> u32 {
        self.state.lock().priority
    }

    fn tolerance(&self) -> Duration {
        self.state.lock().tolerance
    }

    fn set_abort_limit(&mut self, limit: u32) {
        self.state.lock().abort_limit = limit;
    }

    fn mtu(&self) -> usize {
        self.state.lock().mtu
    }

    fn rcv_nxt(&self) -> SeqNo {
        self.state.lock().rcv_nxt
    }

    fn exec_mode(&self) -> ExecMode {
        self.state.lock().exec_mode
    }

    fn set_exec_mode(&mut self, mode: ExecMode) {
        self.state.lock().exec_mode = mode;
    }

    fn set_media_addr(&mut self, maddr: &MediaAddr) {
        self.state.lock().media_addr = *maddr;
    }

    fn reset(&mut self) {
        let mut s = self.state.lock();
        s.up = false;
        s.resets += 1;
    }

    fn reset_failover_state(&mut self) {
        self.state.lock().failover_resets += 1;
    }

    /// Wraps everything this link ever sent into one burst over `tunnel`.
    fn prepare_tunnel(&self, tunnel: &mut dyn Link, kind: TunnelKind, xmitq: &mut Vec<Packet>) {
        let mut s = self.state.lock();
        s.tunnels.push((kind, tunnel.bearer_id()));
        let count = u16::try_from(s.sent.len().max(1)).unwrap_or(u16::MAX);
        let first = s.sent.first().map_or(s.rcv_nxt, |p| p.header.seqno);
        xmitq.push(Packet::tunnel(self.owner, kind, 0, first.value(), count));
    }

    /// Control traffic never consumes a sequence number. Anything else is
    /// taken only when it is the next one expected.
    fn receive(&mut self, packet: Packet, queues: RcvQueues<'_>, _xmitq: &mut Vec<Packet>) -> LinkEvents {
        let mut s = self.state.lock();
        s.received.push(packet.clone());
        let events = s.pending.pop_front().unwrap_or(LinkEvents::NONE);
        if events.up {
            s.up = true;
        }

        let user = packet.header.user;
        if matches!(user, MsgUser::LinkProtocol | MsgUser::LinkConfig | MsgUser::BcastProtocol) {
            return events;
        }
        if packet.header.seqno != s.rcv_nxt {
            return events;
        }
        s.rcv_nxt = s.rcv_nxt + 1;
        match user {
            MsgUser::NameDistributor => queues.named.push(packet),
            MsgUser::Tunnel(_) => {}
            _ => queues.input.push(packet),
        }
        events
    }

    fn timeout(&mut self, _xmitq: &mut Vec<Packet>) -> LinkEvents {
        let mut s = self.state.lock();
        s.timeouts += 1;
        s.pending.pop_front().unwrap_or(LinkEvents::NONE)
    }

    fn xmit(&mut self, packets: Vec<Packet>, xmitq: &mut Vec<Packet>) -> Result<(), LinkError> {
        let mut s = self.state.lock();
        if s.congested {
            return Err(LinkError::Congested(packets));
        }
        if s.no_buffers {
            return Err(LinkError::NoBuffers);
        }
        if let Some(big) = packets.iter().find(|p| p.size() > s.mtu) {
            return Err(LinkError::MessageTooLarge { size: big.size(), mtu: s.mtu });
        }
        s.sent.extend(packets.iter().cloned());
        xmitq.extend(packets);
        Ok(())
    }
}

impl NullLinkHandle {
    pub fn set_up(&self, up: bool) {
        self.state.lock().up = up;
    }

    pub fn is_up(&self) -> bool {
        self.state.lock().up
    }

    pub fn set_priority(&self, priority: u32) {
        self.state.lock().priority = priority;
    }

    pub fn set_tolerance(&self, tolerance: Duration) {
        self.state.lock().tolerance = tolerance;
    }

    pub fn set_mtu(&self, mtu: usize) {
        self.state.lock().mtu = mtu;
    }

    pub fn set_rcv_nxt(&self, seqno: u16) {
        self.state.lock().rcv_nxt = SeqNo::new(seqno);
    }

    pub fn rcv_nxt(&self) -> SeqNo {
        self.state.lock().rcv_nxt
    }

    pub fn exec_mode(&self) -> ExecMode {
        self.state.lock().exec_mode
    }

    pub fn abort_limit(&self) -> u32 {
        self.state.lock().abort_limit
    }

    pub fn media_addr(&self) -> MediaAddr {
        self.state.lock().media_addr
    }

    /// Script the events returned by the next `receive` or `timeout` call.
    pub fn push_event(&self, events: LinkEvents) {
        self.state.lock().pending.push_back(events);
    }

    pub fn set_congested(&self, congested: bool) {
        self.state.lock().congested = congested;
    }

    pub fn set_no_buffers(&self, no_buffers: bool) {
        self.state.lock().no_buffers = no_buffers;
    }

    pub fn resets(&self) -> usize {
        self.state.lock().resets
    }

    pub fn failover_resets(&self) -> usize {
        self.state.lock().failover_resets
    }

    pub fn timeouts(&self) -> usize {
        self.state.lock().timeouts
    }

    /// Tunnel bursts this link prepared, with the bearer of the link they
    /// were sent over.
    pub fn tunnels(&self) -> Vec<(TunnelKind, BearerId)> {
        self.state.lock().tunnels.clone()
    }

    pub fn received(&self) -> Vec<Packet> {
        self.state.lock().received.clone()
    }

    pub fn sent(&self) -> Vec<Packet> {
        self.state.lock().sent.clone()
    }
}
