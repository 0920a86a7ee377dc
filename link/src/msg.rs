//! Packet header fields the control plane inspects.
//!
//! Only the fields that drive node-level decisions are modelled; the full
//! wire format belongs to the link layer.

use serde::{Deserialize, Serialize};

use peerlink_types::{NodeAddr, SeqNo};

/// Largest user message accepted, header included.
pub const MAX_MSG_SIZE: usize = 66_000;

/// Header overhead added when a packet is wrapped into a tunnel message.
pub const TUNNEL_HDR_SIZE: usize = 40;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Importance {
    Low,
    Medium,
    High,
    Critical,
}

/// The two flavours of tunnel message used during link handoff.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TunnelKind {
    /// Duplicate of a packet already sent on a parallel link, used to bring
    /// a freshly added link into service.
    Synch,
    /// Packet rescued from a link that went down.
    Failover,
}

/// Which protocol user a packet belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MsgUser {
    Data(Importance),
    LinkProtocol,
    Tunnel(TunnelKind),
    NameDistributor,
    ConnManager,
    LinkConfig,
    BcastProtocol,
}

/// Error code carried by a returned or synthetic message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MsgError {
    NoName,
    NoPort,
    NoNode,
    Overload,
    ConnShutdown,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgHeader {
    pub user: MsgUser,
    /// Link-level sequence number of this packet.
    pub seqno: SeqNo,
    /// Node the packet was last sent from.
    pub prev_node: NodeAddr,
    pub orig_node: NodeAddr,
    pub dest_node: NodeAddr,
    pub orig_port: u32,
    pub dest_port: u32,
    /// For tunnel messages: number of packets in the handoff burst.
    pub msg_count: u16,
    /// For tunnel messages: sequence number of the wrapped packet.
    pub wrapped_seqno: Option<SeqNo>,
    /// Sender's view of the link this packet travels on.
    pub peer_link_up: bool,
    /// Sender's view of whether it still considers this node up.
    pub peer_node_up: bool,
    /// Broadcast and discovery traffic is not link-sequenced.
    pub non_seq: bool,
    pub error: Option<MsgError>,
}

impl MsgHeader {
    pub fn new(user: MsgUser, prev_node: NodeAddr) -> Self {
        Self {
            user,
            seqno: SeqNo::default(),
            prev_node,
            orig_node: prev_node,
            dest_node: NodeAddr::default(),
            orig_port: 0,
            dest_port: 0,
            msg_count: 0,
            wrapped_seqno: None,
            peer_link_up: false,
            peer_node_up: false,
            non_seq: false,
            error: None,
        }
    }

    pub fn is_tunnel(&self, kind: TunnelKind) -> bool {
        self.user == MsgUser::Tunnel(kind)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packet {
    pub header: MsgHeader,
    #[serde(default)]
    pub payload: Vec<u8>,
}

impl Packet {
    pub fn new(header: MsgHeader, payload: Vec<u8>) -> Self {
        Self { header, payload }
    }

    /// Ordinary user data packet from `from` carrying link sequence `seqno`.
    pub fn data(from: NodeAddr, seqno: u16, payload: Vec<u8>) -> Self {
        let mut header = MsgHeader::new(MsgUser::Data(Importance::Low), from);
        header.seqno = SeqNo::new(seqno);
        header.peer_link_up = true;
        header.peer_node_up = true;
        Self::new(header, payload)
    }

    /// Tunnel message of `kind` wrapping the packet numbered `inner` and
    /// announcing a burst of `count` packets.
    pub fn tunnel(from: NodeAddr, kind: TunnelKind, seqno: u16, inner: u16, count: u16) -> Self {
        let mut header = MsgHeader::new(MsgUser::Tunnel(kind), from);
        header.seqno = SeqNo::new(seqno);
        header.wrapped_seqno = Some(SeqNo::new(inner));
        header.msg_count = count;
        header.peer_link_up = true;
        header.peer_node_up = true;
        Self::new(header, Vec::new())
    }

    /// Synthetic connection abort delivered to a local socket whose peer
    /// node has become unreachable.
    pub fn no_node_notice(own: NodeAddr, peer: NodeAddr, port: u32, peer_port: u32) -> Self {
        let mut header = MsgHeader::new(MsgUser::Data(Importance::Critical), peer);
        header.dest_node = own;
        header.dest_port = port;
        header.orig_port = peer_port;
        header.error = Some(MsgError::NoNode);
        Self::new(header, Vec::new())
    }

    pub fn user(&self) -> MsgUser {
        self.header.user
    }

    pub fn size(&self) -> usize {
        self.payload.len() + TUNNEL_HDR_SIZE
    }

    /// Structural sanity check performed before any state is touched.
    pub fn validate(&self) -> bool {
        if self.size() > MAX_MSG_SIZE {
            return false;
        }
        match self.header.user {
            MsgUser::Tunnel(_) => self.header.wrapped_seqno.is_some() && self.header.msg_count > 0,
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tunnel_requires_wrapped_header() {
        let from = NodeAddr::new(0x100042);
        let good = Packet::tunnel(from, TunnelKind::Failover, 10, 4, 3);
        assert!(good.validate());

        let mut bad = good.clone();
        bad.header.wrapped_seqno = None;
        assert!(!bad.validate());
    }

    #[test]
    fn oversized_payload_is_invalid() {
        let pkt = Packet::data(NodeAddr::new(1), 0, vec![0u8; MAX_MSG_SIZE]);
        assert!(!pkt.validate());
    }

    #[test]
    fn no_node_notice_addresses_local_socket() {
        let own = NodeAddr::new(0x100001);
        let peer = NodeAddr::new(0x100042);
        let pkt = Packet::no_node_notice(own, peer, 7, 99);
        assert_eq!(pkt.header.dest_node, own);
        assert_eq!(pkt.header.orig_node, peer);
        assert_eq!(pkt.header.dest_port, 7);
        assert_eq!(pkt.header.orig_port, 99);
        assert_eq!(pkt.header.error, Some(MsgError::NoNode));
    }

    #[test]
    fn packet_deserializes_with_default_payload() {
        let pkt = Packet::data(NodeAddr::new(0x100042), 5, Vec::new());
        let mut json = serde_json::to_value(&pkt).unwrap();
        json.as_object_mut().unwrap().remove("payload");
        let back: Packet = serde_json::from_value(json).unwrap();
        assert_eq!(back, pkt);
    }
}
