//! Integration tests driving the control plane end to end through
//! [`NodeManager`], with nullable links, bearer and upper layers.
//!
//! Links are brought up the way the receive path sees it: the nullable link
//! is scripted to report an up event and a probe packet is fed in.

use std::sync::Arc;
use std::time::Duration;

use peerlink_link::{ExecMode, LinkError, LinkEvents, MediaAddr, MsgHeader, MsgUser, Packet, TunnelKind, MAX_MSG_SIZE};
use peerlink_node::{ActiveSlots, DestStatus, NodeConfig, NodeError, NodeManager, NodeState, PeerNode, RcvOutcome};
use peerlink_nullables::{NullBearer, NullLinkFactory, NullLinkHandle, NullUpcalls, Upcall};
use peerlink_types::{BearerId, LinkId, NodeAddr, SeqNo};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const OWN: NodeAddr = NodeAddr::new(0x100001);
const PEER: NodeAddr = NodeAddr::new(0x100042);

struct Harness {
    manager: NodeManager,
    bearer: Arc<NullBearer>,
    factory: Arc<NullLinkFactory>,
    upcalls: Arc<NullUpcalls>,
}

fn harness() -> Harness {
    let config = NodeConfig {
        own_address: OWN,
        ..NodeConfig::default()
    };
    let bearer = Arc::new(NullBearer::new());
    let factory = Arc::new(NullLinkFactory::new());
    let upcalls = Arc::new(NullUpcalls::new());
    let manager = NodeManager::new(config, bearer.clone(), factory.clone(), upcalls.clone());
    Harness {
        manager,
        bearer,
        factory,
        upcalls,
    }
}

fn b(id: u8) -> BearerId {
    BearerId::new(id).unwrap()
}

fn maddr(tag: u8) -> MediaAddr {
    MediaAddr::from_slice(&[0xaa, tag])
}

/// Link protocol probe from a peer that does not consider us up.
fn probe(from: NodeAddr) -> Packet {
    let mut hdr = MsgHeader::new(MsgUser::LinkProtocol, from);
    hdr.peer_link_up = true;
    Packet::new(hdr, Vec::new())
}

impl Harness {
    /// Discover the peer on `bearer` and bring the link up.
    fn bring_up(&self, node: &Arc<PeerNode>, bearer: BearerId) -> NullLinkHandle {
        self.manager.update_dest(node, bearer, &maddr(bearer.get())).unwrap();
        let handle = self.factory.handle(node.addr(), bearer).unwrap();
        handle.push_event(LinkEvents::UP);
        assert_eq!(self.manager.rcv(probe(node.addr()), bearer), RcvOutcome::Admitted);
        handle
    }

    /// First data packet from the peer on an up link completes contact.
    fn establish(&self, node: &Arc<PeerNode>, bearer: BearerId, seqno: u16) {
        let outcome = self.manager.rcv(Packet::data(node.addr(), seqno, vec![1]), bearer);
        assert_eq!(outcome, RcvOutcome::Admitted);
        assert_eq!(node.state(), NodeState::SelfUpPeerUp);
    }

    fn count(&self, pred: impl Fn(&Upcall) -> bool) -> usize {
        self.upcalls.count(pred)
    }
}

// ---------------------------------------------------------------------------
// Link slots
// ---------------------------------------------------------------------------

#[test]
fn higher_priority_second_link_takes_both_slots() {
    let h = harness();
    h.factory.set_priority(b(0), 5);
    h.factory.set_priority(b(1), 10);
    let node = h.manager.create_node(PEER).unwrap();
    assert_eq!(node.state(), NodeState::SelfDownPeerLeaving);

    let first = h.bring_up(&node, b(0));
    assert!(node.is_up());
    assert_eq!(node.state(), NodeState::SelfUpPeerComing);
    assert_eq!(node.active_slots().primary(), Some(b(0)));
    assert_eq!(node.active_slots().secondary(), Some(b(0)));

    h.bring_up(&node, b(1));
    let slots = node.active_slots();
    assert_eq!(slots.primary(), Some(b(1)));
    assert_eq!(slots.secondary(), Some(b(1)));
    assert_eq!(node.working_links(), 2);

    assert_eq!(h.count(|c| matches!(c, Upcall::NodeUp(p) if *p == PEER)), 1);
    assert_eq!(h.count(|c| matches!(c, Upcall::LinkUp(..))), 2);
    assert!(h.bearer.has_dest(b(0), PEER));
    assert!(h.bearer.has_dest(b(1), PEER));
    assert_eq!(h.manager.metrics().nodes_up.get(), 1);

    // The old primary replays its backlog over the new link.
    assert_eq!(first.tunnels(), vec![(TunnelKind::Synch, b(1))]);
    let synch: Vec<_> = h
        .bearer
        .sent()
        .into_iter()
        .filter(|f| f.bearer == b(1))
        .collect();
    assert_eq!(synch.len(), 1);
    assert_eq!(synch[0].dest, maddr(1));
    assert_eq!(synch[0].packets[0].header.user, MsgUser::Tunnel(TunnelKind::Synch));

    h.establish(&node, b(1), 1);
}

#[test]
fn equal_priority_links_share_load() {
    let h = harness();
    let node = h.manager.create_node(PEER).unwrap();
    h.bring_up(&node, b(0));
    h.bring_up(&node, b(2));

    let slots = node.active_slots();
    assert_eq!(slots.get(0), Some(b(0)));
    assert_eq!(slots.get(1), Some(b(2)));
}

#[test]
fn lower_priority_link_waits_on_standby() {
    let h = harness();
    h.factory.set_priority(b(1), 3);
    let node = h.manager.create_node(PEER).unwrap();
    h.bring_up(&node, b(0));
    h.bring_up(&node, b(1));

    assert!(!node.active_slots().contains(b(1)));
    assert_eq!(node.working_links(), 2);

    // Losing the primary promotes the standby link.
    h.manager.link_down(&node, b(0));
    assert_eq!(node.active_slots().primary(), Some(b(1)));
    assert!(node.is_up());
}

#[test]
fn third_link_is_refused_and_never_counted() {
    let h = harness();
    let node = h.manager.create_node(PEER).unwrap();
    h.bring_up(&node, b(0));
    h.bring_up(&node, b(1));
    let slots_before = node.active_slots();

    let third = h.bring_up(&node, b(2));
    assert_eq!(node.working_links(), 2);
    assert_eq!(node.active_slots(), slots_before);
    assert_eq!(h.count(|c| matches!(c, Upcall::LinkUp(..))), 2);
    assert!(!h.bearer.has_dest(b(2), PEER));

    // Taking it down only resets it below us.
    h.manager.link_down(&node, b(2));
    assert_eq!(h.count(|c| matches!(c, Upcall::LinkDown(..))), 0);
    assert_eq!(node.working_links(), 2);
    assert_eq!(third.resets(), 1);
    assert!(!third.is_up());
}

#[test]
fn refused_link_is_taken_into_service_when_a_place_frees_up() {
    let h = harness();
    h.factory.set_priority(b(0), 10);
    h.factory.set_priority(b(1), 5);
    h.factory.set_priority(b(2), 1);
    let node = h.manager.create_node(PEER).unwrap();
    h.bring_up(&node, b(2));
    h.establish(&node, b(2), 1);
    let middle = h.bring_up(&node, b(1));
    let best = h.bring_up(&node, b(0));
    assert_eq!(node.working_links(), 2);
    assert_eq!(node.active_slots().primary(), Some(b(1)));
    assert!(best.is_up());

    h.manager.link_down(&node, b(1));
    assert_eq!(node.working_links(), 2);
    assert_eq!(node.active_slots().primary(), Some(b(0)));
    assert_eq!(node.active_slots().secondary(), Some(b(0)));
    assert_eq!(node.state(), NodeState::FailingOver);
    assert!(h.bearer.has_dest(b(0), PEER));
    assert!(!h.bearer.has_dest(b(1), PEER));
    assert_eq!(h.count(|c| matches!(c, Upcall::LinkUp(_, id) if *id == LinkId::new(0, b(0)))), 1);
    assert_eq!(best.resets(), 0);
    assert_eq!(middle.tunnels().last(), Some(&(TunnelKind::Failover, b(0))));
}

// ---------------------------------------------------------------------------
// Contact loss
// ---------------------------------------------------------------------------

#[test]
fn single_link_loss_notifies_exactly_once() {
    let h = harness();
    let node = h.manager.create_node(PEER).unwrap();
    let link = h.bring_up(&node, b(0));
    h.establish(&node, b(0), 1);
    h.manager.add_conn(PEER, 10, 100).unwrap();
    h.upcalls.clear();

    h.manager.link_down(&node, b(0));
    assert!(!node.is_up());
    assert_eq!(node.active_slots(), ActiveSlots::EMPTY);
    assert_eq!(node.state(), NodeState::SelfDownPeerLeaving);
    assert_eq!(link.resets(), 1);
    assert_eq!(link.failover_resets(), 1);
    assert!(!h.bearer.has_dest(b(0), PEER));

    let calls = h.upcalls.calls();
    assert_eq!(calls.len(), 3);
    assert_eq!(calls[0], Upcall::NodeDown(PEER));
    assert_eq!(calls[1], Upcall::LinkDown(PEER, LinkId::new(0, b(0))));
    match &calls[2] {
        Upcall::Deliver(notices) => {
            assert_eq!(notices.len(), 1);
            assert_eq!(notices[0].header.dest_node, OWN);
            assert_eq!(notices[0].header.dest_port, 10);
            assert_eq!(notices[0].header.orig_port, 100);
        }
        other => panic!("expected connection abort, got {other:?}"),
    }

    h.manager.link_down(&node, b(0));
    assert_eq!(h.upcalls.calls().len(), 3);
    assert_eq!(node.conn_count(), 0);
    assert_eq!(h.manager.metrics().nodes_up.get(), 0);
}

#[test]
fn deferred_effects_run_in_order_with_link_reset_last() {
    let h = harness();
    let node = h.manager.create_node(PEER).unwrap();
    h.bring_up(&node, b(0));
    h.establish(&node, b(0), 1);
    h.manager.add_conn(PEER, 10, 100).unwrap();
    h.upcalls.clear();

    h.manager.with_node(&node, |g| {
        g.request_link_reset();
        g.request_broadcast_input();
        g.request_sender_wakeup();
    });

    let calls = h.upcalls.calls();
    assert_eq!(calls.len(), 5, "{calls:?}");
    assert_eq!(calls[0], Upcall::WakeupBlockedSenders);
    assert_eq!(calls[1], Upcall::BroadcastInput);
    assert_eq!(calls[2], Upcall::NodeDown(PEER));
    assert_eq!(calls[3], Upcall::LinkDown(PEER, LinkId::new(0, b(0))));
    assert!(matches!(&calls[4], Upcall::Deliver(notices) if notices.len() == 1));
    assert!(!node.is_up());
    assert_eq!(node.working_links(), 0);
}

#[test]
fn peer_claiming_we_are_up_is_refused_after_loss() {
    let h = harness();
    let node = h.manager.create_node(PEER).unwrap();
    h.bring_up(&node, b(0));
    h.manager.link_down(&node, b(0));

    let stale = Packet::data(PEER, 1, vec![]);
    assert_eq!(h.manager.rcv(stale, b(0)), RcvOutcome::Rejected);
    assert_eq!(node.state(), NodeState::SelfDownPeerLeaving);
    assert_eq!(h.manager.metrics().packets_rejected.get(), 1);

    // Once the peer has noticed, contact can be rebuilt.
    h.bring_up(&node, b(0));
    assert!(node.is_up());
    assert_eq!(node.state(), NodeState::SelfUpPeerComing);
}

// ---------------------------------------------------------------------------
// Failover
// ---------------------------------------------------------------------------

#[test]
fn local_link_loss_fails_over_to_survivor() {
    let h = harness();
    let node = h.manager.create_node(PEER).unwrap();
    let l0 = h.bring_up(&node, b(0));
    let l1 = h.bring_up(&node, b(1));
    h.establish(&node, b(0), 1);
    h.upcalls.clear();

    h.manager.link_down(&node, b(0));
    assert!(node.is_up());
    assert_eq!(node.state(), NodeState::FailingOver);
    assert_eq!(node.active_slots().primary(), Some(b(1)));
    assert_eq!(node.sync_point(), SeqNo::new(1) + 32_766);
    assert_eq!(l0.tunnels().last(), Some(&(TunnelKind::Failover, b(1))));
    assert_eq!(l0.resets(), 1);
    assert_eq!(h.count(|c| matches!(c, Upcall::NodeDown(_))), 0);
    assert_eq!(h.count(|c| matches!(c, Upcall::LinkDown(..))), 1);

    let rescued = h.bearer.sent_packets(b(1));
    assert!(rescued
        .iter()
        .any(|p| p.header.user == MsgUser::Tunnel(TunnelKind::Failover)));

    // Failover ends once the survivor has received past the sync point.
    l1.set_rcv_nxt(32_768);
    assert_eq!(h.manager.rcv(Packet::data(PEER, 32_768, vec![]), b(1)), RcvOutcome::Admitted);
    assert_eq!(node.state(), NodeState::SelfUpPeerUp);
    let m = h.manager.metrics();
    assert_eq!(m.failovers_started.get(), 1);
    assert_eq!(m.failovers_completed.get(), 1);
}

#[test]
fn peer_failover_blocks_stale_parallel_link() {
    let h = harness();
    let node = h.manager.create_node(PEER).unwrap();
    let l0 = h.bring_up(&node, b(0));
    h.bring_up(&node, b(1));
    h.establish(&node, b(0), 1);

    // The peer lost its end of the bearer 0 link and tunnels three packets.
    let tunnel = Packet::tunnel(PEER, TunnelKind::Failover, 1, 7, 3);
    assert_eq!(h.manager.rcv(tunnel, b(1)), RcvOutcome::Admitted);
    assert_eq!(node.state(), NodeState::FailingOver);
    assert_eq!(node.sync_point(), SeqNo::new(3));
    assert_eq!(l0.exec_mode(), ExecMode::Blocked);
    assert_eq!(node.working_links(), 1);

    for seqno in 2..=3 {
        h.manager.rcv(Packet::data(PEER, seqno, vec![]), b(1));
        assert_eq!(node.state(), NodeState::FailingOver);
    }
    h.manager.rcv(Packet::data(PEER, 4, vec![]), b(1));
    assert_eq!(node.state(), NodeState::SelfUpPeerUp);
    assert_eq!(l0.exec_mode(), ExecMode::Open);
}

// ---------------------------------------------------------------------------
// Synchronization
// ---------------------------------------------------------------------------

#[test]
fn new_link_traffic_is_withheld_until_parallel_link_catches_up() {
    let h = harness();
    let node = h.manager.create_node(PEER).unwrap();
    h.bring_up(&node, b(0));
    h.establish(&node, b(0), 1);
    let l1 = h.bring_up(&node, b(1));

    // Peer replays packets 2..=4 of bearer 0 over bearer 1.
    let synch = Packet::tunnel(PEER, TunnelKind::Synch, 1, 2, 3);
    assert_eq!(h.manager.rcv(synch, b(1)), RcvOutcome::Admitted);
    assert_eq!(node.state(), NodeState::Synching);
    assert_eq!(node.sync_point(), SeqNo::new(4));
    assert_eq!(l1.exec_mode(), ExecMode::Tunnel);

    let early = Packet::data(PEER, 2, vec![0xb1]);
    assert_eq!(h.manager.rcv(early.clone(), b(1)), RcvOutcome::Rejected);
    assert_eq!(node.state(), NodeState::Synching);

    for seqno in 2..=4 {
        assert_eq!(h.manager.rcv(Packet::data(PEER, seqno, vec![0xb0]), b(0)), RcvOutcome::Admitted);
    }
    assert_eq!(h.manager.rcv(early, b(1)), RcvOutcome::Admitted);
    assert_eq!(node.state(), NodeState::SelfUpPeerUp);
    assert_eq!(l1.exec_mode(), ExecMode::Open);

    let payloads: Vec<Vec<u8>> = h.upcalls.delivered().into_iter().map(|p| p.payload).collect();
    assert_eq!(payloads.last(), Some(&vec![0xb1]));
    assert_eq!(payloads.iter().filter(|p| **p == vec![0xb0]).count(), 3);
    assert_eq!(h.manager.metrics().synchs_completed.get(), 1);
}

#[test]
fn duplicate_packet_changes_nothing() {
    let h = harness();
    let node = h.manager.create_node(PEER).unwrap();
    h.bring_up(&node, b(0));
    h.establish(&node, b(0), 1);
    let state = node.state();
    let sync = node.sync_point();

    let dup = Packet::tunnel(PEER, TunnelKind::Synch, 1, 1, 5);
    assert_eq!(h.manager.rcv(dup, b(0)), RcvOutcome::Admitted);
    assert_eq!(node.state(), state);
    assert_eq!(node.sync_point(), sync);
}

// ---------------------------------------------------------------------------
// Sending
// ---------------------------------------------------------------------------

#[test]
fn xmit_goes_out_over_the_selected_link() {
    let h = harness();
    let node = h.manager.create_node(PEER).unwrap();
    h.bring_up(&node, b(0));
    h.bring_up(&node, b(2));
    h.bearer.clear();

    h.manager.xmit(vec![Packet::data(OWN, 1, vec![1])], PEER, 0).unwrap();
    h.manager.xmit(vec![Packet::data(OWN, 1, vec![2])], PEER, 3).unwrap();

    let sent = h.bearer.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!((sent[0].bearer, sent[0].dest), (b(0), maddr(0)));
    assert_eq!((sent[1].bearer, sent[1].dest), (b(2), maddr(2)));
}

#[test]
fn congestion_hands_packets_back() {
    let h = harness();
    let node = h.manager.create_node(PEER).unwrap();
    let link = h.bring_up(&node, b(0));
    link.set_congested(true);

    let err = h
        .manager
        .xmit(vec![Packet::data(OWN, 1, vec![]), Packet::data(OWN, 2, vec![])], PEER, 0)
        .unwrap_err();
    assert!(matches!(err, NodeError::Congested(p) if p.len() == 2));
    assert!(h.manager.xmit_one(Packet::data(OWN, 3, vec![]), PEER, 0).is_ok());
    assert!(node.is_up());
}

#[test]
fn exhausted_link_buffers_take_link_down() {
    let h = harness();
    let node = h.manager.create_node(PEER).unwrap();
    let link = h.bring_up(&node, b(0));
    link.set_no_buffers(true);

    let err = h.manager.xmit(vec![Packet::data(OWN, 1, vec![])], PEER, 0).unwrap_err();
    assert!(matches!(err, NodeError::Link(LinkError::NoBuffers)));
    assert!(!node.is_up());
    assert_eq!(h.count(|c| matches!(c, Upcall::NodeDown(_))), 1);
}

#[test]
fn xmit_to_own_address_is_delivered_locally() {
    let h = harness();
    h.manager.xmit(vec![Packet::data(OWN, 0, vec![9])], OWN, 0).unwrap();
    assert_eq!(h.upcalls.delivered().len(), 1);
    assert!(h.bearer.sent().is_empty());
}

#[test]
fn xmit_without_route_is_unreachable() {
    let h = harness();
    let err = h.manager.xmit(vec![Packet::data(OWN, 0, vec![])], PEER, 0).unwrap_err();
    assert!(matches!(err, NodeError::HostUnreachable(a) if a == PEER));

    h.manager.create_node(PEER).unwrap();
    let err = h.manager.xmit(vec![Packet::data(OWN, 0, vec![])], PEER, 0).unwrap_err();
    assert!(matches!(err, NodeError::HostUnreachable(_)));
}

#[test]
fn mtu_follows_the_active_link() {
    let h = harness();
    assert_eq!(h.manager.mtu(OWN, 0), MAX_MSG_SIZE);
    assert_eq!(h.manager.mtu(PEER, 0), MAX_MSG_SIZE);

    let node = h.manager.create_node(PEER).unwrap();
    h.bring_up(&node, b(0));
    assert_eq!(h.manager.mtu(PEER, 0), 1460);
}

// ---------------------------------------------------------------------------
// Bearer management
// ---------------------------------------------------------------------------

#[test]
fn update_dest_creates_once_and_tracks_address() {
    let h = harness();
    let node = h.manager.create_node(PEER).unwrap();
    assert_eq!(h.manager.check_dest(&node, b(0), &maddr(0)), DestStatus::default());

    h.manager.update_dest(&node, b(0), &maddr(0)).unwrap();
    let status = h.manager.check_dest(&node, b(0), &maddr(0));
    assert!(status.addr_match && !status.link_up);
    assert!(!h.manager.check_dest(&node, b(0), &maddr(9)).addr_match);

    h.manager.update_dest(&node, b(0), &maddr(9)).unwrap();
    assert_eq!(h.factory.created(), 1);
    assert_eq!(node.link_count(), 1);
    assert_eq!(h.factory.handle(PEER, b(0)).unwrap().media_addr(), maddr(9));
    assert_eq!(node.keepalive_interval(), Some(Duration::from_millis(375)));
    assert_eq!(h.factory.handle(PEER, b(0)).unwrap().abort_limit(), 4);
}

#[test]
fn failed_link_creation_leaves_node_untouched() {
    let h = harness();
    let node = h.manager.create_node(PEER).unwrap();
    h.factory.fail_next();
    let err = h.manager.update_dest(&node, b(1), &maddr(1)).unwrap_err();
    assert!(matches!(err, NodeError::Link(LinkError::CreateFailed(_))));
    assert_eq!(node.link_count(), 0);
    assert_eq!(Arc::strong_count(&node), 2);
}

#[test]
fn delete_links_detaches_bearer_everywhere() {
    let h = harness();
    let a = h.manager.create_node(PEER).unwrap();
    let c = h.manager.create_node(NodeAddr::new(0x100043)).unwrap();
    h.bring_up(&a, b(0));
    h.manager.update_dest(&c, b(0), &maddr(0)).unwrap();
    h.manager.update_dest(&c, b(1), &maddr(1)).unwrap();

    h.manager.delete_links(b(0));
    assert_eq!(a.link_count(), 0);
    assert!(!a.is_up());
    assert_eq!(c.link_count(), 1);
    assert_eq!(h.count(|u| matches!(u, Upcall::NodeDown(p) if *p == PEER)), 1);
}

#[test]
fn link_name_lookup() {
    let h = harness();
    let node = h.manager.create_node(PEER).unwrap();
    h.manager.update_dest(&node, b(1), &maddr(1)).unwrap();

    assert_eq!(h.manager.link_name(PEER, 1).unwrap(), format!("{PEER}:1"));
    assert!(matches!(h.manager.link_name(PEER, 7), Err(NodeError::InvalidBearer(7))));
    assert!(matches!(
        h.manager.link_name(PEER, 2),
        Err(NodeError::LinkNotFound { bearer: 2, .. })
    ));
    assert!(matches!(
        h.manager.link_name(NodeAddr::new(0x100099), 1),
        Err(NodeError::HostUnreachable(_))
    ));
}

#[test]
fn non_sequenced_traffic_bypasses_admission() {
    let h = harness();
    let mut pkt = probe(NodeAddr::new(0x100077));
    pkt.header.non_seq = true;
    assert_eq!(h.manager.rcv(pkt, b(2)), RcvOutcome::Diverted);
    assert_eq!(h.count(|c| matches!(c, Upcall::NonSequenced(_, bearer) if *bearer == b(2))), 1);

    assert_eq!(h.manager.rcv(probe(NodeAddr::new(0x100077)), b(2)), RcvOutcome::Discarded);
}

// ---------------------------------------------------------------------------
// Registry and listing
// ---------------------------------------------------------------------------

#[test]
fn dump_lists_nodes_with_link_state() {
    let h = harness();
    let up = h.manager.create_node(NodeAddr::new(0x100003)).unwrap();
    h.manager.create_node(NodeAddr::new(0x100002)).unwrap();
    h.manager.create_node(NodeAddr::new(0x100004)).unwrap();
    h.bring_up(&up, b(0));

    let page = h.manager.dump(None, 2).unwrap();
    let rows: Vec<(u32, bool)> = page.nodes.iter().map(|n| (n.addr.raw(), n.up)).collect();
    assert_eq!(rows, vec![(0x100002, false), (0x100003, true)]);

    let rest = h.manager.dump(page.resume_after, 2).unwrap();
    assert_eq!(rest.nodes.len(), 1);
    assert!(rest.resume_after.is_none());
}

#[test]
fn error_paths_do_not_leak_node_handles() {
    let h = harness();
    let node = h.manager.create_node(PEER).unwrap();
    assert_eq!(Arc::strong_count(&node), 2);

    let _ = h.manager.xmit(vec![Packet::data(OWN, 0, vec![])], PEER, 0);
    assert_eq!(h.manager.rcv(probe(PEER), b(0)), RcvOutcome::Rejected);
    let _ = h.manager.link_name(PEER, 0);
    let _ = h.manager.add_conn(PEER, 1, 2);
    h.manager.remove_conn(PEER, 1);
    assert_eq!(Arc::strong_count(&node), 2);

    drop(h.manager.remove_node(PEER));
    assert_eq!(Arc::strong_count(&node), 1);
    assert!(h.manager.find(PEER).is_none());
}

#[test]
fn concurrent_creates_agree_on_one_node() {
    let h = harness();
    let nodes: Vec<Arc<PeerNode>> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|_| s.spawn(|| h.manager.create_node(PEER).unwrap()))
            .collect();
        handles.into_iter().map(|t| t.join().unwrap()).collect()
    });
    assert!(nodes.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    assert_eq!(h.manager.registry().len(), 1);
    assert_eq!(h.manager.metrics().nodes_known.get(), 1);
}

// ---------------------------------------------------------------------------
// Keepalive
// ---------------------------------------------------------------------------

#[test]
fn tick_supervises_every_link() {
    let h = harness();
    let node = h.manager.create_node(PEER).unwrap();
    let l0 = h.bring_up(&node, b(0));
    h.manager.update_dest(&node, b(1), &maddr(1)).unwrap();
    let l1 = h.factory.handle(PEER, b(1)).unwrap();

    let next = peerlink_node::keepalive::tick(&h.manager, &node);
    assert_eq!(next, Duration::from_millis(375));
    assert_eq!((l0.timeouts(), l1.timeouts()), (1, 1));

    l0.push_event(LinkEvents::DOWN);
    peerlink_node::keepalive::tick(&h.manager, &node);
    assert!(!node.is_up());
    assert_eq!(h.manager.metrics().keepalive_ticks.get(), 2);
}

#[test]
fn zero_tolerance_link_does_not_stall_the_timer() {
    let h = harness();
    let node = h.manager.create_node(PEER).unwrap();
    let link = h.bring_up(&node, b(0));
    link.set_tolerance(Duration::ZERO);

    let next = peerlink_node::keepalive::tick(&h.manager, &node);
    assert_eq!(next, peerlink_node::keepalive::MIN_KEEPALIVE_INTERVAL);
    assert_eq!(node.keepalive_interval(), Some(Duration::from_millis(1)));
}

#[tokio::test]
async fn stop_releases_keepalive_handles() {
    let h = harness();
    let node = h.manager.create_node(PEER).unwrap();
    h.manager.update_dest(&node, b(0), &maddr(0)).unwrap();
    assert!(node.is_armed());
    assert_eq!(Arc::strong_count(&node), 3);

    h.manager.stop();
    for _ in 0..100 {
        if Arc::strong_count(&node) == 1 {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(Arc::strong_count(&node), 1);
    assert!(h.manager.registry().is_empty());
}

#[tokio::test(start_paused = true)]
async fn keepalive_timer_detects_dead_link() {
    let h = harness();
    let node = h.manager.create_node(PEER).unwrap();
    let link = h.bring_up(&node, b(0));
    link.push_event(LinkEvents::DOWN);

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(link.timeouts() >= 1);
    assert!(!node.is_up());
    assert_eq!(h.count(|c| matches!(c, Upcall::NodeDown(p) if *p == PEER)), 1);
    h.manager.stop();
}
