//! Packet admission.
//!
//! Every sequenced packet passes two gates under the node lock before the
//! link sees it. [`filter_pkt`] is a pure check of the contact state. The
//! state check that follows inspects the packet's control fields and is
//! where peer establishment and handoff progress are discovered.

use peerlink_link::{MsgHeader, MsgUser, TunnelKind};
use peerlink_types::BearerId;

use crate::fsm::{FsmEvent, NodeState};
use crate::node::NodeGuard;

/// Coarse gate on contact state alone.
pub fn filter_pkt(state: NodeState, hdr: &MsgHeader) -> bool {
    match state {
        NodeState::SelfUpPeerUp => true,
        // Our side still has teardown to finish.
        NodeState::SelfLeavingPeerDown => false,
        // A peer claiming we are still up has not noticed the loss yet.
        NodeState::SelfDownPeerLeaving => !hdr.peer_node_up,
        _ => true,
    }
}

impl NodeGuard<'_> {
    /// Decide whether a packet that arrived on `bearer` may go to the link,
    /// advancing the contact state machine as its control fields dictate.
    pub(crate) fn check_state(&mut self, hdr: &MsgHeader, bearer: BearerId) -> bool {
        let Some(link) = self.entry(bearer).link.as_ref() else {
            return false;
        };
        let link_up = link.is_up();
        let rcv_nxt = link.rcv_nxt();
        let state = self.state();

        if state == NodeState::SelfUpPeerUp && !matches!(hdr.user, MsgUser::Tunnel(_)) {
            return true;
        }

        let parallel = self.parallel_link(bearer);

        if state == NodeState::SelfUpPeerComing {
            if !link_up || !hdr.peer_link_up {
                return true;
            }
            self.fsm_evt(FsmEvent::PeerEstablContact);
        }

        if state == NodeState::SelfDownPeerLeaving {
            if hdr.peer_node_up {
                return false;
            }
            self.fsm_evt(FsmEvent::PeerLostContact);
        }

        // Old duplicates are the link's business; they change nothing here.
        if hdr.seqno.less(rcv_nxt) {
            return true;
        }

        if hdr.is_tunnel(TunnelKind::Failover) {
            self.failover_tunnel_received(hdr, parallel);
        }
        if self.failover_complete(rcv_nxt, parallel) {
            return true;
        }

        if hdr.is_tunnel(TunnelKind::Synch) {
            self.synch_tunnel_received(hdr, bearer);
        }
        self.synch_screen(hdr, bearer, parallel).unwrap_or(true)
    }
}
