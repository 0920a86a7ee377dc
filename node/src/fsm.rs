//! Contact state machine.
//!
//! Tracks whether this node and the peer consider each other reachable. The
//! table is a pure function of `(state, event)` so it can be exercised in
//! isolation; the node applies the result under its lock and queues any side
//! effects separately.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum NodeState {
    SelfDownPeerDown,
    /// Steady state: both sides have confirmed contact.
    SelfUpPeerUp,
    SelfDownPeerLeaving,
    SelfUpPeerComing,
    SelfComingPeerUp,
    SelfLeavingPeerDown,
    FailingOver,
    Synching,
}

impl NodeState {
    pub const ALL: [NodeState; 8] = [
        NodeState::SelfDownPeerDown,
        NodeState::SelfUpPeerUp,
        NodeState::SelfDownPeerLeaving,
        NodeState::SelfUpPeerComing,
        NodeState::SelfComingPeerUp,
        NodeState::SelfLeavingPeerDown,
        NodeState::FailingOver,
        NodeState::Synching,
    ];
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeState::SelfDownPeerDown => "SELF_DOWN_PEER_DOWN",
            NodeState::SelfUpPeerUp => "SELF_UP_PEER_UP",
            NodeState::SelfDownPeerLeaving => "SELF_DOWN_PEER_LEAVING",
            NodeState::SelfUpPeerComing => "SELF_UP_PEER_COMING",
            NodeState::SelfComingPeerUp => "SELF_COMING_PEER_UP",
            NodeState::SelfLeavingPeerDown => "SELF_LEAVING_PEER_DOWN",
            NodeState::FailingOver => "NODE_FAILINGOVER",
            NodeState::Synching => "NODE_SYNCHING",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum FsmEvent {
    SelfEstablContact,
    SelfLostContact,
    PeerEstablContact,
    PeerLostContact,
    FailoverBegin,
    FailoverEnd,
    SynchBegin,
    SynchEnd,
}

impl FsmEvent {
    pub const ALL: [FsmEvent; 8] = [
        FsmEvent::SelfEstablContact,
        FsmEvent::SelfLostContact,
        FsmEvent::PeerEstablContact,
        FsmEvent::PeerLostContact,
        FsmEvent::FailoverBegin,
        FsmEvent::FailoverEnd,
        FsmEvent::SynchBegin,
        FsmEvent::SynchEnd,
    ];
}

/// An event arrived that the current state has no entry for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[error("illegal event {event:?} in state {state}")]
pub struct IllegalTransition {
    pub state: NodeState,
    pub event: FsmEvent,
}

/// Next state after `event`, or an error when the pair is not in the table.
///
/// Some legal pairs leave the state as it is; they are listed explicitly so
/// that everything else can be reported.
pub fn next_state(state: NodeState, event: FsmEvent) -> Result<NodeState, IllegalTransition> {
    use FsmEvent::*;
    use NodeState::*;

    let next = match (state, event) {
        (SelfDownPeerDown, SelfEstablContact) => SelfUpPeerComing,
        (SelfDownPeerDown, PeerEstablContact) => SelfComingPeerUp,
        (SelfDownPeerDown, SelfLostContact | PeerLostContact) => state,

        (SelfUpPeerUp, SelfLostContact) => SelfDownPeerLeaving,
        (SelfUpPeerUp, PeerLostContact) => SelfLeavingPeerDown,
        (SelfUpPeerUp, SynchBegin) => Synching,
        (SelfUpPeerUp, FailoverBegin) => FailingOver,
        (SelfUpPeerUp, SelfEstablContact | PeerEstablContact | SynchEnd | FailoverEnd) => state,

        (SelfDownPeerLeaving, PeerLostContact) => SelfDownPeerDown,
        (SelfDownPeerLeaving, SelfEstablContact | PeerEstablContact | SelfLostContact) => state,

        (SelfUpPeerComing, PeerEstablContact) => SelfUpPeerUp,
        (SelfUpPeerComing, SelfLostContact) => SelfDownPeerLeaving,
        (SelfUpPeerComing, SelfEstablContact | PeerLostContact) => state,

        (SelfComingPeerUp, SelfEstablContact) => SelfUpPeerUp,
        (SelfComingPeerUp, PeerLostContact) => SelfLeavingPeerDown,
        (SelfComingPeerUp, SelfLostContact | PeerEstablContact) => state,

        (SelfLeavingPeerDown, SelfLostContact) => SelfDownPeerDown,
        (SelfLeavingPeerDown, SelfEstablContact | PeerEstablContact | PeerLostContact) => state,

        (FailingOver, SelfLostContact) => SelfDownPeerLeaving,
        (FailingOver, PeerLostContact) => SelfLeavingPeerDown,
        (FailingOver, FailoverEnd) => SelfUpPeerUp,
        (FailingOver, FailoverBegin | SelfEstablContact | PeerEstablContact) => state,

        (Synching, SelfLostContact) => SelfDownPeerLeaving,
        (Synching, PeerLostContact) => SelfLeavingPeerDown,
        (Synching, SynchEnd) => SelfUpPeerUp,
        (Synching, FailoverBegin) => FailingOver,
        (Synching, SynchBegin | SelfEstablContact | PeerEstablContact) => state,

        _ => return Err(IllegalTransition { state, event }),
    };
    Ok(next)
}
