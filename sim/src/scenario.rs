//! Scenario files and their replay.
//!
//! A scenario is a JSON document listing steps (`{"op": "link_up", ...}`)
//! applied in order to one control plane wired to nullable links, bearer
//! and upper layers. Replay is deterministic: no runtime is started, so the
//! keepalive timer only runs when a `tick` step asks for it.

use std::sync::Arc;

use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use peerlink_link::{LinkEvents, MediaAddr, MsgHeader, MsgUser, Packet, TunnelKind};
use peerlink_node::{keepalive, ActiveSlots, DumpPage, NodeConfig, NodeManager, NodeState};
use peerlink_nullables::{NullBearer, NullLinkFactory, NullLinkHandle, NullUpcalls, Upcall};
use peerlink_types::{BearerId, NodeAddr};

fn default_limit() -> usize {
    64
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub name: String,
    /// Link priority per bearer; bearers not listed use the factory default.
    #[serde(default)]
    pub priorities: Vec<BearerPriority>,
    pub steps: Vec<Step>,
}

#[derive(Debug, Deserialize)]
pub struct BearerPriority {
    pub bearer: u8,
    pub priority: u32,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    /// Peer seen on a bearer: creates the node and link if needed.
    Discover {
        peer: NodeAddr,
        bearer: u8,
        #[serde(default)]
        maddr: Vec<u8>,
    },
    /// The link reports itself up on the next probe from the peer.
    LinkUp { peer: NodeAddr, bearer: u8 },
    LinkDown { peer: NodeAddr, bearer: u8 },
    Receive {
        peer: NodeAddr,
        bearer: u8,
        packet: PacketSpec,
    },
    SetRcvNxt { peer: NodeAddr, bearer: u8, seqno: u16 },
    /// The link's next supervision pass reports it dead.
    Expire { peer: NodeAddr, bearer: u8 },
    Tick { peer: NodeAddr },
    Connect { peer: NodeAddr, port: u32, peer_port: u32 },
    Disconnect { peer: NodeAddr, port: u32 },
    Send {
        peer: NodeAddr,
        #[serde(default)]
        selector: u32,
        #[serde(default)]
        size: usize,
    },
    DeleteBearer { bearer: u8 },
    Remove { peer: NodeAddr },
    Dump {
        #[serde(default)]
        resume_after: Option<NodeAddr>,
        #[serde(default = "default_limit")]
        limit: usize,
    },
}

impl Step {
    fn op(&self) -> &'static str {
        match self {
            Step::Discover { .. } => "discover",
            Step::LinkUp { .. } => "link_up",
            Step::LinkDown { .. } => "link_down",
            Step::Receive { .. } => "receive",
            Step::SetRcvNxt { .. } => "set_rcv_nxt",
            Step::Expire { .. } => "expire",
            Step::Tick { .. } => "tick",
            Step::Connect { .. } => "connect",
            Step::Disconnect { .. } => "disconnect",
            Step::Send { .. } => "send",
            Step::DeleteBearer { .. } => "delete_bearer",
            Step::Remove { .. } => "remove",
            Step::Dump { .. } => "dump",
        }
    }
}

/// A packet as the peer would send it.
#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PacketSpec {
    Data {
        seqno: u16,
        #[serde(default = "default_true")]
        peer_node_up: bool,
    },
    Probe {
        #[serde(default)]
        peer_node_up: bool,
    },
    Synch { seqno: u16, first: u16, count: u16 },
    Failover { seqno: u16, count: u16 },
}

impl PacketSpec {
    fn build(&self, from: NodeAddr) -> Packet {
        match *self {
            PacketSpec::Data { seqno, peer_node_up } => {
                let mut pkt = Packet::data(from, seqno, Vec::new());
                pkt.header.peer_node_up = peer_node_up;
                pkt
            }
            PacketSpec::Probe { peer_node_up } => {
                let mut hdr = MsgHeader::new(MsgUser::LinkProtocol, from);
                hdr.peer_link_up = true;
                hdr.peer_node_up = peer_node_up;
                Packet::new(hdr, Vec::new())
            }
            PacketSpec::Synch { seqno, first, count } => Packet::tunnel(from, TunnelKind::Synch, seqno, first, count),
            PacketSpec::Failover { seqno, count } => Packet::tunnel(from, TunnelKind::Failover, seqno, seqno, count),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StepResult {
    pub index: usize,
    pub op: &'static str,
    pub outcome: String,
}

#[derive(Debug, Serialize)]
pub struct NodeReport {
    pub addr: NodeAddr,
    pub state: NodeState,
    pub up: bool,
    pub active: ActiveSlots,
    pub working_links: usize,
    pub links: usize,
    pub connections: usize,
    pub sync_point: u16,
}

#[derive(Debug, Default, Serialize)]
pub struct UpcallSummary {
    pub node_up: usize,
    pub node_down: usize,
    pub link_up: usize,
    pub link_down: usize,
    pub delivered: usize,
}

#[derive(Debug, Serialize)]
pub struct Report {
    pub name: String,
    pub steps: Vec<StepResult>,
    pub nodes: Vec<NodeReport>,
    pub upcalls: UpcallSummary,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub dumps: Vec<DumpPage>,
}

pub struct Simulator {
    manager: NodeManager,
    factory: Arc<NullLinkFactory>,
    bearer: Arc<NullBearer>,
    upcalls: Arc<NullUpcalls>,
}

impl Simulator {
    pub fn new(config: NodeConfig) -> Self {
        let factory = Arc::new(NullLinkFactory::new().with_tolerance(config.default_link_tolerance()));
        let bearer = Arc::new(NullBearer::new());
        let upcalls = Arc::new(NullUpcalls::new());
        let manager = NodeManager::new(config, bearer.clone(), factory.clone(), upcalls.clone());
        Self {
            manager,
            factory,
            bearer,
            upcalls,
        }
    }

    pub fn manager(&self) -> &NodeManager {
        &self.manager
    }

    pub fn run(&self, scenario: &Scenario) -> anyhow::Result<Report> {
        info!(name = %scenario.name, steps = scenario.steps.len(), "replaying scenario");
        for p in &scenario.priorities {
            self.factory.set_priority(bearer_id(p.bearer)?, p.priority);
        }

        let mut steps = Vec::with_capacity(scenario.steps.len());
        let mut dumps = Vec::new();
        for (index, step) in scenario.steps.iter().enumerate() {
            let outcome = self
                .apply(step, &mut dumps)
                .with_context(|| format!("step {index} ({})", step.op()))?;
            debug!(index, op = step.op(), %outcome, "step applied");
            steps.push(StepResult {
                index,
                op: step.op(),
                outcome,
            });
        }

        Ok(Report {
            name: scenario.name.clone(),
            steps,
            nodes: self.node_table(),
            upcalls: self.upcall_summary(),
            dumps,
        })
    }

    fn apply(&self, step: &Step, dumps: &mut Vec<DumpPage>) -> anyhow::Result<String> {
        let m = &self.manager;
        let outcome = match step {
            Step::Discover { peer, bearer, maddr } => {
                let node = m.create_node(*peer)?;
                m.update_dest(&node, bearer_id(*bearer)?, &MediaAddr::from_slice(maddr))?;
                format!("links={}", node.link_count())
            }
            Step::LinkUp { peer, bearer } => {
                self.link(*peer, *bearer)?.push_event(LinkEvents::UP);
                let probe = PacketSpec::Probe { peer_node_up: false }.build(*peer);
                format!("{:?}", m.rcv(probe, bearer_id(*bearer)?))
            }
            Step::LinkDown { peer, bearer } => {
                let node = m.find(*peer).ok_or_else(|| anyhow!("unknown node {peer}"))?;
                m.link_down(&node, bearer_id(*bearer)?);
                format!("up={}", node.is_up())
            }
            Step::Receive { peer, bearer, packet } => {
                format!("{:?}", m.rcv(packet.build(*peer), bearer_id(*bearer)?))
            }
            Step::SetRcvNxt { peer, bearer, seqno } => {
                self.link(*peer, *bearer)?.set_rcv_nxt(*seqno);
                format!("rcv_nxt={seqno}")
            }
            Step::Expire { peer, bearer } => {
                self.link(*peer, *bearer)?.push_event(LinkEvents::DOWN);
                "armed".to_string()
            }
            Step::Tick { peer } => {
                let node = m.find(*peer).ok_or_else(|| anyhow!("unknown node {peer}"))?;
                let next = keepalive::tick(m, &node);
                format!("next={}ms", next.as_millis())
            }
            Step::Connect { peer, port, peer_port } => {
                m.add_conn(*peer, *port, *peer_port)?;
                "connected".to_string()
            }
            Step::Disconnect { peer, port } => {
                m.remove_conn(*peer, *port);
                "disconnected".to_string()
            }
            Step::Send { peer, selector, size } => {
                let packet = Packet::data(m.own_addr(), 0, vec![0u8; *size]);
                match m.xmit(vec![packet], *peer, *selector) {
                    Ok(()) => "sent".to_string(),
                    Err(e) => format!("failed: {e}"),
                }
            }
            Step::DeleteBearer { bearer } => {
                m.delete_links(bearer_id(*bearer)?);
                "deleted".to_string()
            }
            Step::Remove { peer } => match m.remove_node(*peer) {
                Some(_) => "removed".to_string(),
                None => "absent".to_string(),
            },
            Step::Dump { resume_after, limit } => {
                let page = m.dump(*resume_after, *limit)?;
                let outcome = format!("nodes={}", page.nodes.len());
                dumps.push(page);
                outcome
            }
        };
        Ok(outcome)
    }

    fn link(&self, peer: NodeAddr, bearer: u8) -> anyhow::Result<NullLinkHandle> {
        self.factory
            .handle(peer, bearer_id(bearer)?)
            .ok_or_else(|| anyhow!("no link to {peer} on bearer {bearer}"))
    }

    pub fn node_table(&self) -> Vec<NodeReport> {
        self.manager
            .registry()
            .snapshot()
            .into_iter()
            .map(|node| NodeReport {
                addr: node.addr(),
                state: node.state(),
                up: node.is_up(),
                active: node.active_slots(),
                working_links: node.working_links(),
                links: node.link_count(),
                connections: node.conn_count(),
                sync_point: node.sync_point().value(),
            })
            .collect()
    }

    fn upcall_summary(&self) -> UpcallSummary {
        let u = &self.upcalls;
        UpcallSummary {
            node_up: u.count(|c| matches!(c, Upcall::NodeUp(_))),
            node_down: u.count(|c| matches!(c, Upcall::NodeDown(_))),
            link_up: u.count(|c| matches!(c, Upcall::LinkUp(..))),
            link_down: u.count(|c| matches!(c, Upcall::LinkDown(..))),
            delivered: u.delivered().len(),
        }
    }

    /// Frames handed to the bearer so far.
    pub fn frames_sent(&self) -> usize {
        self.bearer.sent().len()
    }
}

fn bearer_id(id: u8) -> anyhow::Result<BearerId> {
    BearerId::new(id).map_err(|e| anyhow!(e))
}
