//! Registry of peer nodes.
//!
//! Owns the table's reference to every [`PeerNode`] and nothing else: the
//! registry lock guards membership only, never node state. Lookups hand out
//! `Arc` clones, so a node unlinked from the table stays valid for whoever
//! still holds it and is reclaimed when the last handle drops.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, warn};

use peerlink_types::NodeAddr;

use crate::metrics::NodeMetrics;
use crate::node::PeerNode;
use crate::NodeError;

#[derive(Default)]
struct Table {
    by_addr: HashMap<NodeAddr, Arc<PeerNode>>,
    /// Addresses in ascending order, for deterministic iteration.
    order: BTreeSet<NodeAddr>,
}

/// One row of the administrative node listing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct NodeInfo {
    pub addr: NodeAddr,
    pub up: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DumpPage {
    pub nodes: Vec<NodeInfo>,
    /// Cursor to resume after, when the page was cut short.
    pub resume_after: Option<NodeAddr>,
}

pub struct NodeRegistry {
    own_addr: NodeAddr,
    max_nodes: usize,
    metrics: Arc<NodeMetrics>,
    table: RwLock<Table>,
}

impl NodeRegistry {
    pub fn new(own_addr: NodeAddr, max_nodes: usize, metrics: Arc<NodeMetrics>) -> Self {
        Self {
            own_addr,
            max_nodes,
            metrics,
            table: RwLock::new(Table::default()),
        }
    }

    pub fn own_addr(&self) -> NodeAddr {
        self.own_addr
    }

    /// Look up a node. Addresses outside our own cluster are never found.
    pub fn find(&self, addr: NodeAddr) -> Option<Arc<PeerNode>> {
        if !self.own_addr.in_same_cluster(addr) {
            return None;
        }
        self.table.read().by_addr.get(&addr).cloned()
    }

    /// Return the node for `addr`, creating it if it does not exist yet.
    pub fn create(&self, addr: NodeAddr) -> Result<Arc<PeerNode>, NodeError> {
        if !self.own_addr.in_same_cluster(addr) || addr == self.own_addr {
            return Err(NodeError::HostUnreachable(addr));
        }
        let mut table = self.table.write();
        if let Some(node) = table.by_addr.get(&addr) {
            return Ok(Arc::clone(node));
        }
        if table.by_addr.len() >= self.max_nodes {
            warn!(peer = %addr, max = self.max_nodes, "node creation failed, table full");
            return Err(NodeError::ResourceExhausted(format!(
                "node table full ({} entries)",
                self.max_nodes
            )));
        }
        let node = Arc::new(PeerNode::new(addr, self.own_addr, Arc::clone(&self.metrics)));
        table.by_addr.insert(addr, Arc::clone(&node));
        table.order.insert(addr);
        self.metrics.nodes_known.set(table.by_addr.len() as i64);
        debug!(peer = %addr, "node created");
        Ok(node)
    }

    /// Unlink a node from lookup and iteration and stop its timer.
    pub fn remove(&self, addr: NodeAddr) -> Option<Arc<PeerNode>> {
        let node = {
            let mut table = self.table.write();
            let node = table.by_addr.remove(&addr)?;
            table.order.remove(&addr);
            self.metrics.nodes_known.set(table.by_addr.len() as i64);
            node
        };
        node.disarm();
        debug!(peer = %addr, "node removed");
        Some(node)
    }

    /// Drop every node, stopping all timers.
    pub fn remove_all(&self) {
        let nodes: Vec<Arc<PeerNode>> = {
            let mut table = self.table.write();
            table.order.clear();
            table.by_addr.drain().map(|(_, node)| node).collect()
        };
        self.metrics.nodes_known.set(0);
        for node in &nodes {
            node.disarm();
        }
        info!(count = nodes.len(), "node registry cleared");
    }

    pub fn len(&self) -> usize {
        self.table.read().by_addr.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Handles to every node, in address order, taken under the read lock.
    /// The nodes stay valid after the lock is gone even if they are removed
    /// meanwhile.
    pub fn snapshot(&self) -> Vec<Arc<PeerNode>> {
        let table = self.table.read();
        table
            .order
            .iter()
            .filter_map(|addr| table.by_addr.get(addr).cloned())
            .collect()
    }

    /// Up to `limit` nodes in address order, starting after `resume_after`.
    /// A `limit` of zero lists every remaining node.
    ///
    /// A cursor naming a node that has since left the table means the
    /// listing can no longer be continued consistently.
    pub fn dump(&self, resume_after: Option<NodeAddr>, limit: usize) -> Result<DumpPage, NodeError> {
        let limit = if limit == 0 { usize::MAX } else { limit };
        let page: Vec<Arc<PeerNode>> = {
            let table = self.table.read();
            let start = match resume_after {
                Some(cursor) if !table.by_addr.contains_key(&cursor) => {
                    return Err(NodeError::DumpInterrupted(cursor));
                }
                Some(cursor) => std::ops::Bound::Excluded(cursor),
                None => std::ops::Bound::Unbounded,
            };
            table
                .order
                .range((start, std::ops::Bound::Unbounded))
                .take(limit.saturating_add(1))
                .filter_map(|addr| table.by_addr.get(addr).cloned())
                .collect()
        };

        let more = page.len() > limit;
        let nodes: Vec<NodeInfo> = page
            .iter()
            .take(limit)
            .map(|node| NodeInfo {
                addr: node.addr(),
                up: node.is_up(),
            })
            .collect();
        let resume_after = if more { nodes.last().map(|n| n.addr) } else { None };
        Ok(DumpPage { nodes, resume_after })
    }
}
