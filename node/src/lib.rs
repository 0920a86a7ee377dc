//! Peer node control plane.
//!
//! For every remote node reachable over one or more links this crate:
//! - tracks mutual contact state with an eight-state machine
//! - picks which links carry traffic, by priority
//! - hands in-flight traffic over between links on failure (failover)
//!   and when a parallel link joins (synchronization)
//! - screens each incoming packet against that state before the link sees it
//! - drives link supervision from a per-node keepalive timer
//!
//! Everything that reaches outside a node (bearer sends, upper-layer
//! notifications, socket delivery) is gathered as [`Effects`] under the node
//! lock and applied only after it is released.

pub mod config;
pub mod effects;
pub mod error;
pub mod failover;
pub mod filter;
pub mod fsm;
pub mod keepalive;
pub mod logging;
pub mod manager;
pub mod metrics;
pub mod node;
pub mod registry;
pub mod shutdown;
pub mod slots;
pub mod tracing_spans;

pub use config::NodeConfig;
pub use effects::{Effects, Transmission};
pub use error::NodeError;
pub use fsm::{next_state, FsmEvent, IllegalTransition, NodeState};
pub use logging::{init_logging, LogFormat};
pub use manager::{DestStatus, NodeManager, RcvOutcome};
pub use metrics::NodeMetrics;
pub use node::{NodeGuard, PeerNode};
pub use registry::{DumpPage, NodeInfo, NodeRegistry};
pub use shutdown::ShutdownController;
pub use slots::{ActiveSlots, Placement, MAX_WORKING_LINKS};
