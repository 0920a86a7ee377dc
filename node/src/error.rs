use thiserror::Error;

use peerlink_link::{LinkError, Packet};
use peerlink_types::NodeAddr;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("host unreachable: {0}")]
    HostUnreachable(NodeAddr),

    /// The link refused the packets for now; ownership goes back to the caller.
    #[error("link congested, {} packet(s) returned", .0.len())]
    Congested(Vec<Packet>),

    #[error("message of {size} bytes exceeds link mtu {mtu}")]
    MessageTooLarge { size: usize, mtu: usize },

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("invalid bearer id {0}")]
    InvalidBearer(u8),

    #[error("no link to {peer} on bearer {bearer}")]
    LinkNotFound { peer: NodeAddr, bearer: u8 },

    #[error("node table changed under dump cursor {0}")]
    DumpInterrupted(NodeAddr),

    #[error("link error: {0}")]
    Link(LinkError),

    #[error("config error: {0}")]
    Config(String),
}

impl From<LinkError> for NodeError {
    fn from(err: LinkError) -> Self {
        match err {
            LinkError::Congested(packets) => NodeError::Congested(packets),
            LinkError::MessageTooLarge { size, mtu } => NodeError::MessageTooLarge { size, mtu },
            other => NodeError::Link(other),
        }
    }
}
