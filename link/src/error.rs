use thiserror::Error;

use crate::msg::Packet;

#[derive(Debug, Error)]
pub enum LinkError {
    /// Send window is full. The packets are handed back untouched so the
    /// sender can block and retry.
    #[error("link congested ({} packets returned)", .0.len())]
    Congested(Vec<Packet>),

    /// Backlog limit exceeded; the link must be reset.
    #[error("link send buffers exhausted")]
    NoBuffers,

    #[error("message of {size} bytes exceeds link MTU {mtu}")]
    MessageTooLarge { size: usize, mtu: usize },

    #[error("link creation failed: {0}")]
    CreateFailed(String),
}
