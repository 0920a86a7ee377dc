//! Per-link inbound queue shared between the link layer and the socket layer.
//!
//! The link layer appends reassembled messages while the node lock is held;
//! the receive path drains the queue after the lock is released.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::msg::Packet;

#[derive(Debug, Default)]
pub struct InputQueue {
    inner: Mutex<VecDeque<Packet>>,
}

impl InputQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, packet: Packet) {
        self.inner.lock().push_back(packet);
    }

    /// Number of messages accepted by the link but not yet consumed.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn drain(&self) -> Vec<Packet> {
        self.inner.lock().drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use peerlink_types::NodeAddr;

    #[test]
    fn drain_empties_in_fifo_order() {
        let q = InputQueue::new();
        let from = NodeAddr::new(0x100042);
        q.push(Packet::data(from, 1, vec![1]));
        q.push(Packet::data(from, 2, vec![2]));
        assert_eq!(q.len(), 2);

        let drained = q.drain();
        assert_eq!(drained[0].payload, vec![1]);
        assert_eq!(drained[1].payload, vec![2]);
        assert!(q.is_empty());
    }
}
