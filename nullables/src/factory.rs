//! Nullable link factory: hands out [`NullLink`]s and keeps their handles
//! so a test can reach a link after the node took ownership of it.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;

use peerlink_link::{Link, LinkError, LinkFactory, MediaAddr};
use peerlink_types::{BearerId, NodeAddr};

use crate::link::{NullLink, NullLinkHandle};

pub struct NullLinkFactory {
    default_priority: u32,
    tolerance: Duration,
    priorities: Mutex<HashMap<BearerId, u32>>,
    handles: Mutex<HashMap<(NodeAddr, BearerId), NullLinkHandle>>,
    fail_next: Mutex<bool>,
    created: Mutex<usize>,
}

impl NullLinkFactory {
    pub fn new() -> Self {
        Self {
            default_priority: 10,
            tolerance: Duration::from_millis(1500),
            priorities: Mutex::new(HashMap::new()),
            handles: Mutex::new(HashMap::new()),
            fail_next: Mutex::new(false),
            created: Mutex::new(0),
        }
    }

    pub fn with_tolerance(mut self, tolerance: Duration) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Links created on `bearer` from now on get `priority`.
    pub fn set_priority(&self, bearer: BearerId, priority: u32) {
        self.priorities.lock().insert(bearer, priority);
    }

    /// Make the next `create` call fail.
    pub fn fail_next(&self) {
        *self.fail_next.lock() = true;
    }

    /// Handle of the most recent link created toward `peer` on `bearer`.
    pub fn handle(&self, peer: NodeAddr, bearer: BearerId) -> Option<NullLinkHandle> {
        self.handles.lock().get(&(peer, bearer)).cloned()
    }

    pub fn created(&self) -> usize {
        *self.created.lock()
    }
}

impl Default for NullLinkFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkFactory for NullLinkFactory {
    fn create(&self, peer: NodeAddr, bearer: BearerId, maddr: &MediaAddr) -> Result<Box<dyn Link>, LinkError> {
        if std::mem::take(&mut *self.fail_next.lock()) {
            return Err(LinkError::CreateFailed(format!("scripted failure for {peer} on bearer {bearer}")));
        }
        let priority = self
            .priorities
            .lock()
            .get(&bearer)
            .copied()
            .unwrap_or(self.default_priority);
        let (mut link, handle) = NullLink::new(peer, bearer, priority);
        handle.set_tolerance(self.tolerance);
        link.set_media_addr(maddr);
        self.handles.lock().insert((peer, bearer), handle);
        *self.created.lock() += 1;
        Ok(Box::new(link))
    }
}
