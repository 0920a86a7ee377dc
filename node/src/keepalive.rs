//! Per-node keepalive timer.
//!
//! One background task per node wakes at the tightest interval any of its
//! links needs, lets each link run its supervision, and takes down links
//! that report a timeout.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, Instrument};

use peerlink_types::BearerId;

use crate::manager::NodeManager;
use crate::node::{NodeGuard, PeerNode};
use crate::tracing_spans::keepalive_span;

/// Shortest interval the timer ever sleeps.
pub const MIN_KEEPALIVE_INTERVAL: Duration = Duration::from_millis(1);

/// Wake-up interval a link with `tolerance` asks for: a quarter of the
/// tolerance, never more than `cap` and never below
/// [`MIN_KEEPALIVE_INTERVAL`].
pub fn link_interval(tolerance: Duration, cap: Duration) -> Duration {
    (tolerance / 4).min(cap).max(MIN_KEEPALIVE_INTERVAL)
}

/// Silent intervals a link may sit through before it is declared down.
pub fn abort_limit(tolerance: Duration, interval: Duration) -> u32 {
    if interval.is_zero() {
        return u32::MAX;
    }
    let limit = tolerance.as_millis() / interval.as_millis().max(1);
    u32::try_from(limit).unwrap_or(u32::MAX)
}

impl NodeGuard<'_> {
    /// Recompute the node interval from every attached link and align each
    /// link's abort limit with it.
    pub(crate) fn recompute_keepalive(&mut self, cap: Duration) -> Option<Duration> {
        let intv = self
            .inner
            .links
            .iter()
            .filter_map(|e| e.link.as_ref())
            .map(|l| link_interval(l.tolerance(), cap))
            .min();
        self.inner.keepalive_intv = intv;
        if let Some(intv) = intv {
            for link in self.inner.links.iter_mut().filter_map(|e| e.link.as_mut()) {
                let limit = abort_limit(link.tolerance(), intv);
                link.set_abort_limit(limit);
            }
        }
        intv
    }

    /// Run the link's supervision on `bearer`; a reported timeout takes the
    /// link down.
    pub(crate) fn link_timeout(&mut self, bearer: BearerId) {
        let mut xmitq = Vec::new();
        let events = match self.entry_mut(bearer).link.as_mut() {
            Some(link) => link.timeout(&mut xmitq),
            None => return,
        };
        self.queue_xmit(bearer, xmitq);
        if events.down {
            self.link_down(bearer);
        }
    }
}

/// One keepalive pass over `node`. Returns the interval until the next one.
pub fn tick(manager: &NodeManager, node: &Arc<PeerNode>) -> Duration {
    let cap = manager.config().keepalive_cap();
    let intv = manager.with_node(node, |g| g.recompute_keepalive(cap));
    for bearer in BearerId::all() {
        manager.with_node(node, |g| g.link_timeout(bearer));
    }
    manager.metrics().keepalive_ticks.inc();
    intv.unwrap_or(cap).max(MIN_KEEPALIVE_INTERVAL)
}

/// Spawn the keepalive task for `node` on the current tokio runtime.
///
/// The task owns one node handle until shutdown or disarm. Without a
/// runtime nothing is spawned and no handle is taken.
pub(crate) fn arm(manager: &NodeManager, node: &Arc<PeerNode>, mut shutdown_rx: broadcast::Receiver<()>) -> bool {
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        debug!(peer = %node.addr(), "no runtime, keepalive not armed");
        return false;
    };
    let manager = manager.clone();
    let task_node = Arc::clone(node);
    let span = keepalive_span(node.addr());
    let handle = runtime.spawn(
        async move {
            let mut intv = task_node
                .keepalive_interval()
                .unwrap_or(manager.config().keepalive_cap())
                .max(MIN_KEEPALIVE_INTERVAL);
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.recv() => {
                        debug!("keepalive task shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(intv) => {
                        intv = tick(&manager, &task_node);
                    }
                }
            }
        }
        .instrument(span),
    );
    node.arm(handle);
    true
}
