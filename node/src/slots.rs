//! Active link slot arbitration.
//!
//! A node carries traffic on at most two links. Slot 0 is the primary; slot 1
//! either repeats slot 0 (single active link) or names an equal-priority
//! partner that shares the load. The decisions here are pure; the node guard
//! applies them and queues the resulting notifications.

use serde::Serialize;
use tracing::{debug, info, warn};

use peerlink_link::{ExecMode, TunnelKind, TUNNEL_HDR_SIZE};
use peerlink_types::{BearerId, LinkId};

use crate::node::{pair_mut, NodeGuard};

/// Bearer indices of the links in the two active roles.
///
/// Either both slots are empty, both name the same bearer, or they name two
/// distinct bearers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ActiveSlots([Option<BearerId>; 2]);

/// Where a newly working link ends up relative to the current primary.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Placement {
    /// No link was active; the new one takes both slots.
    Sole,
    /// Strictly higher priority; takes both slots and the old primary waits.
    Preferred,
    /// Same priority; shares the load through slot 1.
    Shared,
    /// Lower priority; kept in reserve without a slot.
    Standby,
}

impl ActiveSlots {
    pub const EMPTY: ActiveSlots = ActiveSlots([None, None]);

    pub fn get(&self, selector: u32) -> Option<BearerId> {
        self.0[(selector & 1) as usize]
    }

    pub fn primary(&self) -> Option<BearerId> {
        self.0[0]
    }

    pub fn secondary(&self) -> Option<BearerId> {
        self.0[1]
    }

    /// The node counts as up exactly while slot 0 is occupied.
    pub fn is_valid(&self) -> bool {
        self.0[0].is_some()
    }

    pub fn contains(&self, bearer: BearerId) -> bool {
        self.0.contains(&Some(bearer))
    }

    /// Place a link that just came up, given the priority of the current
    /// primary (if any).
    pub fn admit(&mut self, bearer: BearerId, priority: u32, primary_priority: Option<u32>) -> Placement {
        match primary_priority {
            None => {
                self.0 = [Some(bearer); 2];
                Placement::Sole
            }
            Some(current) if priority > current => {
                self.0 = [Some(bearer); 2];
                Placement::Preferred
            }
            Some(current) if priority == current => {
                self.0[1] = Some(bearer);
                Placement::Shared
            }
            Some(_) => Placement::Standby,
        }
    }

    /// Choose the slots from scratch among `(bearer, priority)` candidates,
    /// scanned in order. The highest priority wins both slots; the next
    /// candidate of the same priority takes slot 1.
    pub fn recompute(candidates: impl IntoIterator<Item = (BearerId, u32)>) -> ActiveSlots {
        let mut slots = ActiveSlots::EMPTY;
        let mut highest: Option<u32> = None;
        for (bearer, priority) in candidates {
            match highest {
                Some(best) if priority < best => continue,
                Some(best) if priority == best => slots.0[1] = Some(bearer),
                _ => {
                    highest = Some(priority);
                    slots.0 = [Some(bearer); 2];
                }
            }
        }
        slots
    }
}

/// Most links a node keeps working at once.
pub const MAX_WORKING_LINKS: usize = 2;

impl NodeGuard<'_> {
    /// The link on `bearer` reported itself up.
    pub(crate) fn link_up(&mut self, bearer: BearerId) {
        let peer = self.addr();
        if self.entry(bearer).working {
            return;
        }
        if self.inner.working_links >= MAX_WORKING_LINKS {
            warn!(peer = %peer, bearer = %bearer, "attempt to establish third link to peer");
            return;
        }
        let Some(priority) = self.mark_working(bearer) else {
            return;
        };
        info!(peer = %peer, bearer = %bearer, priority, "link established");

        let old = self.inner.active.primary();
        let old_priority = old.and_then(|b| self.entry(b).link.as_ref()).map(|l| l.priority());
        let placement = self.inner.active.admit(bearer, priority, old_priority);

        let Some(old) = old else {
            debug_assert_eq!(placement, Placement::Sole);
            if let Some(link) = self.entry_mut(bearer).link.as_mut() {
                link.set_exec_mode(ExecMode::Open);
            }
            self.established_contact();
            return;
        };
        if placement == Placement::Standby {
            info!(peer = %peer, bearer = %bearer, "link kept on standby");
        }

        // The link already carrying traffic replays its backlog over the new
        // one so the peer can line the two streams up.
        let mut xmitq = Vec::new();
        let (ol, nl) = pair_mut(&mut self.inner.links, old, bearer);
        if let (Some(ol), Some(nl)) = (ol.link.as_ref(), nl.link.as_mut()) {
            ol.prepare_tunnel(&mut **nl, TunnelKind::Synch, &mut xmitq);
        }
        self.queue_xmit(bearer, xmitq);
    }

    /// The link on `bearer` went down, or must be taken down.
    pub(crate) fn link_down(&mut self, bearer: BearerId) {
        let peer = self.addr();
        let entry = self.entry(bearer);
        let Some(link) = entry.link.as_ref() else {
            return;
        };
        if !entry.working {
            // Refused by the working-link cap but still up below us.
            if link.is_up() {
                debug!(peer = %peer, bearer = %bearer, "resetting link held outside the working set");
                if let Some(link) = self.entry_mut(bearer).link.as_mut() {
                    link.reset();
                }
            }
            return;
        }
        let link_id = LinkId::new(link.peer_bearer_id(), bearer);
        info!(peer = %peer, bearer = %bearer, "link lost");

        self.inner.working_links -= 1;
        self.entry_mut(bearer).working = false;
        self.effects.links_down.push(link_id);
        self.effects.dests_removed.push(bearer);
        self.metrics().links_down.inc();
        self.readmit_refused(bearer);

        let candidates: Vec<(BearerId, u32)> = BearerId::all()
            .filter(|&b| b != bearer && self.entry(b).working)
            .filter_map(|b| self.entry(b).link.as_ref().map(|l| (b, l.priority())))
            .collect();
        self.inner.active = ActiveSlots::recompute(candidates);

        match self.inner.active.primary() {
            None => {
                if let Some(link) = self.entry_mut(bearer).link.as_mut() {
                    link.reset();
                }
                self.lost_contact();
            }
            Some(survivor) => self.begin_failover(bearer, survivor),
        }
    }

    /// Count the link on `bearer` as working and queue its link-up
    /// publication. Returns its priority.
    fn mark_working(&mut self, bearer: BearerId) -> Option<u32> {
        let link = self.entry(bearer).link.as_ref()?;
        let (priority, link_id, mtu) = (
            link.priority(),
            LinkId::new(link.peer_bearer_id(), bearer),
            link.mtu().saturating_sub(TUNNEL_HDR_SIZE),
        );
        self.inner.working_links += 1;
        let entry = self.entry_mut(bearer);
        entry.working = true;
        entry.mtu = mtu;
        self.effects.links_up.push(link_id);
        self.effects.dests_added.push(bearer);
        self.metrics().links_up.inc();
        Some(priority)
    }

    /// Take into service links that came up while the cap was reached, now
    /// that `lost` freed a place.
    fn readmit_refused(&mut self, lost: BearerId) {
        let peer = self.addr();
        for b in BearerId::all().filter(|&b| b != lost) {
            if self.inner.working_links >= MAX_WORKING_LINKS {
                break;
            }
            let entry = self.entry(b);
            if entry.working || !entry.link.as_ref().is_some_and(|l| l.is_up()) {
                continue;
            }
            if let Some(priority) = self.mark_working(b) {
                info!(peer = %peer, bearer = %b, priority, "refused link taken into service");
            }
        }
    }
}
