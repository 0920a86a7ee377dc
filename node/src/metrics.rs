//! Prometheus metrics for the peer node control plane.
//!
//! [`NodeMetrics`] owns a dedicated [`Registry`] so several control planes
//! can live in one process (tests, simulations) without name clashes.

use prometheus::{
    register_int_counter_with_registry, register_int_gauge_with_registry, Encoder, IntCounter,
    IntGauge, Opts, Registry, TextEncoder,
};

pub struct NodeMetrics {
    pub registry: Registry,

    // ── Gauges ──────────────────────────────────────────────────────────
    /// Peer nodes currently present in the registry.
    pub nodes_known: IntGauge,
    /// Peer nodes with at least one active link.
    pub nodes_up: IntGauge,

    // ── Counters ────────────────────────────────────────────────────────
    pub links_up: IntCounter,
    pub links_down: IntCounter,
    pub failovers_started: IntCounter,
    pub failovers_completed: IntCounter,
    pub synchs_started: IntCounter,
    pub synchs_completed: IntCounter,
    /// Contact state machine events that were not valid in the current state.
    pub illegal_fsm_events: IntCounter,
    /// Packets refused by the admission filter.
    pub packets_rejected: IntCounter,
    pub keepalive_ticks: IntCounter,
}

fn counter(registry: &Registry, name: &str, help: &str) -> IntCounter {
    register_int_counter_with_registry!(Opts::new(name, help), registry)
        .unwrap_or_else(|e| panic!("failed to register {name} counter: {e}"))
}

fn gauge(registry: &Registry, name: &str, help: &str) -> IntGauge {
    register_int_gauge_with_registry!(Opts::new(name, help), registry)
        .unwrap_or_else(|e| panic!("failed to register {name} gauge: {e}"))
}

impl NodeMetrics {
    /// Create a fresh set of metrics, all registered under a new [`Registry`].
    pub fn new() -> Self {
        let registry = Registry::new();

        let nodes_known = gauge(&registry, "peerlink_nodes_known", "Peer nodes in the registry");
        let nodes_up = gauge(&registry, "peerlink_nodes_up", "Peer nodes with an active link");

        let links_up = counter(&registry, "peerlink_links_up_total", "Links brought into service");
        let links_down = counter(&registry, "peerlink_links_down_total", "Links taken out of service");
        let failovers_started = counter(
            &registry,
            "peerlink_failovers_started_total",
            "Failover handoffs started",
        );
        let failovers_completed = counter(
            &registry,
            "peerlink_failovers_completed_total",
            "Failover handoffs completed",
        );
        let synchs_started = counter(
            &registry,
            "peerlink_synchs_started_total",
            "Parallel link synchronizations started",
        );
        let synchs_completed = counter(
            &registry,
            "peerlink_synchs_completed_total",
            "Parallel link synchronizations completed",
        );
        let illegal_fsm_events = counter(
            &registry,
            "peerlink_illegal_fsm_events_total",
            "Contact state machine events invalid in the current state",
        );
        let packets_rejected = counter(
            &registry,
            "peerlink_packets_rejected_total",
            "Packets refused by the admission filter",
        );
        let keepalive_ticks = counter(
            &registry,
            "peerlink_keepalive_ticks_total",
            "Keepalive passes over a node's links",
        );

        Self {
            registry,
            nodes_known,
            nodes_up,
            links_up,
            links_down,
            failovers_started,
            failovers_completed,
            synchs_started,
            synchs_completed,
            illegal_fsm_events,
            packets_rejected,
            keepalive_ticks,
        }
    }

    /// Render every metric in the Prometheus text exposition format.
    pub fn encode_text(&self) -> String {
        let mut buf = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&self.registry.gather(), &mut buf) {
            tracing::warn!(error = %e, "failed to encode metrics");
        }
        String::from_utf8_lossy(&buf).into_owned()
    }
}

impl Default for NodeMetrics {
    fn default() -> Self {
        Self::new()
    }
}
