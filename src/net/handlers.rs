//! Inbound network handlers registered against the net server.
//!
//! Both handlers hold the swappable pool handle, not a pool instance: they
//! load the current pool on every request so a restart-installed replacement
//! becomes visible immediately.

use crate::net::flow_unit_store::{FlowUnitMessage, ReceivedFlowUnitStore};
use crate::net::pool::SwappablePool;
use crate::net::{NodeStateTracker, SubscriptionManager};
use slog::{debug, warn, Logger};
use std::sync::Arc;

/// Handles peer-published flow units: records receipt against the node state
/// tracker and buffers the unit for the destination vertex.
pub struct PublishRequestHandler {
    node_state: Arc<NodeStateTracker>,
    store: Arc<ReceivedFlowUnitStore>,
    pool: SwappablePool,
    logger: Logger,
}

impl PublishRequestHandler {
    pub fn new(
        node_state: Arc<NodeStateTracker>,
        store: Arc<ReceivedFlowUnitStore>,
        pool: SwappablePool,
        logger: Logger,
    ) -> Self {
        Self { node_state, store, pool, logger }
    }

    /// Accept one inbound flow unit. Returns false if the unit was dropped
    /// (no live pool, pool queue full, or vertex buffer full).
    pub fn handle_publish(&self, unit: FlowUnitMessage) -> bool {
        let Some(pool) = self.pool.current() else {
            debug!(self.logger, "Dropping flow unit, no live network pool";
                "graph_node" => unit.graph_node.as_str());
            return false;
        };

        let node_state = self.node_state.clone();
        let store = self.store.clone();
        let logger = self.logger.clone();
        pool.try_submit(Box::new(move || {
            node_state.update_receive_time(&unit.graph_node, &unit.host, unit.timestamp_ms);
            if !store.enqueue(unit) {
                warn!(logger, "Flow unit buffer full, unit dropped");
            }
        }))
    }
}

/// Handles peer subscription requests for vertices on this node.
pub struct SubscribeServerHandler {
    subscriptions: Arc<SubscriptionManager>,
    pool: SwappablePool,
    logger: Logger,
}

impl SubscribeServerHandler {
    pub fn new(subscriptions: Arc<SubscriptionManager>, pool: SwappablePool, logger: Logger) -> Self {
        Self { subscriptions, pool, logger }
    }

    /// Register a peer's interest in a vertex, scoped by locus. Returns false
    /// if the request could not be queued.
    pub fn handle_subscribe(&self, graph_node: &str, host: &str, locus: &str) -> bool {
        let Some(pool) = self.pool.current() else {
            debug!(self.logger, "Dropping subscribe request, no live network pool";
                "graph_node" => graph_node, "host" => host);
            return false;
        };

        let subscriptions = self.subscriptions.clone();
        let graph_node = graph_node.to_string();
        let host = host.to_string();
        let locus = locus.to_string();
        let logger = self.logger.clone();
        pool.try_submit(Box::new(move || {
            if !subscriptions.add_subscriber(&graph_node, &host, &locus) {
                debug!(logger, "Subscription ignored, locus does not match";
                    "graph_node" => graph_node.as_str(),
                    "host" => host.as_str(),
                    "locus" => locus.as_str()
                );
            }
        }))
    }
}
