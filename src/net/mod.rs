//! Network resources for cross-node flow-unit exchange.
//!
//! The wire protocol itself lives behind the [`NetClient`]/[`NetServer`]
//! seams; this module owns everything the controller must build, swap, and
//! tear down around it: the thread pool, the inbound flow-unit store, node
//! state tracking, and subscription bookkeeping.

pub mod flow_unit_store;
pub mod handlers;
pub mod pool;

use crate::error::EvalError;
use flow_unit_store::{FlowUnitMessage, ReceivedFlowUnitStore};
use handlers::{PublishRequestHandler, SubscribeServerHandler};
use parking_lot::{Mutex, RwLock};
use pool::SwappablePool;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Last-received bookkeeping per (vertex, sending host).
#[derive(Default)]
pub struct NodeStateTracker {
    last_received: Mutex<HashMap<(String, String), u64>>,
}

impl NodeStateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update_receive_time(&self, graph_node: &str, host: &str, timestamp_ms: u64) {
        self.last_received
            .lock()
            .insert((graph_node.to_string(), host.to_string()), timestamp_ms);
    }

    pub fn last_received(&self, graph_node: &str, host: &str) -> Option<u64> {
        self.last_received
            .lock()
            .get(&(graph_node.to_string(), host.to_string()))
            .copied()
    }
}

/// Tracks which peers subscribed to which vertices, scoped by locus.
///
/// The current locus is set by the controller from the per-role conf every
/// time the runtime starts; subscriptions for any other locus are ignored.
#[derive(Default)]
pub struct SubscriptionManager {
    current_locus: RwLock<String>,
    subscribers: Mutex<HashMap<String, HashSet<String>>>,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_current_locus(&self, locus: &str) {
        *self.current_locus.write() = locus.to_string();
    }

    pub fn current_locus(&self) -> String {
        self.current_locus.read().clone()
    }

    /// Record a peer subscription. Returns false when the locus is not the
    /// one this node currently serves.
    pub fn add_subscriber(&self, graph_node: &str, host: &str, locus: &str) -> bool {
        if *self.current_locus.read() != locus {
            return false;
        }
        self.subscribers
            .lock()
            .entry(graph_node.to_string())
            .or_default()
            .insert(host.to_string());
        true
    }

    pub fn subscribers_for(&self, graph_node: &str) -> Vec<String> {
        self.subscribers
            .lock()
            .get(graph_node)
            .map(|hosts| hosts.iter().cloned().collect())
            .unwrap_or_default()
    }
}

/// Outbound side of the wire.
pub trait NetClient: Send + Sync {
    fn send_flow_unit(&self, host: &str, unit: FlowUnitMessage) -> Result<(), EvalError>;

    fn stop(&self);
}

/// Inbound side of the wire. The controller re-registers both handlers on
/// every start so they are bound to the freshly installed pool and store.
pub trait NetServer: Send + Sync {
    fn set_send_data_handler(&self, handler: Arc<PublishRequestHandler>);

    fn set_subscribe_handler(&self, handler: Arc<SubscribeServerHandler>);

    fn stop(&self);
}

/// In-process loopback transport backing the binary and the tests.
///
/// `send_flow_unit` delivers straight into the registered publish handler, as
/// a remote peer's publish RPC would.
#[derive(Default)]
pub struct LocalNet {
    publish_handler: RwLock<Option<Arc<PublishRequestHandler>>>,
    subscribe_handler: RwLock<Option<Arc<SubscribeServerHandler>>>,
}

impl LocalNet {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl NetClient for LocalNet {
    fn send_flow_unit(&self, _host: &str, unit: FlowUnitMessage) -> Result<(), EvalError> {
        let handler = self.publish_handler.read().clone();
        match handler {
            Some(handler) => {
                handler.handle_publish(unit);
                Ok(())
            }
            None => Err(EvalError::Collation {
                reason: "no publish handler registered".to_string(),
            }),
        }
    }

    fn stop(&self) {
        *self.publish_handler.write() = None;
    }
}

impl NetServer for LocalNet {
    fn set_send_data_handler(&self, handler: Arc<PublishRequestHandler>) {
        *self.publish_handler.write() = Some(handler);
    }

    fn set_subscribe_handler(&self, handler: Arc<SubscribeServerHandler>) {
        *self.subscribe_handler.write() = Some(handler);
    }

    fn stop(&self) {
        *self.publish_handler.write() = None;
        *self.subscribe_handler.write() = None;
    }
}

/// Bundle of network resources handed to the scheduler for one runtime
/// lifecycle. Rebuilt from scratch on every start.
pub struct WireHopper {
    pub node_state: Arc<NodeStateTracker>,
    pub net_client: Arc<dyn NetClient>,
    pub subscriptions: Arc<SubscriptionManager>,
    pub pool: SwappablePool,
    pub store: Arc<ReceivedFlowUnitStore>,
}

impl WireHopper {
    pub fn new(
        node_state: Arc<NodeStateTracker>,
        net_client: Arc<dyn NetClient>,
        subscriptions: Arc<SubscriptionManager>,
        pool: SwappablePool,
        store: Arc<ReceivedFlowUnitStore>,
    ) -> Self {
        Self { node_state, net_client, subscriptions, pool, store }
    }

    /// Send a locally computed flow unit to every subscriber of its vertex.
    pub fn broadcast(&self, unit: FlowUnitMessage) -> Result<(), EvalError> {
        for host in self.subscriptions.subscribers_for(&unit.graph_node) {
            self.net_client.send_flow_unit(&host, unit.clone())?;
        }
        Ok(())
    }

    /// Pull everything received for one vertex since the last evaluation.
    pub fn drain_received(&self, graph_node: &str) -> Vec<FlowUnitMessage> {
        self.store.drain_node(graph_node)
    }
}
