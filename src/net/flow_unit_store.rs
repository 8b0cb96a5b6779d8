//! Bounded per-vertex buffers for flow units received off the wire.

use crate::stats::{self, StatsCollector};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// A flow unit as delivered by a peer node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FlowUnitMessage {
    /// Name of the graph vertex this unit is destined for
    pub graph_node: String,

    /// Host address of the sending node
    pub host: String,

    /// Computed value being exchanged
    pub payload: serde_json::Value,

    /// Sender-side epoch millis
    pub timestamp_ms: u64,
}

/// Holds inbound flow units until the scheduler consumes them.
///
/// Each vertex gets its own buffer bounded by the conf's per-vertex buffer
/// length; a full buffer rejects the new unit and counts the drop.
pub struct ReceivedFlowUnitStore {
    per_vertex_buffer_length: usize,
    buffers: Mutex<HashMap<String, VecDeque<FlowUnitMessage>>>,
    stats: Arc<StatsCollector>,
}

impl ReceivedFlowUnitStore {
    pub fn new(per_vertex_buffer_length: usize, stats: Arc<StatsCollector>) -> Self {
        Self {
            per_vertex_buffer_length: per_vertex_buffer_length.max(1),
            buffers: Mutex::new(HashMap::new()),
            stats,
        }
    }

    /// Buffer one inbound unit. Returns false when the vertex buffer is full.
    pub fn enqueue(&self, unit: FlowUnitMessage) -> bool {
        let mut buffers = self.buffers.lock();
        let buffer = buffers.entry(unit.graph_node.clone()).or_default();
        if buffer.len() >= self.per_vertex_buffer_length {
            self.stats.increment(stats::FLOW_UNIT_DROPPED);
            return false;
        }
        buffer.push_back(unit);
        true
    }

    /// Remove and return everything buffered for one vertex.
    pub fn drain_node(&self, graph_node: &str) -> Vec<FlowUnitMessage> {
        self.buffers
            .lock()
            .remove(graph_node)
            .map(|buffer| buffer.into_iter().collect())
            .unwrap_or_default()
    }

    /// Remove and return every buffered, not-yet-processed unit. Used by the
    /// controller while tearing the runtime down.
    pub fn drain_all(&self) -> Vec<FlowUnitMessage> {
        let mut buffers = self.buffers.lock();
        let mut drained = Vec::new();
        for (_, buffer) in buffers.drain() {
            drained.extend(buffer);
        }
        drained
    }
}
