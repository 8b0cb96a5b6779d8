//! Seams between the engine and the analysis graph it evaluates.
//!
//! Vertex ordering and flow-unit computation live behind [`GraphNode`]; the
//! control plane only needs to resolve a named topology, hand each vertex its
//! evaluation calls, and construct the collaborators the graph is bound to.

use crate::config::RcaConf;
use crate::error::{EvalError, StartError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// One vertex of the analysis graph.
pub trait GraphNode: Send {
    fn name(&self) -> &str;

    /// Locally triggered evaluation of this vertex.
    fn evaluate_locally(&mut self);

    /// Evaluation triggered by network-delivered flow units. Terminal nodes
    /// leave this as the default no-op.
    fn evaluate_from_wire(&mut self) {}
}

/// An ordered list of vertices evaluated together.
pub struct ConnectedComponent {
    name: String,
    nodes: Vec<Box<dyn GraphNode>>,
}

impl ConnectedComponent {
    pub fn new(name: impl Into<String>, nodes: Vec<Box<dyn GraphNode>>) -> Self {
        Self { name: name.into(), nodes }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes_mut(&mut self) -> &mut [Box<dyn GraphNode>] {
        &mut self.nodes
    }
}

type GraphBuilder =
    dyn Fn(&RcaConf) -> Result<Vec<ConnectedComponent>, String> + Send + Sync;

/// Maps analysis-graph names to topology builders.
///
/// Replaces dynamic class loading: the conf names a graph, the registry
/// resolves it at start time, and an unknown name or a failing builder is a
/// typed start error.
#[derive(Default)]
pub struct GraphRegistry {
    builders: RwLock<HashMap<String, Arc<GraphBuilder>>>,
}

impl GraphRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, name: &str, builder: F)
    where
        F: Fn(&RcaConf) -> Result<Vec<ConnectedComponent>, String> + Send + Sync + 'static,
    {
        self.builders.write().insert(name.to_string(), Arc::new(builder));
    }

    pub fn resolve(&self, conf: &RcaConf) -> Result<Vec<ConnectedComponent>, StartError> {
        let builder = self
            .builders
            .read()
            .get(&conf.analysis_graph)
            .cloned()
            .ok_or_else(|| StartError::UnknownGraph { name: conf.analysis_graph.clone() })?;
        builder(conf).map_err(|reason| StartError::GraphConstruction {
            name: conf.analysis_graph.clone(),
            reason,
        })
    }
}

/// Read access to the metrics database the graph computes from.
pub trait Queryable: Send + Sync {
    fn query_metric(&self, metric: &str) -> Result<serde_json::Value, EvalError>;
}

/// Default data source over the on-disk metrics database. File handling for
/// the database itself is owned by the metrics reader.
#[derive(Default)]
pub struct MetricsDbProvider;

impl MetricsDbProvider {
    pub fn new() -> Self {
        Self
    }
}

impl Queryable for MetricsDbProvider {
    fn query_metric(&self, _metric: &str) -> Result<serde_json::Value, EvalError> {
        Ok(serde_json::Value::Null)
    }
}

/// Named threshold values loaded from `thresholds.json` in the conf dir.
///
/// A missing file means no overrides; a malformed file fails the start
/// attempt.
pub struct ThresholdStore {
    thresholds: HashMap<String, f64>,
}

impl ThresholdStore {
    pub fn load(conf_dir: &Path) -> Result<Self, StartError> {
        let path = conf_dir.join("thresholds.json");
        if !path.exists() {
            return Ok(Self { thresholds: HashMap::new() });
        }
        let contents = std::fs::read_to_string(&path)
            .map_err(|e| StartError::Thresholds { reason: e.to_string() })?;
        let thresholds = serde_json::from_str(&contents)
            .map_err(|e| StartError::Thresholds { reason: e.to_string() })?;
        Ok(Self { thresholds })
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.thresholds.get(name).copied()
    }
}
