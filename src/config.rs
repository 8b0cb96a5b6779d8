//! Per-role RCA configuration.
//!
//! Each node role runs its own analysis graph topology and locus. The conf is
//! a JSON document (`rca.conf`, `rca_elected_coordinator.conf`, ...) picked by
//! the controller every time the scheduler is (re)started.

use crate::controller::role::NodeRole;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

pub const DEFAULT_NETWORK_QUEUE_LENGTH: usize = 200;
pub const DEFAULT_PER_VERTEX_BUFFER_LENGTH: usize = 50;
pub const DEFAULT_EVAL_INTERVAL_MS: u64 = 5000;

fn default_network_queue_length() -> usize {
    DEFAULT_NETWORK_QUEUE_LENGTH
}

fn default_per_vertex_buffer_length() -> usize {
    DEFAULT_PER_VERTEX_BUFFER_LENGTH
}

fn default_eval_interval_ms() -> u64 {
    DEFAULT_EVAL_INTERVAL_MS
}

fn default_persistence() -> String {
    "in-memory".to_string()
}

/// Configuration for one node role's RCA runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RcaConf {
    /// Registry key of the analysis graph topology to run
    pub analysis_graph: String,

    /// Locus tag scoping which subscriptions are relevant to this node
    pub locus: String,

    /// Bound on the network thread pool's task queue
    #[serde(default = "default_network_queue_length")]
    pub network_queue_length: usize,

    /// Bound on each vertex's inbound flow-unit buffer
    #[serde(default = "default_per_vertex_buffer_length")]
    pub per_vertex_buffer_length: usize,

    /// Registry key of the persistence layer
    #[serde(default = "default_persistence")]
    pub persistence: String,

    /// Period of the scheduler's evaluation loop
    #[serde(default = "default_eval_interval_ms")]
    pub eval_interval_ms: u64,

    /// Free-form tags consumed by graph builders
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

impl RcaConf {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        serde_json::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    pub fn eval_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.eval_interval_ms)
    }
}

/// Picks the RCA conf matching the node's current role.
pub trait ConfProvider: Send + Sync {
    fn pick_conf_for_role(&self, role: NodeRole) -> Result<Arc<RcaConf>, ConfigError>;
}

/// In-memory conf provider: explicit per-role confs plus a default.
///
/// The file-backed deployment loads each conf once at startup and registers
/// it here; the controller only ever goes through this provider.
pub struct StaticConfProvider {
    default_conf: Arc<RcaConf>,
    per_role: HashMap<NodeRole, Arc<RcaConf>>,
}

impl StaticConfProvider {
    pub fn new(default_conf: RcaConf) -> Self {
        Self {
            default_conf: Arc::new(default_conf),
            per_role: HashMap::new(),
        }
    }

    pub fn with_role_conf(mut self, role: NodeRole, conf: RcaConf) -> Self {
        self.per_role.insert(role, Arc::new(conf));
        self
    }

    /// Build a provider from conf files in a directory.
    ///
    /// `rca.conf` is the default; `rca_elected_coordinator.conf`, when
    /// present, overrides for the elected coordinator role.
    pub fn from_conf_dir(dir: &Path) -> Result<Self, ConfigError> {
        let default_conf = RcaConf::load(&dir.join("rca.conf"))?;
        let mut provider = StaticConfProvider::new(default_conf);

        let coordinator_path = dir.join("rca_elected_coordinator.conf");
        if coordinator_path.exists() {
            provider = provider.with_role_conf(
                NodeRole::ElectedCoordinator,
                RcaConf::load(&coordinator_path)?,
            );
        }
        Ok(provider)
    }
}

impl ConfProvider for StaticConfProvider {
    fn pick_conf_for_role(&self, role: NodeRole) -> Result<Arc<RcaConf>, ConfigError> {
        if role == NodeRole::Unknown {
            return Err(ConfigError::MissingRoleConf { role: role.to_string() });
        }
        Ok(self
            .per_role
            .get(&role)
            .cloned()
            .unwrap_or_else(|| self.default_conf.clone()))
    }
}
