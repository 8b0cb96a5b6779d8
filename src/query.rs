//! HTTP query surface registration.
//!
//! The HTTP server itself is an external collaborator; the controller only
//! registers and deregisters one context path as a side effect of start and
//! stop. Deregistering a path that is not present is tolerated.

use crate::error::EvalError;
use crate::persistence::Persistable;
use parking_lot::{Mutex, RwLock};
use slog::{debug, Logger};
use std::collections::HashMap;
use std::sync::Arc;

pub const RCA_QUERY_PATH: &str = "/_rcaflow/rca";

pub trait QueryHandler: Send + Sync {
    fn handle(&self, query: &str) -> Result<serde_json::Value, EvalError>;
}

/// Route table the external HTTP server dispatches through.
pub struct QueryContextRegistry {
    contexts: Mutex<HashMap<String, Arc<dyn QueryHandler>>>,
    logger: Logger,
}

impl QueryContextRegistry {
    pub fn new(logger: Logger) -> Self {
        Self {
            contexts: Mutex::new(HashMap::new()),
            logger,
        }
    }

    pub fn register(&self, path: &str, handler: Arc<dyn QueryHandler>) {
        self.contexts.lock().insert(path.to_string(), handler);
    }

    /// Remove a context. Absence is not an error.
    pub fn deregister(&self, path: &str) {
        if self.contexts.lock().remove(path).is_none() {
            debug!(self.logger, "Query context not found to remove"; "path" => path);
        }
    }

    pub fn is_registered(&self, path: &str) -> bool {
        self.contexts.lock().contains_key(path)
    }

    /// Dispatch a query to the handler registered at `path`.
    pub fn dispatch(&self, path: &str, query: &str) -> Option<Result<serde_json::Value, EvalError>> {
        let handler = self.contexts.lock().get(path).cloned();
        handler.map(|h| h.handle(query))
    }
}

/// Serves persisted RCA values. The persistence handle is replaced on every
/// scheduler start and cleared on stop.
pub struct QueryRcaRequestHandler {
    persistable: RwLock<Option<Arc<dyn Persistable>>>,
}

impl QueryRcaRequestHandler {
    pub fn new() -> Self {
        Self { persistable: RwLock::new(None) }
    }

    pub fn set_persistable(&self, persistable: Option<Arc<dyn Persistable>>) {
        *self.persistable.write() = persistable;
    }
}

impl Default for QueryRcaRequestHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryHandler for QueryRcaRequestHandler {
    fn handle(&self, query: &str) -> Result<serde_json::Value, EvalError> {
        let persistable = self.persistable.read().clone();
        let Some(persistable) = persistable else {
            return Err(EvalError::Persistence {
                reason: "RCA runtime is not running".to_string(),
            });
        };
        let value = persistable.read_rca(query)?;
        Ok(value.unwrap_or(serde_json::Value::Null))
    }
}
