//! Persistence layer for evaluation results.
//!
//! Constructed per configuration on every scheduler start via a factory keyed
//! by the conf's persistence kind; both the query surface and the engine
//! consume the same handle.

use crate::config::RcaConf;
use crate::error::{EvalError, StartError};
use crate::settings::Settings;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

pub const IN_MEMORY_PERSISTENCE: &str = "in-memory";
pub const FILE_PERSISTENCE: &str = "file";

/// Records and retrieves per-RCA evaluation results.
pub trait Persistable: Send + Sync {
    fn write_rca(&self, name: &str, value: serde_json::Value) -> Result<(), EvalError>;

    fn read_rca(&self, name: &str) -> Result<Option<serde_json::Value>, EvalError>;
}

/// Build the persistence layer named by the conf.
pub fn create(
    conf: &RcaConf,
    settings: &Settings,
) -> Result<Arc<dyn Persistable>, StartError> {
    match conf.persistence.as_str() {
        IN_MEMORY_PERSISTENCE => Ok(Arc::new(InMemoryPersistor::new())),
        FILE_PERSISTENCE => {
            let persistor = FilePersistor::open(
                settings.metrics_location.clone(),
                settings.cleanup_metrics_db_files,
            )
            .map_err(|e| StartError::Persistence { reason: e.to_string() })?;
            Ok(Arc::new(persistor))
        }
        other => Err(StartError::UnknownPersistence { kind: other.to_string() }),
    }
}

/// Keeps the latest value per RCA in memory.
#[derive(Default)]
pub struct InMemoryPersistor {
    values: Mutex<HashMap<String, serde_json::Value>>,
}

impl InMemoryPersistor {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Persistable for InMemoryPersistor {
    fn write_rca(&self, name: &str, value: serde_json::Value) -> Result<(), EvalError> {
        self.values.lock().insert(name.to_string(), value);
        Ok(())
    }

    fn read_rca(&self, name: &str) -> Result<Option<serde_json::Value>, EvalError> {
        Ok(self.values.lock().get(name).cloned())
    }
}

#[derive(Serialize)]
struct PersistedRecord<'a> {
    name: &'a str,
    value: &'a serde_json::Value,
    timestamp_ms: u64,
}

/// Appends results as JSON lines under the validated metrics location and
/// serves reads from an in-memory cache of the latest value per RCA.
pub struct FilePersistor {
    db_path: PathBuf,
    cleanup_on_drop: bool,
    latest: Mutex<HashMap<String, serde_json::Value>>,
}

impl FilePersistor {
    pub fn open(metrics_location: PathBuf, cleanup_on_drop: bool) -> Result<Self, std::io::Error> {
        let window_start = epoch_millis();
        let db_path = metrics_location.join(format!("rcadb_{}", window_start));
        // Create the file eagerly so an unusable location fails the start
        // attempt instead of the first write.
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&db_path)?;
        Ok(Self {
            db_path,
            cleanup_on_drop,
            latest: Mutex::new(HashMap::new()),
        })
    }

    pub fn db_path(&self) -> &PathBuf {
        &self.db_path
    }
}

impl Persistable for FilePersistor {
    fn write_rca(&self, name: &str, value: serde_json::Value) -> Result<(), EvalError> {
        let record = PersistedRecord {
            name,
            value: &value,
            timestamp_ms: epoch_millis(),
        };
        let line = serde_json::to_string(&record)
            .map_err(|e| EvalError::Persistence { reason: e.to_string() })?;

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.db_path)
            .map_err(|e| EvalError::Persistence { reason: e.to_string() })?;
        writeln!(file, "{}", line).map_err(|e| EvalError::Persistence { reason: e.to_string() })?;

        self.latest.lock().insert(name.to_string(), value);
        Ok(())
    }

    fn read_rca(&self, name: &str) -> Result<Option<serde_json::Value>, EvalError> {
        Ok(self.latest.lock().get(name).cloned())
    }
}

impl Drop for FilePersistor {
    fn drop(&mut self) {
        if self.cleanup_on_drop {
            let _ = std::fs::remove_file(&self.db_path);
        }
    }
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_roundtrip_keeps_latest() {
        let persistor = InMemoryPersistor::new();
        assert_eq!(persistor.read_rca("hot-shard").unwrap(), None);

        persistor.write_rca("hot-shard", serde_json::json!({"state": "unhealthy"})).unwrap();
        persistor.write_rca("hot-shard", serde_json::json!({"state": "healthy"})).unwrap();

        assert_eq!(
            persistor.read_rca("hot-shard").unwrap(),
            Some(serde_json::json!({"state": "healthy"}))
        );
    }

    #[test]
    fn test_file_persistor_appends_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let db_path;
        {
            let persistor = FilePersistor::open(dir.path().to_path_buf(), true).unwrap();
            db_path = persistor.db_path().clone();
            persistor.write_rca("hot-shard", serde_json::json!({"state": "unhealthy"})).unwrap();
            persistor.write_rca("old-gen", serde_json::json!({"state": "healthy"})).unwrap();

            let contents = std::fs::read_to_string(&db_path).unwrap();
            assert_eq!(contents.lines().count(), 2);
        }
        // Cleanup flag removes the db file on teardown
        assert!(!db_path.exists());
    }

    #[test]
    fn test_file_persistor_keeps_db_when_cleanup_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let db_path;
        {
            let persistor = FilePersistor::open(dir.path().to_path_buf(), false).unwrap();
            db_path = persistor.db_path().clone();
        }
        assert!(db_path.exists());
    }

    #[test]
    fn test_factory_rejects_unknown_kind() {
        let conf: RcaConf = serde_json::from_value(serde_json::json!({
            "analysis_graph": "default-graph",
            "locus": "data-node",
            "persistence": "sqlite"
        }))
        .unwrap();
        let settings = Settings::default();
        assert!(matches!(
            create(&conf, &settings),
            Err(StartError::UnknownPersistence { .. })
        ));
    }
}
