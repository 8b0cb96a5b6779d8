//! Error types for the RCA control plane.

use std::fmt;
use std::path::PathBuf;

/// Errors that can occur while loading settings or per-role configuration.
#[derive(Debug, Clone)]
pub enum ConfigError {
    /// Could not read a configuration file
    FileRead { path: PathBuf, reason: String },

    /// File was read but could not be parsed
    Parse { path: PathBuf, reason: String },

    /// The configured metrics location cannot be created or written to.
    /// This invalidates the whole configuration.
    UnusableMetricsLocation { path: PathBuf },

    /// No configuration registered for the given role
    MissingRoleConf { role: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::FileRead { path, reason } => {
                write!(f, "Failed to read config file {}: {}", path.display(), reason)
            }
            ConfigError::Parse { path, reason } => {
                write!(f, "Failed to parse config file {}: {}", path.display(), reason)
            }
            ConfigError::UnusableMetricsLocation { path } => {
                write!(f, "Metrics location {} is not a writable directory", path.display())
            }
            ConfigError::MissingRoleConf { role } => {
                write!(f, "No RCA configuration registered for role '{}'", role)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Errors that can abort one start attempt of the scheduler.
///
/// These are never fatal to the controller poll loop; the attempt is logged
/// and retried on the next eligible tick.
#[derive(Debug, Clone)]
pub enum StartError {
    /// The conf names an analysis graph that is not in the registry
    UnknownGraph { name: String },

    /// The conf names a persistence kind that is not in the registry
    UnknownPersistence { kind: String },

    /// Building the graph topology failed
    GraphConstruction { name: String, reason: String },

    /// Constructing the persistence layer failed
    Persistence { reason: String },

    /// Loading the threshold store failed
    Thresholds { reason: String },

    /// Per-role configuration could not be picked or was invalid
    Config(ConfigError),
}

impl fmt::Display for StartError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartError::UnknownGraph { name } => {
                write!(f, "Analysis graph '{}' is not registered", name)
            }
            StartError::UnknownPersistence { kind } => {
                write!(f, "Persistence kind '{}' is not registered", kind)
            }
            StartError::GraphConstruction { name, reason } => {
                write!(f, "Failed to build analysis graph '{}': {}", name, reason)
            }
            StartError::Persistence { reason } => {
                write!(f, "Failed to construct persistence layer: {}", reason)
            }
            StartError::Thresholds { reason } => {
                write!(f, "Failed to load threshold store: {}", reason)
            }
            StartError::Config(e) => write!(f, "Configuration error: {}", e),
        }
    }
}

impl std::error::Error for StartError {}

impl From<ConfigError> for StartError {
    fn from(e: ConfigError) -> Self {
        StartError::Config(e)
    }
}

/// Errors raised inside one graph-node evaluation cycle.
///
/// These never cross the vertex boundary; the scheduler-facing wrapper logs
/// them and counts an instrumentation event.
#[derive(Debug, Clone)]
pub enum EvalError {
    /// The upstream collation stage failed to produce its flow units
    Collation { reason: String },

    /// Persisting an evaluation result failed
    Persistence { reason: String },

    /// A registered listener reported a failure
    Listener { listener: String, reason: String },
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalError::Collation { reason } => write!(f, "Collation failed: {}", reason),
            EvalError::Persistence { reason } => write!(f, "Persistence failed: {}", reason),
            EvalError::Listener { listener, reason } => {
                write!(f, "Listener '{}' failed: {}", listener, reason)
            }
        }
    }
}

impl std::error::Error for EvalError {}
