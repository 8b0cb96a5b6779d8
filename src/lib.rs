pub mod config;
pub mod controller;
pub mod error;
pub mod net;
pub mod persistence;
pub mod publisher;
pub mod query;
pub mod scheduler;
pub mod settings;
pub mod stats;

pub use config::{ConfProvider, RcaConf, StaticConfProvider};
pub use controller::role::{NodeDetails, NodeRole, RoleSource, StaticRoleSource};
pub use controller::state::RcaRuntimeState;
pub use controller::{RcaController, RcaControllerHandle, RCA_ENABLED_CONF_FILE};
pub use error::{ConfigError, EvalError, StartError};
pub use publisher::Publisher;
pub use scheduler::{
    ConnectedComponent, GraphNode, GraphRegistry, RcaScheduler, SchedulerState,
};
pub use settings::{ConfigStatus, Settings};
pub use stats::StatsCollector;
