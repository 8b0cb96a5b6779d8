//! The graph-evaluation engine, consumed by the controller as an opaque
//! start/stop/role-settable unit.
//!
//! One scheduler instance lives for exactly one runtime lifecycle: the
//! controller constructs it bound to {graph topology, data source, conf,
//! thresholds, persistence, wire hopper}, sets its role, spawns its loop, and
//! drops the reference again on stop.

pub mod graph;

pub use graph::{ConnectedComponent, GraphNode, GraphRegistry, MetricsDbProvider, Queryable, ThresholdStore};

use crate::config::RcaConf;
use crate::controller::role::NodeRole;
use crate::net::WireHopper;
use crate::persistence::Persistable;
use parking_lot::Mutex;
use slog::{error, info, Logger};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// Lifecycle state of the engine.
///
/// Written only by the scheduler's own loop (and its constructor); read by
/// the controller thread through an acquire load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SchedulerState {
    NotStarted = 0,
    Started = 1,
    StoppedDueToException = 2,
}

impl SchedulerState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => SchedulerState::Started,
            2 => SchedulerState::StoppedDueToException,
            _ => SchedulerState::NotStarted,
        }
    }
}

/// Per-run graph bookkeeping. Reset by the controller on every stop, unlike
/// the process-lifetime counters in [`crate::stats`].
#[derive(Default)]
pub struct RuntimeStats {
    cycles: AtomicU64,
    vertices_evaluated: AtomicU64,
}

impl RuntimeStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_cycle(&self, vertices: u64) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
        self.vertices_evaluated.fetch_add(vertices, Ordering::Relaxed);
    }

    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    pub fn vertices_evaluated(&self) -> u64 {
        self.vertices_evaluated.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.cycles.store(0, Ordering::Relaxed);
        self.vertices_evaluated.store(0, Ordering::Relaxed);
    }
}

pub struct RcaScheduler {
    components: Mutex<Vec<ConnectedComponent>>,
    _data_source: Arc<dyn Queryable>,
    conf: Arc<RcaConf>,
    _thresholds: Arc<ThresholdStore>,
    _persistable: Arc<dyn Persistable>,
    _hopper: WireHopper,
    state: AtomicU8,
    role: AtomicU8,
    runtime_stats: Arc<RuntimeStats>,
    shutdown_tx: watch::Sender<bool>,
    logger: Logger,
}

impl RcaScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        components: Vec<ConnectedComponent>,
        data_source: Arc<dyn Queryable>,
        conf: Arc<RcaConf>,
        thresholds: Arc<ThresholdStore>,
        persistable: Arc<dyn Persistable>,
        hopper: WireHopper,
        runtime_stats: Arc<RuntimeStats>,
        logger: Logger,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            components: Mutex::new(components),
            _data_source: data_source,
            conf,
            _thresholds: thresholds,
            _persistable: persistable,
            _hopper: hopper,
            state: AtomicU8::new(SchedulerState::NotStarted as u8),
            role: AtomicU8::new(NodeRole::Unknown as u8),
            runtime_stats,
            shutdown_tx,
            logger,
        }
    }

    pub fn state(&self) -> SchedulerState {
        SchedulerState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: SchedulerState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn role(&self) -> NodeRole {
        NodeRole::from_u8(self.role.load(Ordering::Acquire))
    }

    /// Set the role this scheduler runs under. Called by the controller
    /// before the evaluation loop is spawned.
    pub fn set_role(&self, role: NodeRole) {
        self.role.store(role as u8, Ordering::Release);
    }

    /// Evaluation loop. Spawned on its own task by the controller; runs until
    /// [`RcaScheduler::shutdown`] or an evaluation panic.
    pub async fn run(self: Arc<Self>) {
        self.set_state(SchedulerState::Started);
        info!(self.logger, "RCA scheduler started";
            "role" => ?self.role(),
            "eval_interval_ms" => self.conf.eval_interval_ms
        );

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        loop {
            // A shutdown sent before this task was first polled is already
            // the channel's seen value; changed() would never report it.
            if *shutdown_rx.borrow() {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(self.conf.eval_interval()) => {
                    let result = std::panic::catch_unwind(AssertUnwindSafe(|| self.evaluate_once()));
                    if result.is_err() {
                        error!(self.logger, "Evaluation cycle panicked, stopping scheduler");
                        self.set_state(SchedulerState::StoppedDueToException);
                        return;
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        self.set_state(SchedulerState::NotStarted);
        info!(self.logger, "RCA scheduler stopped");
    }

    fn evaluate_once(&self) {
        let mut components = self.components.lock();
        let mut vertices = 0u64;
        for component in components.iter_mut() {
            for node in component.nodes_mut() {
                node.evaluate_locally();
                vertices += 1;
            }
        }
        self.runtime_stats.record_cycle(vertices);
    }

    /// Request shutdown of the evaluation loop. Idempotent.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}
