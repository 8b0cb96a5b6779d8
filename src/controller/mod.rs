//! Lifecycle controller for the RCA runtime.
//!
//! A single poll loop owns every start/stop/restart decision: it re-reads the
//! operator's enablement flag each tick, refreshes the node role once a
//! minute, and reconciles the scheduler against {enabled, role, state}. All
//! mutation of the runtime happens on this loop; every other task only reads.

pub mod role;
pub mod state;

use crate::config::ConfProvider;
use crate::net::flow_unit_store::ReceivedFlowUnitStore;
use crate::net::handlers::{PublishRequestHandler, SubscribeServerHandler};
use crate::net::pool::{NetworkThreadPool, SwappablePool, POOL_SHUTDOWN_TIMEOUT};
use crate::net::{NetClient, NetServer, NodeStateTracker, SubscriptionManager, WireHopper};
use crate::persistence;
use crate::query::{QueryContextRegistry, QueryHandler, QueryRcaRequestHandler, RCA_QUERY_PATH};
use crate::scheduler::{
    GraphRegistry, MetricsDbProvider, Queryable, RcaScheduler, RuntimeStats, SchedulerState,
    ThresholdStore,
};
use crate::settings::Settings;
use crate::stats::{self, StatsCollector};
use parking_lot::{Mutex, RwLock};
use role::{resolve_role, NodeRole, RoleSource};
use slog::{debug, error, info, o, Logger};
use state::RcaRuntimeState;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// File the operator writes `true`/`false` into to enable or disable RCA.
pub const RCA_ENABLED_CONF_FILE: &str = "rca_enabled.conf";

const ONE_MINUTE_MS: u64 = 60_000;

pub struct RcaController {
    settings: Settings,
    conf_provider: Arc<dyn ConfProvider>,
    graph_registry: Arc<GraphRegistry>,
    role_source: Arc<dyn RoleSource>,
    net_client: Arc<dyn NetClient>,
    net_server: Arc<dyn NetServer>,
    query_registry: Arc<QueryContextRegistry>,
    query_handler: Arc<QueryRcaRequestHandler>,
    subscriptions: Arc<SubscriptionManager>,
    node_state: Arc<NodeStateTracker>,
    network_pool: SwappablePool,
    flow_unit_store: Mutex<Option<Arc<ReceivedFlowUnitStore>>>,
    scheduler: RwLock<Option<Arc<RcaScheduler>>>,
    runtime_state: Arc<RcaRuntimeState>,
    runtime_stats: Arc<RuntimeStats>,
    stats: Arc<StatsCollector>,
    enabled_conf_path: PathBuf,
    poll_period: Duration,

    /// Ticks between role refreshes, so the role is checked about once a
    /// minute regardless of the poll period.
    role_check_periodicity: u64,
    logger: Logger,
}

impl RcaController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: Settings,
        conf_provider: Arc<dyn ConfProvider>,
        graph_registry: Arc<GraphRegistry>,
        role_source: Arc<dyn RoleSource>,
        net_client: Arc<dyn NetClient>,
        net_server: Arc<dyn NetServer>,
        query_registry: Arc<QueryContextRegistry>,
        stats: Arc<StatsCollector>,
        logger: Logger,
    ) -> Self {
        let poll_ms = settings.state_check_interval_ms.max(1);
        let enabled_conf_path = settings.rca_conf_dir.join(RCA_ENABLED_CONF_FILE);
        Self {
            settings,
            conf_provider,
            graph_registry,
            role_source,
            net_client,
            net_server,
            query_registry,
            query_handler: Arc::new(QueryRcaRequestHandler::new()),
            subscriptions: Arc::new(SubscriptionManager::new()),
            node_state: Arc::new(NodeStateTracker::new()),
            network_pool: SwappablePool::new(),
            flow_unit_store: Mutex::new(None),
            scheduler: RwLock::new(None),
            runtime_state: Arc::new(RcaRuntimeState::new()),
            runtime_stats: Arc::new(RuntimeStats::new()),
            stats,
            enabled_conf_path,
            poll_period: Duration::from_millis(poll_ms),
            role_check_periodicity: (ONE_MINUTE_MS / poll_ms).max(1),
            logger,
        }
    }

    pub fn runtime_state(&self) -> Arc<RcaRuntimeState> {
        self.runtime_state.clone()
    }

    pub fn runtime_stats(&self) -> Arc<RuntimeStats> {
        self.runtime_stats.clone()
    }

    /// The scheduler of the current runtime lifecycle, if one is live.
    pub fn scheduler(&self) -> Option<Arc<RcaScheduler>> {
        self.scheduler.read().clone()
    }

    /// Spawn the poll loop on its own task.
    pub fn spawn(self: Arc<Self>) -> RcaControllerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(self.run(shutdown_rx));
        RcaControllerHandle { shutdown_tx, handle }
    }

    /// The poll loop. Exiting the loop leaves a live scheduler running; only
    /// an operator disable (or process teardown) stops the engine.
    pub async fn run(self: Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) {
        info!(self.logger, "RCA controller started";
            "poll_period_ms" => self.poll_period.as_millis() as u64,
            "role_check_periodicity" => self.role_check_periodicity
        );

        let mut tick: u64 = 0;
        loop {
            tick += 1;
            let cycle_start = Instant::now();

            self.read_rca_enabled_from_conf().await;
            if self.runtime_state.rca_enabled() && tick % self.role_check_periodicity == 0 {
                tick = 0;
                self.refresh_node_role();
            }
            self.update_rca_state().await;

            let residual = self.poll_period.saturating_sub(cycle_start.elapsed());
            tokio::select! {
                _ = tokio::time::sleep(residual) => {}
                _ = shutdown_rx.changed() => {
                    info!(self.logger, "RCA controller loop exiting");
                    return;
                }
            }
        }
    }

    /// Re-read the operator's enablement flag. A missing file means the
    /// default (disabled); an unreadable file falls back to the default and
    /// is logged.
    async fn read_rca_enabled_from_conf(&self) {
        let enabled = match tokio::fs::read_to_string(&self.enabled_conf_path).await {
            Ok(contents) => contents
                .lines()
                .next()
                .map(|line| line.trim().eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => {
                error!(self.logger, "Couldn't read the RCA enablement conf, disabling";
                    "path" => %self.enabled_conf_path.display(),
                    "error" => %e
                );
                false
            }
        };
        self.runtime_state.set_rca_enabled(enabled);
    }

    /// Refresh the current role from cluster membership. Absent details keep
    /// the last-known role.
    fn refresh_node_role(&self) {
        let Some(details) = self.role_source.current_node() else {
            return;
        };
        let role = resolve_role(&details, self.role_source.as_ref());
        if role != self.runtime_state.current_role() {
            info!(self.logger, "Node role changed";
                "from" => %self.runtime_state.current_role(),
                "to" => %role
            );
            self.runtime_state.set_current_role(role);
        }
    }

    /// Reconcile the scheduler against {enabled, role, state}.
    ///
    /// Running and disabled: stop. Running under a stale role: restart.
    /// Not running, enabled, role known, and not stopped by a crash: start.
    pub async fn update_rca_state(&self) {
        let scheduler = self.scheduler.read().clone();

        if let Some(scheduler) = &scheduler {
            match scheduler.state() {
                SchedulerState::Started => {
                    if !self.runtime_state.rca_enabled() {
                        self.stop().await;
                        self.stats.increment(stats::RCA_STOPPED_BY_OPERATOR);
                    } else if scheduler.role() != self.runtime_state.current_role() {
                        self.restart().await;
                        self.stats.increment(stats::RCA_RESTARTED_BY_OPERATOR);
                    }
                }
                // NotStarted here means the spawned loop has not announced
                // itself yet; StoppedDueToException blocks restarts until the
                // operator intervenes. Neither warrants a new instance.
                SchedulerState::NotStarted | SchedulerState::StoppedDueToException => {}
            }
            return;
        }

        if self.runtime_state.rca_enabled()
            && self.runtime_state.current_role() != NodeRole::Unknown
        {
            self.start();
        }
    }

    /// One start attempt. Failure is never fatal; the next eligible tick
    /// retries with freshly read configuration.
    fn start(&self) {
        if let Err(e) = self.try_start() {
            error!(self.logger, "Couldn't build the RCA runtime, will retry"; "error" => %e);
        }
    }

    fn try_start(&self) -> Result<(), crate::error::StartError> {
        let role = self.runtime_state.current_role();
        let conf = self.conf_provider.pick_conf_for_role(role)?;
        self.subscriptions.set_current_locus(&conf.locus);

        let components = self.graph_registry.resolve(&conf)?;
        let data_source: Arc<dyn Queryable> = Arc::new(MetricsDbProvider::new());
        let thresholds = Arc::new(ThresholdStore::load(&self.settings.rca_conf_dir)?);
        let persistable = persistence::create(&conf, &self.settings)?;

        self.network_pool.swap(NetworkThreadPool::new(
            conf.network_queue_length,
            self.stats.clone(),
            self.logger.new(o!("component" => "net-pool")),
        ));

        self.query_handler.set_persistable(Some(persistable.clone()));
        self.query_registry.register(
            RCA_QUERY_PATH,
            self.query_handler.clone() as Arc<dyn QueryHandler>,
        );

        let store = Arc::new(ReceivedFlowUnitStore::new(
            conf.per_vertex_buffer_length,
            self.stats.clone(),
        ));
        *self.flow_unit_store.lock() = Some(store.clone());

        let hopper = WireHopper::new(
            self.node_state.clone(),
            self.net_client.clone(),
            self.subscriptions.clone(),
            self.network_pool.clone(),
            store.clone(),
        );

        let scheduler = Arc::new(RcaScheduler::new(
            components,
            data_source,
            conf,
            thresholds,
            persistable,
            hopper,
            self.runtime_stats.clone(),
            self.logger.new(o!("component" => "rca-scheduler")),
        ));

        self.net_server.set_send_data_handler(Arc::new(PublishRequestHandler::new(
            self.node_state.clone(),
            store,
            self.network_pool.clone(),
            self.logger.new(o!("component" => "publish-handler")),
        )));
        self.net_server.set_subscribe_handler(Arc::new(SubscribeServerHandler::new(
            self.subscriptions.clone(),
            self.network_pool.clone(),
            self.logger.new(o!("component" => "subscribe-handler")),
        )));

        scheduler.set_role(role);
        tokio::spawn(scheduler.clone().run());
        *self.scheduler.write() = Some(scheduler);

        info!(self.logger, "RCA scheduler starting"; "role" => %role);
        Ok(())
    }

    /// Tear the runtime down. Idempotent; calling with nothing running finds
    /// nothing to release.
    pub async fn stop(&self) {
        let scheduler = self.scheduler.write().take();
        if let Some(scheduler) = scheduler {
            scheduler.shutdown();
        }

        self.net_client.stop();
        self.net_server.stop();

        let store = self.flow_unit_store.lock().take();
        if let Some(store) = store {
            let drained = store.drain_all();
            if !drained.is_empty() {
                debug!(self.logger, "Dropped buffered flow units on stop";
                    "count" => drained.len());
            }
        }

        if let Some(pool) = self.network_pool.take() {
            pool.shutdown(POOL_SHUTDOWN_TIMEOUT).await;
        }

        self.query_handler.set_persistable(None);
        self.query_registry.deregister(RCA_QUERY_PATH);
        self.runtime_stats.reset();
    }

    async fn restart(&self) {
        self.stop().await;
        self.start();
        self.stats.increment(stats::RCA_SCHEDULER_RESTART);
        info!(self.logger, "RCA scheduler restarted";
            "role" => %self.runtime_state.current_role());
    }
}

/// Handle to a spawned controller loop, in charge of its shutdown.
pub struct RcaControllerHandle {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl RcaControllerHandle {
    /// Stop the poll loop and wait for it to exit. Does not stop a live
    /// scheduler; disable RCA through the conf first if that is wanted.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.handle.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RcaConf, StaticConfProvider};
    use crate::net::LocalNet;
    use crate::scheduler::{ConnectedComponent, GraphNode};
    use super::role::StaticRoleSource;

    fn test_logger() -> Logger {
        Logger::root(slog::Discard, o!())
    }

    fn test_conf(graph: &str) -> RcaConf {
        serde_json::from_value(serde_json::json!({
            "analysis_graph": graph,
            "locus": "data-node",
            "eval_interval_ms": 10,
        }))
        .unwrap()
    }

    struct IdleNode;

    impl GraphNode for IdleNode {
        fn name(&self) -> &str {
            "idle-node"
        }

        fn evaluate_locally(&mut self) {}
    }

    struct PanickingNode;

    impl GraphNode for PanickingNode {
        fn name(&self) -> &str {
            "panicking-node"
        }

        fn evaluate_locally(&mut self) {
            panic!("vertex blew up");
        }
    }

    fn controller_with_graph(dir: &std::path::Path, graph: &str) -> Arc<RcaController> {
        let registry = Arc::new(GraphRegistry::new());
        registry.register("idle-graph", |_conf| {
            Ok(vec![ConnectedComponent::new(
                "component-0",
                vec![Box::new(IdleNode)],
            )])
        });
        registry.register("panicking-graph", |_conf| {
            Ok(vec![ConnectedComponent::new(
                "component-0",
                vec![Box::new(PanickingNode)],
            )])
        });

        let mut settings = Settings::default();
        settings.rca_conf_dir = dir.to_path_buf();
        settings.state_check_interval_ms = 10;

        let net = LocalNet::new();
        Arc::new(RcaController::new(
            settings,
            Arc::new(StaticConfProvider::new(test_conf(graph))),
            registry,
            Arc::new(StaticRoleSource::new()),
            net.clone(),
            net,
            Arc::new(QueryContextRegistry::new(test_logger())),
            Arc::new(StatsCollector::new()),
            test_logger(),
        ))
    }

    async fn wait_for_started(controller: &RcaController) -> Arc<RcaScheduler> {
        for _ in 0..100 {
            if let Some(scheduler) = controller.scheduler() {
                if scheduler.state() == SchedulerState::Started {
                    return scheduler;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("scheduler never reached Started");
    }

    #[tokio::test]
    async fn test_start_requires_enabled_and_known_role() {
        let dir = tempfile::tempdir().unwrap();
        let controller = controller_with_graph(dir.path(), "idle-graph");

        // Neither flag nor role: no start
        controller.update_rca_state().await;
        assert!(controller.scheduler().is_none());

        // Enabled but role unknown: still no start
        controller.runtime_state.set_rca_enabled(true);
        controller.update_rca_state().await;
        assert!(controller.scheduler().is_none());

        controller.runtime_state.set_current_role(NodeRole::Data);
        controller.update_rca_state().await;
        let scheduler = wait_for_started(&controller).await;
        assert_eq!(scheduler.role(), NodeRole::Data);

        controller.stop().await;
    }

    #[tokio::test]
    async fn test_disable_stops_scheduler_and_counts() {
        let dir = tempfile::tempdir().unwrap();
        let controller = controller_with_graph(dir.path(), "idle-graph");
        controller.runtime_state.set_rca_enabled(true);
        controller.runtime_state.set_current_role(NodeRole::Data);
        controller.update_rca_state().await;
        wait_for_started(&controller).await;

        controller.runtime_state.set_rca_enabled(false);
        controller.update_rca_state().await;

        assert!(controller.scheduler().is_none());
        assert_eq!(controller.stats.counter(stats::RCA_STOPPED_BY_OPERATOR), 1);
        // Query surface is withdrawn with the runtime
        assert!(!controller.query_registry.is_registered(RCA_QUERY_PATH));
    }

    #[tokio::test]
    async fn test_role_change_restarts_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        let controller = controller_with_graph(dir.path(), "idle-graph");
        controller.runtime_state.set_rca_enabled(true);
        controller.runtime_state.set_current_role(NodeRole::Data);
        controller.update_rca_state().await;
        let first = wait_for_started(&controller).await;

        controller.runtime_state.set_current_role(NodeRole::ElectedCoordinator);
        controller.update_rca_state().await;
        let second = wait_for_started(&controller).await;

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(second.role(), NodeRole::ElectedCoordinator);
        assert_eq!(controller.stats.counter(stats::RCA_SCHEDULER_RESTART), 1);
        assert_eq!(controller.stats.counter(stats::RCA_RESTARTED_BY_OPERATOR), 1);

        // Same role again: no further restart
        controller.update_rca_state().await;
        assert_eq!(controller.stats.counter(stats::RCA_SCHEDULER_RESTART), 1);

        controller.stop().await;
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let controller = controller_with_graph(dir.path(), "idle-graph");

        controller.stop().await;
        controller.stop().await;
        assert!(controller.scheduler().is_none());
    }

    #[tokio::test]
    async fn test_failed_start_is_retried_next_tick() {
        let dir = tempfile::tempdir().unwrap();
        let controller = controller_with_graph(dir.path(), "missing-graph");
        controller.runtime_state.set_rca_enabled(true);
        controller.runtime_state.set_current_role(NodeRole::Data);

        controller.update_rca_state().await;
        assert!(controller.scheduler().is_none());

        // The operator fixes the conf (here: registers the missing graph);
        // the next tick's attempt succeeds.
        controller.graph_registry.register("missing-graph", |_conf| {
            Ok(vec![ConnectedComponent::new(
                "component-0",
                vec![Box::new(IdleNode)],
            )])
        });
        controller.update_rca_state().await;
        wait_for_started(&controller).await;

        controller.stop().await;
    }

    #[tokio::test]
    async fn test_crashed_scheduler_blocks_new_starts() {
        let dir = tempfile::tempdir().unwrap();
        let controller = controller_with_graph(dir.path(), "panicking-graph");
        controller.runtime_state.set_rca_enabled(true);
        controller.runtime_state.set_current_role(NodeRole::Data);
        controller.update_rca_state().await;

        let scheduler = controller.scheduler().expect("scheduler installed");
        for _ in 0..100 {
            if scheduler.state() == SchedulerState::StoppedDueToException {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(scheduler.state(), SchedulerState::StoppedDueToException);

        // Still enabled with a known role, but the crash gate holds
        controller.update_rca_state().await;
        let still = controller.scheduler().expect("crashed instance retained");
        assert!(Arc::ptr_eq(&scheduler, &still));
    }

    #[tokio::test]
    async fn test_enablement_read_from_conf_file() {
        let dir = tempfile::tempdir().unwrap();
        let controller = controller_with_graph(dir.path(), "idle-graph");

        // Missing file: default disabled
        controller.read_rca_enabled_from_conf().await;
        assert!(!controller.runtime_state.rca_enabled());

        let path = dir.path().join(RCA_ENABLED_CONF_FILE);
        std::fs::write(&path, "true\n").unwrap();
        controller.read_rca_enabled_from_conf().await;
        assert!(controller.runtime_state.rca_enabled());

        std::fs::write(&path, "junk\n").unwrap();
        controller.read_rca_enabled_from_conf().await;
        assert!(!controller.runtime_state.rca_enabled());
    }
}
