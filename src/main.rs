use clap::Parser;
use rcaflow::config::{ConfProvider, RcaConf, StaticConfProvider};
use rcaflow::controller::role::{NodeDetails, NodeRole, StaticRoleSource};
use rcaflow::controller::RcaController;
use rcaflow::net::LocalNet;
use rcaflow::publisher::actions::{Action, ActionListener, QueueCollator};
use rcaflow::publisher::Publisher;
use rcaflow::query::QueryContextRegistry;
use rcaflow::scheduler::{ConnectedComponent, GraphNode, GraphRegistry};
use rcaflow::settings::{ConfigStatus, Settings};
use rcaflow::stats::StatsCollector;
use slog::{error, info, o, warn, Drain, Logger};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;

const DEFAULT_GRAPH: &str = "default-graph";

#[derive(Parser, Debug)]
#[command(name = "rcaflow")]
#[command(about = "Root cause analysis control plane", long_about = None)]
struct Args {
    /// Path to the plugin settings properties file
    #[arg(short, long, default_value = "rcaflow.properties")]
    settings: PathBuf,

    /// Role this node starts under (data, coordinator, elected_coordinator)
    #[arg(short, long, default_value = "data")]
    role: String,

    /// Host address advertised to peers (e.g., 192.168.1.10:9650)
    #[arg(long, default_value = "127.0.0.1:9650")]
    host: String,
}

fn create_logger() -> Logger {
    let decorator = slog_term::PlainDecorator::new(std::io::stdout());
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    Logger::root(drain, o!())
}

fn parse_role(value: &str) -> NodeRole {
    match value.to_ascii_lowercase().as_str() {
        "data" => NodeRole::Data,
        "coordinator" => NodeRole::Coordinator,
        "elected_coordinator" => NodeRole::ElectedCoordinator,
        _ => NodeRole::Unknown,
    }
}

/// Listener that records published actions to the log. Stands in for the
/// remote execution surface in single-node deployments.
struct LogActionListener {
    logger: Logger,
}

impl ActionListener for LogActionListener {
    fn name(&self) -> &str {
        "log-listener"
    }

    fn action_published(&self, action: &dyn Action) -> Result<(), rcaflow::error::EvalError> {
        info!(self.logger, "Action accepted"; "action" => action.summary());
        Ok(())
    }
}

fn default_conf() -> RcaConf {
    RcaConf {
        analysis_graph: DEFAULT_GRAPH.to_string(),
        locus: "data-node".to_string(),
        network_queue_length: rcaflow::config::DEFAULT_NETWORK_QUEUE_LENGTH,
        per_vertex_buffer_length: rcaflow::config::DEFAULT_PER_VERTEX_BUFFER_LENGTH,
        persistence: "in-memory".to_string(),
        eval_interval_ms: rcaflow::config::DEFAULT_EVAL_INTERVAL_MS,
        tags: Default::default(),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logger = create_logger();
    let args = Args::parse();

    let config_status = ConfigStatus::new();
    let settings = Settings::load(&args.settings, &config_status, &logger);
    if !config_status.is_valid() {
        error!(logger, "Configuration unusable, refusing to start");
        return Err("configuration unusable".into());
    }

    let conf_provider: Arc<dyn ConfProvider> =
        match StaticConfProvider::from_conf_dir(&settings.rca_conf_dir) {
            Ok(provider) => Arc::new(provider),
            Err(e) => {
                warn!(logger, "No usable rca.conf, falling back to built-in defaults";
                    "conf_dir" => %settings.rca_conf_dir.display(),
                    "error" => %e
                );
                Arc::new(StaticConfProvider::new(default_conf()))
            }
        };

    let stats = Arc::new(StatsCollector::new());
    let collator = Arc::new(QueueCollator::new());

    let graph_registry = Arc::new(GraphRegistry::new());
    {
        let stats = stats.clone();
        let collator = collator.clone();
        let logger = logger.clone();
        graph_registry.register(DEFAULT_GRAPH, move |_conf| {
            let mut publisher = Publisher::new(
                collator.clone(),
                stats.clone(),
                logger.new(o!("component" => "publisher")),
            );
            publisher.add_action_listener(Arc::new(LogActionListener {
                logger: logger.new(o!("component" => "log-listener")),
            }));
            let nodes: Vec<Box<dyn GraphNode>> = vec![Box::new(publisher)];
            Ok(vec![ConnectedComponent::new("dampening", nodes)])
        });
    }

    let role_source = Arc::new(StaticRoleSource::new());
    role_source.set_details(Some(NodeDetails {
        role: parse_role(&args.role),
        host_address: args.host.clone(),
        is_elected_coordinator: None,
    }));

    let net = LocalNet::new();
    let controller = Arc::new(RcaController::new(
        settings,
        conf_provider,
        graph_registry,
        role_source,
        net.clone(),
        net,
        Arc::new(QueryContextRegistry::new(logger.new(o!("component" => "query-registry")))),
        stats,
        logger.new(o!("component" => "rca-controller")),
    ));

    // The controller only refreshes the role once a minute; seed it so an
    // enabled conf starts the runtime on the first tick.
    controller.runtime_state().set_current_role(parse_role(&args.role));

    let handle = controller.clone().spawn();
    info!(logger, "rcaflow running, press Ctrl+C to shut down");

    signal::ctrl_c().await?;

    handle.shutdown().await;
    controller.stop().await;
    info!(logger, "rcaflow stopped");
    Ok(())
}
