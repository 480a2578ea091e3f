//! Creative Optimizer: ad creative selection and traffic optimization service.
//!
//! Main entry point that wires the stores, engine, control loop and HTTP server.

use anyhow::Context;
use clap::Parser;
use optimizer_api::ApiServer;
use optimizer_core::config::AppConfig;
use optimizer_core::event_bus::{spawn_delivery, ChannelSink, TracingSink};
use optimizer_core::store::{InMemoryCampaignStore, InMemoryEventStore, StoreFixtures};
use optimizer_core::SystemClock;
use optimizer_engine::{ControlLoop, CreativeEngine};
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "creative-optimizer")]
#[command(about = "Ad creative selection and traffic optimization service")]
#[command(version)]
struct Cli {
    /// TOML config file (environment variables still override it)
    #[arg(long, env = "CREATIVE_OPTIMIZER_CONFIG")]
    config: Option<String>,

    /// Node identifier (overrides config)
    #[arg(long, env = "CREATIVE_OPTIMIZER__NODE_ID")]
    node_id: Option<String>,

    /// HTTP port (overrides config)
    #[arg(long, env = "CREATIVE_OPTIMIZER__API__HTTP_PORT")]
    http_port: Option<u16>,

    /// JSON file of campaigns, creatives and events to seed the in-memory stores
    #[arg(long)]
    fixtures: Option<String>,

    /// Do not run the periodic rebalance/alert loop
    #[arg(long, default_value_t = false)]
    no_control_loop: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "creative_optimizer=info,optimizer_engine=info,tower_http=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("Creative Optimizer starting up");

    // Load configuration
    let mut config = AppConfig::load_from(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    // Apply CLI overrides
    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }
    if let Some(port) = cli.http_port {
        config.api.http_port = port;
    }
    if cli.no_control_loop {
        config.control_loop.enabled = false;
    }

    info!(
        node_id = %config.node_id,
        http_port = config.api.http_port,
        algorithm = config.bandit.default_algorithm.as_str(),
        control_loop = config.control_loop.enabled,
        "Configuration loaded"
    );

    let events = Arc::new(InMemoryEventStore::new());
    let campaigns = Arc::new(InMemoryCampaignStore::new());

    if let Some(path) = &cli.fixtures {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("reading fixtures from {path}"))?;
        let fixtures = StoreFixtures::from_json(&json)?;
        info!(
            campaigns = fixtures.campaigns.len(),
            creatives = fixtures.creatives.len(),
            events = fixtures.events.len(),
            "Seeding stores from fixtures"
        );
        fixtures.apply(&campaigns, &events);
    }

    // Alerts are queued off the evaluation path and logged by a delivery task
    let (sink, alert_receiver) = ChannelSink::new(config.alerts.notify_buffer.max(1));
    let delivery = spawn_delivery(alert_receiver, Arc::new(TracingSink));

    let engine = Arc::new(CreativeEngine::new(
        config.clone(),
        events,
        campaigns,
        Arc::new(sink),
        Arc::new(SystemClock),
    ));

    let api_server = ApiServer::new(config.clone(), engine.clone());

    // Start metrics exporter
    if let Err(e) = api_server.start_metrics().await {
        error!(error = %e, "Failed to start metrics exporter");
    }

    let control_loop = if config.control_loop.enabled {
        Some(ControlLoop::new(engine.clone(), config.control_loop.clone()).spawn())
    } else {
        info!("Control loop disabled");
        None
    };

    // Spawn cache maintenance task
    let engine_for_maintenance = engine.clone();
    let maintenance = tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
        loop {
            interval.tick().await;
            engine_for_maintenance.maintenance();
        }
    });

    info!("Creative Optimizer is ready to serve traffic");

    // Start HTTP server (blocks until shutdown)
    let result = api_server.start_http().await;

    maintenance.abort();
    delivery.abort();
    if let Some(handle) = control_loop {
        handle.abort();
    }
    info!("Creative Optimizer stopped");

    result
}
