use clap::Parser;
use log::info;
use recon_engine::gateway::MockBrokerGateway;
use recon_engine::pricing::StaticFairPrices;
use recon_engine::store::InMemoryStore;
use recon_engine::{Pipeline, SharedLimits};
use recon_server::config::ServerConfig;
use recon_server::scheduler::SchedulerContext;
use recon_server::ws::{self, AppState};
use recon_server::ConnectionRegistry;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "recon-server", about = "Order reconciliation monitor server")]
struct Args {
    /// Path to a config file (TOML/YAML/JSON); env vars RECON_* override.
    #[arg(long)]
    config: Option<String>,

    /// Override the listen address, e.g. 127.0.0.1:9000.
    #[arg(long)]
    bind: Option<String>,

    /// Override the reconciliation interval in seconds.
    #[arg(long)]
    tick_seconds: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    info!("=== Reconciliation Server Starting ===");

    let args = Args::parse();
    let mut config = ServerConfig::load(args.config.as_deref())?;
    if let Some(bind) = args.bind {
        config.bind = bind;
    }
    if let Some(tick) = args.tick_seconds {
        config.tick_seconds = tick;
    }

    // 1. Collaborators. The demo build wires the in-process gateway and
    // store; a deployment swaps these for real venue and database clients.
    let gateway = Arc::new(MockBrokerGateway::new());
    let store = Arc::new(InMemoryStore::new());
    let prices = Arc::new(StaticFairPrices::new());

    // 2. Pipeline with process-wide resource caps.
    let limits = SharedLimits::new(config.max_broker_calls, config.max_store_calls);
    let pipeline = Arc::new(Pipeline::new(
        gateway,
        store.clone(),
        prices,
        limits.clone(),
        config.pipeline_config(),
    ));

    // 3. Scheduler context and connection registry.
    let window = config.trading_window()?;
    let ctx = Arc::new(SchedulerContext {
        pipeline,
        store,
        limits,
        store_timeout: config.pipeline_config().store_timeout,
        window: window.clone(),
        tick: config.tick(),
    });
    let registry = ConnectionRegistry::new(ctx);

    // 4. HTTP/WebSocket surface.
    let app = ws::router(AppState {
        registry: registry.clone(),
        window,
    });

    let listener = tokio::net::TcpListener::bind(&config.bind).await?;
    info!("listening on {}", config.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    registry.shutdown();
    info!("=== Reconciliation Server Stopped ===");
    Ok(())
}
