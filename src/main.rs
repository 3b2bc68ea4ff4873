use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use chroma_royale_server::config::{ServerConfig, SimulationConfig};
use chroma_royale_server::lobby::manager::RoomManager;
use chroma_royale_server::metrics::{self, Metrics};
use chroma_royale_server::net::transport::ArenaServer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let server_config = ServerConfig::load_or_default();
    init_logging(server_config.log_json);

    info!("chroma royale server v{}", env!("CARGO_PKG_VERSION"));

    let sim_config = SimulationConfig::load_or_default();
    info!(
        "listening on {}:{}, tick {} Hz, map radius {}, pool {}",
        server_config.bind_address,
        server_config.port,
        sim_config.tick_rate_hz,
        sim_config.map_radius,
        sim_config.max_entities,
    );

    let metrics = Arc::new(Metrics::new());

    let metrics_port: u16 = std::env::var("METRICS_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(9090);
    let metrics_handle = metrics.clone();
    tokio::spawn(async move {
        if let Err(e) = metrics::start_metrics_server(metrics_handle, metrics_port).await {
            error!("metrics server error: {e}");
        }
    });

    let rooms = Arc::new(RwLock::new(RoomManager::new(
        server_config.clone(),
        sim_config,
        metrics.clone(),
    )));

    let server = ArenaServer::new(server_config, rooms.clone(), metrics).await?;
    info!("certificate hash: {}", server.cert_hash());

    let shutdown = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
        info!("shutdown signal received");
    };

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("server error: {e:#}");
            }
        }
        _ = shutdown => {}
    }

    rooms.write().await.shutdown_all();
    info!("server stopped");
    Ok(())
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}
