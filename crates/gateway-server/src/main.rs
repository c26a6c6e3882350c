//! Standalone HTTP server for the AI-model gateway dispatch core.
//!
//! Loads `GatewayConfig`, builds the `GatewayCore` component graph, spawns
//! the Heartbeat Reaper's background cadence, and serves the `axum` app.

mod http;

use std::net::SocketAddr;
use std::sync::Arc;

use gateway_core::engine::config::GatewayConfig;
use gateway_core::GatewayCore;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = GatewayConfig::load().unwrap_or_else(|e| {
        log::warn!("failed to load config ({e}), falling back to defaults");
        GatewayConfig::default()
    });

    let ledger_path = std::env::var("AI_GATEWAY_LEDGER_PATH")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::data_dir().unwrap_or_else(|| std::path::PathBuf::from(".")).join("ai-gateway").join("ledger.db")
        });
    if let Some(parent) = ledger_path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            log::warn!("could not create ledger directory {}: {e}", parent.display());
        }
    }

    let core = Arc::new(
        GatewayCore::new(config, &ledger_path).expect("failed to initialize the gateway dispatch core"),
    );
    let _reaper = core.spawn_reaper();
    log::info!("heartbeat reaper started, ledger at {}", ledger_path.display());

    let app = http::build_router(core);

    let addr: SocketAddr = std::env::var("AI_GATEWAY_ADDR")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 8080)));

    log::info!("ai-gateway listening on {addr}");
    let listener = tokio::net::TcpListener::bind(addr).await.expect("failed to bind listen address");
    axum::serve(listener, app).await.expect("server error");
}
