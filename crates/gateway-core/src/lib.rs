//! AI-model gateway request admission and dispatch core.

// ── Atoms (pure data, zero I/O) ────────────────────────────────────────
pub mod atoms;

// ── Engine (business logic built on atoms) ─────────────────────────────
pub mod engine;

use std::path::Path;
use std::sync::Arc;

use engine::config::GatewayConfig;
use engine::heartbeat::HeartbeatMap;
use engine::ledger::CostLedger;
use engine::session_store::SessionStore;
use engine::Dispatcher;

/// Owns every long-lived component the gateway needs: the cost ledger, the
/// session store, the heartbeat map, and the dispatcher that ties them
/// together. `gateway-server` builds one of these at startup and hands
/// `Arc<GatewayCore>` to the HTTP layer.
pub struct GatewayCore {
    pub dispatcher: Dispatcher,
    pub heartbeats: Arc<HeartbeatMap>,
}

impl GatewayCore {
    /// Opens (or creates) the ledger at `ledger_path`, builds an in-memory
    /// session store per `config.session`, and wires a fresh `Dispatcher`.
    pub fn new(config: GatewayConfig, ledger_path: &Path) -> Result<Self, atoms::error::GatewayError> {
        let ledger = CostLedger::open(ledger_path)?;
        let sessions = SessionStore::new(config.session.ttl_s);
        let heartbeats = Arc::new(HeartbeatMap::new());
        let dispatcher = Dispatcher::new(config, ledger, sessions, heartbeats.clone());
        Ok(Self { dispatcher, heartbeats })
    }

    /// In-memory ledger variant, for tests and local development without a
    /// durable store on disk.
    pub fn in_memory(config: GatewayConfig) -> Result<Self, atoms::error::GatewayError> {
        let ledger = CostLedger::open_in_memory()?;
        let sessions = SessionStore::new(config.session.ttl_s);
        let heartbeats = Arc::new(HeartbeatMap::new());
        let dispatcher = Dispatcher::new(config, ledger, sessions, heartbeats.clone());
        Ok(Self { dispatcher, heartbeats })
    }

    /// Spawns the Heartbeat Reaper's background cadence loop (§4.7).
    pub fn spawn_reaper(&self) -> tokio::task::JoinHandle<()> {
        let heartbeat_config = self.dispatcher.config().heartbeat.clone();
        engine::heartbeat::spawn_reaper_loop(self.heartbeats.clone(), heartbeat_config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_core_builds_with_default_config() {
        let core = GatewayCore::in_memory(GatewayConfig::default()).unwrap();
        assert_eq!(core.dispatcher.queue_depth(), 0);
    }
}
