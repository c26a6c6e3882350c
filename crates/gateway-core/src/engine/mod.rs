//! Engine: business logic built on [`crate::atoms`] (§4 Component Design).

pub mod adapters;
pub mod breaker;
pub mod budget;
pub mod classifier;
pub mod config;
pub mod dispatcher;
pub mod heartbeat;
pub mod ledger;
pub mod model_pool;
pub mod retry;
pub mod session_store;

pub use config::GatewayConfig;
pub use dispatcher::Dispatcher;
pub use heartbeat::{spawn_reaper_loop, CancellationSignal, HeartbeatMap};
pub use ledger::CostLedger;
pub use session_store::SessionStore;
