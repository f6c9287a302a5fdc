//! Shared application state handed to every dispatcher action and every
//! client-interface connection.
//!
//! One state struct wrapping the device handle plus the gateway registry
//! (whose `subscribe()` feeds each websocket connection's push half),
//! constructed once in `main` and passed by `Arc` reference into every
//! handler.

use std::sync::Arc;

use cp02_aggregator::{BusAdapter, GatewayRegistry, HistoryStore};
use cp02_transport::{Session, Supervisor, TokenManager};
use tokio::sync::RwLock;

use crate::config::Config;

/// One directly-connected BLE device, if this process is running as an
/// adapter (as opposed to a pure aggregator fronting remote gateways).
pub struct DeviceHandle {
    pub session: Session,
    pub token_manager: Arc<TokenManager>,
}

#[derive(Default)]
pub struct AppState {
    pub config: Config,
    pub supervisor: Option<Arc<Supervisor>>,
    pub device: RwLock<Option<DeviceHandle>>,
    pub registry: Option<Arc<GatewayRegistry>>,
    pub history: Option<Arc<HistoryStore>>,
    pub bus: Option<Arc<BusAdapter>>,
}
