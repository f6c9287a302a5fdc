//! Multi-gateway aggregation: bus adapter (C9), gateway registry (C8) and
//! telemetry history store (C10).

pub mod bus;
pub mod error;
pub mod gateway_registry;
pub mod history_store;

pub use bus::{BusAdapter, BusConfig, CommandEnvelope, CommandResponse};
pub use error::Error;
pub use gateway_registry::{GatewayRecord, GatewayRegistry, PortData, RegistryEvent};
pub use history_store::{HistoryStore, HourlyPower, PowerStats};
