//! BLE transport, wire codec and session layer for CP02-series fast-charging
//! stations: frame codec (C1), typed response parsers (C2), persistent token
//! store (C3), session (C4), token manager (C5) and connection supervisor
//! (C6).

pub mod ble;
pub mod error;
pub mod frame;
pub mod parsers;
pub mod protocol;
pub mod session;
pub mod supervisor;
pub mod token_manager;
pub mod token_store;
pub mod transport;

pub use error::Error;
pub use frame::{decode, encode, Frame};
pub use protocol::{FastChargingProtocol, Service};
pub use session::Session;
pub use supervisor::{ConnectionEvent, DiscoveredDevice, Supervisor, SupervisorConfig};
pub use token_manager::TokenManager;
pub use token_store::TokenStore;
pub use transport::{BoxedTransport, Transport};
