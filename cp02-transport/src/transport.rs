//! The `Transport` abstraction session/supervisor code is built on: a raw,
//! un-sequenced byte pipe plus a notification stream, narrowed to what a BLE
//! GATT link actually offers (write-without-response + notify).

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::Error;

/// A live link to one device's GATT characteristics. Implementations own the
/// underlying BLE connection; `Session` (see `session.rs`) layers framing,
/// sequencing and single-inflight request/response pairing on top.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Write a frame to the RX (write-without-response) characteristic.
    async fn write(&self, data: &[u8]) -> Result<(), Error>;

    /// Subscribe to raw notifications from the TX characteristic. Each
    /// subscriber gets its own receiver; frames are broadcast to all of them.
    fn subscribe(&self) -> broadcast::Receiver<Vec<u8>>;

    /// The device's BLE address, used as the token store key.
    fn address(&self) -> &str;

    async fn is_connected(&self) -> bool;

    async fn disconnect(&self) -> Result<(), Error>;
}

pub type BoxedTransport = std::sync::Arc<dyn Transport>;
