//! `btleplug`-backed `Transport` implementation: connects to a peripheral,
//! discovers the CP02 GATT service, and exposes write-without-response plus
//! a notification stream.

use std::sync::Arc;

use async_trait::async_trait;
use btleplug::api::{Central, Characteristic, Peripheral as _, WriteType};
use btleplug::platform::Peripheral;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::Error;
use crate::protocol::{GATT_RX_CHARACTERISTIC_UUID, GATT_TX_CHARACTERISTIC_UUID};
use crate::transport::Transport;

const NOTIFICATION_CHANNEL_CAPACITY: usize = 64;

pub struct BleTransport {
    peripheral: Peripheral,
    address: String,
    rx_characteristic: Characteristic,
    notifications: broadcast::Sender<Vec<u8>>,
}

impl BleTransport {
    /// Connect to `peripheral`, discover the CP02 GATT service and start
    /// forwarding TX-characteristic notifications onto a broadcast channel.
    pub async fn connect(peripheral: Peripheral) -> Result<Arc<Self>, Error> {
        let address = peripheral.address().to_string();

        if !peripheral.is_connected().await.unwrap_or(false) {
            peripheral.connect().await?;
        }
        peripheral.discover_services().await?;

        let characteristics = peripheral.characteristics();
        let tx_uuid = Uuid::parse_str(GATT_TX_CHARACTERISTIC_UUID)
            .map_err(|e| Error::BleError(e.to_string()))?;
        let rx_uuid = Uuid::parse_str(GATT_RX_CHARACTERISTIC_UUID)
            .map_err(|e| Error::BleError(e.to_string()))?;

        let tx_characteristic = characteristics
            .iter()
            .find(|c| c.uuid == tx_uuid)
            .cloned()
            .ok_or_else(|| Error::CharacteristicNotFound(GATT_TX_CHARACTERISTIC_UUID.into()))?;
        let rx_characteristic = characteristics
            .iter()
            .find(|c| c.uuid == rx_uuid)
            .cloned()
            .ok_or_else(|| Error::CharacteristicNotFound(GATT_RX_CHARACTERISTIC_UUID.into()))?;

        peripheral.subscribe(&tx_characteristic).await?;

        let (tx, _rx) = broadcast::channel(NOTIFICATION_CHANNEL_CAPACITY);
        let transport = Arc::new(BleTransport {
            peripheral: peripheral.clone(),
            address,
            rx_characteristic,
            notifications: tx.clone(),
        });

        let mut stream = peripheral.notifications().await?;
        let forward_tx = tx;
        let forward_uuid = tx_uuid;
        tokio::spawn(async move {
            use futures::StreamExt;
            while let Some(event) = stream.next().await {
                if event.uuid == forward_uuid {
                    debug!(bytes = event.value.len(), "ble notification");
                    if forward_tx.send(event.value).is_err() {
                        // No subscribers currently listening; not fatal.
                        warn!("dropped ble notification: no active subscriber");
                    }
                }
            }
        });

        Ok(transport)
    }
}

#[async_trait]
impl Transport for BleTransport {
    async fn write(&self, data: &[u8]) -> Result<(), Error> {
        self.peripheral
            .write(&self.rx_characteristic, data, WriteType::WithoutResponse)
            .await?;
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<Vec<u8>> {
        self.notifications.subscribe()
    }

    fn address(&self) -> &str {
        &self.address
    }

    async fn is_connected(&self) -> bool {
        self.peripheral.is_connected().await.unwrap_or(false)
    }

    async fn disconnect(&self) -> Result<(), Error> {
        self.peripheral.disconnect().await?;
        Ok(())
    }
}
