//! Connection supervisor: scan, connect, track liveness, reconnect with
//! bounded exponential backoff.
//!
//! Scans for `DEVICE_NAME_PREFIX`-advertising peripherals via `btleplug`'s
//! `CentralEvent` stream, discovers GATT characteristics on connect, and
//! supervises reconnection after a drop.

use std::sync::Arc;
use std::time::Duration;

use btleplug::api::{Central, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral};
use tokio::sync::{broadcast, RwLock};
use tracing::{info, warn};

use crate::ble::BleTransport;
use crate::error::Error;
use crate::protocol::DEVICE_NAME_PREFIX;
use crate::session::Session;
use crate::token_manager::TokenManager;
use crate::token_store::TokenStore;

#[derive(Debug, Clone)]
pub struct DiscoveredDevice {
    pub address: String,
    pub name: String,
    pub rssi: Option<i16>,
}

#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    Connected { address: String },
    Disconnected { address: String },
    ReconnectFailed { address: String, attempts: u32 },
}

pub struct SupervisorConfig {
    pub max_reconnect_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub token_refresh_interval: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        SupervisorConfig {
            max_reconnect_attempts: 5,
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(30),
            token_refresh_interval: Duration::from_secs(300),
        }
    }
}

pub struct Supervisor {
    adapter: Adapter,
    config: SupervisorConfig,
    token_store: Arc<tokio::sync::Mutex<TokenStore>>,
    events: broadcast::Sender<ConnectionEvent>,
    last_address: RwLock<Option<String>>,
    permanently_disconnected: std::sync::atomic::AtomicBool,
}

impl Supervisor {
    pub async fn new(
        config: SupervisorConfig,
        token_store: Arc<tokio::sync::Mutex<TokenStore>>,
    ) -> Result<Self, Error> {
        let manager = Manager::new().await?;
        let adapters = manager.adapters().await?;
        let adapter = adapters
            .into_iter()
            .next()
            .ok_or_else(|| Error::BleError("no bluetooth adapter available".into()))?;
        let (events, _) = broadcast::channel(64);
        Ok(Supervisor {
            adapter,
            config,
            token_store,
            events,
            last_address: RwLock::new(None),
            permanently_disconnected: std::sync::atomic::AtomicBool::new(false),
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    /// Scan for `DEVICE_NAME_PREFIX`-advertising peripherals for `timeout`.
    pub async fn scan(&self, timeout: Duration) -> Result<Vec<DiscoveredDevice>, Error> {
        self.adapter.start_scan(ScanFilter::default()).await?;
        tokio::time::sleep(timeout).await;
        self.adapter.stop_scan().await?;

        let peripherals = self.adapter.peripherals().await?;
        let mut found = Vec::new();
        for peripheral in peripherals {
            if let Some(props) = peripheral.properties().await? {
                let name = props.local_name.unwrap_or_default();
                if name.starts_with(DEVICE_NAME_PREFIX) {
                    found.push(DiscoveredDevice {
                        address: peripheral.address().to_string(),
                        name,
                        rssi: props.rssi,
                    });
                }
            }
        }
        Ok(found)
    }

    /// Connect to `address`, discover GATT characteristics, and return a
    /// ready `Session` plus the `TokenManager` bound to it.
    pub async fn connect(&self, address: &str) -> Result<(Session, Arc<TokenManager>), Error> {
        let peripheral = self.find_peripheral(address).await?;
        let transport = BleTransport::connect(peripheral).await?;
        let session = Session::new(transport);
        let token_manager = Arc::new(TokenManager::new(
            session.clone(),
            self.token_store.clone(),
            self.config.token_refresh_interval,
        ));

        *self.last_address.write().await = Some(address.to_string());
        self.permanently_disconnected
            .store(false, std::sync::atomic::Ordering::SeqCst);
        let _ = self.events.send(ConnectionEvent::Connected {
            address: address.to_string(),
        });
        Ok((session, token_manager))
    }

    pub async fn disconnect(&self, session: &Session) -> Result<(), Error> {
        session.disconnect().await?;
        let _ = self.events.send(ConnectionEvent::Disconnected {
            address: session.address().to_string(),
        });
        Ok(())
    }

    /// Reconnect loop with bounded attempts and exponential backoff. Resets
    /// the attempt counter implicitly: each call starts a fresh count. On
    /// exhaustion the session is marked permanently disconnected and further
    /// calls return `NotConnected` until a fresh `connect`.
    pub async fn reconnect(&self) -> Result<(Session, Arc<TokenManager>), Error> {
        if self
            .permanently_disconnected
            .load(std::sync::atomic::Ordering::SeqCst)
        {
            return Err(Error::NotConnected);
        }

        let address = self
            .last_address
            .read()
            .await
            .clone()
            .ok_or(Error::NotConnected)?;

        let mut backoff = self.config.backoff_base;
        for attempt in 1..=self.config.max_reconnect_attempts {
            match self.connect(&address).await {
                Ok((session, token_manager)) => {
                    if let Err(e) = token_manager.ensure().await {
                        warn!(error = %e, "token revalidation after reconnect failed");
                    }
                    return Ok((session, token_manager));
                }
                Err(e) => {
                    warn!(attempt, error = %e, "reconnect attempt failed");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(self.config.backoff_max);
                }
            }
        }

        self.permanently_disconnected
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let _ = self.events.send(ConnectionEvent::ReconnectFailed {
            address,
            attempts: self.config.max_reconnect_attempts,
        });
        Err(Error::NotConnected)
    }

    async fn find_peripheral(&self, address: &str) -> Result<Peripheral, Error> {
        for peripheral in self.adapter.peripherals().await? {
            if peripheral.address().to_string() == address {
                return Ok(peripheral);
            }
        }
        Err(Error::BleError(format!("device {address} not found; scan first")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_until_capped() {
        let base = Duration::from_secs(1);
        let max = Duration::from_secs(10);
        let mut backoff = base;
        let mut seen = vec![backoff];
        for _ in 0..5 {
            backoff = (backoff * 2).min(max);
            seen.push(backoff);
        }
        assert_eq!(
            seen,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8),
                Duration::from_secs(10),
                Duration::from_secs(10),
            ]
        );
    }
}
