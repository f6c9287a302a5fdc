//! Gateway registry (C8): in-memory `gateway_id -> latest state` map with
//! heartbeat-derived liveness.
//!
//! `update_ports`/`update_device_info`/`update_heartbeat`/`update_status`
//! each fold an inbound report into the matching gateway's record and fan
//! the change out over a `tokio::sync::broadcast` channel to every
//! subscriber.

use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PortData {
    pub port_id: u32,
    pub state: u32,
    pub protocol: u32,
    pub voltage_mv: u32,
    pub current_ma: u32,
    pub power_w: f64,
    pub temperature: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayRecord {
    pub gateway_id: String,
    pub device_name: Option<String>,
    pub device_address: Option<String>,
    pub firmware_version: Option<String>,
    pub model: Option<String>,
    pub serial: Option<String>,
    pub uptime_seconds: u64,
    pub rssi: i32,
    /// Self-reported by the gateway. Prefer `online()` for liveness.
    pub connected: bool,
    pub last_heartbeat_epoch_ms: u64,
    pub ports: HashMap<u32, PortData>,
    pub total_power_w: f64,
    pub active_port_count: u32,
}

impl GatewayRecord {
    fn new(gateway_id: String) -> Self {
        GatewayRecord {
            gateway_id,
            device_name: None,
            device_address: None,
            firmware_version: None,
            model: None,
            serial: None,
            uptime_seconds: 0,
            rssi: 0,
            connected: false,
            last_heartbeat_epoch_ms: now_ms(),
            ports: HashMap::new(),
            total_power_w: 0.0,
            active_port_count: 0,
        }
    }

    /// Derived liveness: fresh as of `now`, independent of the gateway's own
    /// self-reported `connected` flag.
    pub fn online(&self, now_ms_value: u64, timeout: Duration) -> bool {
        now_ms_value.saturating_sub(self.last_heartbeat_epoch_ms) < timeout.as_millis() as u64
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum RegistryEvent {
    #[serde(rename = "ports")]
    Ports { gateway_id: String, record: GatewayRecord },
    #[serde(rename = "device_info")]
    DeviceInfo { gateway_id: String, record: GatewayRecord },
    #[serde(rename = "heartbeat")]
    Heartbeat { gateway_id: String, record: GatewayRecord },
    #[serde(rename = "status")]
    Status { gateway_id: String, record: GatewayRecord },
    #[serde(rename = "timeout")]
    Timeout { gateway_id: String, last_heartbeat_epoch_ms: u64 },
}

#[derive(Debug, Default, Deserialize)]
pub struct DeviceInfoUpdate {
    pub device_name: Option<String>,
    pub device_address: Option<String>,
    pub firmware_version: Option<String>,
    pub model: Option<String>,
    pub serial: Option<String>,
    pub uptime: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct HeartbeatUpdate {
    pub uptime: Option<u64>,
    pub rssi: Option<i32>,
    pub connected: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StatusUpdate {
    pub connected: Option<bool>,
    pub device_name: Option<String>,
    pub device_address: Option<String>,
}

pub struct GatewayRegistry {
    gateways: RwLock<HashMap<String, GatewayRecord>>,
    events: broadcast::Sender<RegistryEvent>,
    timeout: Duration,
}

impl GatewayRegistry {
    pub fn new(timeout: Duration) -> Self {
        let (events, _) = broadcast::channel(256);
        GatewayRegistry {
            gateways: RwLock::new(HashMap::new()),
            events,
            timeout,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    pub async fn get(&self, gateway_id: &str) -> Option<GatewayRecord> {
        self.gateways.read().await.get(gateway_id).cloned()
    }

    pub async fn list(&self) -> Vec<GatewayRecord> {
        self.gateways.read().await.values().cloned().collect()
    }

    pub async fn update_ports(&self, gateway_id: &str, ports: Vec<PortData>) {
        let mut gateways = self.gateways.write().await;
        let record = gateways
            .entry(gateway_id.to_string())
            .or_insert_with(|| GatewayRecord::new(gateway_id.to_string()));

        let mut total_power_w = 0.0;
        let mut active_port_count = 0;
        for port in ports {
            total_power_w += port.power_w;
            if port.current_ma > 0 {
                active_port_count += 1;
            }
            record.ports.insert(port.port_id, port);
        }
        record.total_power_w = (total_power_w * 100.0).round() / 100.0;
        record.active_port_count = active_port_count;
        record.connected = true;
        let _ = self.events.send(RegistryEvent::Ports {
            gateway_id: gateway_id.to_string(),
            record: record.clone(),
        });
    }

    pub async fn update_device_info(&self, gateway_id: &str, info: DeviceInfoUpdate) {
        let mut gateways = self.gateways.write().await;
        let record = gateways
            .entry(gateway_id.to_string())
            .or_insert_with(|| GatewayRecord::new(gateway_id.to_string()));

        if info.device_name.is_some() {
            record.device_name = info.device_name;
        }
        if info.device_address.is_some() {
            record.device_address = info.device_address;
        }
        if info.firmware_version.is_some() {
            record.firmware_version = info.firmware_version;
        }
        if info.model.is_some() {
            record.model = info.model;
        }
        if info.serial.is_some() {
            record.serial = info.serial;
        }
        if let Some(uptime) = info.uptime {
            record.uptime_seconds = uptime;
        }
        record.connected = true;
        let _ = self.events.send(RegistryEvent::DeviceInfo {
            gateway_id: gateway_id.to_string(),
            record: record.clone(),
        });
    }

    pub async fn update_heartbeat(&self, gateway_id: &str, heartbeat: HeartbeatUpdate) {
        let mut gateways = self.gateways.write().await;
        let record = gateways
            .entry(gateway_id.to_string())
            .or_insert_with(|| GatewayRecord::new(gateway_id.to_string()));

        record.last_heartbeat_epoch_ms = now_ms();
        if let Some(uptime) = heartbeat.uptime {
            record.uptime_seconds = uptime;
        }
        if let Some(rssi) = heartbeat.rssi {
            record.rssi = rssi;
        }
        record.connected = heartbeat.connected.unwrap_or(true);
        let _ = self.events.send(RegistryEvent::Heartbeat {
            gateway_id: gateway_id.to_string(),
            record: record.clone(),
        });
    }

    pub async fn update_status(&self, gateway_id: &str, status: StatusUpdate) {
        let mut gateways = self.gateways.write().await;
        let record = gateways
            .entry(gateway_id.to_string())
            .or_insert_with(|| GatewayRecord::new(gateway_id.to_string()));

        record.connected = status.connected.unwrap_or(false);
        if status.device_name.is_some() {
            record.device_name = status.device_name;
        }
        if status.device_address.is_some() {
            record.device_address = status.device_address;
        }
        let _ = self.events.send(RegistryEvent::Status {
            gateway_id: gateway_id.to_string(),
            record: record.clone(),
        });
    }

    /// Scan all gateways for heartbeat-timeout breaches, flipping `connected`
    /// to false and emitting a `timeout` event exactly once per breach.
    /// Intended to be called on a periodic interval (e.g. every 10s).
    pub async fn scan_timeouts(&self) {
        let now = now_ms();
        let mut gateways = self.gateways.write().await;
        for record in gateways.values_mut() {
            if record.connected && !record.online(now, self.timeout) {
                record.connected = false;
                let _ = self.events.send(RegistryEvent::Timeout {
                    gateway_id: record.gateway_id.clone(),
                    last_heartbeat_epoch_ms: record.last_heartbeat_epoch_ms,
                });
                info!(gateway_id = %record.gateway_id, "gateway timed out");
            }
        }
    }

    /// Runs `scan_timeouts` on a fixed cadence until cancelled.
    pub async fn run_timeout_scanner(self: std::sync::Arc<Self>, period: Duration) {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            self.scan_timeouts().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port(id: u32, current_ma: u32, power_w: f64) -> PortData {
        PortData {
            port_id: id,
            state: 1,
            protocol: 0,
            voltage_mv: 5000,
            current_ma,
            power_w,
            temperature: 30,
        }
    }

    #[tokio::test]
    async fn update_ports_recomputes_totals_and_active_count() {
        let registry = GatewayRegistry::new(Duration::from_secs(30));
        registry
            .update_ports("gw1", vec![port(1, 500, 2.5), port(2, 0, 0.0)])
            .await;
        let record = registry.get("gw1").await.unwrap();
        assert_eq!(record.active_port_count, 1);
        assert_eq!(record.total_power_w, 2.5);
        assert!(record.connected);
    }

    #[tokio::test]
    async fn timeout_scan_flips_connected_and_emits_once() {
        let registry = std::sync::Arc::new(GatewayRegistry::new(Duration::from_millis(10)));
        registry.update_heartbeat("gw1", HeartbeatUpdate::default()).await;
        let mut events = registry.subscribe();
        let _ = events.recv().await.unwrap(); // the heartbeat event itself

        tokio::time::sleep(Duration::from_millis(30)).await;
        registry.scan_timeouts().await;
        registry.scan_timeouts().await; // second scan must not re-emit

        let record = registry.get("gw1").await.unwrap();
        assert!(!record.connected);

        let event = events.recv().await.unwrap();
        assert!(matches!(event, RegistryEvent::Timeout { .. }));
        assert!(events.try_recv().is_err());
    }
}
