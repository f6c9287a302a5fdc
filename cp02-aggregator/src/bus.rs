//! Bus adapter (C9): MQTT fan-in/fan-out with correlation-ID keyed
//! command/response futures.
//!
//! Inbound messages are parsed by topic and routed into the gateway
//! registry; outbound commands register a `oneshot::Sender` keyed by
//! `cmd_id` so the matching response (or a timeout) resolves exactly one
//! pending call.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, error, info, warn};

use crate::error::Error;
use crate::gateway_registry::{DeviceInfoUpdate, GatewayRegistry, HeartbeatUpdate, PortData, StatusUpdate};

#[derive(Debug, Clone, Serialize)]
pub struct CommandEnvelope {
    pub cmd_id: String,
    pub command: String,
    pub params: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommandResponse {
    pub cmd_id: String,
    #[serde(flatten)]
    pub body: Value,
}

pub struct BusConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub topic_prefix: String,
    pub keepalive: Duration,
    pub command_timeout: Duration,
    pub reconnect_backoff: Duration,
}

pub struct BusAdapter {
    client: AsyncClient,
    topic_prefix: String,
    command_timeout: Duration,
    pending: Arc<Mutex<HashMap<String, oneshot::Sender<Value>>>>,
    next_cmd_id: AtomicU64,
}

impl BusAdapter {
    /// Connects to the broker and spawns the event loop driving inbound
    /// message dispatch into `registry`. Returns the adapter handle once
    /// subscriptions are issued.
    pub async fn connect(config: BusConfig, registry: Arc<GatewayRegistry>) -> Result<Arc<Self>, Error> {
        let mut options = MqttOptions::new("cp02-aggregator", config.host.clone(), config.port);
        options.set_keep_alive(config.keepalive);
        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            options.set_credentials(user, pass);
        }

        let (client, eventloop) = AsyncClient::new(options, 64);
        let prefix = config.topic_prefix.clone();
        for kind in ["ports", "device_info", "heartbeat", "status", "cmd_response"] {
            client
                .subscribe(format!("{prefix}/+/{kind}"), QoS::AtLeastOnce)
                .await
                .map_err(|e| Error::BusError(e.to_string()))?;
        }
        info!(prefix = %prefix, "subscribed to gateway topics");

        let pending = Arc::new(Mutex::new(HashMap::new()));
        let adapter = Arc::new(BusAdapter {
            client,
            topic_prefix: config.topic_prefix,
            command_timeout: config.command_timeout,
            pending: pending.clone(),
            next_cmd_id: AtomicU64::new(1),
        });

        tokio::spawn(run_event_loop(eventloop, registry, pending, config.reconnect_backoff));

        Ok(adapter)
    }

    /// Publish a command to `gateway_id` and wait for the matching
    /// `cmd_response`. Returns `Timeout` if none arrives within the
    /// configured window; the pending entry is removed either way so a late
    /// response cannot leak into a later command.
    pub async fn send_command(
        &self,
        gateway_id: &str,
        command: &str,
        params: Value,
    ) -> Result<Value, Error> {
        let cmd_id = format!("cmd-{}", self.next_cmd_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(cmd_id.clone(), tx);

        let envelope = CommandEnvelope {
            cmd_id: cmd_id.clone(),
            command: command.to_string(),
            params,
        };
        let topic = format!("{}/{}/cmd", self.topic_prefix, gateway_id);
        let payload = serde_json::to_vec(&envelope)?;
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| Error::BusError(e.to_string()))?;

        match tokio::time::timeout(self.command_timeout, rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(Error::Timeout),
            Err(_) => {
                self.pending.lock().await.remove(&cmd_id);
                Err(Error::Timeout)
            }
        }
    }
}

async fn run_event_loop(
    mut eventloop: EventLoop,
    registry: Arc<GatewayRegistry>,
    pending: Arc<Mutex<HashMap<String, oneshot::Sender<Value>>>>,
    reconnect_backoff: Duration,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                handle_message(&publish.topic, &publish.payload, &registry, &pending).await;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "mqtt event loop error, reconnecting");
                tokio::time::sleep(reconnect_backoff).await;
            }
        }
    }
}

async fn handle_message(
    topic: &str,
    payload: &[u8],
    registry: &GatewayRegistry,
    pending: &Mutex<HashMap<String, oneshot::Sender<Value>>>,
) {
    let parts: Vec<&str> = topic.split('/').collect();
    let [_, gateway_id, kind] = parts[..] else {
        debug!(topic, "ignoring message on unrecognized topic shape");
        return;
    };

    let value: Value = match serde_json::from_slice(payload) {
        Ok(v) => v,
        Err(e) => {
            warn!(topic, error = %e, "dropping unparseable message");
            return;
        }
    };

    match kind {
        "ports" => {
            let ports: Vec<PortData> = serde_json::from_value(value).unwrap_or_default();
            registry.update_ports(gateway_id, ports).await;
        }
        "device_info" => {
            let info: DeviceInfoUpdate = serde_json::from_value(value).unwrap_or_default();
            registry.update_device_info(gateway_id, info).await;
        }
        "heartbeat" => {
            let hb: HeartbeatUpdate = serde_json::from_value(value).unwrap_or_default();
            registry.update_heartbeat(gateway_id, hb).await;
        }
        "status" => {
            let status: StatusUpdate = serde_json::from_value(value).unwrap_or_default();
            registry.update_status(gateway_id, status).await;
        }
        "cmd_response" => {
            if let Some(cmd_id) = value.get("cmd_id").and_then(Value::as_str) {
                if let Some(sender) = pending.lock().await.remove(cmd_id) {
                    let _ = sender.send(value);
                } else {
                    debug!(cmd_id, "late or unknown cmd_response discarded");
                }
            } else {
                error!(topic, "cmd_response missing cmd_id");
            }
        }
        other => debug!(kind = other, "ignoring unrecognized message kind"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn handle_message_routes_ports_update() {
        let registry = GatewayRegistry::new(Duration::from_secs(30));
        let pending = Mutex::new(HashMap::new());
        let payload = serde_json::to_vec(&serde_json::json!([
            {"port_id": 1, "state": 1, "protocol": 0, "voltage_mv": 5000, "current_ma": 500, "power_w": 2.5, "temperature": 28}
        ]))
        .unwrap();

        handle_message("cp02/gw1/ports", &payload, &registry, &pending).await;
        let record = registry.get("gw1").await.unwrap();
        assert_eq!(record.active_port_count, 1);
    }

    #[tokio::test]
    async fn late_cmd_response_is_discarded_not_leaked() {
        let registry = GatewayRegistry::new(Duration::from_secs(30));
        let pending: Mutex<HashMap<String, oneshot::Sender<Value>>> = Mutex::new(HashMap::new());
        // no entry registered for "cmd-999" -> should be silently discarded
        let payload = serde_json::to_vec(&serde_json::json!({"cmd_id": "cmd-999", "success": true})).unwrap();
        handle_message("cp02/gw1/cmd_response", &payload, &registry, &pending).await;
        assert!(pending.lock().await.is_empty());
    }
}
