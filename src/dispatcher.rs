//! Command dispatcher (C7): a flat `(action_name -> handler)` registry.
//!
//! Every entry pairs a `Service` with a small `encode` function that turns
//! JSON params into a wire payload. Token prefixing and response parsing are
//! handled once, centrally, in `dispatch` rather than duplicated per handler.

use std::collections::HashMap;
use std::time::Duration;

use once_cell::sync::Lazy;
use serde_json::Value;

use cp02_transport::parsers::try_parse_response;
use cp02_transport::protocol::Service;

use crate::error::DispatchError;
use crate::state::AppState;

const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

struct ActionSpec {
    service: Service,
    encode: fn(&Value) -> Result<Vec<u8>, DispatchError>,
}

fn get_u8(params: &Value, field: &str) -> Result<u8, DispatchError> {
    params
        .get(field)
        .and_then(Value::as_u64)
        .and_then(|v| u8::try_from(v).ok())
        .ok_or_else(|| DispatchError::BadArgument(format!("missing or invalid u8 field `{field}`")))
}

fn get_u32(params: &Value, field: &str) -> Result<u32, DispatchError> {
    params
        .get(field)
        .and_then(Value::as_u64)
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| DispatchError::BadArgument(format!("missing or invalid u32 field `{field}`")))
}

fn get_bool(params: &Value, field: &str) -> Result<bool, DispatchError> {
    params
        .get(field)
        .and_then(Value::as_bool)
        .ok_or_else(|| DispatchError::BadArgument(format!("missing or invalid bool field `{field}`")))
}

fn get_str<'a>(params: &'a Value, field: &str) -> Result<&'a str, DispatchError> {
    params
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| DispatchError::BadArgument(format!("missing or invalid string field `{field}`")))
}

fn no_params(_params: &Value) -> Result<Vec<u8>, DispatchError> {
    Ok(Vec::new())
}

fn port_only(params: &Value) -> Result<Vec<u8>, DispatchError> {
    Ok(vec![get_u8(params, "port")?])
}

fn turn_port(params: &Value) -> Result<Vec<u8>, DispatchError> {
    Ok(vec![get_u8(params, "port")?])
}

fn set_priority(params: &Value) -> Result<Vec<u8>, DispatchError> {
    Ok(vec![get_u8(params, "port")?, get_u8(params, "priority")?])
}

fn set_max_power(params: &Value) -> Result<Vec<u8>, DispatchError> {
    Ok(vec![get_u8(params, "port")?, get_u8(params, "watts")?])
}

/// `PowerConfig` wire layout: port, version(1), max_power(1), cooldown(4 LE),
/// apply_period(4 LE), temperature_mode(1).
fn set_port_config(params: &Value) -> Result<Vec<u8>, DispatchError> {
    let port = get_u8(params, "port")?;
    let max_power_w = get_u8(params, "max_power_w")?;
    let cooldown_period_s = get_u32(params, "cooldown_period_s")?;
    let apply_period_s = get_u32(params, "apply_period_s")?;
    let temperature_mode = get_u8(params, "temperature_mode")?;
    let mut payload = vec![port, 1, max_power_w];
    payload.extend_from_slice(&cooldown_period_s.to_le_bytes());
    payload.extend_from_slice(&apply_period_s.to_le_bytes());
    payload.push(temperature_mode);
    Ok(payload)
}

fn set_compatibility(params: &Value) -> Result<Vec<u8>, DispatchError> {
    let port = get_u8(params, "port")?;
    let mask = if let Some(preset) = params.get("preset").and_then(Value::as_str) {
        preset_mask(preset)?
    } else {
        get_u8(params, "mask")?
    };
    Ok(vec![port, mask])
}

fn preset_mask(name: &str) -> Result<u8, DispatchError> {
    use cp02_transport::parsers::CompatibilitySettings as Cs;
    Ok(match name {
        "native" => Cs::NATIVE.encode(),
        "huawei" => Cs::HUAWEI.encode(),
        "android" => Cs::ANDROID.encode(),
        "apple" => Cs::APPLE.encode(),
        "sleep" => Cs::SLEEP.encode(),
        "small_appliance" => Cs::SMALL_APPLIANCE.encode(),
        other => return Err(DispatchError::BadArgument(format!("unknown compatibility preset `{other}`"))),
    })
}

/// `ChargingStrategyStatus` wire layout: strategy(1), max_power(1),
/// cooldown(4 LE), apply_period(4 LE), temperature_mode(1).
fn set_strategy(params: &Value) -> Result<Vec<u8>, DispatchError> {
    let strategy = match get_str(params, "strategy")? {
        "slow" => 0u8,
        "static" => 1,
        "temporary" => 2,
        "usb_a" => 3,
        other => return Err(DispatchError::BadArgument(format!("unknown strategy `{other}`"))),
    };
    let max_power_w = get_u8(params, "max_power_w")?;
    let cooldown_period_s = get_u32(params, "cooldown_period_s")?;
    let apply_period_s = get_u32(params, "apply_period_s")?;
    let temperature_mode = get_u8(params, "temperature_mode")?;
    let mut payload = vec![strategy, max_power_w];
    payload.extend_from_slice(&cooldown_period_s.to_le_bytes());
    payload.extend_from_slice(&apply_period_s.to_le_bytes());
    payload.push(temperature_mode);
    Ok(payload)
}

fn set_temperature_mode(params: &Value) -> Result<Vec<u8>, DispatchError> {
    Ok(vec![get_u8(params, "mode")?])
}

fn set_brightness(params: &Value) -> Result<Vec<u8>, DispatchError> {
    Ok(vec![get_u8(params, "value")?])
}

fn set_display_mode(params: &Value) -> Result<Vec<u8>, DispatchError> {
    Ok(vec![get_u8(params, "mode")?])
}

fn set_display_flip(params: &Value) -> Result<Vec<u8>, DispatchError> {
    Ok(vec![get_bool(params, "flip")? as u8])
}

/// System preferences have no dedicated service code; they are packed into
/// `SetDisplayConfig`'s payload in a fixed field order (night-mode window,
/// language, LED mode, auto-off, screen saver).
fn set_preferences(params: &Value) -> Result<Vec<u8>, DispatchError> {
    Ok(vec![
        get_u8(params, "night_mode_start_hour")?,
        get_u8(params, "night_mode_end_hour")?,
        get_u8(params, "language")?,
        get_u8(params, "led_mode")?,
        get_u8(params, "auto_off_minutes")?,
        get_bool(params, "screen_saver")? as u8,
    ])
}

fn set_wifi_credentials(params: &Value) -> Result<Vec<u8>, DispatchError> {
    let ssid = get_str(params, "ssid")?;
    let password = get_str(params, "password")?;
    if ssid.len() > 255 || password.len() > 255 {
        return Err(DispatchError::BadArgument("ssid/password too long".into()));
    }
    let mut payload = vec![ssid.len() as u8];
    payload.extend_from_slice(ssid.as_bytes());
    payload.push(password.len() as u8);
    payload.extend_from_slice(password.as_bytes());
    Ok(payload)
}

/// `unbind` has no dedicated service code; it maps onto `SwitchDevice` with
/// a disable byte, the closest existing primitive for "detach this device
/// from its current owner".
fn unbind(_params: &Value) -> Result<Vec<u8>, DispatchError> {
    Ok(vec![0])
}

static REGISTRY: Lazy<HashMap<&'static str, ActionSpec>> = Lazy::new(|| {
    let mut m = HashMap::new();
    macro_rules! action {
        ($name:expr, $service:expr, $encode:expr) => {
            m.insert($name, ActionSpec { service: $service, encode: $encode });
        };
    }

    // Identity
    action!("get_model", Service::GetDeviceModel, no_params);
    action!("get_serial", Service::GetDeviceSerialNo, no_params);
    action!("get_uptime", Service::GetDeviceUptime, no_params);
    action!("get_fw_version", Service::GetApVersion, no_params);
    action!("get_bp_version", Service::GetBpVersion, no_params);
    action!("get_fpga_version", Service::GetFpgaVersion, no_params);
    action!("get_zrlib_version", Service::GetZrlibVersion, no_params);
    action!("get_ble_address", Service::GetDeviceBleAddr, no_params);

    // Port control
    action!("turn_on", Service::TurnOnPort, turn_port);
    action!("turn_off", Service::TurnOffPort, turn_port);
    action!("get_all_statistics", Service::GetAllPowerStatistics, no_params);
    action!("get_power_supply_status", Service::GetPowerSupplyStatus, no_params);
    action!("get_port_statistics", Service::GetPowerStatistics, port_only);
    action!("get_pd_status", Service::GetPortPdStatus, port_only);
    action!("get_priority", Service::GetPortPriority, port_only);
    action!("set_priority", Service::SetPortPriority, set_priority);
    action!("get_max_power", Service::GetStaticAllocator, port_only);
    action!("set_max_power", Service::SetStaticAllocator, set_max_power);
    action!("get_port_config", Service::GetPortConfig, port_only);
    action!("set_port_config", Service::SetPortConfig, set_port_config);
    action!("get_compatibility", Service::GetPortCompatibilitySettings, port_only);
    action!("set_compatibility", Service::SetPortCompatibilitySettings, set_compatibility);
    action!("get_historical_stats", Service::GetPowerHistoricalStats, port_only);

    // Power allocator
    action!("get_strategy", Service::GetChargingStrategy, no_params);
    action!("set_strategy", Service::SetChargingStrategy, set_strategy);
    action!("set_temperature_mode", Service::SetTemperatureMode, set_temperature_mode);

    // Display
    action!("get_brightness", Service::GetDisplayIntensity, no_params);
    action!("set_brightness", Service::SetDisplayIntensity, set_brightness);
    action!("get_display_mode", Service::GetDisplayMode, no_params);
    action!("set_display_mode", Service::SetDisplayMode, set_display_mode);
    action!("get_display_flip", Service::GetDisplayFlip, no_params);
    action!("set_display_flip", Service::SetDisplayFlip, set_display_flip);

    // System preferences
    action!("get_preferences", Service::GetDisplayState, no_params);
    action!("set_preferences", Service::SetDisplayConfig, set_preferences);

    // WiFi
    action!("get_wifi_status", Service::GetWifiStatus, no_params);
    action!("scan_wifi", Service::ScanWifi, no_params);
    action!("get_wifi_scan_result", Service::GetWifiScanResult, no_params);
    action!("set_wifi_credentials", Service::SetWifiSsidAndPassword, set_wifi_credentials);

    // OTA
    action!("start_ota", Service::PerformWifiOta, no_params);
    action!("get_ota_progress", Service::GetWifiOtaProgress, no_params);
    action!("confirm_ota", Service::ConfirmOta, no_params);

    // Device lifecycle
    action!("associate", Service::AssociateDevice, no_params);
    action!("unbind", Service::SwitchDevice, unbind);
    action!("factory_reset", Service::ResetDevice, no_params);
    action!("reboot", Service::RebootDevice, no_params);
    action!("ping_mqtt", Service::PingMqttTelemetry, no_params);
    action!("ping_http", Service::PingHttp, no_params);
    action!("echo_test", Service::BleEchoTest, no_params);
    action!("get_debug_log", Service::GetDebugLog, no_params);

    m
});

/// Stable catalog listing for client discovery.
pub fn list_actions() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = REGISTRY.keys().copied().collect();
    names.sort_unstable();
    names
}

/// Looks up `action`, checks preconditions, builds the wire payload, prefixes
/// the auth token when the service requires one, sends it over the session
/// and shapes the typed response as JSON.
pub async fn dispatch(state: &AppState, action: &str, params: Value) -> Result<Value, DispatchError> {
    let spec = REGISTRY.get(action).ok_or_else(|| DispatchError::UnknownAction(action.to_string()))?;

    let device_guard = state.device.read().await;
    let device = device_guard.as_ref().ok_or(DispatchError::NotConnected)?;

    let mut payload = (spec.encode)(&params)?;
    if spec.service.requires_token() {
        let token = device.token_manager.ensure().await?;
        payload.insert(0, token);
    }

    let frame = device.session.send(spec.service, &payload, COMMAND_TIMEOUT).await?;
    let parsed = try_parse_response(spec.service, &frame.payload)?;
    Ok(serde_json::to_value(parsed)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn list_actions_is_stable_and_sorted() {
        let actions = list_actions();
        assert!(actions.contains(&"turn_on"));
        assert!(actions.contains(&"get_pd_status"));
        assert!(actions.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn set_max_power_encodes_port_and_watts() {
        let params = json!({"port": 2, "watts": 30});
        assert_eq!(set_max_power(&params).unwrap(), vec![2, 30]);
    }

    #[test]
    fn set_compatibility_resolves_named_preset() {
        let params = json!({"port": 1, "preset": "apple"});
        let encoded = set_compatibility(&params).unwrap();
        assert_eq!(encoded[0], 1);
        use cp02_transport::parsers::CompatibilitySettings as Cs;
        assert_eq!(Cs::decode(encoded[1]), Cs::APPLE);
    }

    #[test]
    fn missing_required_field_is_bad_argument() {
        let params = json!({});
        assert!(matches!(port_only(&params), Err(DispatchError::BadArgument(_))));
    }

    #[test]
    fn unknown_strategy_name_is_rejected() {
        let params = json!({
            "strategy": "turbo",
            "max_power_w": 100,
            "cooldown_period_s": 5,
            "apply_period_s": 1,
            "temperature_mode": 0
        });
        assert!(matches!(set_strategy(&params), Err(DispatchError::BadArgument(_))));
    }

    #[tokio::test]
    async fn turn_on_then_get_power_supply_status_reflects_the_port_bit() {
        use async_trait::async_trait;
        use cp02_transport::{Error as TransportError, Session, TokenManager, TokenStore, Transport};
        use std::sync::Arc;
        use tokio::sync::{broadcast, Mutex as TokioMutex, RwLock};

        use crate::state::DeviceHandle;

        struct FakeStation {
            tx: broadcast::Sender<Vec<u8>>,
        }

        #[async_trait]
        impl Transport for FakeStation {
            async fn write(&self, data: &[u8]) -> Result<(), TransportError> {
                let mut response = data.to_vec();
                response[2] |= 0x80;
                if data[2] == Service::GetPowerSupplyStatus.to_u8() {
                    response.truncate(9);
                    response.push(0b0000_0100); // port 2 is on
                }
                let _ = self.tx.send(response);
                Ok(())
            }

            fn subscribe(&self) -> broadcast::Receiver<Vec<u8>> {
                self.tx.subscribe()
            }

            fn address(&self) -> &str {
                "AA:BB:CC:DD:EE:02"
            }

            async fn is_connected(&self) -> bool {
                true
            }

            async fn disconnect(&self) -> Result<(), TransportError> {
                Ok(())
            }
        }

        let (tx, _) = broadcast::channel(16);
        let session = Session::new(Arc::new(FakeStation { tx }));

        let dir = std::env::temp_dir().join(format!("cp02-dispatcher-test-{}", std::process::id()));
        let store = Arc::new(TokioMutex::new(TokenStore::open(dir.join("tokens.json")).unwrap()));
        store.lock().await.put("AA:BB:CC:DD:EE:02", 0x11).unwrap();
        let token_manager = Arc::new(TokenManager::new(session.clone(), store, Duration::from_secs(300)));

        let state = AppState {
            device: RwLock::new(Some(DeviceHandle { session, token_manager })),
            ..Default::default()
        };

        dispatch(&state, "turn_on", json!({"port": 2})).await.unwrap();
        let status = dispatch(&state, "get_power_supply_status", json!({})).await.unwrap();
        let mask = status["value"]["port_mask"].as_u64().unwrap();
        assert_ne!(mask & 0b0000_0100, 0, "bit 2 should be set after turning on port 2");

        std::fs::remove_dir_all(&dir).ok();
    }
}
