//! Typed response parsers.
//!
//! Every parser is defensive on length: a payload shorter than a field's
//! offset requires yields `0` for that field rather than an error or a panic.
//! The `byte`/`u16_le` helpers make an out-of-bounds read structurally
//! impossible instead of relying on each parser to bounds-check itself.

use crate::protocol::{FastChargingProtocol, Service};

fn byte(payload: &[u8], idx: usize) -> u8 {
    payload.get(idx).copied().unwrap_or(0)
}

fn u16_le(payload: &[u8], idx: usize) -> u16 {
    u16::from_le_bytes([byte(payload, idx), byte(payload, idx + 1)])
}

fn u32_le(payload: &[u8], idx: usize) -> u32 {
    u32::from_le_bytes([
        byte(payload, idx),
        byte(payload, idx + 1),
        byte(payload, idx + 2),
        byte(payload, idx + 3),
    ])
}

#[derive(thiserror::Error, Debug)]
pub enum ParseError {
    #[error("payload empty")]
    Empty,
    #[error("unexpected power config version: {0}")]
    BadPowerConfigVersion(u8),
}

/// Single-port telemetry: 8 bytes, scale factors fixed by the protocol.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct PortStatistics {
    pub fast_charging_protocol: FastChargingProtocol,
    pub voltage_v: f32,
    pub current_a: f32,
    pub power_w: f32,
    pub temperature_c: u8,
    pub last_full_capacity_wh: f32,
    pub present_capacity_wh: f32,
}

impl PortStatistics {
    pub const LEN: usize = 8;

    pub fn parse(payload: &[u8]) -> Self {
        let fc_protocol = FastChargingProtocol::from_u8(byte(payload, 0));
        let amperage_raw = byte(payload, 1);
        let voltage_raw = byte(payload, 2);
        let temperature_c = byte(payload, 3);
        let voltage_v = voltage_raw as f32 / 8.0;
        let current_a = amperage_raw as f32 / 32.0;
        let last_full_capacity_wh = u16_le(payload, 4) as f32 / 10.0;
        let present_capacity_wh = u16_le(payload, 6) as f32 / 10.0;
        PortStatistics {
            fast_charging_protocol: fc_protocol,
            voltage_v,
            current_a,
            power_w: voltage_v * current_a,
            temperature_c,
            last_full_capacity_wh,
            present_capacity_wh,
        }
    }
}

/// All-port telemetry: optional leading status byte, then N 8-byte chunks.
pub fn parse_all_port_statistics(payload: &[u8]) -> Vec<PortStatistics> {
    let body = if payload.first() == Some(&0x00) {
        &payload[1.min(payload.len())..]
    } else {
        payload
    };
    body.chunks(PortStatistics::LEN)
        .filter(|chunk| !chunk.is_empty())
        .map(PortStatistics::parse)
        .collect()
}

/// PD revision negotiated on a port, as observed in `PortPdStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum PdRevision {
    Pd2_0,
    Pd3_0,
    Pd3_1,
    Reserved,
}

impl PdRevision {
    fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0 => PdRevision::Pd2_0,
            1 => PdRevision::Pd3_0,
            2 => PdRevision::Pd3_1,
            _ => PdRevision::Reserved,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum CableLengthBucket {
    LessThan1m,
    About1m,
    About2m,
    About3m,
    MoreThan3m,
    Unknown(u8),
}

impl CableLengthBucket {
    fn from_bits(bits: u8) -> Self {
        match bits & 0b1111 {
            0 => CableLengthBucket::LessThan1m,
            1 => CableLengthBucket::About1m,
            2 => CableLengthBucket::About2m,
            3 => CableLengthBucket::About3m,
            4 => CableLengthBucket::MoreThan3m,
            other => CableLengthBucket::Unknown(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum BatteryChargingState {
    NotCharging,
    Charging,
    Discharging,
    Unknown(u8),
}

impl BatteryChargingState {
    fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0 => BatteryChargingState::NotCharging,
            1 => BatteryChargingState::Charging,
            2 => BatteryChargingState::Discharging,
            other => BatteryChargingState::Unknown(other),
        }
    }
}

/// Variable-length PD status, up to 40 bytes. Fields past the payload's
/// length read as zero rather than erroring.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct PortPdStatus {
    pub battery_vid: u16,
    pub battery_pid: u16,
    pub last_full_capacity_wh: f32,
    pub present_capacity_wh: f32,
    pub pd_revision: PdRevision,
    pub cable_phy_type_active: bool,
    pub cable_length: CableLengthBucket,
    pub cable_vid: u16,
    pub cable_pid: u16,
    pub usb_speed: u8,
    pub battery_charging_state: BatteryChargingState,
    pub status_temperature_c: u8,
    pub operating_current_a: f32,
    pub operating_voltage_v: f32,
}

impl PortPdStatus {
    pub const MAX_LEN: usize = 40;

    pub fn parse(payload: &[u8]) -> Self {
        let cable_flags = byte(payload, 10);
        let speed_state = byte(payload, 9);
        let current_raw = u16_le(payload, 34) & 0x03FF; // 10-bit field
        let voltage_raw = u16_le(payload, 37) & 0x7FFF; // 15-bit field

        PortPdStatus {
            battery_vid: u16_le(payload, 0),
            battery_pid: u16_le(payload, 2),
            last_full_capacity_wh: u16_le(payload, 4) as f32 / 10.0,
            present_capacity_wh: u16_le(payload, 6) as f32 / 10.0,
            pd_revision: PdRevision::from_bits(cable_flags),
            cable_phy_type_active: (cable_flags >> 2) & 0b1 != 0,
            cable_length: CableLengthBucket::from_bits(cable_flags >> 3),
            cable_vid: u16_le(payload, 11),
            cable_pid: u16_le(payload, 13),
            usb_speed: speed_state & 0b111,
            battery_charging_state: BatteryChargingState::from_bits(speed_state >> 3),
            status_temperature_c: byte(payload, 33),
            operating_current_a: current_raw as f32 / 100.0, // LSB units of 10 mA
            operating_voltage_v: voltage_raw as f32 / 100.0,  // LSB units of 10 mV
        }
    }
}

/// Historical power sample: 4 bytes `[voltage_raw, amperage_raw, temperature, vin_raw]`.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct PowerHistoricalSample {
    pub voltage_v: f32,
    pub current_a: f32,
    pub temperature_c: u8,
    pub input_voltage_v: f32,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct PowerHistoricalStats {
    pub port_id: u8,
    pub samples: Vec<PowerHistoricalSample>,
}

impl PowerHistoricalStats {
    pub fn parse(payload: &[u8]) -> Self {
        let port_id = byte(payload, 0);
        let body = if payload.is_empty() { payload } else { &payload[1..] };
        let samples = body
            .chunks(4)
            .filter(|chunk| !chunk.is_empty())
            .map(|chunk| PowerHistoricalSample {
                voltage_v: chunk.first().copied().unwrap_or(0) as f32 / 8.0,
                current_a: chunk.get(1).copied().unwrap_or(0) as f32 / 32.0,
                temperature_c: chunk.get(2).copied().unwrap_or(0),
                input_voltage_v: chunk.get(3).copied().unwrap_or(0) as f32 / 8.0,
            })
            .collect();
        PowerHistoricalStats { port_id, samples }
    }
}

/// Charging strategy mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum ChargingStrategy {
    Slow,
    Static,
    Temporary,
    UsbA,
    Unknown(u8),
}

impl ChargingStrategy {
    pub fn from_u8(b: u8) -> Self {
        match b {
            0 => ChargingStrategy::Slow,
            1 => ChargingStrategy::Static,
            2 => ChargingStrategy::Temporary,
            3 => ChargingStrategy::UsbA,
            other => ChargingStrategy::Unknown(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum TemperatureMode {
    PowerPriority,
    TemperaturePriority,
    Unknown(u8),
}

impl TemperatureMode {
    pub fn from_u8(b: u8) -> Self {
        match b {
            0 => TemperatureMode::PowerPriority,
            1 => TemperatureMode::TemperaturePriority,
            other => TemperatureMode::Unknown(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct ChargingStrategyStatus {
    pub strategy: ChargingStrategy,
    pub max_power_w: u8,
    pub cooldown_period_s: u32,
    pub apply_period_s: u32,
    pub temperature_mode: TemperatureMode,
}

impl ChargingStrategyStatus {
    pub fn parse(payload: &[u8]) -> Self {
        ChargingStrategyStatus {
            strategy: ChargingStrategy::from_u8(byte(payload, 0)),
            max_power_w: byte(payload, 1),
            cooldown_period_s: u32_le(payload, 2),
            apply_period_s: u32_le(payload, 6),
            temperature_mode: TemperatureMode::from_u8(byte(payload, 10)),
        }
    }
}

/// `PowerConfig`: version(1) + max_power(1) + cooldown_period(4, LE) +
/// apply_period(4, LE) + temperature_mode(1) = 11 bytes minimum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct PowerConfig {
    pub version: u8,
    pub max_power_w: u8,
    pub cooldown_period_s: u32,
    pub apply_period_s: u32,
    pub temperature_mode: TemperatureMode,
}

impl PowerConfig {
    pub const MIN_LEN: usize = 11;

    pub fn parse(payload: &[u8]) -> Result<Self, ParseError> {
        if payload.is_empty() {
            return Err(ParseError::Empty);
        }
        let version = byte(payload, 0);
        if version != 1 {
            return Err(ParseError::BadPowerConfigVersion(version));
        }
        Ok(PowerConfig {
            version,
            max_power_w: byte(payload, 1),
            cooldown_period_s: u32_le(payload, 2),
            apply_period_s: u32_le(payload, 6),
            temperature_mode: TemperatureMode::from_u8(byte(payload, 10)),
        })
    }

    pub fn default_unconfigured() -> Self {
        PowerConfig {
            version: 1,
            max_power_w: 240,
            cooldown_period_s: 5,
            apply_period_s: 1,
            temperature_mode: TemperatureMode::PowerPriority,
        }
    }
}

/// 5-bit legacy-protocol compatibility mask: bit0=TFCP, bit1=FCP, bit2=UFCS,
/// bit3=HV_SCP, bit4=LV_SCP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub struct CompatibilitySettings {
    pub tfcp: bool,
    pub fcp: bool,
    pub ufcs: bool,
    pub hv_scp: bool,
    pub lv_scp: bool,
}

impl CompatibilitySettings {
    pub fn decode(b: u8) -> Self {
        CompatibilitySettings {
            tfcp: b & 0b0_0001 != 0,
            fcp: b & 0b0_0010 != 0,
            ufcs: b & 0b0_0100 != 0,
            hv_scp: b & 0b0_1000 != 0,
            lv_scp: b & 0b1_0000 != 0,
        }
    }

    pub fn encode(self) -> u8 {
        (self.tfcp as u8)
            | ((self.fcp as u8) << 1)
            | ((self.ufcs as u8) << 2)
            | ((self.hv_scp as u8) << 3)
            | ((self.lv_scp as u8) << 4)
    }

    pub fn parse(payload: &[u8]) -> Self {
        Self::decode(byte(payload, 0))
    }

    /// All legacy protocols accepted.
    pub const NATIVE: Self = CompatibilitySettings {
        tfcp: true,
        fcp: true,
        ufcs: true,
        hv_scp: true,
        lv_scp: true,
    };
    /// No TFCP, everything else accepted.
    pub const HUAWEI: Self = CompatibilitySettings {
        tfcp: false,
        fcp: true,
        ufcs: true,
        hv_scp: true,
        lv_scp: true,
    };
    /// UFCS + both SCP variants, no TFCP/FCP.
    pub const ANDROID: Self = CompatibilitySettings {
        tfcp: false,
        fcp: false,
        ufcs: true,
        hv_scp: true,
        lv_scp: true,
    };
    /// PD-only devices: both SCP variants, nothing proprietary.
    pub const APPLE: Self = CompatibilitySettings {
        tfcp: false,
        fcp: false,
        ufcs: false,
        hv_scp: true,
        lv_scp: true,
    };
    /// Minimal trickle charging only.
    pub const SLEEP: Self = CompatibilitySettings {
        tfcp: false,
        fcp: false,
        ufcs: false,
        hv_scp: false,
        lv_scp: true,
    };
    /// Legacy 5V only, nothing fast.
    pub const SMALL_APPLIANCE: Self = CompatibilitySettings {
        tfcp: false,
        fcp: false,
        ufcs: false,
        hv_scp: false,
        lv_scp: false,
    };
}

/// Device identity strings (model / serial / uptime parse to different shapes
/// but share the "ASCII tail, length-tolerant" convention).
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct DeviceModel(pub String);

impl DeviceModel {
    pub fn parse(payload: &[u8]) -> Self {
        DeviceModel(String::from_utf8_lossy(payload).trim_end_matches('\0').to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct DeviceSerial(pub String);

impl DeviceSerial {
    pub fn parse(payload: &[u8]) -> Self {
        DeviceSerial(String::from_utf8_lossy(payload).trim_end_matches('\0').to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct DeviceUptime(pub u32);

impl DeviceUptime {
    pub fn parse(payload: &[u8]) -> Self {
        DeviceUptime(u32_le(payload, 0))
    }
}

/// Per-port on/off bitmask, bit `N` set means port `N` is supplying power.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct PowerSupplyStatus {
    pub port_mask: u8,
    pub open_ports: Vec<u8>,
}

impl PowerSupplyStatus {
    pub fn parse(payload: &[u8]) -> Self {
        let port_mask = byte(payload, 0);
        let open_ports = (0u8..8).filter(|bit| port_mask & (1 << bit) != 0).collect();
        PowerSupplyStatus { port_mask, open_ports }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct DisplaySettings {
    pub brightness: u8,
    pub mode: u8,
    pub flip: bool,
}

impl DisplaySettings {
    pub fn parse(payload: &[u8]) -> Self {
        DisplaySettings {
            brightness: byte(payload, 0),
            mode: byte(payload, 1),
            flip: byte(payload, 2) != 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct WifiStatus {
    pub connected: bool,
    pub configured: bool,
    pub rssi_dbm: i8,
}

impl WifiStatus {
    pub fn parse(payload: &[u8]) -> Self {
        let status = byte(payload, 0);
        WifiStatus {
            connected: status & 0b01 != 0,
            configured: status & 0b10 != 0,
            rssi_dbm: byte(payload, 1) as i8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct WifiScanRecord {
    pub ssid: String,
    pub rssi_dbm: i16,
    pub auth: u8,
    pub stored: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct WifiScanResult {
    pub records: Vec<WifiScanRecord>,
}

impl WifiScanResult {
    pub fn parse(payload: &[u8]) -> Self {
        let mut records = Vec::new();
        let count = byte(payload, 0) as usize;
        let mut idx = 1usize;
        for _ in 0..count {
            let Some(&ssid_len) = payload.get(idx) else { break };
            let ssid_len = ssid_len as usize;
            let ssid_start = idx + 1;
            let ssid_end = (ssid_start + ssid_len).min(payload.len());
            let ssid = String::from_utf8_lossy(&payload[ssid_start.min(payload.len())..ssid_end]).to_string();
            let rssi_raw = byte(payload, ssid_end);
            let rssi_dbm = if rssi_raw > 127 {
                rssi_raw as i16 - 256
            } else {
                rssi_raw as i16
            };
            let auth = byte(payload, ssid_end + 1);
            let stored = byte(payload, ssid_end + 2) != 0;
            records.push(WifiScanRecord {
                ssid,
                rssi_dbm,
                auth,
                stored,
            });
            idx = ssid_end + 3;
        }
        WifiScanResult { records }
    }
}

/// Response dispatch: decide which record type a service's response payload
/// decodes to. The single source of truth for "what shape comes back from
/// what command", collapsed into one dispatch point instead of a per-command
/// wrapper function each.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(tag = "kind", content = "value")]
pub enum ParsedResponse {
    PortStatistics(PortStatistics),
    AllPortStatistics(Vec<PortStatistics>),
    PortPdStatus(PortPdStatus),
    PowerHistoricalStats(PowerHistoricalStats),
    ChargingStrategyStatus(ChargingStrategyStatus),
    PowerConfig(PowerConfig),
    PowerSupplyStatus(PowerSupplyStatus),
    CompatibilitySettings(CompatibilitySettings),
    DeviceModel(DeviceModel),
    DeviceSerial(DeviceSerial),
    DeviceUptime(DeviceUptime),
    DisplaySettings(DisplaySettings),
    WifiStatus(WifiStatus),
    WifiScanResult(WifiScanResult),
    /// Raw payload for services with no richer typed shape (acks, pings,
    /// echo tests, reboot/reset confirmations, raw debug log bytes).
    Raw(Vec<u8>),
}

pub fn try_parse_response(service: Service, payload: &[u8]) -> Result<ParsedResponse, ParseError> {
    Ok(match service {
        Service::GetPowerStatistics => ParsedResponse::PortStatistics(PortStatistics::parse(payload)),
        Service::GetAllPowerStatistics => {
            ParsedResponse::AllPortStatistics(parse_all_port_statistics(payload))
        }
        Service::GetPortPdStatus => ParsedResponse::PortPdStatus(PortPdStatus::parse(payload)),
        Service::GetPowerHistoricalStats => {
            ParsedResponse::PowerHistoricalStats(PowerHistoricalStats::parse(payload))
        }
        Service::GetChargingStrategy | Service::SetChargingStrategy => {
            ParsedResponse::ChargingStrategyStatus(ChargingStrategyStatus::parse(payload))
        }
        Service::GetPortConfig | Service::SetPortConfig => {
            ParsedResponse::PowerConfig(PowerConfig::parse(payload)?)
        }
        Service::GetPowerSupplyStatus => {
            ParsedResponse::PowerSupplyStatus(PowerSupplyStatus::parse(payload))
        }
        Service::GetPortCompatibilitySettings | Service::SetPortCompatibilitySettings => {
            ParsedResponse::CompatibilitySettings(CompatibilitySettings::parse(payload))
        }
        Service::GetDeviceModel => ParsedResponse::DeviceModel(DeviceModel::parse(payload)),
        Service::GetDeviceSerialNo => ParsedResponse::DeviceSerial(DeviceSerial::parse(payload)),
        Service::GetDeviceUptime => ParsedResponse::DeviceUptime(DeviceUptime::parse(payload)),
        Service::GetDisplayIntensity
        | Service::GetDisplayMode
        | Service::GetDisplayFlip
        | Service::SetDisplayIntensity
        | Service::SetDisplayMode
        | Service::SetDisplayFlip => ParsedResponse::DisplaySettings(DisplaySettings::parse(payload)),
        Service::GetWifiStatus => ParsedResponse::WifiStatus(WifiStatus::parse(payload)),
        Service::GetWifiScanResult => ParsedResponse::WifiScanResult(WifiScanResult::parse(payload)),
        _ => ParsedResponse::Raw(payload.to_vec()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn telemetry_scaling() {
        for voltage_raw in 0u8..=255 {
            let payload = [0, 0, voltage_raw, 0, 0, 0, 0, 0];
            let stats = PortStatistics::parse(&payload);
            assert!((stats.voltage_v - voltage_raw as f32 / 8.0).abs() < 1e-6);
        }
        for amperage_raw in 0u8..=255 {
            let payload = [0, amperage_raw, 0, 0, 0, 0, 0, 0];
            let stats = PortStatistics::parse(&payload);
            assert!((stats.current_a - amperage_raw as f32 / 32.0).abs() < 1e-6);
        }
        let stats = PortStatistics::parse(&[0, 32, 8, 25, 0, 0, 0, 0]);
        assert!((stats.power_w - stats.voltage_v * stats.current_a).abs() < 1e-6);
    }

    #[test]
    fn not_charging_protocol_byte() {
        let stats = PortStatistics::parse(&[0xFF, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(stats.fast_charging_protocol, FastChargingProtocol::NotCharging);
    }

    #[test]
    fn pd_status_truncation_is_tolerant() {
        // truncated 12-byte payload still parses with no error: battery
        // fields (offsets < 12) populated, cable-vid high byte (offset 12) zero.
        let payload: Vec<u8> = vec![0x34, 0x12, 0x78, 0x56, 0x10, 0x00, 0x20, 0x00, 0, 0, 0, 0xAB];
        let status = PortPdStatus::parse(&payload);
        assert_eq!(status.battery_vid, 0x1234);
        assert_eq!(status.battery_pid, 0x5678);
        assert_eq!(status.status_temperature_c, 0); // offset 33, well past len 12
        assert_eq!(status.operating_current_a, 0.0);
    }

    #[test]
    fn compatibility_presets_round_trip_through_the_mask() {
        for preset in [
            CompatibilitySettings::NATIVE,
            CompatibilitySettings::HUAWEI,
            CompatibilitySettings::ANDROID,
            CompatibilitySettings::APPLE,
            CompatibilitySettings::SLEEP,
            CompatibilitySettings::SMALL_APPLIANCE,
        ] {
            assert_eq!(CompatibilitySettings::decode(preset.encode()), preset);
        }
    }

    #[test]
    fn power_config_rejects_unexpected_version() {
        let payload = [2, 240, 5, 0, 0, 0, 1, 0, 0, 0, 0];
        assert!(matches!(
            PowerConfig::parse(&payload),
            Err(ParseError::BadPowerConfigVersion(2))
        ));
    }

    #[test]
    fn power_config_default_matches_unconfigured_device() {
        let d = PowerConfig::default_unconfigured();
        assert_eq!(d.version, 1);
        assert_eq!(d.max_power_w, 240);
        assert_eq!(d.cooldown_period_s, 5);
        assert_eq!(d.apply_period_s, 1);
    }

    #[test]
    fn wifi_scan_result_rssi_interpreted_as_signed() {
        // one record: ssid "AP" len 2, rssi raw 200 (-56 dBm), auth 4, stored 1
        let payload = vec![1, 2, b'A', b'P', 200, 4, 1];
        let result = WifiScanResult::parse(&payload);
        assert_eq!(result.records.len(), 1);
        assert_eq!(result.records[0].ssid, "AP");
        assert_eq!(result.records[0].rssi_dbm, -56);
        assert!(result.records[0].stored);
    }
}
