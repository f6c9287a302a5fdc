//! Wire-level constants: service enumeration, frame flags, BLE GATT identifiers.
//!
//! Mirrors the closed, stable command set a CP02-series station accepts. Values
//! are 8-bit; `Service::Unknown` is the fallback for any byte this enumeration
//! does not (yet) name, per the "unknown(n), don't guess" rule applied uniformly
//! to every closed-but-incompletely-observed enumeration in this protocol.

/// BLE GATT service UUID advertised by CP02-series stations.
pub const GATT_SERVICE_UUID: &str = "048e3f2e-e1a6-4707-9e74-a930e898a1ea";
/// Notify characteristic, device -> host.
pub const GATT_TX_CHARACTERISTIC_UUID: &str = "148e3f2e-e1a6-4707-9e74-a930e898a1ea";
/// Write-without-response characteristic, host -> device.
pub const GATT_RX_CHARACTERISTIC_UUID: &str = "248e3f2e-e1a6-4707-9e74-a930e898a1ea";

/// Advertised-name prefix identifying CP02 family membership.
pub const DEVICE_NAME_PREFIX: &str = "CP02-";

/// Frame header flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Flags {
    None = 0,
    Syn = 1,
    Ack = 2,
    Fin = 3,
    Rst = 4,
    SynAck = 5,
}

impl Flags {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Flags::None),
            1 => Some(Flags::Syn),
            2 => Some(Flags::Ack),
            3 => Some(Flags::Fin),
            4 => Some(Flags::Rst),
            5 => Some(Flags::SynAck),
            _ => None,
        }
    }
}

/// A CP02 service command. `Unknown` carries the raw byte for unrecognized codes.
///
/// This is the full enumeration the station's firmware accepts, not a
/// client-facing subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum Service {
    BleEchoTest,
    GetDebugLog,
    GetSecureBootDigest,
    PingMqttTelemetry,
    PingHttp,
    GetDevicePassword,
    ManagePowerConfig,
    ManageFeatureToggle,
    EnableReleaseMode,
    ManagePowerAllocatorEnabled,

    AssociateDevice,
    RebootDevice,
    ResetDevice,
    GetDeviceSerialNo,
    GetDeviceUptime,
    GetApVersion,
    GetBpVersion,
    GetFpgaVersion,
    GetZrlibVersion,
    GetDeviceBleAddr,
    SwitchDevice,
    GetDeviceSwitch,
    GetDeviceModel,
    PushLicense,
    GetBleRssi,
    GetBleMtu,

    PerformBleOta,
    PerformWifiOta,
    GetWifiOtaProgress,
    ConfirmOta,

    ScanWifi,
    GetWifiScanResult,
    SetWifiSsid,
    ResetWifi,
    GetWifiStatus,
    GetDeviceWifiAddr,
    SetWifiSsidAndPassword,
    GetWifiRecords,
    OperateWifiRecord,
    GetWifiStateMachine,
    SetWifiStateMachine,

    TogglePortPower,
    GetPowerStatistics,
    GetPowerSupplyStatus,
    SetChargingStrategy,
    GetChargingStatus,
    GetPowerHistoricalStats,
    SetPortPriority,
    GetPortPriority,
    GetChargingStrategy,
    GetPortPdStatus,
    GetAllPowerStatistics,
    GetStartChargeTimestamp,
    TurnOnPort,
    TurnOffPort,
    SetStaticAllocator,
    GetStaticAllocator,
    SetPortConfig,
    GetPortConfig,
    SetPortCompatibilitySettings,
    GetPortCompatibilitySettings,
    SetTemperatureMode,
    SetTemporaryAllocator,
    SetPortConfig1,
    GetPortConfig1,

    SetDisplayIntensity,
    SetDisplayMode,
    GetDisplayIntensity,
    GetDisplayMode,
    SetDisplayFlip,
    GetDisplayFlip,
    SetDisplayConfig,
    SetDisplayState,
    GetDisplayState,

    StartTelemetryStream,
    StopTelemetryStream,
    GetDeviceInfo,
    SetBleState,
    SetSyslogState,
    SetSystemTime,
    StartOta,

    Unknown(u8),
}

impl Service {
    pub fn to_u8(self) -> u8 {
        match self {
            Service::BleEchoTest => 0x00,
            Service::GetDebugLog => 0x01,
            Service::GetSecureBootDigest => 0x02,
            Service::PingMqttTelemetry => 0x03,
            Service::PingHttp => 0x04,
            Service::GetDevicePassword => 0x05,
            Service::ManagePowerConfig => 0x0a,
            Service::ManageFeatureToggle => 0x0b,
            Service::EnableReleaseMode => 0x0c,
            Service::ManagePowerAllocatorEnabled => 0x09,

            Service::AssociateDevice => 0x10,
            Service::RebootDevice => 0x11,
            Service::ResetDevice => 0x12,
            Service::GetDeviceSerialNo => 0x13,
            Service::GetDeviceUptime => 0x14,
            Service::GetApVersion => 0x15,
            Service::GetBpVersion => 0x16,
            Service::GetFpgaVersion => 0x17,
            Service::GetZrlibVersion => 0x18,
            Service::GetDeviceBleAddr => 0x19,
            Service::SwitchDevice => 0x1a,
            Service::GetDeviceSwitch => 0x1b,
            Service::GetDeviceModel => 0x1c,
            Service::PushLicense => 0x1d,
            Service::GetBleRssi => 0x1e,
            Service::GetBleMtu => 0x1f,

            Service::PerformBleOta => 0x20,
            Service::PerformWifiOta => 0x21,
            Service::GetWifiOtaProgress => 0x22,
            Service::ConfirmOta => 0x23,

            Service::ScanWifi => 0x30,
            Service::GetWifiScanResult => 0x31,
            Service::SetWifiSsid => 0x32,
            Service::ResetWifi => 0x33,
            Service::GetWifiStatus => 0x34,
            Service::GetDeviceWifiAddr => 0x35,
            Service::SetWifiSsidAndPassword => 0x36,
            Service::GetWifiRecords => 0x37,
            Service::OperateWifiRecord => 0x38,
            Service::GetWifiStateMachine => 0x39,
            Service::SetWifiStateMachine => 0x3a,

            Service::TogglePortPower => 0x40,
            Service::GetPowerStatistics => 0x41,
            Service::GetPowerSupplyStatus => 0x42,
            Service::SetChargingStrategy => 0x43,
            Service::GetChargingStatus => 0x44,
            Service::GetPowerHistoricalStats => 0x45,
            Service::SetPortPriority => 0x46,
            Service::GetPortPriority => 0x47,
            Service::GetChargingStrategy => 0x48,
            Service::GetPortPdStatus => 0x49,
            Service::GetAllPowerStatistics => 0x4a,
            Service::GetStartChargeTimestamp => 0x4b,
            Service::TurnOnPort => 0x4c,
            Service::TurnOffPort => 0x4d,
            Service::SetStaticAllocator => 0x55,
            Service::GetStaticAllocator => 0x56,
            Service::SetPortConfig => 0x57,
            Service::GetPortConfig => 0x58,
            Service::SetPortCompatibilitySettings => 0x59,
            Service::GetPortCompatibilitySettings => 0x5a,
            Service::SetTemperatureMode => 0x5b,
            Service::SetTemporaryAllocator => 0x5c,
            Service::SetPortConfig1 => 0x5d,
            Service::GetPortConfig1 => 0x5e,

            Service::SetDisplayIntensity => 0x70,
            Service::SetDisplayMode => 0x71,
            Service::GetDisplayIntensity => 0x72,
            Service::GetDisplayMode => 0x73,
            Service::SetDisplayFlip => 0x74,
            Service::GetDisplayFlip => 0x75,
            Service::SetDisplayConfig => 0x76,
            Service::SetDisplayState => 0x77,
            Service::GetDisplayState => 0x78,

            Service::StartTelemetryStream => 0x90,
            Service::StopTelemetryStream => 0x91,
            Service::GetDeviceInfo => 0x92,
            Service::SetBleState => 0x98,
            Service::SetSyslogState => 0x99,
            Service::SetSystemTime => 0x9a,
            Service::StartOta => 0x9c,

            Service::Unknown(b) => b,
        }
    }

    pub fn from_u8(b: u8) -> Self {
        match b {
            0x00 => Service::BleEchoTest,
            0x01 => Service::GetDebugLog,
            0x02 => Service::GetSecureBootDigest,
            0x03 => Service::PingMqttTelemetry,
            0x04 => Service::PingHttp,
            0x05 => Service::GetDevicePassword,
            0x0a => Service::ManagePowerConfig,
            0x0b => Service::ManageFeatureToggle,
            0x0c => Service::EnableReleaseMode,
            0x09 => Service::ManagePowerAllocatorEnabled,

            0x10 => Service::AssociateDevice,
            0x11 => Service::RebootDevice,
            0x12 => Service::ResetDevice,
            0x13 => Service::GetDeviceSerialNo,
            0x14 => Service::GetDeviceUptime,
            0x15 => Service::GetApVersion,
            0x16 => Service::GetBpVersion,
            0x17 => Service::GetFpgaVersion,
            0x18 => Service::GetZrlibVersion,
            0x19 => Service::GetDeviceBleAddr,
            0x1a => Service::SwitchDevice,
            0x1b => Service::GetDeviceSwitch,
            0x1c => Service::GetDeviceModel,
            0x1d => Service::PushLicense,
            0x1e => Service::GetBleRssi,
            0x1f => Service::GetBleMtu,

            0x20 => Service::PerformBleOta,
            0x21 => Service::PerformWifiOta,
            0x22 => Service::GetWifiOtaProgress,
            0x23 => Service::ConfirmOta,

            0x30 => Service::ScanWifi,
            0x31 => Service::GetWifiScanResult,
            0x32 => Service::SetWifiSsid,
            0x33 => Service::ResetWifi,
            0x34 => Service::GetWifiStatus,
            0x35 => Service::GetDeviceWifiAddr,
            0x36 => Service::SetWifiSsidAndPassword,
            0x37 => Service::GetWifiRecords,
            0x38 => Service::OperateWifiRecord,
            0x39 => Service::GetWifiStateMachine,
            0x3a => Service::SetWifiStateMachine,

            0x40 => Service::TogglePortPower,
            0x41 => Service::GetPowerStatistics,
            0x42 => Service::GetPowerSupplyStatus,
            0x43 => Service::SetChargingStrategy,
            0x44 => Service::GetChargingStatus,
            0x45 => Service::GetPowerHistoricalStats,
            0x46 => Service::SetPortPriority,
            0x47 => Service::GetPortPriority,
            0x48 => Service::GetChargingStrategy,
            0x49 => Service::GetPortPdStatus,
            0x4a => Service::GetAllPowerStatistics,
            0x4b => Service::GetStartChargeTimestamp,
            0x4c => Service::TurnOnPort,
            0x4d => Service::TurnOffPort,
            0x55 => Service::SetStaticAllocator,
            0x56 => Service::GetStaticAllocator,
            0x57 => Service::SetPortConfig,
            0x58 => Service::GetPortConfig,
            0x59 => Service::SetPortCompatibilitySettings,
            0x5a => Service::GetPortCompatibilitySettings,
            0x5b => Service::SetTemperatureMode,
            0x5c => Service::SetTemporaryAllocator,
            0x5d => Service::SetPortConfig1,
            0x5e => Service::GetPortConfig1,

            0x70 => Service::SetDisplayIntensity,
            0x71 => Service::SetDisplayMode,
            0x72 => Service::GetDisplayIntensity,
            0x73 => Service::GetDisplayMode,
            0x74 => Service::SetDisplayFlip,
            0x75 => Service::GetDisplayFlip,
            0x76 => Service::SetDisplayConfig,
            0x77 => Service::SetDisplayState,
            0x78 => Service::GetDisplayState,

            0x90 => Service::StartTelemetryStream,
            0x91 => Service::StopTelemetryStream,
            0x92 => Service::GetDeviceInfo,
            0x98 => Service::SetBleState,
            0x99 => Service::SetSyslogState,
            0x9a => Service::SetSystemTime,
            0x9c => Service::StartOta,

            other => Service::Unknown(other),
        }
    }

    /// Whether commands carrying this service require the auth token prefixed
    /// to the payload. Only device association is exempt.
    pub fn requires_token(self) -> bool {
        !matches!(self, Service::AssociateDevice)
    }
}

impl std::fmt::Display for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Service::Unknown(b) => write!(f, "unknown({b})"),
            other => write!(f, "{:?}", other),
        }
    }
}

/// Fast-charging protocol byte, as reported in port telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum FastChargingProtocol {
    None,
    Qc2_0,
    Qc3_0,
    Qc3Plus,
    Sfcp,
    Afc,
    Fcp,
    Scp,
    Vooc1,
    Vooc4,
    SuperVooc2,
    Tfcp,
    Ufcs,
    Pe1,
    Pe2,
    Pd5V,
    PdHv,
    PdSprAvs,
    PdPps,
    PdEprHv,
    PdAvs,
    NotCharging,
    Unknown(u8),
}

impl FastChargingProtocol {
    pub fn from_u8(b: u8) -> Self {
        match b {
            0 => FastChargingProtocol::None,
            1 => FastChargingProtocol::Qc2_0,
            2 => FastChargingProtocol::Qc3_0,
            3 => FastChargingProtocol::Qc3Plus,
            4 => FastChargingProtocol::Sfcp,
            5 => FastChargingProtocol::Afc,
            6 => FastChargingProtocol::Fcp,
            7 => FastChargingProtocol::Scp,
            8 => FastChargingProtocol::Vooc1,
            9 => FastChargingProtocol::Vooc4,
            10 => FastChargingProtocol::SuperVooc2,
            11 => FastChargingProtocol::Tfcp,
            12 => FastChargingProtocol::Ufcs,
            13 => FastChargingProtocol::Pe1,
            14 => FastChargingProtocol::Pe2,
            15 => FastChargingProtocol::Pd5V,
            16 => FastChargingProtocol::PdHv,
            17 => FastChargingProtocol::PdSprAvs,
            18 => FastChargingProtocol::PdPps,
            19 => FastChargingProtocol::PdEprHv,
            20 => FastChargingProtocol::PdAvs,
            0xFF => FastChargingProtocol::NotCharging,
            other => FastChargingProtocol::Unknown(other),
        }
    }
}

impl std::fmt::Display for FastChargingProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FastChargingProtocol::Unknown(b) => write!(f, "unknown({b})"),
            other => write!(f, "{:?}", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_round_trips_known_codes() {
        for &(svc, code) in &[
            (Service::GetDeviceModel, 0x1c),
            (Service::TurnOnPort, 0x4c),
            (Service::GetPortPdStatus, 0x49),
            (Service::SetDisplayFlip, 0x74),
        ] {
            assert_eq!(svc.to_u8(), code);
            assert_eq!(Service::from_u8(code), svc);
        }
    }

    #[test]
    fn unknown_service_carries_byte() {
        assert_eq!(Service::from_u8(0x60).to_u8(), 0x60);
        assert_eq!(Service::from_u8(0x60).to_string(), "unknown(96)");
    }

    #[test]
    fn associate_device_is_the_only_token_exempt_service() {
        assert!(!Service::AssociateDevice.requires_token());
        assert!(Service::GetDeviceModel.requires_token());
        assert!(Service::TurnOnPort.requires_token());
    }

    #[test]
    fn protocol_unknown_renders_per_spec() {
        assert_eq!(FastChargingProtocol::from_u8(21).to_string(), "unknown(21)");
        assert_eq!(FastChargingProtocol::from_u8(0xFF), FastChargingProtocol::NotCharging);
    }
}
