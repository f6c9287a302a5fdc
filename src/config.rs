//! Runtime configuration for the adapter/aggregator/client-interface binary.
//!
//! Persisted as TOML, the shape `monsgeek-joystick/src/config.rs` uses for its
//! own settings file: `#[serde(default)]` per field, `Config::load` falling
//! back to `Config::default()` when the file is absent, `Config::save`
//! writing it back out atomically. Fields may additionally be overridden by
//! `CP02_`-prefixed environment variables, applied as a thin overlay over the
//! parsed value rather than through a separate config-merge crate.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_mqtt_host")]
    pub mqtt_host: String,
    #[serde(default = "default_mqtt_port")]
    pub mqtt_port: u16,
    #[serde(default)]
    pub mqtt_user: Option<String>,
    #[serde(default)]
    pub mqtt_password: Option<String>,
    #[serde(default = "default_mqtt_topic_prefix")]
    pub mqtt_topic_prefix: String,
    #[serde(default = "default_mqtt_keepalive")]
    pub mqtt_keepalive: u64,

    #[serde(default = "default_server_host")]
    pub server_host: String,
    #[serde(default = "default_server_port")]
    pub server_port: u16,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_api_key_header")]
    pub api_key_header: String,

    #[serde(default = "default_gateway_timeout_seconds")]
    pub gateway_timeout_seconds: u64,

    #[serde(default = "default_ota_upload_dir")]
    pub ota_upload_dir: PathBuf,
    #[serde(default = "default_max_firmware_size")]
    pub max_firmware_size: u64,

    #[serde(default = "default_token_refresh_interval")]
    pub token_refresh_interval: u64,
    #[serde(default = "default_token_storage_path")]
    pub token_storage_path: PathBuf,

    #[serde(default = "default_history_db_path")]
    pub history_db_path: PathBuf,
    #[serde(default = "default_history_retention_days")]
    pub history_retention_days: u32,

    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    #[serde(default = "default_reconnect_max_attempts")]
    pub reconnect_max_attempts: u32,
    #[serde(default = "default_reconnect_backoff_base_ms")]
    pub reconnect_backoff_base_ms: u64,
    #[serde(default = "default_reconnect_backoff_max_ms")]
    pub reconnect_backoff_max_ms: u64,
    #[serde(default = "default_bus_reconnect_backoff_ms")]
    pub bus_reconnect_backoff_ms: u64,
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}
fn default_mqtt_port() -> u16 {
    1883
}
fn default_mqtt_topic_prefix() -> String {
    "cp02".to_string()
}
fn default_mqtt_keepalive() -> u64 {
    60
}
fn default_server_host() -> String {
    "127.0.0.1".to_string()
}
fn default_server_port() -> u16 {
    3814
}
fn default_api_key_header() -> String {
    "x-api-key".to_string()
}
fn default_gateway_timeout_seconds() -> u64 {
    30
}
fn default_ota_upload_dir() -> PathBuf {
    PathBuf::from("/var/lib/cp02/firmware")
}
fn default_max_firmware_size() -> u64 {
    4 * 1024 * 1024
}
fn default_token_refresh_interval() -> u64 {
    300
}
fn default_token_storage_path() -> PathBuf {
    default_config_dir().join("tokens.json")
}
fn default_history_db_path() -> PathBuf {
    default_config_dir().join("history.sqlite")
}
fn default_history_retention_days() -> u32 {
    7
}
fn default_log_filter() -> String {
    "cp02=info".to_string()
}
fn default_reconnect_max_attempts() -> u32 {
    5
}
fn default_reconnect_backoff_base_ms() -> u64 {
    1000
}
fn default_reconnect_backoff_max_ms() -> u64 {
    30_000
}
fn default_bus_reconnect_backoff_ms() -> u64 {
    5000
}

fn default_config_dir() -> PathBuf {
    dirs::config_dir().unwrap_or_else(|| PathBuf::from(".")).join("cp02")
}

impl Default for Config {
    fn default() -> Self {
        Config {
            mqtt_host: default_mqtt_host(),
            mqtt_port: default_mqtt_port(),
            mqtt_user: None,
            mqtt_password: None,
            mqtt_topic_prefix: default_mqtt_topic_prefix(),
            mqtt_keepalive: default_mqtt_keepalive(),
            server_host: default_server_host(),
            server_port: default_server_port(),
            api_key: String::new(),
            api_key_header: default_api_key_header(),
            gateway_timeout_seconds: default_gateway_timeout_seconds(),
            ota_upload_dir: default_ota_upload_dir(),
            max_firmware_size: default_max_firmware_size(),
            token_refresh_interval: default_token_refresh_interval(),
            token_storage_path: default_token_storage_path(),
            history_db_path: default_history_db_path(),
            history_retention_days: default_history_retention_days(),
            log_filter: default_log_filter(),
            reconnect_max_attempts: default_reconnect_max_attempts(),
            reconnect_backoff_base_ms: default_reconnect_backoff_base_ms(),
            reconnect_backoff_max_ms: default_reconnect_backoff_max_ms(),
            bus_reconnect_backoff_ms: default_bus_reconnect_backoff_ms(),
        }
    }
}

impl Config {
    pub fn default_path() -> PathBuf {
        default_config_dir().join("config.toml")
    }

    /// Load config from a file, falling back to defaults if absent, then
    /// apply `CP02_`-prefixed environment variable overrides on top.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str(&content)?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        macro_rules! overlay_string {
            ($field:ident, $env:expr) => {
                if let Ok(value) = std::env::var($env) {
                    self.$field = value;
                }
            };
        }
        macro_rules! overlay_parsed {
            ($field:ident, $env:expr) => {
                if let Ok(value) = std::env::var($env) {
                    if let Ok(parsed) = value.parse() {
                        self.$field = parsed;
                    }
                }
            };
        }

        overlay_string!(mqtt_host, "CP02_MQTT_HOST");
        overlay_parsed!(mqtt_port, "CP02_MQTT_PORT");
        overlay_string!(mqtt_topic_prefix, "CP02_MQTT_TOPIC_PREFIX");
        overlay_parsed!(mqtt_keepalive, "CP02_MQTT_KEEPALIVE");
        overlay_string!(server_host, "CP02_SERVER_HOST");
        overlay_parsed!(server_port, "CP02_SERVER_PORT");
        overlay_string!(api_key, "CP02_API_KEY");
        overlay_parsed!(gateway_timeout_seconds, "CP02_GATEWAY_TIMEOUT_SECONDS");
        overlay_parsed!(max_firmware_size, "CP02_MAX_FIRMWARE_SIZE");
        overlay_parsed!(token_refresh_interval, "CP02_TOKEN_REFRESH_INTERVAL");
        overlay_parsed!(history_retention_days, "CP02_HISTORY_RETENTION_DAYS");
        overlay_string!(log_filter, "CP02_LOG_FILTER");

        if let Ok(value) = std::env::var("CP02_MQTT_USER") {
            self.mqtt_user = Some(value);
        }
        if let Ok(value) = std::env::var("CP02_MQTT_PASSWORD") {
            self.mqtt_password = Some(value);
        }
        if let Ok(value) = std::env::var("CP02_OTA_UPLOAD_DIR") {
            self.ota_upload_dir = PathBuf::from(value);
        }
        if let Ok(value) = std::env::var("CP02_TOKEN_STORAGE_PATH") {
            self.token_storage_path = PathBuf::from(value);
        }
        if let Ok(value) = std::env::var("CP02_HISTORY_DB_PATH") {
            self.history_db_path = PathBuf::from(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_toml() {
        let config = Config::default();
        let serialized = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&serialized).unwrap();
        assert_eq!(parsed.mqtt_host, config.mqtt_host);
        assert_eq!(parsed.gateway_timeout_seconds, 30);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = Config::load(Path::new("/nonexistent/cp02-config-test.toml")).unwrap();
        assert_eq!(config.mqtt_port, 1883);
        assert_eq!(config.history_retention_days, 7);
    }

    #[test]
    fn env_override_wins_over_file_value() {
        std::env::set_var("CP02_MQTT_HOST", "mqtt.example.test");
        let mut config = Config::default();
        config.apply_env_overrides();
        std::env::remove_var("CP02_MQTT_HOST");
        assert_eq!(config.mqtt_host, "mqtt.example.test");
    }
}
