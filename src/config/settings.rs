//! Static tunables for the orchestrator.
//!
//! Settings are read once at start-up from a JSON document. Every field has a
//! default, so an empty object (or no file at all) yields a working device
//! configuration.
//!
//! ```json
//! {
//!   "wifi": { "station_reconnect_interval_ms": 5000, "ap_channel": 6 },
//!   "ble": { "max_connections": 2 },
//!   "default_station": { "ssid": "lab", "password": "password123" }
//! }
//! ```

use super::credentials::WifiConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Default port for the status endpoint.
pub const DEFAULT_STATUS_PORT: u16 = 8080;

/// WiFi station and access-point tunables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WifiSettings {
    /// Fixed delay between a failed association and the next attempt.
    pub station_reconnect_interval_ms: u64,
    /// How long an on-demand AP stays up without fresh demand.
    pub ap_idle_timeout_ms: u64,
    /// Prefix for the generated AP SSID.
    pub ap_ssid_prefix: String,
    /// AP radio channel (1-13).
    pub ap_channel: u8,
    /// Maximum number of stations the AP accepts.
    pub ap_max_stations: u8,
    /// AP beacon interval in milliseconds.
    pub ap_beacon_interval_ms: u16,
}

impl Default for WifiSettings {
    fn default() -> Self {
        Self {
            station_reconnect_interval_ms: 5_000,
            ap_idle_timeout_ms: 120_000,
            ap_ssid_prefix: "NEST-".to_string(),
            ap_channel: 1,
            ap_max_stations: 4,
            ap_beacon_interval_ms: 100,
        }
    }
}

/// BLE transport tunables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BleSettings {
    /// Prefix for the generated advertising name.
    pub device_name_prefix: String,
    /// Fast advertising interval in 0.625 ms units.
    pub fast_advertising_interval: u16,
    /// Slow advertising interval in 0.625 ms units.
    pub slow_advertising_interval: u16,
    /// Capacity of the connection pool.
    pub max_connections: usize,
    /// Whether the platform has a BLE transport at all.
    pub supported: bool,
    /// Whether the transport starts enabled.
    pub enabled: bool,
}

impl Default for BleSettings {
    fn default() -> Self {
        Self {
            device_name_prefix: "NEST-".to_string(),
            fast_advertising_interval: 64,
            slow_advertising_interval: 800,
            max_connections: 1,
            supported: true,
            enabled: true,
        }
    }
}

/// Device identity and service provisioning tunables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    pub vendor_id: u16,
    pub product_id: u16,
    /// How long an account-pairing request waits for service connectivity.
    pub provisioning_connectivity_timeout_ms: u64,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            vendor_id: 0x235A,
            product_id: 0xFEFF,
            provisioning_connectivity_timeout_ms: 10_000,
        }
    }
}

/// Complete orchestrator settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub wifi: WifiSettings,
    pub ble: BleSettings,
    pub service: ServiceSettings,
    /// Capacity of the event loop work queue.
    pub work_queue_capacity: usize,
    /// Credentials applied on first boot when nothing is provisioned.
    pub default_station: Option<WifiConfig>,
    /// Port for the HTTP status endpoint.
    pub status_port: u16,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            wifi: WifiSettings::default(),
            ble: BleSettings::default(),
            service: ServiceSettings::default(),
            work_queue_capacity: 32,
            default_station: None,
            status_port: DEFAULT_STATUS_PORT,
        }
    }
}

impl Settings {
    /// Parse settings from a JSON string and validate them.
    pub fn from_json(json: &str) -> Result<Self, SettingsError> {
        let settings: Settings =
            serde_json::from_str(json).map_err(|e| SettingsError::Parse(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from a file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        match std::fs::read_to_string(path) {
            Ok(json) => Self::from_json(&json),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(SettingsError::Io(e.to_string())),
        }
    }

    /// Validate value ranges.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.wifi.station_reconnect_interval_ms == 0 {
            return Err(SettingsError::InvalidConfig(
                "station_reconnect_interval_ms must be > 0",
            ));
        }
        if self.wifi.ap_idle_timeout_ms == 0 {
            return Err(SettingsError::InvalidConfig("ap_idle_timeout_ms must be > 0"));
        }
        if !(1..=13).contains(&self.wifi.ap_channel) {
            return Err(SettingsError::InvalidConfig("ap_channel must be in 1..=13"));
        }
        if self.wifi.ap_max_stations == 0 {
            return Err(SettingsError::InvalidConfig("ap_max_stations must be > 0"));
        }
        if self.ble.max_connections == 0 {
            return Err(SettingsError::InvalidConfig("max_connections must be > 0"));
        }
        if self.ble.fast_advertising_interval == 0 || self.ble.slow_advertising_interval == 0 {
            return Err(SettingsError::InvalidConfig(
                "advertising intervals must be > 0",
            ));
        }
        if self.work_queue_capacity == 0 {
            return Err(SettingsError::InvalidConfig("work_queue_capacity must be > 0"));
        }
        if let Some(station) = &self.default_station {
            if station.validate().is_err() {
                return Err(SettingsError::InvalidConfig(
                    "default_station credentials are invalid",
                ));
            }
        }
        Ok(())
    }
}

/// Errors loading settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingsError {
    /// A value is out of range.
    InvalidConfig(&'static str),
    /// The document is not valid JSON for [`Settings`].
    Parse(String),
    /// The file could not be read.
    Io(String),
}

impl fmt::Display for SettingsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig(msg) => write!(f, "invalid settings: {}", msg),
            Self::Parse(msg) => write!(f, "settings parse error: {}", msg),
            Self::Io(msg) => write!(f, "settings read error: {}", msg),
        }
    }
}

impl std::error::Error for SettingsError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(Settings::default().validate().is_ok());
    }

    #[test]
    fn test_empty_document_yields_defaults() {
        let settings = Settings::from_json("{}").unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_partial_document_overrides_fields() {
        let json = r#"{
            "wifi": { "station_reconnect_interval_ms": 1000, "ap_channel": 11 },
            "ble": { "max_connections": 3 },
            "default_station": { "ssid": "lab", "password": "password123" }
        }"#;
        let settings = Settings::from_json(json).unwrap();
        assert_eq!(settings.wifi.station_reconnect_interval_ms, 1000);
        assert_eq!(settings.wifi.ap_channel, 11);
        assert_eq!(settings.wifi.ap_idle_timeout_ms, 120_000);
        assert_eq!(settings.ble.max_connections, 3);
        assert_eq!(settings.default_station.unwrap().ssid, "lab");
    }

    #[test]
    fn test_invalid_channel_rejected() {
        let result = Settings::from_json(r#"{ "wifi": { "ap_channel": 14 } }"#);
        assert_eq!(
            result,
            Err(SettingsError::InvalidConfig("ap_channel must be in 1..=13"))
        );
    }

    #[test]
    fn test_zero_pool_rejected() {
        let mut settings = Settings::default();
        settings.ble.max_connections = 0;
        assert!(matches!(
            settings.validate(),
            Err(SettingsError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_bad_default_station_rejected() {
        let json = r#"{ "default_station": { "ssid": "", "password": "" } }"#;
        assert!(matches!(
            Settings::from_json(json),
            Err(SettingsError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            Settings::from_json("{ not json"),
            Err(SettingsError::Parse(_))
        ));
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let path = std::env::temp_dir().join("connmgr_settings_does_not_exist.json");
        assert_eq!(Settings::load(&path).unwrap(), Settings::default());
    }
}
