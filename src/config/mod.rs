//! Configuration for the connectivity orchestrator.
//!
//! # Components
//!
//! - [`credentials`] - station credentials with validation
//! - [`settings`] - static tunables loaded from JSON at start-up
//! - [`runtime`] - modes and intervals mutated by the public setters

mod credentials;
mod runtime;
mod settings;

pub use credentials::{
    CredentialsError, WifiConfig, MAX_PASSWORD_LEN, MAX_SSID_LEN, MIN_PASSWORD_LEN,
};
pub use runtime::{ApMode, BleServiceMode, ConnectivityConfig, StationMode, TunnelMode};
pub use settings::{
    BleSettings, ServiceSettings, Settings, SettingsError, WifiSettings, DEFAULT_STATUS_PORT,
};
