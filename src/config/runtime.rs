//! Runtime connectivity configuration.
//!
//! Owned by the orchestrator and only mutated on the event loop thread. Public
//! setters on the manager validate and write these fields, then schedule a
//! re-drive of the affected state machine.

use super::settings::Settings;
use serde::Serialize;
use std::fmt;

/// Desired behaviour of the WiFi station interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StationMode {
    NotSupported,
    /// The application drives the interface itself.
    ApplicationControlled,
    Enabled,
    Disabled,
}

/// Desired behaviour of the WiFi access-point interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ApMode {
    NotSupported,
    ApplicationControlled,
    Disabled,
    Enabled,
    /// Active while there has been demand within the idle timeout.
    OnDemand,
    /// Like `OnDemand`, but also active while the station has no usable
    /// provision.
    OnDemandNoStationProvision,
}

impl ApMode {
    /// True for the two on-demand modes.
    pub fn is_on_demand(self) -> bool {
        matches!(self, Self::OnDemand | Self::OnDemandNoStationProvision)
    }
}

/// Whether the service tunnel may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TunnelMode {
    Enabled,
    Disabled,
}

/// Desired state of the BLE transport service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BleServiceMode {
    NotSupported,
    Enabled,
    Disabled,
}

macro_rules! display_as_debug {
    ($($ty:ty),*) => {
        $(impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Debug::fmt(self, f)
            }
        })*
    };
}

display_as_debug!(StationMode, ApMode, TunnelMode, BleServiceMode);

/// Mutable connectivity configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectivityConfig {
    pub station_mode: StationMode,
    pub ap_mode: ApMode,
    pub tunnel_mode: TunnelMode,
    pub station_reconnect_interval_ms: u64,
    pub ap_idle_timeout_ms: u64,
    pub ble_advertising_enabled: bool,
    pub ble_fast_advertising: bool,
    /// Advertised name override. `None` uses the generated name.
    pub custom_device_name: Option<String>,
}

impl ConnectivityConfig {
    /// Start-up values: station and AP disabled, tunnel enabled.
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            station_mode: StationMode::Disabled,
            ap_mode: ApMode::Disabled,
            tunnel_mode: TunnelMode::Enabled,
            station_reconnect_interval_ms: settings.wifi.station_reconnect_interval_ms,
            ap_idle_timeout_ms: settings.wifi.ap_idle_timeout_ms,
            ble_advertising_enabled: true,
            ble_fast_advertising: false,
            custom_device_name: None,
        }
    }
}
