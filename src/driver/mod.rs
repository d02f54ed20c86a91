//! Collaborator interfaces.
//!
//! The orchestrator never touches a radio directly. It talks to injected
//! drivers that follow one contract: a command either fails synchronously or
//! is accepted, and its outcome arrives later as an event delivered through
//! the [`Bridge`](crate::bridge::Bridge).
//!
//! # Implementations
//!
//! - [`sim`] - scriptable in-memory drivers for tests and the host simulator
//! - `crate::platform::esp32` - ESP-IDF WiFi and NimBLE bindings (`esp32` feature)

use crate::ble::advertising::{AdvertisingData, AdvertisingParams};
use crate::ble::gatt::{AttributeEntry, DisconnectReason, GattRead, GattStatus, GattWrite};
use crate::config::WifiConfig;
use crate::error::{ConnectivityError, DriverError};
use crate::manager::ConnectivityManager;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

pub mod sim;

// ==================== WiFi ====================

/// WiFi interface selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WifiInterface {
    Station,
    AccessPoint,
}

/// IPv4 lease of an interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Lease {
    pub addr: Ipv4Addr,
    pub gateway: Ipv4Addr,
}

/// An IPv6 address assigned to an interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv6Assignment {
    pub addr: Ipv6Addr,
    /// Preferred or deprecated (not tentative or invalid).
    pub valid: bool,
}

/// Snapshot of the station network interface.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetifState {
    pub link_up: bool,
    pub dns_servers: Vec<IpAddr>,
    pub ipv4: Option<Ipv4Lease>,
    pub ipv6: Vec<Ipv6Assignment>,
    /// Reachable IPv6 default router, if any.
    pub ipv6_router: Option<Ipv6Addr>,
}

/// Access point configuration. The AP always uses open authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApConfiguration {
    pub ssid: String,
    pub channel: u8,
    pub max_stations: u8,
    pub beacon_interval_ms: u16,
}

/// WiFi radio commands.
///
/// Commands return once accepted. Completion is reported with a
/// [`WifiEvent`].
pub trait WifiDriver: Send {
    /// Start the WiFi layer if it is not running.
    fn start(&mut self) -> Result<(), DriverError>;

    /// Enable or disable one interface.
    fn set_interface_enabled(
        &mut self,
        iface: WifiInterface,
        enabled: bool,
    ) -> Result<(), DriverError>;

    fn interface_enabled(&self, iface: WifiInterface) -> Result<bool, DriverError>;

    /// Persistent auto-connect flag, which mirrors the station mode.
    fn auto_connect(&self) -> Result<bool, DriverError>;

    fn set_auto_connect(&mut self, enabled: bool) -> Result<(), DriverError>;

    /// Whether the station is associated with an access point.
    fn station_associated(&self) -> Result<bool, DriverError>;

    fn scan_in_progress(&self) -> bool;

    /// Begin association. Completes with `StaConnected` or `StaDisconnected`.
    fn connect(&mut self, credentials: &WifiConfig) -> Result<(), DriverError>;

    /// Begin disassociation. Completes with `StaDisconnected`.
    fn disconnect(&mut self) -> Result<(), DriverError>;

    fn configure_ap(&mut self, config: &ApConfiguration) -> Result<(), DriverError>;

    /// Current state of the station network interface.
    fn station_netif(&self) -> NetifState;
}

/// Asynchronous WiFi and IP notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WifiEvent {
    StaStart,
    StaStop,
    StaConnected,
    StaDisconnected,
    ScanDone,
    GotIp,
    LostIp,
    GotIp6,
    ApStart,
    ApStop,
    ApStaConnected,
    ApStaDisconnected,
}

// ==================== BLE ====================

/// BLE GATT server and GAP commands.
///
/// Every command except `init_layer`, `send_response` and `close` is
/// asynchronous and completes with the matching [`BleDriverEvent`].
pub trait BleDriver: Send {
    /// Bring up the controller and host stack. Synchronous.
    fn init_layer(&mut self) -> Result<(), DriverError>;

    fn register_app(&mut self, app_id: u16) -> Result<(), DriverError>;

    fn create_attribute_table(&mut self, table: &[AttributeEntry]) -> Result<(), DriverError>;

    fn start_service(&mut self, service_handle: u16) -> Result<(), DriverError>;

    fn stop_service(&mut self, service_handle: u16) -> Result<(), DriverError>;

    /// Set the device name and both advertising payloads.
    fn configure_advertising(&mut self, data: &AdvertisingData) -> Result<(), DriverError>;

    fn start_advertising(&mut self, params: &AdvertisingParams) -> Result<(), DriverError>;

    fn stop_advertising(&mut self) -> Result<(), DriverError>;

    /// Send an indication. Completes with `IndicationConfirmed`.
    fn send_indication(
        &mut self,
        conn_id: u16,
        attr_handle: u16,
        data: &[u8],
    ) -> Result<(), DriverError>;

    /// Answer a read or write request.
    fn send_response(
        &mut self,
        conn_id: u16,
        trans_id: u32,
        status: GattStatus,
        value: &[u8],
    ) -> Result<(), DriverError>;

    /// Drop a connection. Completes with `Disconnected`.
    fn close(&mut self, conn_id: u16) -> Result<(), DriverError>;
}

/// Completions and GATT server callbacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BleDriverEvent {
    AppRegistered(Result<(), DriverError>),
    /// One handle per table entry, in table order.
    AttributeTableCreated(Result<Vec<u16>, DriverError>),
    ServiceStarted(Result<(), DriverError>),
    ServiceStopped(Result<(), DriverError>),
    AdvertisingConfigured(Result<(), DriverError>),
    AdvertisingStarted(Result<(), DriverError>),
    AdvertisingStopped(Result<(), DriverError>),
    Connected {
        conn_id: u16,
    },
    Disconnected {
        conn_id: u16,
        reason: DisconnectReason,
    },
    MtuChanged {
        conn_id: u16,
        mtu: u16,
    },
    Write(GattWrite),
    Read(GattRead),
    /// Outcome of an indication. `Err` carries the ATT status code.
    IndicationConfirmed {
        conn_id: u16,
        status: Result<(), u16>,
    },
}

// ==================== Service Tunnel ====================

/// Outbound tunnel to the remote service.
pub trait TunnelAgent: Send {
    /// Begin establishing the tunnel. Progress arrives as [`TunnelNotification`].
    fn start(&mut self) -> Result<(), DriverError>;

    fn stop(&mut self);
}

/// Tunnel status reported by the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelNotification {
    Down,
    PrimaryConnError(DriverError),
    PrimaryUp,
}

// ==================== Configuration Store ====================

/// Persistent device configuration.
pub trait ConfigStore: Send {
    /// 64-bit device identifier.
    fn device_id(&self) -> u64;

    fn station_credentials(&self) -> Option<WifiConfig>;

    fn set_station_credentials(&mut self, credentials: &WifiConfig) -> Result<(), DriverError>;

    fn clear_station_credentials(&mut self) -> Result<(), DriverError>;

    /// Custom BLE device name, if one was set.
    fn device_name(&self) -> Option<String>;

    fn set_device_name(&mut self, name: Option<&str>) -> Result<(), DriverError>;

    /// SSID for the device's own access point.
    fn ap_ssid(&self, prefix: &str) -> String {
        format!("{}{:04X}", prefix, self.device_id() & 0xFFFF)
    }
}

// ==================== Provisioning ====================

/// Provisioning facts consumed as opaque booleans.
pub trait ProvisioningState: Send {
    fn is_member_of_fabric(&self) -> bool;

    fn is_service_provisioned(&self) -> bool;

    fn is_paired_to_account(&self) -> bool;
}

// ==================== Delivery ====================

/// Any asynchronous driver output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverEvent {
    Wifi(WifiEvent),
    Ble(BleDriverEvent),
    Tunnel(TunnelNotification),
}

impl DriverEvent {
    /// Hand the event to the orchestrator. The caller holds the stack lock.
    ///
    /// WiFi and tunnel notifications are queued. BLE callbacks are applied
    /// in place and queue their own follow-up work.
    pub fn deliver(self, manager: &mut ConnectivityManager) -> Result<(), ConnectivityError> {
        match self {
            Self::Wifi(event) => manager.post_wifi_event(event),
            Self::Ble(event) => {
                manager.handle_ble_event(event);
                Ok(())
            }
            Self::Tunnel(notification) => manager.post_tunnel_notification(notification),
        }
    }
}
