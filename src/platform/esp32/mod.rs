//! ESP-IDF bindings for the collaborator interfaces.
//!
//! # Components
//!
//! - [`wifi`] - `EspWifi` station and soft-AP driver
//! - [`ble`] - NimBLE GATT server and advertiser
//! - [`store`] - NVS-backed configuration store

pub mod ble;
pub mod store;
pub mod wifi;

pub use ble::NimbleDriver;
pub use store::NvsConfigStore;
pub use wifi::EspWifiDriver;

use crate::driver::{ProvisioningState, TunnelAgent};
use crate::error::DriverError;
use crate::events::{DeviceEvent, EventSink};
use log::info;

/// Sink that writes every device event to the log.
#[derive(Debug, Default)]
pub struct LogSink;

impl EventSink for LogSink {
    fn post(&mut self, event: &DeviceEvent) {
        info!("Device event: {:?}", event);
    }
}

/// Provisioning facts fixed at boot.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedProvisioning {
    pub member: bool,
    pub provisioned: bool,
    pub paired: bool,
}

impl ProvisioningState for FixedProvisioning {
    fn is_member_of_fabric(&self) -> bool {
        self.member
    }

    fn is_service_provisioned(&self) -> bool {
        self.provisioned
    }

    fn is_paired_to_account(&self) -> bool {
        self.paired
    }
}

/// Tunnel agent for builds without a service client.
///
/// Every start attempt fails, so the tunnel mode should stay disabled.
#[derive(Debug, Default)]
pub struct UnavailableTunnel;

impl TunnelAgent for UnavailableTunnel {
    fn start(&mut self) -> Result<(), DriverError> {
        Err(DriverError::new(
            "tunnel start",
            esp_idf_sys::ESP_ERR_NOT_SUPPORTED as i32,
        ))
    }

    fn stop(&mut self) {}
}
