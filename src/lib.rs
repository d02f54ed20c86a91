//! Connectivity orchestrator for ESP32 devices.
//!
//! Drives the WiFi station and soft-AP, a BLE GATT transport with a
//! connection pool, and a service tunnel from one single-threaded event
//! loop. Radio and network access goes through the collaborator traits in
//! [`driver`], so everything except [`platform`] builds and runs on the host.
//!
//! # Example
//!
//! ```
//! use connmgr_esp32::config::Settings;
//! use connmgr_esp32::driver::sim::SimRig;
//! use connmgr_esp32::manager::ConnectivityManager;
//! use std::sync::Arc;
//!
//! let rig = SimRig::new(0x1234);
//! let mut manager = ConnectivityManager::new(
//!     Settings::default(),
//!     rig.collaborators(),
//!     Arc::new(rig.clock.clone()),
//! )
//! .unwrap();
//! manager.init().unwrap();
//! rig.settle(&mut manager);
//! assert!(manager.status().ble_advertising);
//! ```

pub mod ble;
pub mod bridge;
pub mod config;
pub mod connectivity;
pub mod driver;
pub mod error;
pub mod event_loop;
pub mod events;
pub mod manager;
#[cfg(not(feature = "esp32"))]
pub mod persistence_host;
#[cfg(feature = "esp32")]
pub mod platform;
pub mod status_server;
pub mod wifi;

#[cfg(test)]
mod scenario_tests;

// Re-export commonly used items
pub use bridge::Bridge;
pub use config::{ApMode, BleServiceMode, Settings, StationMode, TunnelMode, WifiConfig};
pub use error::{ConnectivityError, DriverError};
pub use events::DeviceEvent;
pub use manager::{ConnectivityManager, ConnectivityStatus};
pub use status_server::StatusServer;
