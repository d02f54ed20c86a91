//! BLE transport.
//!
//! A single GATT service carries the commissioning protocol: peers write to
//! the RX characteristic and receive indications on TX.
//!
//! # Components
//!
//! - [`gatt`] - attribute table, UUIDs and request types
//! - [`advertising`] - advertising payloads and parameter selection
//! - [`pool`] - fixed-capacity connection table
//! - [`transport`] - the state machine tying them together

pub mod advertising;
pub mod gatt;
pub mod pool;
pub mod transport;

pub use pool::{BleConnection, ConnectionPool};
pub use transport::{BleTransport, ControlFlags};
