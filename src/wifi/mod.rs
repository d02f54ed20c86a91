//! WiFi state machines.
//!
//! # Components
//!
//! - [`station`] - station association with fixed-interval reconnect backoff
//! - [`ap`] - the device's own access point, including on-demand activation
//!
//! Credential types live in [`crate::config`].

pub mod ap;
pub mod station;

pub use ap::{ApMachine, ApState};
pub use station::{StationEdge, StationMachine, StationState};
