//! Internet, service tunnel and account pairing connectivity.
//!
//! # Components
//!
//! - [`internet`] - IPv4/IPv6 reachability from the station interface
//! - [`tunnel`] - service tunnel start/stop gating
//! - [`pairing`] - account pairing wait for service connectivity

pub mod internet;
pub mod pairing;
pub mod tunnel;
