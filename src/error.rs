//! Error types shared by the orchestration layer.
//!
//! Nothing in this crate is fatal to the process. Each error either rejects a
//! call at the public boundary (bad argument, compiled-out feature, wrong
//! state) or reports a failure that the owning state machine turns into a
//! mode change.

use crate::config::SettingsError;

/// A failure reported by a radio, network or tunnel driver.
///
/// Drivers report a numeric status code (ESP-IDF `esp_err_t` on device) and
/// the command that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverError {
    /// Driver specific status code.
    pub code: i32,
    /// The command that was being issued.
    pub context: &'static str,
}

impl DriverError {
    /// Create a new driver error.
    pub const fn new(context: &'static str, code: i32) -> Self {
        Self { code, context }
    }
}

impl std::fmt::Display for DriverError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} failed (code {})", self.context, self.code)
    }
}

impl std::error::Error for DriverError {}

#[cfg(feature = "esp32")]
impl From<esp_idf_sys::EspError> for DriverError {
    fn from(e: esp_idf_sys::EspError) -> Self {
        Self::new("esp-idf", e.code())
    }
}

/// Errors surfaced by the connectivity orchestrator.
#[derive(Debug)]
pub enum ConnectivityError {
    /// Argument rejected at a public setter. No state was changed.
    InvalidArgument(&'static str),
    /// The requested capability is not supported on this device.
    Unsupported(&'static str),
    /// No free slot in the BLE connection pool.
    PoolExhausted,
    /// The work queue is full, the item was not queued.
    QueueFull,
    /// Operation not valid in the current state.
    IncorrectState,
    /// Connection id not present in the pool.
    UnknownConnection(u16),
    /// A driver command failed.
    Driver(DriverError),
    /// Settings could not be loaded or are invalid.
    Config(SettingsError),
    /// Generic I/O error.
    Io(std::io::Error),
}

impl std::fmt::Display for ConnectivityError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidArgument(msg) => write!(f, "invalid argument: {}", msg),
            Self::Unsupported(what) => write!(f, "unsupported: {}", what),
            Self::PoolExhausted => write!(f, "connection pool exhausted"),
            Self::QueueFull => write!(f, "work queue full"),
            Self::IncorrectState => write!(f, "incorrect state"),
            Self::UnknownConnection(id) => write!(f, "unknown connection {}", id),
            Self::Driver(e) => write!(f, "driver error: {}", e),
            Self::Config(e) => write!(f, "config error: {}", e),
            Self::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for ConnectivityError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Driver(e) => Some(e),
            Self::Config(e) => Some(e),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<DriverError> for ConnectivityError {
    fn from(e: DriverError) -> Self {
        Self::Driver(e)
    }
}

impl From<SettingsError> for ConnectivityError {
    fn from(e: SettingsError) -> Self {
        Self::Config(e)
    }
}

impl From<std::io::Error> for ConnectivityError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}
