//! Station credentials.
//!
//! Platform-independent so the validation rules can be tested on the host.
//! The same type is persisted by the configuration store and handed to the
//! WiFi driver when the station state machine issues a connect command.
//!
//! # Example
//!
//! ```
//! use connmgr_esp32::config::WifiConfig;
//!
//! let config = WifiConfig::new("MyNetwork", "MyPassword").unwrap();
//! assert!(!config.is_open());
//! assert!(WifiConfig::new("", "MyPassword").is_err());
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::Zeroize;

/// Maximum SSID length per IEEE 802.11 standard.
pub const MAX_SSID_LEN: usize = 32;

/// Maximum password length for WPA2.
pub const MAX_PASSWORD_LEN: usize = 64;

/// Minimum password length for WPA2.
pub const MIN_PASSWORD_LEN: usize = 8;

/// WiFi credentials for joining an access point.
///
/// The password is wiped from memory when the value is dropped.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WifiConfig {
    /// Network SSID (1-32 bytes).
    pub ssid: String,
    /// Network password (8-64 bytes for WPA2, empty for open networks).
    pub password: String,
}

impl WifiConfig {
    /// Create validated credentials.
    pub fn new(
        ssid: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, CredentialsError> {
        let config = Self {
            ssid: ssid.into(),
            password: password.into(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Credentials for an open network (no password).
    pub fn open(ssid: impl Into<String>) -> Result<Self, CredentialsError> {
        Self::new(ssid, String::new())
    }

    /// Check SSID and password lengths.
    pub fn validate(&self) -> Result<(), CredentialsError> {
        if self.ssid.is_empty() {
            return Err(CredentialsError::SsidEmpty);
        }
        if self.ssid.len() > MAX_SSID_LEN {
            return Err(CredentialsError::SsidTooLong {
                len: self.ssid.len(),
                max: MAX_SSID_LEN,
            });
        }

        // Empty is OK for open networks
        if !self.password.is_empty() && self.password.len() < MIN_PASSWORD_LEN {
            return Err(CredentialsError::PasswordTooShort {
                len: self.password.len(),
                min: MIN_PASSWORD_LEN,
            });
        }
        if self.password.len() > MAX_PASSWORD_LEN {
            return Err(CredentialsError::PasswordTooLong {
                len: self.password.len(),
                max: MAX_PASSWORD_LEN,
            });
        }

        Ok(())
    }

    /// Check if this is an open network (no password).
    pub fn is_open(&self) -> bool {
        self.password.is_empty()
    }
}

impl Drop for WifiConfig {
    fn drop(&mut self) {
        self.password.zeroize();
    }
}

// Never print the password, not even in debug logs.
impl fmt::Debug for WifiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WifiConfig")
            .field("ssid", &self.ssid)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Reasons credentials are rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialsError {
    /// SSID is empty.
    SsidEmpty,
    /// SSID exceeds maximum length.
    SsidTooLong { len: usize, max: usize },
    /// Password is too short for WPA2.
    PasswordTooShort { len: usize, min: usize },
    /// Password exceeds maximum length.
    PasswordTooLong { len: usize, max: usize },
}

impl fmt::Display for CredentialsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SsidEmpty => write!(f, "SSID cannot be empty"),
            Self::SsidTooLong { len, max } => {
                write!(f, "SSID too long: {} bytes (max {})", len, max)
            }
            Self::PasswordTooShort { len, min } => {
                write!(f, "password too short: {} bytes (min {})", len, min)
            }
            Self::PasswordTooLong { len, max } => {
                write!(f, "password too long: {} bytes (max {})", len, max)
            }
        }
    }
}

impl std::error::Error for CredentialsError {}
