//! Configuration persistence for host (development) builds.
//!
//! Keeps the device id, station credentials and custom BLE name in a JSON
//! file so a simulated device looks the same across runs. Uses
//! `~/.connmgr-esp32/store.json` by default.
//!
//! # Usage
//!
//! ```ignore
//! use connmgr_esp32::persistence_host::FileConfigStore;
//!
//! let store = FileConfigStore::open_default()?;
//! log::info!("Device id: {:016X}", store.device_id());
//! ```

use crate::config::WifiConfig;
use crate::driver::ConfigStore;
use crate::error::DriverError;
use log::{debug, info, warn};
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Status code reported when the store file cannot be written.
const WRITE_FAILED: i32 = -1;

/// Get the default store file path.
///
/// Returns `~/.connmgr-esp32/store.json`
pub fn default_store_path() -> io::Result<PathBuf> {
    let home = std::env::var("HOME")
        .map_err(|_| io::Error::new(io::ErrorKind::NotFound, "HOME not set"))?;
    Ok(PathBuf::from(home).join(".connmgr-esp32").join("store.json"))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoreContents {
    device_id: u64,
    #[serde(default)]
    credentials: Option<WifiConfig>,
    #[serde(default)]
    device_name: Option<String>,
}

/// [`ConfigStore`] backed by a JSON file.
///
/// Every mutation is written through to disk.
pub struct FileConfigStore {
    path: PathBuf,
    contents: StoreContents,
}

impl FileConfigStore {
    /// Open the store at `path`, creating it with a random device id if it
    /// does not exist or cannot be parsed.
    pub fn open(path: &Path) -> io::Result<Self> {
        if let Some(contents) = load_contents(path) {
            info!("Loaded device store from {:?}", path);
            return Ok(Self {
                path: path.to_path_buf(),
                contents,
            });
        }

        let device_id = OsRng.next_u64();
        info!("Creating device store with id {:016X}", device_id);
        let store = Self {
            path: path.to_path_buf(),
            contents: StoreContents {
                device_id,
                credentials: None,
                device_name: None,
            },
        };
        store.save()?;
        Ok(store)
    }

    /// Open the store at the default path.
    pub fn open_default() -> io::Result<Self> {
        let path = default_store_path()?;
        Self::open(&path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.contents)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(&self.path, json)
    }

    fn commit(&self, context: &'static str) -> Result<(), DriverError> {
        self.save().map_err(|e| {
            warn!("Failed to write device store {:?}: {}", self.path, e);
            DriverError::new(context, e.raw_os_error().unwrap_or(WRITE_FAILED))
        })
    }
}

fn load_contents(path: &Path) -> Option<StoreContents> {
    let json = match fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!("No device store found at {:?}", path);
            return None;
        }
        Err(e) => {
            warn!("Failed to read device store: {}", e);
            return None;
        }
    };

    match serde_json::from_str(&json) {
        Ok(contents) => Some(contents),
        Err(e) => {
            log::error!("Failed to parse device store: {}", e);
            None
        }
    }
}

impl ConfigStore for FileConfigStore {
    fn device_id(&self) -> u64 {
        self.contents.device_id
    }

    fn station_credentials(&self) -> Option<WifiConfig> {
        self.contents.credentials.clone()
    }

    fn set_station_credentials(&mut self, credentials: &WifiConfig) -> Result<(), DriverError> {
        self.contents.credentials = Some(credentials.clone());
        self.commit("store credentials")
    }

    fn clear_station_credentials(&mut self) -> Result<(), DriverError> {
        self.contents.credentials = None;
        self.commit("clear credentials")
    }

    fn device_name(&self) -> Option<String> {
        self.contents.device_name.clone()
    }

    fn set_device_name(&mut self, name: Option<&str>) -> Result<(), DriverError> {
        self.contents.device_name = name.map(str::to_string);
        self.commit("store device name")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::atomic::{AtomicU32, Ordering};

    // Counter to ensure unique test files even in parallel execution
    static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

    fn unique_store_path() -> PathBuf {
        let id = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        let pid = std::process::id();
        env::temp_dir().join(format!("connmgr-test-{}-{}", pid, id)).join("store.json")
    }

    #[test]
    fn test_device_id_stable_across_opens() {
        let path = unique_store_path();

        let first = FileConfigStore::open(&path).expect("Failed to create");
        let second = FileConfigStore::open(&path).expect("Failed to load");
        assert_eq!(first.device_id(), second.device_id());

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_credentials_persist() {
        let path = unique_store_path();

        let mut store = FileConfigStore::open(&path).unwrap();
        let creds = WifiConfig::new("HomeNet", "password123").unwrap();
        store.set_station_credentials(&creds).unwrap();
        store.set_device_name(Some("Kitchen")).unwrap();

        let reopened = FileConfigStore::open(&path).unwrap();
        assert_eq!(reopened.station_credentials(), Some(creds));
        assert_eq!(reopened.device_name().as_deref(), Some("Kitchen"));

        let mut reopened = reopened;
        reopened.clear_station_credentials().unwrap();
        reopened.set_device_name(None).unwrap();
        let cleared = FileConfigStore::open(&path).unwrap();
        assert!(cleared.station_credentials().is_none());
        assert!(cleared.device_name().is_none());

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_corrupt_file_replaced() {
        let path = unique_store_path();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "not json").unwrap();

        let store = FileConfigStore::open(&path).unwrap();
        assert!(store.station_credentials().is_none());
        assert!(load_contents(&path).is_some());

        let _ = fs::remove_file(&path);
    }
}
