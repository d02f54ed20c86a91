//! NVS persistence for the configuration store.
//!
//! Values survive reboots in the `connmgr` namespace. Credentials are kept
//! as a JSON blob; the device name as a plain string.

use crate::config::{WifiConfig, MAX_PASSWORD_LEN, MAX_SSID_LEN};
use crate::driver::ConfigStore;
use crate::error::DriverError;
use esp_idf_svc::nvs::{EspNvs, EspNvsPartition, NvsDefault};
use log::warn;

/// NVS namespace for connectivity configuration.
const NVS_NAMESPACE: &str = "connmgr";

const KEY_CREDENTIALS: &str = "sta_creds";
const KEY_DEVICE_NAME: &str = "dev_name";

/// JSON of the longest credentials plus field names and escapes.
const MAX_CREDENTIALS_LEN: usize = 2 * (MAX_SSID_LEN + MAX_PASSWORD_LEN) + 64;

const MAX_NAME_BUFFER: usize = 64;

/// [`ConfigStore`] backed by the default NVS partition.
pub struct NvsConfigStore {
    nvs: EspNvs<NvsDefault>,
    device_id: u64,
}

impl NvsConfigStore {
    /// Open the namespace. The device id comes from the factory MAC.
    pub fn open() -> Result<Self, DriverError> {
        let partition = EspNvsPartition::<NvsDefault>::take()?;
        let nvs = EspNvs::new(partition, NVS_NAMESPACE, true)?;
        Ok(Self {
            nvs,
            device_id: factory_device_id()?,
        })
    }
}

fn factory_device_id() -> Result<u64, DriverError> {
    let mut mac = [0u8; 6];
    // SAFETY: the buffer is the 6 bytes the call writes.
    esp_idf_sys::esp!(unsafe { esp_idf_sys::esp_efuse_mac_get_default(mac.as_mut_ptr()) })?;
    Ok(mac.iter().fold(0u64, |id, byte| (id << 8) | u64::from(*byte)))
}

impl ConfigStore for NvsConfigStore {
    fn device_id(&self) -> u64 {
        self.device_id
    }

    fn station_credentials(&self) -> Option<WifiConfig> {
        let mut buf = [0u8; MAX_CREDENTIALS_LEN];
        let bytes = self.nvs.get_raw(KEY_CREDENTIALS, &mut buf).ok()??;
        match serde_json::from_slice::<WifiConfig>(bytes) {
            Ok(config) if config.validate().is_ok() => Some(config),
            _ => {
                warn!("Stored station credentials are corrupted");
                None
            }
        }
    }

    fn set_station_credentials(&mut self, credentials: &WifiConfig) -> Result<(), DriverError> {
        let bytes = serde_json::to_vec(credentials).map_err(|_| {
            DriverError::new("encode credentials", esp_idf_sys::ESP_ERR_INVALID_ARG as i32)
        })?;
        self.nvs.set_raw(KEY_CREDENTIALS, &bytes)?;
        Ok(())
    }

    fn clear_station_credentials(&mut self) -> Result<(), DriverError> {
        self.nvs.remove(KEY_CREDENTIALS)?;
        Ok(())
    }

    fn device_name(&self) -> Option<String> {
        let mut buf = [0u8; MAX_NAME_BUFFER];
        self.nvs
            .get_str(KEY_DEVICE_NAME, &mut buf)
            .ok()?
            .map(str::to_string)
    }

    fn set_device_name(&mut self, name: Option<&str>) -> Result<(), DriverError> {
        match name {
            Some(name) => self.nvs.set_str(KEY_DEVICE_NAME, name)?,
            None => {
                self.nvs.remove(KEY_DEVICE_NAME)?;
            }
        }
        Ok(())
    }
}
