//! Advertising payloads and parameters.
//!
//! The primary packet carries the flags, the 128-bit service UUID and the
//! device name. The scan response carries the service data block that lets a
//! commissioning app identify the device before connecting.

use super::gatt::{SERVICE_UUID, SHORT_SERVICE_UUID};

/// General discoverable mode.
pub const FLAG_GENERAL_DISCOVERABLE: u8 = 0x02;
/// BR/EDR not supported.
pub const FLAG_BREDR_NOT_SUPPORTED: u8 = 0x04;

/// Flags byte of the primary advertising packet.
pub const ADVERTISING_FLAGS: u8 = FLAG_GENERAL_DISCOVERABLE | FLAG_BREDR_NOT_SUPPORTED;

/// Names must be strictly shorter than this.
pub const MAX_DEVICE_NAME_LEN: usize = 16;

/// Length of the service data block after the UUID and length byte.
pub const SERVICE_DATA_BLOCK_LEN: u8 = 16;

/// Total service data length: short UUID, length byte, block.
pub const SERVICE_DATA_LEN: usize = 2 + 1 + SERVICE_DATA_BLOCK_LEN as usize;

const SERVICE_DATA_BLOCK_TYPE: u8 = 1;
const SERVICE_DATA_MAJOR_VERSION: u8 = 0;
const SERVICE_DATA_MINOR_VERSION: u8 = 1;

/// Device identification carried in the scan response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceData {
    pub vendor_id: u16,
    pub product_id: u16,
    pub device_id: u64,
    pub paired: bool,
}

impl ServiceData {
    /// Encode to the on-air layout.
    ///
    /// ```text
    /// [0..2]   short service UUID
    /// [2]      block length (16)
    /// [3]      block type (1)
    /// [4]      major version
    /// [5]      minor version
    /// [6..8]   vendor id (LE)
    /// [8..10]  product id (LE)
    /// [10..18] device id (LE)
    /// [18]     pairing status
    /// ```
    pub fn encode(&self) -> [u8; SERVICE_DATA_LEN] {
        let mut buf = [0u8; SERVICE_DATA_LEN];
        buf[0..2].copy_from_slice(&SHORT_SERVICE_UUID);
        buf[2] = SERVICE_DATA_BLOCK_LEN;
        buf[3] = SERVICE_DATA_BLOCK_TYPE;
        buf[4] = SERVICE_DATA_MAJOR_VERSION;
        buf[5] = SERVICE_DATA_MINOR_VERSION;
        buf[6..8].copy_from_slice(&self.vendor_id.to_le_bytes());
        buf[8..10].copy_from_slice(&self.product_id.to_le_bytes());
        buf[10..18].copy_from_slice(&self.device_id.to_le_bytes());
        buf[18] = u8::from(self.paired);
        buf
    }
}

/// Contents of the advertising and scan response packets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertisingData {
    pub flags: u8,
    pub service_uuid: [u8; 16],
    pub device_name: String,
    pub scan_response: [u8; SERVICE_DATA_LEN],
}

impl AdvertisingData {
    pub fn new(device_name: impl Into<String>, service_data: &ServiceData) -> Self {
        Self {
            flags: ADVERTISING_FLAGS,
            service_uuid: SERVICE_UUID,
            device_name: device_name.into(),
            scan_response: service_data.encode(),
        }
    }

    /// Raw advertising packet: flags, the 128-bit service UUID and the
    /// local name.
    ///
    /// A name that does not fit in [`MAX_AD_PAYLOAD_LEN`] is cut and sent as
    /// a shortened name.
    pub fn advertising_payload(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(MAX_AD_PAYLOAD_LEN);
        buf.extend_from_slice(&[2, AD_TYPE_FLAGS, self.flags]);
        buf.push(self.service_uuid.len() as u8 + 1);
        buf.push(AD_TYPE_UUID128_COMPLETE);
        buf.extend_from_slice(&self.service_uuid);

        let room = MAX_AD_PAYLOAD_LEN - buf.len() - 2;
        let name = self.device_name.as_bytes();
        let (ad_type, name) = if name.len() > room {
            (AD_TYPE_NAME_SHORTENED, &name[..room])
        } else {
            (AD_TYPE_NAME_COMPLETE, name)
        };
        buf.push(name.len() as u8 + 1);
        buf.push(ad_type);
        buf.extend_from_slice(name);
        buf
    }

    /// Raw scan response packet: one 16-bit service data structure.
    pub fn scan_response_payload(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(SERVICE_DATA_LEN + 2);
        buf.push(SERVICE_DATA_LEN as u8 + 1);
        buf.push(AD_TYPE_SERVICE_DATA16);
        buf.extend_from_slice(&self.scan_response);
        buf
    }
}

/// Legacy advertising PDU payload limit.
pub const MAX_AD_PAYLOAD_LEN: usize = 31;

const AD_TYPE_FLAGS: u8 = 0x01;
const AD_TYPE_UUID128_COMPLETE: u8 = 0x07;
const AD_TYPE_NAME_SHORTENED: u8 = 0x08;
const AD_TYPE_NAME_COMPLETE: u8 = 0x09;
const AD_TYPE_SERVICE_DATA16: u8 = 0x16;

/// Whether peers may connect in response to the advertisement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvertisingKind {
    /// Connectable undirected.
    Connectable,
    /// Non-connectable undirected, used when the pool is full.
    NonConnectable,
}

/// Interval and type of an advertising run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdvertisingParams {
    /// Interval in 0.625 ms units (min and max are equal).
    pub interval: u16,
    pub kind: AdvertisingKind,
}

impl AdvertisingParams {
    /// Choose parameters for the current connection count.
    ///
    /// Fast advertising applies only while nothing is connected and the
    /// device is not paired to an account.
    pub fn select(
        active_connections: usize,
        capacity: usize,
        paired: bool,
        fast_interval: u16,
        slow_interval: u16,
    ) -> Self {
        let fast = active_connections == 0 && !paired;
        let kind = if active_connections < capacity {
            AdvertisingKind::Connectable
        } else {
            AdvertisingKind::NonConnectable
        };
        Self {
            interval: if fast { fast_interval } else { slow_interval },
            kind,
        }
    }

    /// Interval in milliseconds, for logging.
    pub fn interval_ms(&self) -> u32 {
        u32::from(self.interval) * 10 / 16
    }
}

/// Generated name: prefix plus the low 16 bits of the device id in hex.
pub fn default_device_name(prefix: &str, device_id: u64) -> String {
    let mut name = format!("{}{:04X}", prefix, device_id & 0xFFFF);
    while name.len() >= MAX_DEVICE_NAME_LEN {
        name.pop();
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_data_layout() {
        let data = ServiceData {
            vendor_id: 0x235A,
            product_id: 0x0102,
            device_id: 0x1122_3344_5566_7788,
            paired: true,
        };
        let buf = data.encode();
        assert_eq!(buf.len(), 19);
        assert_eq!(&buf[0..2], &[0xAF, 0xFE]);
        assert_eq!(buf[2], 16);
        assert_eq!(buf[3], 1);
        assert_eq!(buf[4], 0);
        assert_eq!(buf[5], 1);
        assert_eq!(&buf[6..8], &[0x5A, 0x23]);
        assert_eq!(&buf[8..10], &[0x02, 0x01]);
        assert_eq!(
            &buf[10..18],
            &[0x88, 0x77, 0x66, 0x55, 0x44, 0x33, 0x22, 0x11]
        );
        assert_eq!(buf[18], 1);
    }

    #[test]
    fn test_unpaired_status_byte() {
        let data = ServiceData {
            vendor_id: 1,
            product_id: 2,
            device_id: 3,
            paired: false,
        };
        assert_eq!(data.encode()[18], 0);
    }

    #[test]
    fn test_advertising_data_contents() {
        let data = AdvertisingData::new(
            "NEST-ABCD",
            &ServiceData {
                vendor_id: 1,
                product_id: 2,
                device_id: 3,
                paired: false,
            },
        );
        assert_eq!(data.flags, 0x06);
        assert_eq!(data.service_uuid, SERVICE_UUID);
        assert_eq!(data.device_name, "NEST-ABCD");
    }

    fn payload_for(name: &str) -> AdvertisingData {
        AdvertisingData::new(
            name,
            &ServiceData {
                vendor_id: 1,
                product_id: 2,
                device_id: 3,
                paired: false,
            },
        )
    }

    #[test]
    fn test_advertising_payload_structures() {
        let data = payload_for("Kitchen");
        let adv = data.advertising_payload();
        assert_eq!(&adv[0..3], &[2, 0x01, 0x06]);
        assert_eq!(&adv[3..5], &[17, 0x07]);
        assert_eq!(&adv[5..21], &SERVICE_UUID);
        assert_eq!(&adv[21..23], &[8, 0x09]);
        assert_eq!(&adv[23..], b"Kitchen");

        let scan = data.scan_response_payload();
        assert_eq!(scan.len(), 21);
        assert_eq!(&scan[0..2], &[20, 0x16]);
        assert_eq!(&scan[2..], &data.scan_response);
    }

    #[test]
    fn test_generated_name_is_shortened() {
        let adv = payload_for("NEST-ABCD").advertising_payload();
        assert_eq!(adv.len(), MAX_AD_PAYLOAD_LEN);
        assert_eq!(&adv[21..23], &[9, 0x08]);
        assert_eq!(&adv[23..], b"NEST-ABC");
    }

    #[test]
    fn test_long_name_fits_packet() {
        let adv = payload_for(&"X".repeat(40)).advertising_payload();
        assert_eq!(adv.len(), MAX_AD_PAYLOAD_LEN);
        assert_eq!(adv[21] as usize, adv.len() - 22);
        assert_eq!(adv[22], 0x08);
    }

    // ==================== Parameter Selection Tests ====================

    #[test]
    fn test_fast_when_idle_and_unpaired() {
        let params = AdvertisingParams::select(0, 2, false, 64, 800);
        assert_eq!(params.interval, 64);
        assert_eq!(params.kind, AdvertisingKind::Connectable);
    }

    #[test]
    fn test_slow_when_connected_or_paired() {
        assert_eq!(AdvertisingParams::select(1, 2, false, 64, 800).interval, 800);
        assert_eq!(AdvertisingParams::select(0, 2, true, 64, 800).interval, 800);
        assert_eq!(AdvertisingParams::select(1, 2, true, 64, 800).interval, 800);
    }

    #[test]
    fn test_non_connectable_at_capacity() {
        let params = AdvertisingParams::select(2, 2, false, 64, 800);
        assert_eq!(params.kind, AdvertisingKind::NonConnectable);
    }

    #[test]
    fn test_interval_ms() {
        let params = AdvertisingParams::select(0, 1, false, 160, 800);
        assert_eq!(params.interval_ms(), 100);
    }

    #[test]
    fn test_default_device_name() {
        assert_eq!(default_device_name("NEST-", 0x18B4_3000_0012_AB3F), "NEST-AB3F");
        assert_eq!(default_device_name("", 0x7), "0007");
        let long = default_device_name("A-VERY-LONG-PREFIX-", 1);
        assert!(long.len() < MAX_DEVICE_NAME_LEN);
    }
}
