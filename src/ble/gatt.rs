//! GATT attribute table and request types for the BLE transport service.
//!
//! The table layout is fixed. Handles come back from the stack in table
//! order, so the index of each entry is how its handle is found.
//!
//! ```text
//! [0] Primary service declaration  (transport service UUID)
//! [1] RX characteristic declaration (write)
//! [2] RX characteristic value       (write, 512 bytes)
//! [3] TX characteristic declaration (read, indicate)
//! [4] TX characteristic value       (read, 512 bytes)
//! [5] TX CCCD                       (read/write, 2 bytes)
//! ```

use crate::events::ConnectionErrorReason;

/// Application id used when registering with the GATT server.
pub const APP_ID: u16 = 0x235A;

/// 128-bit transport service UUID, little-endian byte order.
///
/// `0000FEAF-0000-1000-8000-00805F9B34FB`
pub const SERVICE_UUID: [u8; 16] = [
    0xFB, 0x34, 0x9B, 0x5F, 0x80, 0x00, 0x00, 0x80, 0x00, 0x10, 0x00, 0x00, 0xAF, 0xFE, 0x00, 0x00,
];

/// 16-bit alias of [`SERVICE_UUID`], little-endian.
pub const SHORT_SERVICE_UUID: [u8; 2] = [0xAF, 0xFE];

/// RX characteristic UUID (`18EE2EF5-263D-4559-959F-4F9C429F9D11`), little-endian.
pub const RX_CHAR_UUID: [u8; 16] = [
    0x11, 0x9D, 0x9F, 0x42, 0x9C, 0x4F, 0x9F, 0x95, 0x59, 0x45, 0x3D, 0x26, 0xF5, 0x2E, 0xEE, 0x18,
];

/// TX characteristic UUID (`18EE2EF5-263D-4559-959F-4F9C429F9D12`), little-endian.
pub const TX_CHAR_UUID: [u8; 16] = [
    0x12, 0x9D, 0x9F, 0x42, 0x9C, 0x4F, 0x9F, 0x95, 0x59, 0x45, 0x3D, 0x26, 0xF5, 0x2E, 0xEE, 0x18,
];

/// Maximum length of the RX and TX characteristic values.
pub const MAX_CHAR_VALUE_LEN: u16 = 512;

/// Number of entries in the attribute table.
pub const ATTRIBUTE_COUNT: usize = 6;

const IDX_SERVICE: usize = 0;
const IDX_RX_VALUE: usize = 2;
const IDX_TX_VALUE: usize = 4;
const IDX_TX_CCCD: usize = 5;

/// Characteristic property bits, as carried in a characteristic declaration.
pub mod props {
    pub const READ: u8 = 0x02;
    pub const WRITE: u8 = 0x08;
    pub const NOTIFY: u8 = 0x10;
    pub const INDICATE: u8 = 0x20;
}

/// Who answers requests for an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseMode {
    /// The stack answers from the stored value.
    Auto,
    /// The request is forwarded to the transport.
    ByApp,
}

/// One attribute in the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attribute {
    PrimaryService { uuid: [u8; 16] },
    CharacteristicDeclaration { properties: u8 },
    CharacteristicValue {
        uuid: [u8; 16],
        readable: bool,
        writable: bool,
        max_len: u16,
    },
    ClientConfigDescriptor,
}

/// Attribute plus its response mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeEntry {
    pub attribute: Attribute,
    pub response: ResponseMode,
}

/// The transport service attribute table.
pub fn attribute_table() -> [AttributeEntry; ATTRIBUTE_COUNT] {
    [
        AttributeEntry {
            attribute: Attribute::PrimaryService { uuid: SERVICE_UUID },
            response: ResponseMode::Auto,
        },
        AttributeEntry {
            attribute: Attribute::CharacteristicDeclaration {
                properties: props::WRITE,
            },
            response: ResponseMode::Auto,
        },
        AttributeEntry {
            attribute: Attribute::CharacteristicValue {
                uuid: RX_CHAR_UUID,
                readable: false,
                writable: true,
                max_len: MAX_CHAR_VALUE_LEN,
            },
            response: ResponseMode::ByApp,
        },
        AttributeEntry {
            attribute: Attribute::CharacteristicDeclaration {
                properties: props::READ | props::INDICATE,
            },
            response: ResponseMode::Auto,
        },
        AttributeEntry {
            attribute: Attribute::CharacteristicValue {
                uuid: TX_CHAR_UUID,
                readable: true,
                writable: false,
                max_len: MAX_CHAR_VALUE_LEN,
            },
            response: ResponseMode::ByApp,
        },
        AttributeEntry {
            attribute: Attribute::ClientConfigDescriptor,
            response: ResponseMode::ByApp,
        },
    ]
}

/// Handles retained after the table is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AttributeHandles {
    pub service: u16,
    pub rx_value: u16,
    pub tx_value: u16,
    pub tx_cccd: u16,
}

impl AttributeHandles {
    /// Pick the retained handles out of the registration result.
    ///
    /// Returns `None` unless exactly one handle per table entry was returned.
    pub fn from_registered(handles: &[u16]) -> Option<Self> {
        if handles.len() != ATTRIBUTE_COUNT {
            return None;
        }
        Some(Self {
            service: handles[IDX_SERVICE],
            rx_value: handles[IDX_RX_VALUE],
            tx_value: handles[IDX_TX_VALUE],
            tx_cccd: handles[IDX_TX_CCCD],
        })
    }
}

/// ATT status carried in a read or write response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GattStatus {
    Ok,
    InvalidHandle,
    ReadNotPermitted,
    WriteNotPermitted,
    RequestNotSupported,
    InternalError,
}

/// A write request from a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattWrite {
    pub conn_id: u16,
    pub trans_id: u32,
    pub handle: u16,
    pub offset: u16,
    pub value: Vec<u8>,
    /// Part of a prepared (long) write.
    pub is_prepared: bool,
    /// The peer expects a write response.
    pub need_response: bool,
}

/// A read request from a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GattRead {
    pub conn_id: u16,
    pub trans_id: u32,
    pub handle: u16,
}

/// Disconnect reason reported by the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Remote user terminated the connection.
    PeerUser,
    /// Connection terminated by this host.
    LocalHost,
    /// Supervision timeout or any other HCI reason code.
    Other(u8),
}

impl DisconnectReason {
    /// Reason reported to the protocol layer.
    pub fn to_error_reason(self) -> ConnectionErrorReason {
        match self {
            Self::PeerUser => ConnectionErrorReason::RemoteDeviceDisconnected,
            Self::LocalHost => ConnectionErrorReason::AppClosedConnection,
            Self::Other(_) => ConnectionErrorReason::ProtocolAbort,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_layout() {
        let table = attribute_table();
        assert_eq!(table.len(), ATTRIBUTE_COUNT);
        assert!(matches!(
            table[0].attribute,
            Attribute::PrimaryService { uuid } if uuid == SERVICE_UUID
        ));
        assert!(matches!(
            table[2].attribute,
            Attribute::CharacteristicValue { uuid, writable: true, readable: false, max_len: 512 }
                if uuid == RX_CHAR_UUID
        ));
        assert!(matches!(
            table[4].attribute,
            Attribute::CharacteristicValue { uuid, readable: true, writable: false, .. }
                if uuid == TX_CHAR_UUID
        ));
        assert_eq!(table[5].attribute, Attribute::ClientConfigDescriptor);
        assert_eq!(table[5].response, ResponseMode::ByApp);
    }

    #[test]
    fn test_rx_tx_uuids_differ_in_first_byte_only() {
        assert_eq!(RX_CHAR_UUID[1..], TX_CHAR_UUID[1..]);
        assert_eq!(RX_CHAR_UUID[0], 0x11);
        assert_eq!(TX_CHAR_UUID[0], 0x12);
    }

    #[test]
    fn test_short_uuid_embedded_in_service_uuid() {
        assert_eq!(SERVICE_UUID[12..14], SHORT_SERVICE_UUID);
    }

    #[test]
    fn test_handles_from_registration() {
        let handles = AttributeHandles::from_registered(&[40, 41, 42, 43, 44, 45]).unwrap();
        assert_eq!(
            handles,
            AttributeHandles {
                service: 40,
                rx_value: 42,
                tx_value: 44,
                tx_cccd: 45,
            }
        );
        assert!(AttributeHandles::from_registered(&[1, 2, 3]).is_none());
    }

    #[test]
    fn test_disconnect_reason_mapping() {
        assert_eq!(
            DisconnectReason::PeerUser.to_error_reason(),
            ConnectionErrorReason::RemoteDeviceDisconnected
        );
        assert_eq!(
            DisconnectReason::LocalHost.to_error_reason(),
            ConnectionErrorReason::AppClosedConnection
        );
        assert_eq!(
            DisconnectReason::Other(0x08).to_error_reason(),
            ConnectionErrorReason::ProtocolAbort
        );
    }
}
