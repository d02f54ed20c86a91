//! BLE driver on top of `esp32-nimble`.
//!
//! NimBLE builds its own attribute database, so the driver maps the
//! transport's fixed table onto one service with an RX and a TX
//! characteristic and reports synthetic handles in table order. NimBLE
//! commands complete synchronously; the matching completion event is
//! emitted right after the call returns.
//!
//! Peers subscribe to TX through NimBLE's own CCCD. Each subscription change
//! is reported as a write to the TX CCCD handle so the transport sees the
//! same request flow on every platform.

use crate::ble::advertising::{AdvertisingData, AdvertisingKind, AdvertisingParams};
use crate::ble::gatt::{
    AttributeEntry, DisconnectReason, GattStatus, GattWrite, ATTRIBUTE_COUNT,
};
use crate::driver::{BleDriver, BleDriverEvent, DriverEvent};
use crate::error::DriverError;
use crate::platform::{emit, EventSender};
use esp32_nimble::enums::ConnMode;
use esp32_nimble::utilities::mutex::Mutex;
use esp32_nimble::utilities::BleUuid;
use esp32_nimble::{uuid128, BLECharacteristic, BLEDevice, BLEError, NimbleProperties, NimbleSub};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Transport service, `0000FEAF-0000-1000-8000-00805F9B34FB`.
const SERVICE_UUID: BleUuid = uuid128!("0000FEAF-0000-1000-8000-00805F9B34FB");

/// RX characteristic (peer to device).
const RX_CHAR_UUID: BleUuid = uuid128!("18EE2EF5-263D-4559-959F-4F9C429F9D11");

/// TX characteristic (device to peer).
const TX_CHAR_UUID: BleUuid = uuid128!("18EE2EF5-263D-4559-959F-4F9C429F9D12");

/// Synthetic handles, one per table entry, starting at 1.
const HANDLES: [u16; ATTRIBUTE_COUNT] = [1, 2, 3, 4, 5, 6];
const RX_VALUE_HANDLE: u16 = HANDLES[2];
const TX_CCCD_HANDLE: u16 = HANDLES[5];

const CCCD_INDICATE: [u8; 2] = [0x02, 0x00];
const CCCD_NONE: [u8; 2] = [0x00, 0x00];

/// HCI "remote user terminated connection".
const HCI_REMOTE_USER_TERMINATED: u32 = 0x13;
/// HCI "connection terminated by local host".
const HCI_LOCAL_HOST_TERMINATED: u32 = 0x16;
/// NimBLE offsets HCI reason codes by this base.
const BLE_HS_ERR_HCI_BASE: u32 = 0x200;

fn ble_error(context: &'static str) -> impl Fn(BLEError) -> DriverError {
    move |e| DriverError::new(context, e.code() as i32)
}

fn disconnect_reason(result: &Result<(), BLEError>) -> DisconnectReason {
    let code = match result {
        Ok(()) => return DisconnectReason::LocalHost,
        Err(e) => e.code().wrapping_sub(BLE_HS_ERR_HCI_BASE),
    };
    match code {
        HCI_REMOTE_USER_TERMINATED => DisconnectReason::PeerUser,
        HCI_LOCAL_HOST_TERMINATED => DisconnectReason::LocalHost,
        other => DisconnectReason::Other(other as u8),
    }
}

/// GATT server and advertiser.
pub struct NimbleDriver {
    events: EventSender,
    tx_char: Option<Arc<Mutex<BLECharacteristic>>>,
    trans_ids: Arc<AtomicU32>,
}

impl NimbleDriver {
    pub fn new(events: EventSender) -> Self {
        Self {
            events,
            tx_char: None,
            trans_ids: Arc::new(AtomicU32::new(1)),
        }
    }

    fn complete(&self, event: BleDriverEvent) {
        emit(&self.events, DriverEvent::Ble(event));
    }
}

impl BleDriver for NimbleDriver {
    fn init_layer(&mut self) -> Result<(), DriverError> {
        let device = BLEDevice::take();
        let server = device.get_server();

        let tx = self.events.clone();
        server.on_connect(move |_server, desc| {
            let conn_id = desc.conn_handle();
            emit(&tx, DriverEvent::Ble(BleDriverEvent::Connected { conn_id }));
            emit(
                &tx,
                DriverEvent::Ble(BleDriverEvent::MtuChanged {
                    conn_id,
                    mtu: desc.mtu(),
                }),
            );
        });

        let tx = self.events.clone();
        server.on_disconnect(move |desc, result| {
            emit(
                &tx,
                DriverEvent::Ble(BleDriverEvent::Disconnected {
                    conn_id: desc.conn_handle(),
                    reason: disconnect_reason(&result),
                }),
            );
        });

        info!("NimBLE host initialized");
        Ok(())
    }

    fn register_app(&mut self, app_id: u16) -> Result<(), DriverError> {
        debug!("GATT app {:#06X} registered", app_id);
        self.complete(BleDriverEvent::AppRegistered(Ok(())));
        Ok(())
    }

    fn create_attribute_table(&mut self, table: &[AttributeEntry]) -> Result<(), DriverError> {
        if table.len() != ATTRIBUTE_COUNT {
            return Err(DriverError::new(
                "create attribute table",
                esp_idf_sys::ESP_ERR_INVALID_ARG as i32,
            ));
        }

        let server = BLEDevice::take().get_server();
        let service = server.create_service(SERVICE_UUID);

        let rx_char = service
            .lock()
            .create_characteristic(RX_CHAR_UUID, NimbleProperties::WRITE);
        let tx = self.events.clone();
        let trans_ids = self.trans_ids.clone();
        rx_char.lock().on_write(move |args| {
            let write = GattWrite {
                conn_id: args.desc().conn_handle(),
                trans_id: trans_ids.fetch_add(1, Ordering::Relaxed),
                handle: RX_VALUE_HANDLE,
                offset: 0,
                value: args.recv_data().to_vec(),
                is_prepared: false,
                need_response: false,
            };
            emit(&tx, DriverEvent::Ble(BleDriverEvent::Write(write)));
        });

        let tx_char = service.lock().create_characteristic(
            TX_CHAR_UUID,
            NimbleProperties::READ | NimbleProperties::INDICATE,
        );
        let tx = self.events.clone();
        let trans_ids = self.trans_ids.clone();
        tx_char.lock().on_subscribe(move |_char, desc, sub| {
            let value = if sub.contains(NimbleSub::INDICATE) {
                CCCD_INDICATE
            } else {
                CCCD_NONE
            };
            let write = GattWrite {
                conn_id: desc.conn_handle(),
                trans_id: trans_ids.fetch_add(1, Ordering::Relaxed),
                handle: TX_CCCD_HANDLE,
                offset: 0,
                value: value.to_vec(),
                is_prepared: false,
                need_response: false,
            };
            emit(&tx, DriverEvent::Ble(BleDriverEvent::Write(write)));
        });
        self.tx_char = Some(tx_char);

        self.complete(BleDriverEvent::AttributeTableCreated(Ok(HANDLES.to_vec())));
        Ok(())
    }

    fn start_service(&mut self, _service_handle: u16) -> Result<(), DriverError> {
        // NimBLE starts registered services with the host.
        self.complete(BleDriverEvent::ServiceStarted(Ok(())));
        Ok(())
    }

    fn stop_service(&mut self, _service_handle: u16) -> Result<(), DriverError> {
        self.complete(BleDriverEvent::ServiceStopped(Ok(())));
        Ok(())
    }

    fn configure_advertising(&mut self, data: &AdvertisingData) -> Result<(), DriverError> {
        let device = BLEDevice::take();
        BLEDevice::set_device_name(&data.device_name).map_err(ble_error("set device name"))?;

        let mut advertising = device.get_advertising().lock();
        advertising
            .set_raw_data(&data.advertising_payload())
            .map_err(ble_error("set advertising data"))?;
        advertising
            .set_raw_scan_response_data(&data.scan_response_payload())
            .map_err(ble_error("set scan response"))?;

        self.complete(BleDriverEvent::AdvertisingConfigured(Ok(())));
        Ok(())
    }

    fn start_advertising(&mut self, params: &AdvertisingParams) -> Result<(), DriverError> {
        let mut advertising = BLEDevice::take().get_advertising().lock();
        let mode = match params.kind {
            AdvertisingKind::Connectable => ConnMode::Und,
            AdvertisingKind::NonConnectable => ConnMode::Non,
        };
        advertising
            .advertisement_type(mode)
            .min_interval(params.interval)
            .max_interval(params.interval);
        advertising.start().map_err(ble_error("start advertising"))?;

        self.complete(BleDriverEvent::AdvertisingStarted(Ok(())));
        Ok(())
    }

    fn stop_advertising(&mut self) -> Result<(), DriverError> {
        BLEDevice::take()
            .get_advertising()
            .lock()
            .stop()
            .map_err(ble_error("stop advertising"))?;
        self.complete(BleDriverEvent::AdvertisingStopped(Ok(())));
        Ok(())
    }

    fn send_indication(
        &mut self,
        conn_id: u16,
        _attr_handle: u16,
        data: &[u8],
    ) -> Result<(), DriverError> {
        let tx_char = self.tx_char.as_ref().ok_or(DriverError::new(
            "send indication",
            esp_idf_sys::ESP_ERR_INVALID_STATE as i32,
        ))?;

        // NimBLE has already waited for the confirmation when notify_with
        // returns.
        let status = match tx_char.lock().notify_with(data, conn_id) {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!("Indication to {} failed: {:?}", conn_id, e);
                Err(e.code() as u16)
            }
        };
        self.complete(BleDriverEvent::IndicationConfirmed { conn_id, status });
        Ok(())
    }

    fn send_response(
        &mut self,
        _conn_id: u16,
        _trans_id: u32,
        _status: GattStatus,
        _value: &[u8],
    ) -> Result<(), DriverError> {
        // NimBLE answers requests itself.
        Ok(())
    }

    fn close(&mut self, conn_id: u16) -> Result<(), DriverError> {
        BLEDevice::take()
            .get_server()
            .disconnect(conn_id)
            .map_err(ble_error("close connection"))
    }
}
