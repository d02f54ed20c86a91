//! BLE transport state machine.
//!
//! Brings the GATT service up one asynchronous control operation at a time:
//!
//! ```text
//! init layer -> register app -> create attribute table -> start service
//!            -> configure advertising -> start advertising
//! ```
//!
//! Every step after layer initialisation completes through a
//! [`BleDriverEvent`]. While one is outstanding the drive does nothing, so at
//! most one control operation is ever in flight. Teardown walks the same
//! steps in reverse.

use super::advertising::{default_device_name, AdvertisingData, AdvertisingParams, ServiceData};
use super::gatt::{attribute_table, AttributeHandles, GattRead, GattStatus, GattWrite, APP_ID};
use super::pool::ConnectionPool;
use crate::config::BleServiceMode;
use crate::driver::BleDriverEvent;
use crate::error::{ConnectivityError, DriverError};
use crate::events::{BleEvent, ConnectionErrorReason, DeviceEvent};
use crate::manager::{Context, WorkItem};
use log::{debug, error, info, warn};

/// Progress of the bring-up pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControlFlags {
    pub layer_initialized: bool,
    pub app_registered: bool,
    pub attributes_registered: bool,
    pub service_started: bool,
    pub advertising_configured: bool,
    pub advertising: bool,
    pub control_op_in_progress: bool,
    /// Registration is rebuilt from scratch on the next enable.
    pub reset_pending: bool,
}

#[derive(Debug)]
pub struct BleTransport {
    service_mode: BleServiceMode,
    flags: ControlFlags,
    handles: AttributeHandles,
    pool: ConnectionPool,
    advertised_name: Option<String>,
}

impl BleTransport {
    pub fn new(service_mode: BleServiceMode, max_connections: usize) -> Self {
        Self {
            service_mode,
            flags: ControlFlags::default(),
            handles: AttributeHandles::default(),
            pool: ConnectionPool::new(max_connections),
            advertised_name: None,
        }
    }

    pub fn service_mode(&self) -> BleServiceMode {
        self.service_mode
    }

    pub fn set_service_mode(&mut self, mode: BleServiceMode) {
        if self.service_mode != mode {
            info!("BLE service mode: {} -> {}", self.service_mode, mode);
            self.service_mode = mode;
        }
    }

    pub fn flags(&self) -> ControlFlags {
        self.flags
    }

    pub fn handles(&self) -> AttributeHandles {
        self.handles
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Name in the current advertising payload.
    pub fn advertised_name(&self) -> Option<&str> {
        self.advertised_name.as_deref()
    }

    /// Negotiated MTU of a connection, or 0 if it is unknown.
    pub fn mtu(&self, conn_id: u16) -> u16 {
        self.pool.get(conn_id).map_or(0, |conn| conn.mtu)
    }

    /// Mark the advertising payload stale.
    ///
    /// If advertising is running the next drive stops it, reconfigures and
    /// restarts.
    pub fn refresh_advertising(&mut self) {
        self.flags.advertising_configured = false;
    }

    /// Name the device advertises: the custom name, else the generated one.
    pub fn device_name(ctx: &Context) -> String {
        match &ctx.config.custom_device_name {
            Some(name) => name.clone(),
            None => default_device_name(
                &ctx.settings.ble.device_name_prefix,
                ctx.store.device_id(),
            ),
        }
    }

    fn begin_op(&mut self) {
        self.flags.control_op_in_progress = true;
    }

    fn fail(&mut self, ctx: &mut Context, err: &dyn std::fmt::Display) {
        error!("BLE transport failure: {}", err);
        self.flags.control_op_in_progress = false;
        self.flags.reset_pending = true;
        if self.service_mode == BleServiceMode::Enabled {
            self.set_service_mode(BleServiceMode::Disabled);
            ctx.request(WorkItem::DriveBle);
        }
    }

    /// Advance the pipeline by at most one control operation.
    pub fn drive(&mut self, ctx: &mut Context) {
        if let Err(e) = self.step(ctx) {
            self.fail(ctx, &e);
        }
    }

    fn step(&mut self, ctx: &mut Context) -> Result<(), ConnectivityError> {
        if self.flags.control_op_in_progress {
            return Ok(());
        }

        let enabled = self.service_mode == BleServiceMode::Enabled;
        if enabled {
            if !self.flags.layer_initialized {
                ctx.ble.init_layer()?;
                self.flags.layer_initialized = true;
                info!("BLE layer initialized");
            }
            if !self.flags.app_registered {
                ctx.ble.register_app(APP_ID)?;
                self.begin_op();
                return Ok(());
            }
            if !self.flags.attributes_registered {
                ctx.ble.create_attribute_table(&attribute_table())?;
                self.begin_op();
                return Ok(());
            }
            if !self.flags.service_started {
                ctx.ble.start_service(self.handles.service)?;
                self.begin_op();
                return Ok(());
            }
            if ctx.config.ble_advertising_enabled {
                if self.flags.advertising && !self.flags.advertising_configured {
                    debug!("Stopping BLE advertising to refresh payload");
                    ctx.ble.stop_advertising()?;
                    self.begin_op();
                    return Ok(());
                }
                if !self.flags.advertising_configured {
                    self.configure_advertising(ctx)?;
                    self.begin_op();
                    return Ok(());
                }
                if !self.flags.advertising {
                    self.start_advertising(ctx)?;
                    self.begin_op();
                }
                return Ok(());
            }
        }

        if self.flags.advertising {
            info!("Stopping BLE advertising");
            ctx.ble.stop_advertising()?;
            self.begin_op();
            return Ok(());
        }

        if !enabled {
            if self.flags.service_started {
                info!("Stopping BLE transport service");
                ctx.ble.stop_service(self.handles.service)?;
                self.begin_op();
                return Ok(());
            }
            if self.flags.reset_pending {
                info!("Resetting BLE transport registration");
                self.flags = ControlFlags {
                    layer_initialized: self.flags.layer_initialized,
                    ..ControlFlags::default()
                };
                self.handles = AttributeHandles::default();
            }
        }

        Ok(())
    }

    fn configure_advertising(&mut self, ctx: &mut Context) -> Result<(), ConnectivityError> {
        let name = Self::device_name(ctx);
        let service_data = ServiceData {
            vendor_id: ctx.settings.service.vendor_id,
            product_id: ctx.settings.service.product_id,
            device_id: ctx.store.device_id(),
            paired: ctx.provisioning.is_paired_to_account(),
        };
        debug!("Configuring BLE advertising as {}", name);
        ctx.ble
            .configure_advertising(&AdvertisingData::new(name.clone(), &service_data))?;
        self.advertised_name = Some(name);
        Ok(())
    }

    fn start_advertising(&mut self, ctx: &mut Context) -> Result<(), ConnectivityError> {
        let ble = &ctx.settings.ble;
        let params = AdvertisingParams::select(
            self.pool.active(),
            self.pool.capacity(),
            ctx.provisioning.is_paired_to_account(),
            ble.fast_advertising_interval,
            ble.slow_advertising_interval,
        );
        info!(
            "Starting BLE advertising ({:?}, interval {} ms)",
            params.kind,
            params.interval_ms()
        );
        ctx.ble.start_advertising(&params)?;
        Ok(())
    }

    // ==================== Driver Callbacks ====================

    /// Handle a completion or GATT callback from the driver.
    pub fn on_driver_event(&mut self, ctx: &mut Context, event: BleDriverEvent) {
        match event {
            BleDriverEvent::AppRegistered(result) => self.complete(ctx, result, |t, ()| {
                t.flags.app_registered = true;
                Ok(())
            }),
            BleDriverEvent::AttributeTableCreated(result) => {
                self.complete(ctx, result, |t, handles: Vec<u16>| {
                    t.handles = AttributeHandles::from_registered(&handles).ok_or(
                        DriverError::new("attribute table registration", handles.len() as i32),
                    )?;
                    t.flags.attributes_registered = true;
                    Ok(())
                })
            }
            BleDriverEvent::ServiceStarted(result) => self.complete(ctx, result, |t, ()| {
                info!("BLE transport service started");
                t.flags.service_started = true;
                Ok(())
            }),
            BleDriverEvent::ServiceStopped(result) => self.complete(ctx, result, |t, ()| {
                info!("BLE transport service stopped");
                t.flags.service_started = false;
                Ok(())
            }),
            BleDriverEvent::AdvertisingConfigured(result) => {
                self.complete(ctx, result, |t, ()| {
                    t.flags.advertising_configured = true;
                    Ok(())
                })
            }
            BleDriverEvent::AdvertisingStarted(result) => self.complete(ctx, result, |t, ()| {
                t.flags.advertising = true;
                Ok(())
            }),
            BleDriverEvent::AdvertisingStopped(result) => self.complete(ctx, result, |t, ()| {
                t.flags.advertising = false;
                Ok(())
            }),
            BleDriverEvent::Connected { conn_id } => self.on_connect(ctx, conn_id),
            BleDriverEvent::Disconnected { conn_id, reason } => {
                info!("BLE connection {} closed ({:?})", conn_id, reason);
                self.release(ctx, conn_id, reason.to_error_reason());
            }
            BleDriverEvent::MtuChanged { conn_id, mtu } => match self.pool.get_mut(conn_id) {
                Some(conn) => {
                    debug!("BLE MTU for con {}: {}", conn_id, mtu);
                    conn.mtu = mtu;
                }
                None => warn!("MTU update for unknown BLE connection {}", conn_id),
            },
            BleDriverEvent::Write(write) => self.on_write(ctx, write),
            BleDriverEvent::Read(read) => self.on_read(ctx, read),
            BleDriverEvent::IndicationConfirmed { conn_id, status } => {
                self.on_indication_confirmed(ctx, conn_id, status)
            }
        }
    }

    fn complete<T>(
        &mut self,
        ctx: &mut Context,
        result: Result<T, DriverError>,
        apply: impl FnOnce(&mut Self, T) -> Result<(), DriverError>,
    ) {
        self.flags.control_op_in_progress = false;
        match result.and_then(|value| apply(self, value)) {
            Ok(()) => ctx.request(WorkItem::DriveBle),
            Err(e) => self.fail(ctx, &e),
        }
    }

    fn on_connect(&mut self, ctx: &mut Context, conn_id: u16) {
        match self.pool.acquire(conn_id) {
            Ok(_) => info!("BLE connection {} established", conn_id),
            Err(e) => error!("No slot for BLE connection {}: {}", conn_id, e),
        }
        // The stack stops advertising when a peer connects.
        self.flags.advertising = false;
        ctx.request(WorkItem::DriveBle);
    }

    fn release(&mut self, ctx: &mut Context, conn_id: u16, reason: ConnectionErrorReason) {
        if self.pool.release(conn_id) {
            ctx.post_event(DeviceEvent::Ble(BleEvent::ConnectionError { conn_id, reason }));
            self.flags.advertising = false;
            ctx.request(WorkItem::DriveBle);
        }
    }

    fn on_write(&mut self, ctx: &mut Context, write: GattWrite) {
        let status = if write.is_prepared {
            warn!("Long write rejected on con {}", write.conn_id);
            GattStatus::RequestNotSupported
        } else if write.handle == self.handles.rx_value {
            if self.pool.get(write.conn_id).is_some() {
                ctx.post_event(DeviceEvent::Ble(BleEvent::WriteReceived {
                    conn_id: write.conn_id,
                    data: write.value.clone(),
                }));
                GattStatus::Ok
            } else {
                warn!("RX write from unknown BLE connection {}", write.conn_id);
                GattStatus::InternalError
            }
        } else if write.handle == self.handles.tx_cccd {
            match self.pool.get_mut(write.conn_id) {
                Some(conn) => {
                    let subscribe = write.value.first().is_some_and(|b| *b != 0);
                    conn.subscribed = subscribe;
                    let conn_id = write.conn_id;
                    ctx.post_event(DeviceEvent::Ble(if subscribe {
                        BleEvent::Subscribe { conn_id }
                    } else {
                        BleEvent::Unsubscribe { conn_id }
                    }));
                    GattStatus::Ok
                }
                None => {
                    warn!("CCCD write from unknown BLE connection {}", write.conn_id);
                    GattStatus::InternalError
                }
            }
        } else {
            GattStatus::WriteNotPermitted
        };

        if write.need_response {
            if let Err(e) = ctx
                .ble
                .send_response(write.conn_id, write.trans_id, status, &[])
            {
                error!("Failed to send write response: {}", e);
            }
        }
    }

    fn on_read(&mut self, ctx: &mut Context, read: GattRead) {
        let (status, value) = if read.handle == self.handles.tx_value {
            (GattStatus::Ok, Vec::new())
        } else if read.handle == self.handles.tx_cccd {
            match self.pool.get(read.conn_id) {
                Some(conn) => (GattStatus::Ok, vec![u8::from(conn.subscribed), 0]),
                None => (GattStatus::InternalError, Vec::new()),
            }
        } else {
            (GattStatus::ReadNotPermitted, Vec::new())
        };

        if let Err(e) = ctx
            .ble
            .send_response(read.conn_id, read.trans_id, status, &value)
        {
            error!("Failed to send read response: {}", e);
        }
    }

    fn on_indication_confirmed(&mut self, ctx: &mut Context, conn_id: u16, status: Result<(), u16>) {
        let Some(conn) = self.pool.get_mut(conn_id) else {
            warn!("Indication confirm for unknown BLE connection {}", conn_id);
            return;
        };
        conn.take_pending_indication();
        let event = match status {
            Ok(()) => BleEvent::IndicationConfirmed { conn_id },
            Err(code) => {
                warn!("Indication on con {} failed with status {}", conn_id, code);
                BleEvent::ConnectionError {
                    conn_id,
                    reason: ConnectionErrorReason::IndicationFailed(code),
                }
            }
        };
        ctx.post_event(DeviceEvent::Ble(event));
    }

    // ==================== Application API ====================

    /// Send `data` as an indication on the TX characteristic.
    ///
    /// The connection owns the buffer until the peer confirms. A second call
    /// before that fails with `IncorrectState` and leaves the first buffer in
    /// place.
    pub fn send_indication(
        &mut self,
        ctx: &mut Context,
        conn_id: u16,
        data: Vec<u8>,
    ) -> Result<(), ConnectivityError> {
        let tx_value = self.handles.tx_value;
        let Some(conn) = self.pool.get_mut(conn_id) else {
            warn!("Indication for unknown BLE connection {}", conn_id);
            return Err(ConnectivityError::UnknownConnection(conn_id));
        };
        if conn.has_pending_indication() {
            return Err(ConnectivityError::IncorrectState);
        }
        ctx.ble.send_indication(conn_id, tx_value, &data)?;
        conn.set_pending_indication(data)
    }

    /// Close a connection from this side.
    ///
    /// The slot is released even if the driver refuses, and the driver error
    /// is returned afterwards.
    pub fn close_connection(
        &mut self,
        ctx: &mut Context,
        conn_id: u16,
    ) -> Result<(), ConnectivityError> {
        if self.pool.get(conn_id).is_none() {
            warn!("Close of unknown BLE connection {}", conn_id);
            return Err(ConnectivityError::UnknownConnection(conn_id));
        }
        let closed = ctx.ble.close(conn_id);
        if let Err(e) = &closed {
            error!("Failed to close BLE connection {}: {}", conn_id, e);
        }
        self.pool.release(conn_id);
        self.flags.advertising = false;
        ctx.request(WorkItem::DriveBle);
        closed.map_err(ConnectivityError::from)
    }
}
