//! The connectivity orchestrator.
//!
//! [`ConnectivityManager`] owns every state machine and the [`Context`] they
//! share. It is driven from a single logical thread: the event loop calls
//! [`run_once`](ConnectivityManager::run_once), and everything else reaches
//! it through the [`Bridge`](crate::bridge::Bridge) lock.
//!
//! Public setters validate their arguments, check that the re-drive fits in
//! the work queue, update configuration and queue the re-drive. They never
//! drive a state machine inline, and a full queue leaves state untouched.

mod context;

pub use context::{Collaborators, ConnectivityFlags, Context, WorkItem};

use crate::ble::advertising::MAX_DEVICE_NAME_LEN;
use crate::ble::transport::BleTransport;
use crate::config::{
    ApMode, BleServiceMode, Settings, StationMode, TunnelMode, WifiConfig,
};
use crate::connectivity::{internet, pairing, tunnel};
use crate::driver::{BleDriverEvent, TunnelNotification, WifiEvent, WifiInterface};
use crate::error::ConnectivityError;
use crate::event_loop::{Clock, TimerKind};
use crate::events::{ConnectivityChange, DeviceEvent};
use crate::wifi::{ApMachine, ApState, StationEdge, StationMachine, StationState};
use log::{debug, error, info};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Point-in-time view of the orchestrator, served by the status endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectivityStatus {
    pub station_mode: StationMode,
    pub station_state: StationState,
    pub station_provisioned: bool,
    pub ap_mode: ApMode,
    pub ap_state: ApState,
    pub tunnel_mode: TunnelMode,
    pub ble_service_mode: BleServiceMode,
    pub ble_advertising: bool,
    pub ble_connections: usize,
    pub ble_device_name: String,
    pub connectivity: ConnectivityFlags,
    pub pending_work: usize,
}

pub struct ConnectivityManager {
    ctx: Context,
    station: StationMachine,
    ap: ApMachine,
    ble: BleTransport,
}

impl ConnectivityManager {
    /// Build an orchestrator. Call [`init`](Self::init) before running it.
    pub fn new(
        settings: Settings,
        collaborators: Collaborators,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConnectivityError> {
        settings.validate()?;
        let ble_mode = match (settings.ble.supported, settings.ble.enabled) {
            (false, _) => BleServiceMode::NotSupported,
            (true, true) => BleServiceMode::Enabled,
            (true, false) => BleServiceMode::Disabled,
        };
        let ble = BleTransport::new(ble_mode, settings.ble.max_connections);
        Ok(Self {
            ctx: Context::new(settings, collaborators, clock),
            station: StationMachine::new(),
            ap: ApMachine::new(),
            ble,
        })
    }

    /// Apply start-up policy and schedule the initial drives.
    pub fn init(&mut self) -> Result<(), ConnectivityError> {
        info!("Initializing connectivity manager");

        if self.ctx.is_station_provisioned() {
            debug!("Station provision found, keeping persisted station mode");
        } else if let Some(default) = self.ctx.settings.default_station.clone() {
            info!("Applying default station provision (SSID {})", default.ssid);
            self.ctx.store.set_station_credentials(&default)?;
            self.set_station_mode(StationMode::Enabled)?;
        } else {
            self.set_station_mode(StationMode::Disabled)?;
        }

        self.ctx
            .wifi
            .set_interface_enabled(WifiInterface::AccessPoint, false)?;
        self.ctx.config.custom_device_name = self.ctx.store.device_name();

        self.ctx.schedule(WorkItem::DriveStation)?;
        self.ctx.schedule(WorkItem::DriveAp)?;
        self.ctx.schedule(WorkItem::DriveBle)?;
        Ok(())
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    // ==================== Event Loop ====================

    /// Queue a work item.
    pub fn schedule(&mut self, item: WorkItem) -> Result<(), ConnectivityError> {
        self.ctx.schedule(item)
    }

    /// Queue a closure to run on the event loop.
    pub fn schedule_work(
        &mut self,
        work: impl FnOnce(&mut ConnectivityManager) + Send + 'static,
    ) -> Result<(), ConnectivityError> {
        self.ctx.schedule(WorkItem::Call(Box::new(work)))
    }

    /// Post a device event for dispatch on the event loop.
    pub fn post_event(&mut self, event: DeviceEvent) -> Result<(), ConnectivityError> {
        self.ctx.schedule(WorkItem::Event(event))
    }

    pub fn post_wifi_event(&mut self, event: WifiEvent) -> Result<(), ConnectivityError> {
        self.ctx.schedule(WorkItem::Wifi(event))
    }

    pub fn post_tunnel_notification(
        &mut self,
        notification: TunnelNotification,
    ) -> Result<(), ConnectivityError> {
        self.ctx.schedule(WorkItem::Tunnel(notification))
    }

    /// Handle a BLE driver callback in place.
    ///
    /// Callers must hold the stack lock. Follow-up work is queued.
    pub fn handle_ble_event(&mut self, event: BleDriverEvent) {
        self.ble.on_driver_event(&mut self.ctx, event);
    }

    /// Fire due timers, then drain the work queue.
    pub fn run_once(&mut self) -> usize {
        self.run_due_timers() + self.run_pending()
    }

    /// Execute queued work until the queue is empty, including work queued
    /// along the way. Returns the number of items executed.
    pub fn run_pending(&mut self) -> usize {
        let mut count = 0;
        while self.run_next() {
            count += 1;
        }
        count
    }

    /// Execute the oldest queued item. Returns false if the queue was empty.
    pub fn run_next(&mut self) -> bool {
        match self.ctx.work.pop() {
            Some(item) => {
                self.dispatch(item);
                true
            }
            None => false,
        }
    }

    /// Fire every timer whose deadline has passed.
    pub fn run_due_timers(&mut self) -> usize {
        let now = self.ctx.now_ms();
        let due = self.ctx.timers.take_due(now);
        let count = due.len();
        for kind in due {
            debug!("Timer fired: {:?}", kind);
            match kind {
                TimerKind::StationReconnect => self.drive_station(),
                TimerKind::ApIdle => self.drive_ap(),
                TimerKind::PairingConnectivity => pairing::on_timeout(&mut self.ctx),
            }
        }
        count
    }

    /// Time until the earliest armed timer.
    pub fn next_timer_delay(&self) -> Option<Duration> {
        let now = self.ctx.now_ms();
        self.ctx
            .timers
            .next_deadline()
            .map(|deadline| Duration::from_millis(deadline.saturating_sub(now)))
    }

    pub fn has_pending_work(&self) -> bool {
        !self.ctx.work.is_empty()
    }

    fn dispatch(&mut self, item: WorkItem) {
        match item {
            WorkItem::DriveStation => self.drive_station(),
            WorkItem::DriveAp => self.drive_ap(),
            WorkItem::DriveBle => self.ble.drive(&mut self.ctx),
            WorkItem::DriveTunnel => tunnel::drive(&mut self.ctx),
            WorkItem::UpdateInternetConnectivity => self.update_internet_connectivity(),
            WorkItem::Wifi(event) => self.on_wifi_event(event),
            WorkItem::Tunnel(notification) => tunnel::on_notification(&mut self.ctx, notification),
            WorkItem::Event(event) => self.on_device_event(event),
            WorkItem::Call(work) => work(self),
        }
    }

    fn on_wifi_event(&mut self, event: WifiEvent) {
        debug!("WiFi event: {:?}", event);
        match event {
            WifiEvent::StaStart
            | WifiEvent::StaStop
            | WifiEvent::StaConnected
            | WifiEvent::StaDisconnected
            | WifiEvent::ScanDone => {
                if self.station.on_wifi_event(event) {
                    self.drive_station();
                }
            }
            WifiEvent::GotIp | WifiEvent::LostIp | WifiEvent::GotIp6 => {
                self.update_internet_connectivity()
            }
            WifiEvent::ApStart | WifiEvent::ApStop => {
                if self.ap.on_wifi_event(event) {
                    self.drive_ap();
                }
            }
            WifiEvent::ApStaConnected => self.maintain_on_demand_ap(),
            WifiEvent::ApStaDisconnected => {}
        }
    }

    fn on_device_event(&mut self, event: DeviceEvent) {
        match &event {
            DeviceEvent::FabricMembershipChange { .. }
            | DeviceEvent::ServiceProvisioningChange { .. } => tunnel::drive(&mut self.ctx),
            DeviceEvent::AccountPairingChange { .. } => {
                self.ble.refresh_advertising();
                self.ble.drive(&mut self.ctx);
            }
            DeviceEvent::ServiceConnectivityChange(change) => {
                pairing::on_service_connectivity(&mut self.ctx, *change)
            }
            _ => {}
        }
        self.ctx.sink.post(&event);
    }

    // ==================== Drives ====================

    fn drive_station(&mut self) {
        let result = self.station.drive(&mut self.ctx);

        if let Some(edge) = self.station.take_edge() {
            let change = match edge {
                StationEdge::Connected => ConnectivityChange::Established,
                StationEdge::Disconnected => ConnectivityChange::Lost,
            };
            self.ctx
                .post_event(DeviceEvent::WiFiConnectivityChange(change));
            self.update_internet_connectivity();
            self.drive_ap();
        }

        if let Err(e) = result {
            error!("WiFi station drive failed: {}", e);
            self.disable_station_after_failure();
        }
    }

    /// Park the station in Disabled without queueing another drive.
    fn disable_station_after_failure(&mut self) {
        if let Err(e) = self.ctx.wifi.set_auto_connect(false) {
            error!("Failed to clear WiFi station auto-connect: {}", e);
        }
        if self.ctx.config.station_mode != StationMode::Disabled {
            info!(
                "WiFi station mode change: {} -> {}",
                self.ctx.config.station_mode,
                StationMode::Disabled
            );
            self.ctx.config.station_mode = StationMode::Disabled;
        }
    }

    fn drive_ap(&mut self) {
        if let Err(e) = self.ap.drive(&mut self.ctx) {
            error!("WiFi AP drive failed: {}", e);
            self.ctx.config.ap_mode = ApMode::Disabled;
            if let Err(e) = self
                .ctx
                .wifi
                .set_interface_enabled(WifiInterface::AccessPoint, false)
            {
                error!("Failed to disable WiFi AP: {}", e);
            }
        }
    }

    fn update_internet_connectivity(&mut self) {
        let connected = self.station.state() == StationState::Connected;
        if internet::update(&mut self.ctx, connected) {
            tunnel::drive(&mut self.ctx);
        }
    }

    // ==================== Station ====================

    pub fn station_mode(&self) -> StationMode {
        self.ctx.config.station_mode
    }

    pub fn set_station_mode(&mut self, mode: StationMode) -> Result<(), ConnectivityError> {
        if mode == StationMode::NotSupported {
            return Err(ConnectivityError::InvalidArgument("station mode"));
        }
        self.ctx.reserve(1)?;
        if mode != StationMode::ApplicationControlled {
            self.ctx
                .wifi
                .set_auto_connect(mode == StationMode::Enabled)?;
        }
        if self.ctx.config.station_mode != mode {
            info!(
                "WiFi station mode change: {} -> {}",
                self.ctx.config.station_mode, mode
            );
            self.ctx.config.station_mode = mode;
        }
        self.ctx.schedule(WorkItem::DriveStation)
    }

    pub fn station_state(&self) -> StationState {
        self.station.state()
    }

    pub fn is_station_connected(&self) -> bool {
        self.station.state() == StationState::Connected
    }

    pub fn is_station_provisioned(&self) -> bool {
        self.ctx.is_station_provisioned()
    }

    /// Store new station credentials and re-drive.
    pub fn set_station_provision(&mut self, credentials: WifiConfig) -> Result<(), ConnectivityError> {
        credentials
            .validate()
            .map_err(|_| ConnectivityError::InvalidArgument("station credentials"))?;
        self.ctx.reserve(2)?;
        self.ctx.store.set_station_credentials(&credentials)?;
        info!("WiFi station provisioned (SSID {})", credentials.ssid);
        self.ctx.schedule(WorkItem::DriveStation)?;
        self.ctx.schedule(WorkItem::DriveAp)
    }

    /// Forget the station credentials and re-drive.
    pub fn clear_station_provision(&mut self) -> Result<(), ConnectivityError> {
        self.ctx.reserve(2)?;
        self.ctx.store.clear_station_credentials()?;
        info!("WiFi station provision cleared");
        self.ctx.schedule(WorkItem::DriveStation)?;
        self.ctx.schedule(WorkItem::DriveAp)
    }

    /// Stored station credentials. The password is redacted in `Debug`.
    pub fn station_provision(&self) -> Option<WifiConfig> {
        self.ctx.store.station_credentials()
    }

    pub fn station_reconnect_interval_ms(&self) -> u64 {
        self.ctx.config.station_reconnect_interval_ms
    }

    pub fn set_station_reconnect_interval(&mut self, interval_ms: u64) -> Result<(), ConnectivityError> {
        if interval_ms == 0 {
            return Err(ConnectivityError::InvalidArgument("reconnect interval"));
        }
        self.ctx.reserve(1)?;
        self.ctx.config.station_reconnect_interval_ms = interval_ms;
        self.ctx.schedule(WorkItem::DriveStation)
    }

    // ==================== Access Point ====================

    pub fn ap_mode(&self) -> ApMode {
        self.ctx.config.ap_mode
    }

    pub fn set_ap_mode(&mut self, mode: ApMode) -> Result<(), ConnectivityError> {
        if mode == ApMode::NotSupported {
            return Err(ConnectivityError::InvalidArgument("AP mode"));
        }
        self.ctx.reserve(1)?;
        if self.ctx.config.ap_mode != mode {
            info!("WiFi AP mode change: {} -> {}", self.ctx.config.ap_mode, mode);
            self.ctx.config.ap_mode = mode;
        }
        self.ctx.schedule(WorkItem::DriveAp)
    }

    pub fn ap_state(&self) -> ApState {
        self.ap.state()
    }

    pub fn ap_idle_timeout_ms(&self) -> u64 {
        self.ctx.config.ap_idle_timeout_ms
    }

    pub fn set_ap_idle_timeout(&mut self, timeout_ms: u64) -> Result<(), ConnectivityError> {
        if timeout_ms == 0 {
            return Err(ConnectivityError::InvalidArgument("AP idle timeout"));
        }
        self.ctx.reserve(1)?;
        self.ctx.config.ap_idle_timeout_ms = timeout_ms;
        self.ctx.schedule(WorkItem::DriveAp)
    }

    /// Bring up an on-demand AP, or extend its window.
    pub fn demand_start_ap(&mut self) -> Result<(), ConnectivityError> {
        self.ctx.reserve(1)?;
        let now = self.ctx.now_ms();
        if self.ap.demand(self.ctx.config.ap_mode, now) {
            self.ctx.schedule(WorkItem::DriveAp)?;
        }
        Ok(())
    }

    /// Take an on-demand AP down at the next drive.
    pub fn stop_on_demand_ap(&mut self) -> Result<(), ConnectivityError> {
        self.ctx.reserve(1)?;
        if self.ap.clear_demand(self.ctx.config.ap_mode) {
            self.ctx.schedule(WorkItem::DriveAp)?;
        }
        Ok(())
    }

    /// Refresh the idle window of an on-demand AP that is up.
    pub fn maintain_on_demand_ap(&mut self) {
        let now = self.ctx.now_ms();
        if self.ap.maintain(self.ctx.config.ap_mode, now) {
            debug!("On-demand WiFi AP maintained");
        }
    }

    // ==================== Tunnel and Internet ====================

    pub fn tunnel_mode(&self) -> TunnelMode {
        self.ctx.config.tunnel_mode
    }

    pub fn set_tunnel_mode(&mut self, mode: TunnelMode) -> Result<(), ConnectivityError> {
        self.ctx.reserve(1)?;
        if self.ctx.config.tunnel_mode != mode {
            info!(
                "Service tunnel mode change: {} -> {}",
                self.ctx.config.tunnel_mode, mode
            );
            self.ctx.config.tunnel_mode = mode;
        }
        self.ctx.schedule(WorkItem::DriveTunnel)
    }

    pub fn have_ipv4_internet(&self) -> bool {
        self.ctx.flags.ipv4_reachable
    }

    pub fn have_ipv6_internet(&self) -> bool {
        self.ctx.flags.ipv6_reachable
    }

    pub fn have_service_connectivity(&self) -> bool {
        self.ctx.flags.tunnel_up
    }

    /// Wait for service connectivity on behalf of account pairing.
    ///
    /// Progress is reported as `AccountPairingProgress` events.
    pub fn request_account_pairing(&mut self) -> Result<(), ConnectivityError> {
        pairing::request(&mut self.ctx)
    }

    // ==================== BLE ====================

    pub fn ble_service_mode(&self) -> BleServiceMode {
        self.ble.service_mode()
    }

    fn ensure_ble_supported(&self) -> Result<(), ConnectivityError> {
        if self.ble.service_mode() == BleServiceMode::NotSupported {
            return Err(ConnectivityError::Unsupported("BLE transport"));
        }
        Ok(())
    }

    pub fn set_ble_service_mode(&mut self, mode: BleServiceMode) -> Result<(), ConnectivityError> {
        if mode == BleServiceMode::NotSupported {
            return Err(ConnectivityError::InvalidArgument("BLE service mode"));
        }
        self.ensure_ble_supported()?;
        self.ctx.reserve(1)?;
        self.ble.set_service_mode(mode);
        self.ctx.schedule(WorkItem::DriveBle)
    }

    pub fn is_ble_advertising_enabled(&self) -> bool {
        self.ctx.config.ble_advertising_enabled
    }

    pub fn set_ble_advertising_enabled(&mut self, enabled: bool) -> Result<(), ConnectivityError> {
        self.ensure_ble_supported()?;
        self.ctx.reserve(1)?;
        self.ctx.config.ble_advertising_enabled = enabled;
        self.ctx.schedule(WorkItem::DriveBle)
    }

    pub fn is_ble_fast_advertising_enabled(&self) -> bool {
        self.ctx.config.ble_fast_advertising
    }

    pub fn set_ble_fast_advertising_enabled(&mut self, fast: bool) -> Result<(), ConnectivityError> {
        self.ensure_ble_supported()?;
        self.ctx.reserve(1)?;
        if self.ctx.config.ble_fast_advertising != fast {
            self.ctx.config.ble_fast_advertising = fast;
            self.ble.refresh_advertising();
        }
        self.ctx.schedule(WorkItem::DriveBle)
    }

    /// Name the device advertises.
    pub fn ble_device_name(&self) -> String {
        BleTransport::device_name(&self.ctx)
    }

    /// Set a custom advertising name. An empty name restores the generated one.
    pub fn set_ble_device_name(&mut self, name: &str) -> Result<(), ConnectivityError> {
        self.ensure_ble_supported()?;
        if name.len() >= MAX_DEVICE_NAME_LEN {
            return Err(ConnectivityError::InvalidArgument("device name too long"));
        }
        self.ctx.reserve(1)?;
        let custom = (!name.is_empty()).then(|| name.to_string());
        self.ctx.store.set_device_name(custom.as_deref())?;
        self.ctx.config.custom_device_name = custom;
        self.ble.refresh_advertising();
        self.ctx.schedule(WorkItem::DriveBle)
    }

    pub fn ble_connection_count(&self) -> usize {
        self.ble.pool().active()
    }

    /// Negotiated MTU, 0 for an unknown connection.
    pub fn ble_mtu(&self, conn_id: u16) -> u16 {
        self.ble.mtu(conn_id)
    }

    pub fn send_ble_indication(
        &mut self,
        conn_id: u16,
        data: Vec<u8>,
    ) -> Result<(), ConnectivityError> {
        self.ble.send_indication(&mut self.ctx, conn_id, data)
    }

    pub fn close_ble_connection(&mut self, conn_id: u16) -> Result<(), ConnectivityError> {
        self.ble.close_connection(&mut self.ctx, conn_id)
    }

    // ==================== Status ====================

    pub fn status(&self) -> ConnectivityStatus {
        ConnectivityStatus {
            station_mode: self.ctx.config.station_mode,
            station_state: self.station.state(),
            station_provisioned: self.ctx.is_station_provisioned(),
            ap_mode: self.ctx.config.ap_mode,
            ap_state: self.ap.state(),
            tunnel_mode: self.ctx.config.tunnel_mode,
            ble_service_mode: self.ble.service_mode(),
            ble_advertising: self.ble.flags().advertising,
            ble_connections: self.ble.pool().active(),
            ble_device_name: self.ble_device_name(),
            connectivity: self.ctx.flags,
            pending_work: self.ctx.work.len(),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::tests_support::{sim_manager, sim_manager_with};
    use super::*;
    use crate::driver::sim::WifiCommand;

    // ==================== Setter Tests ====================

    #[test]
    fn test_setters_reject_not_supported() {
        let (mut manager, _rig) = sim_manager();
        assert!(matches!(
            manager.set_station_mode(StationMode::NotSupported),
            Err(ConnectivityError::InvalidArgument(_))
        ));
        assert!(matches!(
            manager.set_ap_mode(ApMode::NotSupported),
            Err(ConnectivityError::InvalidArgument(_))
        ));
        assert!(matches!(
            manager.set_ble_service_mode(BleServiceMode::NotSupported),
            Err(ConnectivityError::InvalidArgument(_))
        ));
        assert!(!manager.has_pending_work());
    }

    #[test]
    fn test_setters_schedule_instead_of_driving() {
        let (mut manager, rig) = sim_manager();
        manager.set_ap_mode(ApMode::Enabled).unwrap();
        assert_eq!(manager.ap_state(), ApState::NotActive);
        assert!(rig.wifi.state().commands.is_empty());

        manager.run_pending();
        assert_eq!(manager.ap_state(), ApState::Activating);
    }

    #[test]
    fn test_station_mode_programs_auto_connect() {
        let (mut manager, rig) = sim_manager();
        manager.set_station_mode(StationMode::Enabled).unwrap();
        assert!(rig.wifi.state().auto_connect);
        assert!(rig
            .wifi
            .state()
            .commands
            .contains(&WifiCommand::SetAutoConnect(true)));
    }

    #[test]
    fn test_device_name_validation() {
        let (mut manager, _rig) = sim_manager();
        assert_eq!(manager.ble_device_name(), "NEST-BEEF");
        assert!(matches!(
            manager.set_ble_device_name("sixteen-chars-xx"),
            Err(ConnectivityError::InvalidArgument(_))
        ));
        manager.set_ble_device_name("Porch").unwrap();
        assert_eq!(manager.ble_device_name(), "Porch");
        manager.set_ble_device_name("").unwrap();
        assert_eq!(manager.ble_device_name(), "NEST-BEEF");
    }

    #[test]
    fn test_ble_unsupported() {
        let mut settings = Settings::default();
        settings.ble.supported = false;
        let (mut manager, _rig) = sim_manager_with(settings);
        assert_eq!(manager.ble_service_mode(), BleServiceMode::NotSupported);
        assert!(matches!(
            manager.set_ble_device_name("x"),
            Err(ConnectivityError::Unsupported(_))
        ));
        assert!(matches!(
            manager.set_ble_advertising_enabled(false),
            Err(ConnectivityError::Unsupported(_))
        ));
        assert!(matches!(
            manager.set_ble_service_mode(BleServiceMode::Enabled),
            Err(ConnectivityError::Unsupported(_))
        ));
    }

    #[test]
    fn test_zero_timeouts_rejected() {
        let (mut manager, _rig) = sim_manager();
        assert!(manager.set_ap_idle_timeout(0).is_err());
        assert!(manager.set_station_reconnect_interval(0).is_err());
        manager.set_ap_idle_timeout(30_000).unwrap();
        assert_eq!(manager.ap_idle_timeout_ms(), 30_000);
    }

    // ==================== Init Tests ====================

    #[test]
    fn test_init_applies_default_provision() {
        let mut settings = Settings::default();
        settings.default_station = Some(WifiConfig::new("lab", "password123").unwrap());
        let (mut manager, rig) = sim_manager_with(settings);
        manager.init().unwrap();

        assert!(manager.is_station_provisioned());
        assert_eq!(manager.station_mode(), StationMode::Enabled);
        assert!(rig.wifi.state().auto_connect);
    }

    #[test]
    fn test_init_without_provision_disables_station() {
        let (mut manager, rig) = sim_manager();
        manager.init().unwrap();
        assert_eq!(manager.station_mode(), StationMode::Disabled);
        assert!(!rig.wifi.state().ap_enabled);

        manager.run_pending();
        assert_eq!(manager.station_state(), StationState::NotConnected);
        assert_eq!(rig.wifi.connect_count(), 0);
    }

    // ==================== Work Queue Tests ====================

    #[test]
    fn test_schedule_work_runs_closure() {
        let (mut manager, _rig) = sim_manager();
        manager
            .schedule_work(|m| {
                m.set_ap_idle_timeout(1_234).unwrap();
            })
            .unwrap();
        assert_eq!(manager.run_pending(), 2);
        assert_eq!(manager.ap_idle_timeout_ms(), 1_234);
    }

    #[test]
    fn test_queue_overflow_reported() {
        let mut settings = Settings::default();
        settings.work_queue_capacity = 2;
        let (mut manager, _rig) = sim_manager_with(settings);
        manager.set_ap_mode(ApMode::Enabled).unwrap();
        manager.set_tunnel_mode(TunnelMode::Disabled).unwrap();
        assert!(matches!(
            manager.set_ap_mode(ApMode::Disabled),
            Err(ConnectivityError::QueueFull)
        ));
        assert_eq!(manager.ap_mode(), ApMode::Enabled);
    }

    #[test]
    fn test_full_queue_leaves_state_untouched() {
        let mut settings = Settings::default();
        settings.work_queue_capacity = 1;
        let (mut manager, rig) = sim_manager_with(settings);
        manager.set_tunnel_mode(TunnelMode::Disabled).unwrap();

        let ap_mode = manager.ap_mode();
        assert!(matches!(
            manager.set_ap_mode(ApMode::Enabled),
            Err(ConnectivityError::QueueFull)
        ));
        assert_eq!(manager.ap_mode(), ap_mode);

        let station_mode = manager.station_mode();
        assert!(matches!(
            manager.set_station_mode(StationMode::Enabled),
            Err(ConnectivityError::QueueFull)
        ));
        assert_eq!(manager.station_mode(), station_mode);
        assert!(!rig.wifi.state().auto_connect);
        assert!(!rig
            .wifi
            .state()
            .commands
            .contains(&WifiCommand::SetAutoConnect(true)));

        assert!(matches!(
            manager.set_ble_device_name("Kitchen"),
            Err(ConnectivityError::QueueFull)
        ));
        assert_eq!(manager.ble_device_name(), "NEST-BEEF");

        assert!(matches!(
            manager.set_station_provision(WifiConfig::new("home", "password123").unwrap()),
            Err(ConnectivityError::QueueFull)
        ));
        assert!(!manager.is_station_provisioned());

        manager.run_pending();
        assert!(manager.set_ap_mode(ApMode::Enabled).is_ok());
        assert_eq!(manager.ap_mode(), ApMode::Enabled);
    }

    #[test]
    fn test_status_snapshot() {
        let (manager, _rig) = sim_manager();
        let status = manager.status();
        assert_eq!(status.station_state, StationState::NotConnected);
        assert_eq!(status.ble_connections, 0);
        assert_eq!(status.ble_device_name, "NEST-BEEF");
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["ap_state"], "NotActive");
        assert_eq!(json["connectivity"]["tunnel_up"], false);
    }
}
