//! Simulated drivers.
//!
//! Every simulated driver is a cheap clone around shared state, so a test (or
//! the host simulator) can keep one handle to inspect issued commands and
//! script radio behaviour while the orchestrator owns another.
//!
//! Accepted commands queue their completion in an [`Outbox`] instead of
//! delivering it immediately. The caller decides when completions arrive,
//! which is what makes interleavings reproducible.

use super::{
    ApConfiguration, BleDriver, BleDriverEvent, ConfigStore, DriverEvent, Ipv4Lease, NetifState,
    ProvisioningState, TunnelAgent, TunnelNotification, WifiDriver, WifiEvent, WifiInterface,
};
use crate::ble::advertising::{AdvertisingData, AdvertisingParams};
use crate::ble::gatt::{AttributeEntry, GattStatus};
use crate::config::WifiConfig;
use crate::error::DriverError;
use crate::event_loop::ManualClock;
use crate::events::{DeviceEvent, EventSink};
use crate::manager::{Collaborators, ConnectivityManager};
use std::collections::VecDeque;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared queue of pending driver events.
#[derive(Debug, Clone, Default)]
pub struct Outbox {
    events: Arc<Mutex<VecDeque<DriverEvent>>>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: DriverEvent) {
        lock(&self.events).push_back(event);
    }

    /// Take every queued event, oldest first.
    pub fn drain(&self) -> Vec<DriverEvent> {
        lock(&self.events).drain(..).collect()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.events).is_empty()
    }
}

fn check(fail_on: &[&'static str], command: &'static str) -> Result<(), DriverError> {
    if fail_on.contains(&command) {
        Err(DriverError::new(command, -1))
    } else {
        Ok(())
    }
}

// ==================== WiFi ====================

/// Commands recorded by [`SimWifi`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WifiCommand {
    Start,
    SetInterface(WifiInterface, bool),
    SetAutoConnect(bool),
    Connect(String),
    Disconnect,
    ConfigureAp(ApConfiguration),
}

/// Scriptable state behind [`SimWifi`].
#[derive(Debug)]
pub struct SimWifiState {
    pub started: bool,
    pub station_enabled: bool,
    pub ap_enabled: bool,
    pub auto_connect: bool,
    pub associated: bool,
    pub scanning: bool,
    /// Whether a connect attempt finds the access point.
    pub ap_in_range: bool,
    /// Interface state reported once associated.
    pub lease: NetifState,
    /// Commands that fail synchronously.
    pub fail_on: Vec<&'static str>,
    pub commands: Vec<WifiCommand>,
}

impl Default for SimWifiState {
    fn default() -> Self {
        Self {
            started: false,
            station_enabled: false,
            ap_enabled: false,
            auto_connect: false,
            associated: false,
            scanning: false,
            ap_in_range: true,
            lease: SimWifi::ipv4_lease(),
            fail_on: Vec::new(),
            commands: Vec::new(),
        }
    }
}

/// Simulated WiFi radio.
#[derive(Debug, Clone)]
pub struct SimWifi {
    state: Arc<Mutex<SimWifiState>>,
    outbox: Outbox,
}

impl SimWifi {
    pub fn new(outbox: Outbox) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimWifiState::default())),
            outbox,
        }
    }

    /// Lock the scripted state.
    pub fn state(&self) -> MutexGuard<'_, SimWifiState> {
        lock(&self.state)
    }

    /// Number of connect commands issued so far.
    pub fn connect_count(&self) -> usize {
        self.state()
            .commands
            .iter()
            .filter(|c| matches!(c, WifiCommand::Connect(_)))
            .count()
    }

    /// A typical DHCP lease with a resolver and gateway.
    pub fn ipv4_lease() -> NetifState {
        NetifState {
            link_up: true,
            dns_servers: vec![IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1))],
            ipv4: Some(Ipv4Lease {
                addr: Ipv4Addr::new(192, 168, 1, 42),
                gateway: Ipv4Addr::new(192, 168, 1, 1),
            }),
            ipv6: Vec::new(),
            ipv6_router: None,
        }
    }

    /// Drop the association as if the access point went away.
    pub fn drop_association(&self) {
        let mut state = self.state();
        if state.associated {
            state.associated = false;
            self.outbox.push(DriverEvent::Wifi(WifiEvent::StaDisconnected));
        }
    }
}

impl WifiDriver for SimWifi {
    fn start(&mut self) -> Result<(), DriverError> {
        let mut state = self.state();
        check(&state.fail_on, "start")?;
        if !state.started {
            state.started = true;
            state.commands.push(WifiCommand::Start);
            self.outbox.push(DriverEvent::Wifi(WifiEvent::StaStart));
        }
        Ok(())
    }

    fn set_interface_enabled(
        &mut self,
        iface: WifiInterface,
        enabled: bool,
    ) -> Result<(), DriverError> {
        let mut state = self.state();
        check(&state.fail_on, "set_interface_enabled")?;
        let current = match iface {
            WifiInterface::Station => &mut state.station_enabled,
            WifiInterface::AccessPoint => &mut state.ap_enabled,
        };
        if *current == enabled {
            return Ok(());
        }
        *current = enabled;
        state.commands.push(WifiCommand::SetInterface(iface, enabled));
        if iface == WifiInterface::AccessPoint {
            let event = if enabled {
                WifiEvent::ApStart
            } else {
                WifiEvent::ApStop
            };
            self.outbox.push(DriverEvent::Wifi(event));
        }
        Ok(())
    }

    fn interface_enabled(&self, iface: WifiInterface) -> Result<bool, DriverError> {
        let state = self.state();
        check(&state.fail_on, "interface_enabled")?;
        Ok(match iface {
            WifiInterface::Station => state.station_enabled,
            WifiInterface::AccessPoint => state.ap_enabled,
        })
    }

    fn auto_connect(&self) -> Result<bool, DriverError> {
        Ok(self.state().auto_connect)
    }

    fn set_auto_connect(&mut self, enabled: bool) -> Result<(), DriverError> {
        let mut state = self.state();
        check(&state.fail_on, "set_auto_connect")?;
        state.auto_connect = enabled;
        state.commands.push(WifiCommand::SetAutoConnect(enabled));
        Ok(())
    }

    fn station_associated(&self) -> Result<bool, DriverError> {
        let state = self.state();
        check(&state.fail_on, "station_associated")?;
        Ok(state.associated)
    }

    fn scan_in_progress(&self) -> bool {
        self.state().scanning
    }

    fn connect(&mut self, credentials: &WifiConfig) -> Result<(), DriverError> {
        let mut state = self.state();
        check(&state.fail_on, "connect")?;
        state
            .commands
            .push(WifiCommand::Connect(credentials.ssid.clone()));
        if state.ap_in_range {
            state.associated = true;
            self.outbox.push(DriverEvent::Wifi(WifiEvent::StaConnected));
            self.outbox.push(DriverEvent::Wifi(WifiEvent::GotIp));
        } else {
            self.outbox.push(DriverEvent::Wifi(WifiEvent::StaDisconnected));
        }
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), DriverError> {
        let mut state = self.state();
        check(&state.fail_on, "disconnect")?;
        state.commands.push(WifiCommand::Disconnect);
        state.associated = false;
        self.outbox.push(DriverEvent::Wifi(WifiEvent::StaDisconnected));
        Ok(())
    }

    fn configure_ap(&mut self, config: &ApConfiguration) -> Result<(), DriverError> {
        let mut state = self.state();
        check(&state.fail_on, "configure_ap")?;
        state.commands.push(WifiCommand::ConfigureAp(config.clone()));
        Ok(())
    }

    fn station_netif(&self) -> NetifState {
        let state = self.state();
        if state.associated {
            state.lease.clone()
        } else {
            NetifState::default()
        }
    }
}

// ==================== BLE ====================

/// Commands recorded by [`SimBle`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BleCommand {
    InitLayer,
    RegisterApp(u16),
    CreateAttributeTable(usize),
    StartService(u16),
    StopService(u16),
    ConfigureAdvertising(AdvertisingData),
    StartAdvertising(AdvertisingParams),
    StopAdvertising,
    SendIndication(u16, Vec<u8>),
    SendResponse {
        conn_id: u16,
        trans_id: u32,
        status: GattStatus,
        value: Vec<u8>,
    },
    Close(u16),
}

impl BleCommand {
    /// True for commands that start an asynchronous control operation.
    pub fn is_control_op(&self) -> bool {
        matches!(
            self,
            Self::RegisterApp(_)
                | Self::CreateAttributeTable(_)
                | Self::StartService(_)
                | Self::StopService(_)
                | Self::ConfigureAdvertising(_)
                | Self::StartAdvertising(_)
                | Self::StopAdvertising
        )
    }
}

/// First handle returned for the attribute table.
pub const SIM_FIRST_HANDLE: u16 = 40;

/// Scriptable state behind [`SimBle`].
#[derive(Debug, Default)]
pub struct SimBleState {
    pub advertising: bool,
    pub service_running: bool,
    /// Commands that fail synchronously.
    pub fail_on: Vec<&'static str>,
    /// Commands that are accepted but complete with an error.
    pub fail_completion_of: Vec<&'static str>,
    pub commands: Vec<BleCommand>,
}

/// Simulated BLE controller and GATT server.
#[derive(Debug, Clone)]
pub struct SimBle {
    state: Arc<Mutex<SimBleState>>,
    outbox: Outbox,
}

impl SimBle {
    pub fn new(outbox: Outbox) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimBleState::default())),
            outbox,
        }
    }

    pub fn state(&self) -> MutexGuard<'_, SimBleState> {
        lock(&self.state)
    }

    /// Commands issued since the last call.
    pub fn take_commands(&self) -> Vec<BleCommand> {
        std::mem::take(&mut self.state().commands)
    }

    fn complete(
        &self,
        state: &SimBleState,
        command: &'static str,
        event: fn(Result<(), DriverError>) -> BleDriverEvent,
    ) {
        let status = check(&state.fail_completion_of, command);
        self.outbox.push(DriverEvent::Ble(event(status)));
    }
}

impl BleDriver for SimBle {
    fn init_layer(&mut self) -> Result<(), DriverError> {
        let mut state = self.state();
        check(&state.fail_on, "init_layer")?;
        state.commands.push(BleCommand::InitLayer);
        Ok(())
    }

    fn register_app(&mut self, app_id: u16) -> Result<(), DriverError> {
        let mut state = self.state();
        check(&state.fail_on, "register_app")?;
        state.commands.push(BleCommand::RegisterApp(app_id));
        self.complete(&state, "register_app", BleDriverEvent::AppRegistered);
        Ok(())
    }

    fn create_attribute_table(&mut self, table: &[AttributeEntry]) -> Result<(), DriverError> {
        let mut state = self.state();
        check(&state.fail_on, "create_attribute_table")?;
        state
            .commands
            .push(BleCommand::CreateAttributeTable(table.len()));
        let result = check(&state.fail_completion_of, "create_attribute_table").map(|()| {
            (0..table.len() as u16)
                .map(|i| SIM_FIRST_HANDLE + i)
                .collect()
        });
        self.outbox
            .push(DriverEvent::Ble(BleDriverEvent::AttributeTableCreated(result)));
        Ok(())
    }

    fn start_service(&mut self, service_handle: u16) -> Result<(), DriverError> {
        let mut state = self.state();
        check(&state.fail_on, "start_service")?;
        state.commands.push(BleCommand::StartService(service_handle));
        if !state.fail_completion_of.contains(&"start_service") {
            state.service_running = true;
        }
        self.complete(&state, "start_service", BleDriverEvent::ServiceStarted);
        Ok(())
    }

    fn stop_service(&mut self, service_handle: u16) -> Result<(), DriverError> {
        let mut state = self.state();
        check(&state.fail_on, "stop_service")?;
        state.commands.push(BleCommand::StopService(service_handle));
        state.service_running = false;
        self.complete(&state, "stop_service", BleDriverEvent::ServiceStopped);
        Ok(())
    }

    fn configure_advertising(&mut self, data: &AdvertisingData) -> Result<(), DriverError> {
        let mut state = self.state();
        check(&state.fail_on, "configure_advertising")?;
        state
            .commands
            .push(BleCommand::ConfigureAdvertising(data.clone()));
        self.complete(
            &state,
            "configure_advertising",
            BleDriverEvent::AdvertisingConfigured,
        );
        Ok(())
    }

    fn start_advertising(&mut self, params: &AdvertisingParams) -> Result<(), DriverError> {
        let mut state = self.state();
        check(&state.fail_on, "start_advertising")?;
        state.commands.push(BleCommand::StartAdvertising(*params));
        if !state.fail_completion_of.contains(&"start_advertising") {
            state.advertising = true;
        }
        self.complete(&state, "start_advertising", BleDriverEvent::AdvertisingStarted);
        Ok(())
    }

    fn stop_advertising(&mut self) -> Result<(), DriverError> {
        let mut state = self.state();
        check(&state.fail_on, "stop_advertising")?;
        state.commands.push(BleCommand::StopAdvertising);
        state.advertising = false;
        self.complete(&state, "stop_advertising", BleDriverEvent::AdvertisingStopped);
        Ok(())
    }

    fn send_indication(
        &mut self,
        conn_id: u16,
        _attr_handle: u16,
        data: &[u8],
    ) -> Result<(), DriverError> {
        let mut state = self.state();
        check(&state.fail_on, "send_indication")?;
        state
            .commands
            .push(BleCommand::SendIndication(conn_id, data.to_vec()));
        Ok(())
    }

    fn send_response(
        &mut self,
        conn_id: u16,
        trans_id: u32,
        status: GattStatus,
        value: &[u8],
    ) -> Result<(), DriverError> {
        let mut state = self.state();
        check(&state.fail_on, "send_response")?;
        state.commands.push(BleCommand::SendResponse {
            conn_id,
            trans_id,
            status,
            value: value.to_vec(),
        });
        Ok(())
    }

    fn close(&mut self, conn_id: u16) -> Result<(), DriverError> {
        let mut state = self.state();
        check(&state.fail_on, "close")?;
        state.commands.push(BleCommand::Close(conn_id));
        Ok(())
    }
}

// ==================== Tunnel ====================

/// Scriptable state behind [`SimTunnel`].
#[derive(Debug, Default)]
pub struct SimTunnelState {
    pub running: bool,
    pub start_count: usize,
    pub stop_count: usize,
    pub fail_start: bool,
    /// Report `PrimaryUp` as soon as the tunnel starts.
    pub auto_up: bool,
}

/// Simulated service tunnel agent.
#[derive(Debug, Clone)]
pub struct SimTunnel {
    state: Arc<Mutex<SimTunnelState>>,
    outbox: Outbox,
}

impl SimTunnel {
    pub fn new(outbox: Outbox) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimTunnelState::default())),
            outbox,
        }
    }

    pub fn state(&self) -> MutexGuard<'_, SimTunnelState> {
        lock(&self.state)
    }
}

impl TunnelAgent for SimTunnel {
    fn start(&mut self) -> Result<(), DriverError> {
        let mut state = self.state();
        state.start_count += 1;
        if state.fail_start {
            return Err(DriverError::new("tunnel start", -1));
        }
        state.running = true;
        if state.auto_up {
            self.outbox
                .push(DriverEvent::Tunnel(TunnelNotification::PrimaryUp));
        }
        Ok(())
    }

    fn stop(&mut self) {
        let mut state = self.state();
        state.stop_count += 1;
        if state.running {
            state.running = false;
            self.outbox.push(DriverEvent::Tunnel(TunnelNotification::Down));
        }
    }
}

// ==================== Store and Provisioning ====================

/// In-memory configuration store.
#[derive(Debug, Clone)]
pub struct MemoryConfigStore {
    pub device_id: u64,
    pub credentials: Option<WifiConfig>,
    pub device_name: Option<String>,
}

impl MemoryConfigStore {
    pub fn new(device_id: u64) -> Self {
        Self {
            device_id,
            credentials: None,
            device_name: None,
        }
    }
}

impl ConfigStore for MemoryConfigStore {
    fn device_id(&self) -> u64 {
        self.device_id
    }

    fn station_credentials(&self) -> Option<WifiConfig> {
        self.credentials.clone()
    }

    fn set_station_credentials(&mut self, credentials: &WifiConfig) -> Result<(), DriverError> {
        self.credentials = Some(credentials.clone());
        Ok(())
    }

    fn clear_station_credentials(&mut self) -> Result<(), DriverError> {
        self.credentials = None;
        Ok(())
    }

    fn device_name(&self) -> Option<String> {
        self.device_name.clone()
    }

    fn set_device_name(&mut self, name: Option<&str>) -> Result<(), DriverError> {
        self.device_name = name.map(str::to_string);
        Ok(())
    }
}

/// Provisioning flags that tests flip directly.
#[derive(Debug, Default)]
pub struct SimProvisioningFlags {
    pub member: bool,
    pub provisioned: bool,
    pub paired: bool,
}

/// Shared provisioning state.
#[derive(Debug, Clone, Default)]
pub struct SimProvisioning {
    flags: Arc<Mutex<SimProvisioningFlags>>,
}

impl SimProvisioning {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flags(&self) -> MutexGuard<'_, SimProvisioningFlags> {
        lock(&self.flags)
    }
}

impl ProvisioningState for SimProvisioning {
    fn is_member_of_fabric(&self) -> bool {
        self.flags().member
    }

    fn is_service_provisioned(&self) -> bool {
        self.flags().provisioned
    }

    fn is_paired_to_account(&self) -> bool {
        self.flags().paired
    }
}

// ==================== Event Sink ====================

/// Sink that records every event it receives.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<DeviceEvent>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events received since the last call.
    pub fn take(&self) -> Vec<DeviceEvent> {
        std::mem::take(&mut *lock(&self.events))
    }

    pub fn events(&self) -> Vec<DeviceEvent> {
        lock(&self.events).clone()
    }
}

impl EventSink for RecordingSink {
    fn post(&mut self, event: &DeviceEvent) {
        lock(&self.events).push(event.clone());
    }
}

// ==================== Rig ====================

/// Upper bound on delivery rounds in [`SimRig::settle`].
const MAX_SETTLE_ROUNDS: usize = 256;

/// A complete set of simulated collaborators sharing one outbox and clock.
#[derive(Debug, Clone)]
pub struct SimRig {
    pub outbox: Outbox,
    pub clock: ManualClock,
    pub wifi: SimWifi,
    pub ble: SimBle,
    pub tunnel: SimTunnel,
    pub provisioning: SimProvisioning,
    pub sink: RecordingSink,
    pub store: MemoryConfigStore,
}

impl SimRig {
    pub fn new(device_id: u64) -> Self {
        let outbox = Outbox::new();
        Self {
            clock: ManualClock::new(),
            wifi: SimWifi::new(outbox.clone()),
            ble: SimBle::new(outbox.clone()),
            tunnel: SimTunnel::new(outbox.clone()),
            provisioning: SimProvisioning::new(),
            sink: RecordingSink::new(),
            store: MemoryConfigStore::new(device_id),
            outbox,
        }
    }

    /// Boxed handles for the orchestrator. The store is copied, the other
    /// collaborators share state with the rig.
    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            wifi: Box::new(self.wifi.clone()),
            ble: Box::new(self.ble.clone()),
            tunnel: Box::new(self.tunnel.clone()),
            store: Box::new(self.store.clone()),
            provisioning: Box::new(self.provisioning.clone()),
            sink: Box::new(self.sink.clone()),
        }
    }

    /// Run the orchestrator and deliver driver completions until neither
    /// produces anything new. Returns the number of events delivered.
    pub fn settle(&self, manager: &mut ConnectivityManager) -> usize {
        let mut delivered = 0;
        for _ in 0..MAX_SETTLE_ROUNDS {
            manager.run_once();
            let events = self.outbox.drain();
            if events.is_empty() && !manager.has_pending_work() {
                return delivered;
            }
            for event in events {
                delivered += 1;
                if let Err(e) = event.deliver(manager) {
                    log::error!("Failed to deliver simulated event: {}", e);
                }
            }
        }
        log::warn!("Simulation did not settle");
        delivered
    }

    /// Advance the clock and settle.
    pub fn advance(&self, manager: &mut ConnectivityManager, ms: u64) -> usize {
        self.clock.advance(ms);
        self.settle(manager)
    }
}
