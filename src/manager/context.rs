//! Shared orchestrator context.
//!
//! The state machines are separate structs so each stays small, but they all
//! need the drivers, the configuration and the event loop. [`Context`] holds
//! those, and every drive function borrows it mutably for its duration.

use super::ConnectivityManager;
use crate::config::{ConnectivityConfig, Settings};
use crate::driver::{
    BleDriver, ConfigStore, ProvisioningState, TunnelAgent, TunnelNotification, WifiDriver,
    WifiEvent,
};
use crate::error::ConnectivityError;
use crate::event_loop::{Clock, TimerKind, TimerQueue, WorkQueue};
use crate::events::{DeviceEvent, EventSink};
use log::{debug, error};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Deferred work executed on the event loop.
pub enum WorkItem {
    DriveStation,
    DriveAp,
    DriveBle,
    DriveTunnel,
    UpdateInternetConnectivity,
    /// WiFi driver notification posted from the driver's thread.
    Wifi(WifiEvent),
    /// Tunnel agent notification.
    Tunnel(TunnelNotification),
    /// Device event, dispatched internally and then to the sink.
    Event(DeviceEvent),
    /// Arbitrary closure run with the orchestrator.
    Call(Box<dyn FnOnce(&mut ConnectivityManager) + Send>),
}

impl fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DriveStation => f.write_str("DriveStation"),
            Self::DriveAp => f.write_str("DriveAp"),
            Self::DriveBle => f.write_str("DriveBle"),
            Self::DriveTunnel => f.write_str("DriveTunnel"),
            Self::UpdateInternetConnectivity => f.write_str("UpdateInternetConnectivity"),
            Self::Wifi(event) => f.debug_tuple("Wifi").field(event).finish(),
            Self::Tunnel(notification) => f.debug_tuple("Tunnel").field(notification).finish(),
            Self::Event(event) => f.debug_tuple("Event").field(event).finish(),
            Self::Call(_) => f.write_str("Call(..)"),
        }
    }
}

/// Derived connectivity facts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConnectivityFlags {
    pub ipv4_reachable: bool,
    pub ipv6_reachable: bool,
    /// The tunnel agent has been told to run.
    pub tunnel_started: bool,
    /// The agent reported the primary tunnel up.
    pub tunnel_up: bool,
    /// An account pairing request waits for service connectivity.
    pub awaiting_connectivity: bool,
}

/// Collaborators injected at construction.
pub struct Collaborators {
    pub wifi: Box<dyn WifiDriver>,
    pub ble: Box<dyn BleDriver>,
    pub tunnel: Box<dyn TunnelAgent>,
    pub store: Box<dyn ConfigStore>,
    pub provisioning: Box<dyn ProvisioningState>,
    pub sink: Box<dyn EventSink>,
}

/// Drivers, configuration and event loop state shared by the state machines.
pub struct Context {
    pub settings: Settings,
    pub config: ConnectivityConfig,
    pub flags: ConnectivityFlags,
    pub wifi: Box<dyn WifiDriver>,
    pub ble: Box<dyn BleDriver>,
    pub tunnel: Box<dyn TunnelAgent>,
    pub store: Box<dyn ConfigStore>,
    pub provisioning: Box<dyn ProvisioningState>,
    pub sink: Box<dyn EventSink>,
    clock: Arc<dyn Clock>,
    pub(crate) work: WorkQueue<WorkItem>,
    pub(crate) timers: TimerQueue<TimerKind>,
}

impl Context {
    pub fn new(settings: Settings, collaborators: Collaborators, clock: Arc<dyn Clock>) -> Self {
        Self {
            config: ConnectivityConfig::from_settings(&settings),
            work: WorkQueue::new(settings.work_queue_capacity),
            settings,
            flags: ConnectivityFlags::default(),
            wifi: collaborators.wifi,
            ble: collaborators.ble,
            tunnel: collaborators.tunnel,
            store: collaborators.store,
            provisioning: collaborators.provisioning,
            sink: collaborators.sink,
            clock,
            timers: TimerQueue::new(),
        }
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Queue work for a later event loop pass.
    pub fn schedule(&mut self, item: WorkItem) -> Result<(), ConnectivityError> {
        debug!("Scheduling {:?}", item);
        self.work.push(item)
    }

    /// Fail with `QueueFull` unless `count` more items fit.
    ///
    /// Setters call this before touching any state.
    pub fn reserve(&self, count: usize) -> Result<(), ConnectivityError> {
        if self.work.len() + count > self.work.capacity() {
            return Err(ConnectivityError::QueueFull);
        }
        Ok(())
    }

    /// Queue a drive request from inside a handler. Overflow is logged.
    pub fn request(&mut self, item: WorkItem) {
        if let Err(e) = self.schedule(item) {
            error!("Dropping drive request: {}", e);
        }
    }

    /// Queue a device event for dispatch. Overflow is logged.
    pub fn post_event(&mut self, event: DeviceEvent) {
        if let Err(e) = self.work.push(WorkItem::Event(event)) {
            error!("Failed to post device event: {}", e);
        }
    }

    /// Arm `kind` to fire at the absolute time `deadline_ms`.
    pub fn start_timer(&mut self, kind: TimerKind, deadline_ms: u64) {
        self.timers.start(kind, deadline_ms);
    }

    /// Whether usable station credentials are stored.
    pub fn is_station_provisioned(&self) -> bool {
        self.store
            .station_credentials()
            .is_some_and(|credentials| !credentials.ssid.is_empty())
    }
}
