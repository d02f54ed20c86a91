//! Cross-thread entry point into the orchestrator.
//!
//! Driver callbacks arrive on whatever thread the radio stack uses. They
//! reach the orchestrator only through a [`Bridge`], which owns the stack
//! lock and wakes the event loop after every hand-off.
//!
//! ## Lock Ordering
//!
//! The stack lock is the outermost lock. Driver implementations must not
//! call back into the bridge while a driver command is executing, because
//! commands are issued with the stack lock held. Completions are handed over
//! from a separate forwarding task instead.

use crate::driver::{BleDriverEvent, DriverEvent, TunnelNotification, WifiEvent};
use crate::error::ConnectivityError;
use crate::events::DeviceEvent;
use crate::manager::{ConnectivityManager, ConnectivityStatus};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::futures::Notified;
use tokio::sync::Notify;

/// Shared handle to the orchestrator and its wake-up signal.
#[derive(Clone)]
pub struct Bridge {
    stack: Arc<Mutex<ConnectivityManager>>,
    wake: Arc<Notify>,
}

impl Bridge {
    pub fn new(manager: ConnectivityManager) -> Self {
        Self {
            stack: Arc::new(Mutex::new(manager)),
            wake: Arc::new(Notify::new()),
        }
    }

    /// Acquire the stack lock.
    ///
    /// A panic while the lock was held leaves the orchestrator usable, so a
    /// poisoned lock is taken over rather than propagated.
    pub fn lock(&self) -> MutexGuard<'_, ConnectivityManager> {
        self.stack.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Resolves when work was handed over since the last wake-up.
    pub fn notified(&self) -> Notified<'_> {
        self.wake.notified()
    }

    /// Run `f` under the stack lock, then wake the event loop.
    pub fn with<R>(&self, f: impl FnOnce(&mut ConnectivityManager) -> R) -> R {
        let result = f(&mut self.lock());
        self.wake.notify_one();
        result
    }

    pub fn post_wifi_event(&self, event: WifiEvent) -> Result<(), ConnectivityError> {
        self.with(|manager| manager.post_wifi_event(event))
    }

    pub fn post_tunnel_notification(
        &self,
        notification: TunnelNotification,
    ) -> Result<(), ConnectivityError> {
        self.with(|manager| manager.post_tunnel_notification(notification))
    }

    /// Apply a BLE callback under the lock.
    pub fn handle_ble_event(&self, event: BleDriverEvent) {
        self.with(|manager| manager.handle_ble_event(event))
    }

    /// Deliver any driver output.
    pub fn deliver(&self, event: DriverEvent) -> Result<(), ConnectivityError> {
        self.with(|manager| event.deliver(manager))
    }

    /// Post a device event from another subsystem.
    pub fn post_event(&self, event: DeviceEvent) -> Result<(), ConnectivityError> {
        self.with(|manager| manager.post_event(event))
    }

    /// Queue a closure for the event loop.
    pub fn schedule_work(
        &self,
        work: impl FnOnce(&mut ConnectivityManager) + Send + 'static,
    ) -> Result<(), ConnectivityError> {
        self.with(|manager| manager.schedule_work(work))
    }

    pub fn status(&self) -> ConnectivityStatus {
        self.lock().status()
    }
}
