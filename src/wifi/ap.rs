//! WiFi access-point state machine.
//!
//! ```text
//! NotActive -> Activating -> Active -> Deactivating -> NotActive
//! ```
//!
//! Transitions only follow that cycle. A drive that wants the opposite state
//! while a transition is in flight waits for the driver to finish it first.
//!
//! In the on-demand modes the AP stays up while there has been demand within
//! the idle timeout. The idle timer is re-armed on every drive for whatever
//! budget is left, and a stale expiry simply re-evaluates.

use crate::config::{ApMode, StationMode};
use crate::driver::{ApConfiguration, WifiEvent, WifiInterface};
use crate::error::ConnectivityError;
use crate::event_loop::TimerKind;
use crate::manager::Context;
use log::{debug, info};
use serde::Serialize;

/// Access point state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ApState {
    NotActive,
    Activating,
    Active,
    Deactivating,
}

#[derive(Debug)]
pub struct ApMachine {
    state: ApState,
    last_demand_ms: Option<u64>,
}

impl ApMachine {
    pub fn new() -> Self {
        Self {
            state: ApState::NotActive,
            last_demand_ms: None,
        }
    }

    pub fn state(&self) -> ApState {
        self.state
    }

    pub fn last_demand_ms(&self) -> Option<u64> {
        self.last_demand_ms
    }

    fn change_state(&mut self, new_state: ApState) {
        if self.state != new_state {
            info!("WiFi AP state change: {:?} -> {:?}", self.state, new_state);
            self.state = new_state;
        }
    }

    /// Catch up with the driver's view of the interface.
    fn sync_with_driver(&mut self, enabled: bool) {
        match (self.state, enabled) {
            (ApState::Activating, true) => self.change_state(ApState::Active),
            (ApState::NotActive, true) => {
                self.change_state(ApState::Activating);
                self.change_state(ApState::Active);
            }
            (ApState::Deactivating, false) => self.change_state(ApState::NotActive),
            (ApState::Active, false) => {
                self.change_state(ApState::Deactivating);
                self.change_state(ApState::NotActive);
            }
            _ => {}
        }
    }

    /// Apply a driver notification. Returns whether a drive should follow.
    pub fn on_wifi_event(&mut self, event: WifiEvent) -> bool {
        match event {
            WifiEvent::ApStart => {
                if self.state == ApState::Activating {
                    self.change_state(ApState::Active);
                }
                true
            }
            WifiEvent::ApStop => {
                if self.state == ApState::Deactivating {
                    self.change_state(ApState::NotActive);
                }
                true
            }
            _ => false,
        }
    }

    /// Record fresh demand. Only meaningful in the on-demand modes.
    pub fn demand(&mut self, mode: ApMode, now_ms: u64) -> bool {
        if !mode.is_on_demand() {
            return false;
        }
        self.last_demand_ms = Some(now_ms);
        true
    }

    /// Forget outstanding demand so the next drive stops the AP.
    pub fn clear_demand(&mut self, mode: ApMode) -> bool {
        if !mode.is_on_demand() {
            return false;
        }
        self.last_demand_ms = None;
        true
    }

    /// Extend the idle window of an AP that is up or coming up.
    pub fn maintain(&mut self, mode: ApMode, now_ms: u64) -> bool {
        if mode.is_on_demand() && matches!(self.state, ApState::Activating | ApState::Active) {
            self.last_demand_ms = Some(now_ms);
            return true;
        }
        false
    }

    fn target_state(&self, ctx: &mut Context, now_ms: u64) -> ApState {
        let mode = ctx.config.ap_mode;
        match mode {
            ApMode::Disabled => ApState::NotActive,
            ApMode::Enabled => ApState::Active,
            ApMode::OnDemandNoStationProvision
                if !ctx.is_station_provisioned()
                    || ctx.config.station_mode == StationMode::Disabled =>
            {
                ApState::Active
            }
            ApMode::OnDemand | ApMode::OnDemandNoStationProvision => match self.last_demand_ms {
                Some(demand) if now_ms < demand + ctx.config.ap_idle_timeout_ms => {
                    let idle_at = demand + ctx.config.ap_idle_timeout_ms;
                    debug!("On-demand WiFi AP idle in {} ms", idle_at - now_ms);
                    ctx.start_timer(TimerKind::ApIdle, idle_at);
                    ApState::Active
                }
                _ => ApState::NotActive,
            },
            ApMode::NotSupported | ApMode::ApplicationControlled => ApState::NotActive,
        }
    }

    fn ap_configuration(ctx: &Context) -> ApConfiguration {
        let wifi = &ctx.settings.wifi;
        ApConfiguration {
            ssid: ctx.store.ap_ssid(&wifi.ap_ssid_prefix),
            channel: wifi.ap_channel,
            max_stations: wifi.ap_max_stations,
            beacon_interval_ms: wifi.ap_beacon_interval_ms,
        }
    }

    /// Reconcile the AP with its mode and the radio.
    pub fn drive(&mut self, ctx: &mut Context) -> Result<(), ConnectivityError> {
        let mode = ctx.config.ap_mode;
        if mode == ApMode::NotSupported {
            return Ok(());
        }

        let enabled = ctx.wifi.interface_enabled(WifiInterface::AccessPoint)?;
        self.sync_with_driver(enabled);
        if mode == ApMode::ApplicationControlled {
            return Ok(());
        }

        ctx.wifi.start()?;

        let now = ctx.now_ms();
        match (self.state, self.target_state(ctx, now)) {
            (ApState::NotActive, ApState::Active) => {
                let config = Self::ap_configuration(ctx);
                info!("Starting WiFi AP ({})", config.ssid);
                ctx.wifi
                    .set_interface_enabled(WifiInterface::AccessPoint, true)?;
                ctx.wifi.configure_ap(&config)?;
                self.change_state(ApState::Activating);
            }
            (ApState::Active, ApState::NotActive) => {
                info!("Stopping WiFi AP");
                ctx.wifi
                    .set_interface_enabled(WifiInterface::AccessPoint, false)?;
                self.change_state(ApState::Deactivating);
            }
            (ApState::Activating, ApState::NotActive) | (ApState::Deactivating, ApState::Active) => {
                debug!("WiFi AP transition in progress ({:?})", self.state);
            }
            _ => {}
        }

        Ok(())
    }
}

impl Default for ApMachine {
    fn default() -> Self {
        Self::new()
    }
}
