//! WiFi station state machine.
//!
//! ```text
//! NotConnected -> Connecting -> ConnectingSucceeded -> Connected
//!                            -> ConnectingFailed    -> NotConnected
//! Connected -> Disconnecting -> NotConnected
//! ```
//!
//! A failed attempt stamps the failure time. No new attempt is made until the
//! reconnect interval has passed since that stamp.

use crate::config::StationMode;
use crate::driver::{WifiEvent, WifiInterface};
use crate::error::ConnectivityError;
use crate::event_loop::TimerKind;
use crate::manager::Context;
use log::{debug, info};
use serde::Serialize;

/// Station connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StationState {
    NotConnected,
    Connecting,
    ConnectingSucceeded,
    ConnectingFailed,
    Connected,
    Disconnecting,
}

/// Connectivity edge crossed during a drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StationEdge {
    Connected,
    Disconnected,
}

#[derive(Debug)]
pub struct StationMachine {
    state: StationState,
    last_failure_ms: Option<u64>,
    edge: Option<StationEdge>,
}

impl StationMachine {
    pub fn new() -> Self {
        Self {
            state: StationState::NotConnected,
            last_failure_ms: None,
            edge: None,
        }
    }

    pub fn state(&self) -> StationState {
        self.state
    }

    /// Time of the most recent failed connect attempt.
    pub fn last_failure_ms(&self) -> Option<u64> {
        self.last_failure_ms
    }

    /// Take the edge crossed by the last drive, if any.
    ///
    /// Survives a drive that failed part way through, so a transition that
    /// was made is always reported.
    pub fn take_edge(&mut self) -> Option<StationEdge> {
        self.edge.take()
    }

    fn change_state(&mut self, new_state: StationState) {
        if self.state != new_state {
            info!(
                "WiFi station state change: {:?} -> {:?}",
                self.state, new_state
            );
            self.state = new_state;
        }
    }

    /// Apply a driver notification. Returns whether a drive should follow.
    pub fn on_wifi_event(&mut self, event: WifiEvent) -> bool {
        match event {
            WifiEvent::StaConnected => {
                if self.state == StationState::Connecting {
                    self.change_state(StationState::ConnectingSucceeded);
                }
                true
            }
            WifiEvent::StaDisconnected => {
                if self.state == StationState::Connecting {
                    self.change_state(StationState::ConnectingFailed);
                }
                true
            }
            WifiEvent::StaStart | WifiEvent::StaStop | WifiEvent::ScanDone => true,
            _ => false,
        }
    }

    /// Reconcile the station with its mode and the radio.
    ///
    /// Issues at most one connect or disconnect command. Errors are returned
    /// to the caller, which disables the station.
    pub fn drive(&mut self, ctx: &mut Context) -> Result<(), ConnectivityError> {
        if ctx.config.station_mode == StationMode::NotSupported {
            return Ok(());
        }

        if ctx.config.station_mode != StationMode::ApplicationControlled {
            ctx.config.station_mode = if ctx.wifi.auto_connect()? {
                StationMode::Enabled
            } else {
                StationMode::Disabled
            };
            ctx.wifi.start()?;
            ctx.wifi.set_interface_enabled(WifiInterface::Station, true)?;
        }
        let mode = ctx.config.station_mode;

        if ctx.wifi.station_associated()? {
            if matches!(
                self.state,
                StationState::NotConnected | StationState::ConnectingSucceeded
            ) {
                self.last_failure_ms = None;
                self.change_state(StationState::Connected);
                self.edge = Some(StationEdge::Connected);
            }

            if mode != StationMode::ApplicationControlled
                && self.state == StationState::Connected
                && (mode != StationMode::Enabled || !ctx.is_station_provisioned())
            {
                info!("Disconnecting WiFi station");
                ctx.wifi.disconnect()?;
                self.change_state(StationState::Disconnecting);
            }
            return Ok(());
        }

        match self.state {
            StationState::Connected | StationState::Disconnecting => {
                self.change_state(StationState::NotConnected);
                self.edge = Some(StationEdge::Disconnected);
            }
            StationState::ConnectingFailed => {
                self.last_failure_ms = Some(ctx.now_ms());
                self.change_state(StationState::NotConnected);
            }
            _ => {}
        }

        if self.state == StationState::NotConnected
            && mode == StationMode::Enabled
            && !ctx.wifi.scan_in_progress()
        {
            let Some(credentials) = ctx.store.station_credentials() else {
                debug!("WiFi station not provisioned");
                return Ok(());
            };
            if credentials.ssid.is_empty() {
                return Ok(());
            }

            let now = ctx.now_ms();
            let ready_at = self
                .last_failure_ms
                .map_or(now, |failed| failed + ctx.config.station_reconnect_interval_ms);
            if now >= ready_at {
                info!("Attempting to connect WiFi station to {}", credentials.ssid);
                ctx.wifi.connect(&credentials)?;
                self.change_state(StationState::Connecting);
            } else {
                info!("Next WiFi station reconnect in {} ms", ready_at - now);
                ctx.start_timer(TimerKind::StationReconnect, ready_at);
            }
        }

        Ok(())
    }
}

impl Default for StationMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::tests_support::sim_context;
    use crate::config::WifiConfig;
    use crate::driver::sim::WifiCommand;

    fn provisioned(ctx: &mut Context) {
        ctx.store
            .set_station_credentials(&WifiConfig::new("home", "password123").unwrap())
            .unwrap();
    }

    // ==================== Drive Tests ====================

    #[test]
    fn test_disabled_unprovisioned_stays_idle() {
        let (mut ctx, rig) = sim_context();
        let mut station = StationMachine::new();

        station.drive(&mut ctx).unwrap();

        assert_eq!(station.state(), StationState::NotConnected);
        assert_eq!(rig.wifi.connect_count(), 0);
        assert_eq!(ctx.config.station_mode, StationMode::Disabled);
    }

    #[test]
    fn test_enabled_provisioned_connects() {
        let (mut ctx, rig) = sim_context();
        provisioned(&mut ctx);
        rig.wifi.state().auto_connect = true;
        let mut station = StationMachine::new();

        station.drive(&mut ctx).unwrap();

        assert_eq!(station.state(), StationState::Connecting);
        assert!(rig
            .wifi
            .state()
            .commands
            .contains(&WifiCommand::Connect("home".to_string())));
    }

    #[test]
    fn test_success_reports_connected_edge() {
        let (mut ctx, rig) = sim_context();
        provisioned(&mut ctx);
        rig.wifi.state().auto_connect = true;
        let mut station = StationMachine::new();
        station.drive(&mut ctx).unwrap();

        assert!(station.on_wifi_event(WifiEvent::StaConnected));
        assert_eq!(station.state(), StationState::ConnectingSucceeded);
        station.drive(&mut ctx).unwrap();

        assert_eq!(station.state(), StationState::Connected);
        assert_eq!(station.take_edge(), Some(StationEdge::Connected));
        assert_eq!(station.take_edge(), None);
    }

    #[test]
    fn test_failure_backs_off() {
        let (mut ctx, rig) = sim_context();
        provisioned(&mut ctx);
        {
            let mut wifi = rig.wifi.state();
            wifi.auto_connect = true;
            wifi.ap_in_range = false;
        }
        let mut station = StationMachine::new();
        rig.clock.set(1_000);
        station.drive(&mut ctx).unwrap();
        station.on_wifi_event(WifiEvent::StaDisconnected);
        assert_eq!(station.state(), StationState::ConnectingFailed);

        station.drive(&mut ctx).unwrap();
        assert_eq!(station.state(), StationState::NotConnected);
        assert_eq!(station.last_failure_ms(), Some(1_000));
        assert_eq!(station.take_edge(), None);
        assert_eq!(rig.wifi.connect_count(), 1);
        assert_eq!(ctx.timers.deadline(TimerKind::StationReconnect), Some(6_000));

        rig.clock.set(5_999);
        station.drive(&mut ctx).unwrap();
        assert_eq!(rig.wifi.connect_count(), 1);

        rig.clock.set(6_000);
        station.drive(&mut ctx).unwrap();
        assert_eq!(rig.wifi.connect_count(), 2);
        assert_eq!(station.state(), StationState::Connecting);
    }

    #[test]
    fn test_disable_while_connected_disconnects() {
        let (mut ctx, rig) = sim_context();
        provisioned(&mut ctx);
        rig.wifi.state().auto_connect = true;
        let mut station = StationMachine::new();
        station.drive(&mut ctx).unwrap();
        station.on_wifi_event(WifiEvent::StaConnected);
        station.drive(&mut ctx).unwrap();
        station.take_edge();

        rig.wifi.state().auto_connect = false;
        station.drive(&mut ctx).unwrap();
        assert_eq!(station.state(), StationState::Disconnecting);
        assert!(rig.wifi.state().commands.contains(&WifiCommand::Disconnect));

        station.drive(&mut ctx).unwrap();
        assert_eq!(station.state(), StationState::NotConnected);
        assert_eq!(station.take_edge(), Some(StationEdge::Disconnected));
    }

    #[test]
    fn test_scan_in_progress_defers_connect() {
        let (mut ctx, rig) = sim_context();
        provisioned(&mut ctx);
        {
            let mut wifi = rig.wifi.state();
            wifi.auto_connect = true;
            wifi.scanning = true;
        }
        let mut station = StationMachine::new();
        station.drive(&mut ctx).unwrap();
        assert_eq!(station.state(), StationState::NotConnected);
        assert_eq!(rig.wifi.connect_count(), 0);
    }

    #[test]
    fn test_application_controlled_leaves_radio_alone() {
        let (mut ctx, rig) = sim_context();
        ctx.config.station_mode = StationMode::ApplicationControlled;
        let mut station = StationMachine::new();
        station.drive(&mut ctx).unwrap();
        assert!(rig.wifi.state().commands.is_empty());
    }

    #[test]
    fn test_driver_failure_is_returned() {
        let (mut ctx, rig) = sim_context();
        rig.wifi.state().fail_on.push("start");
        let mut station = StationMachine::new();
        assert!(matches!(
            station.drive(&mut ctx),
            Err(ConnectivityError::Driver(_))
        ));
    }

    // ==================== Event Tests ====================

    #[test]
    fn test_events_outside_connecting_only_request_drive() {
        let mut station = StationMachine::new();
        assert!(station.on_wifi_event(WifiEvent::StaConnected));
        assert_eq!(station.state(), StationState::NotConnected);
        assert!(station.on_wifi_event(WifiEvent::ScanDone));
        assert!(!station.on_wifi_event(WifiEvent::ApStart));
    }
}
