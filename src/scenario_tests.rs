//! End-to-end scenarios against the simulated rig.
//!
//! Each test drives the orchestrator through its public API and the
//! simulated drivers only, the same way the host simulator does.

use crate::ble::advertising::AdvertisingKind;
use crate::config::{ApMode, Settings, StationMode, TunnelMode, WifiConfig};
use crate::driver::sim::{BleCommand, WifiCommand};
use crate::driver::{BleDriverEvent, WifiInterface};
use crate::error::ConnectivityError;
use crate::events::{AccountPairingProgress, BleEvent, ConnectivityChange, DeviceEvent};
use crate::manager::tests_support::{sim_manager, sim_manager_with, SimRig};
use crate::manager::ConnectivityManager;
use crate::wifi::{ApState, StationState};

fn home() -> WifiConfig {
    WifiConfig::new("home", "password123").unwrap()
}

fn started() -> (ConnectivityManager, SimRig) {
    let (mut manager, rig) = sim_manager();
    manager.init().unwrap();
    rig.settle(&mut manager);
    rig.sink.take();
    (manager, rig)
}

fn connected() -> (ConnectivityManager, SimRig) {
    let (mut manager, rig) = started();
    manager.set_station_provision(home()).unwrap();
    manager.set_station_mode(StationMode::Enabled).unwrap();
    rig.settle(&mut manager);
    (manager, rig)
}

fn connect_attempts(rig: &SimRig) -> Vec<String> {
    rig.wifi
        .state()
        .commands
        .iter()
        .filter_map(|c| match c {
            WifiCommand::Connect(ssid) => Some(ssid.clone()),
            _ => None,
        })
        .collect()
}

// ==================== Station Scenarios ====================

#[test]
fn test_disabled_unprovisioned_never_connects() {
    let (mut manager, rig) = started();
    rig.advance(&mut manager, 60_000);

    assert_eq!(manager.station_mode(), StationMode::Disabled);
    assert_eq!(manager.station_state(), StationState::NotConnected);
    assert_eq!(rig.wifi.connect_count(), 0);
    assert!(rig.sink.events().is_empty());
}

#[test]
fn test_enabled_without_provision_waits() {
    let (mut manager, rig) = started();
    manager.set_station_mode(StationMode::Enabled).unwrap();
    rig.settle(&mut manager);

    assert_eq!(rig.wifi.connect_count(), 0);
    assert!(!manager.is_station_provisioned());
}

#[test]
fn test_provisioned_station_connects() {
    let (manager, rig) = connected();

    assert_eq!(manager.station_state(), StationState::Connected);
    assert!(manager.is_station_connected());
    assert!(manager.have_ipv4_internet());
    assert!(!manager.have_ipv6_internet());
    assert_eq!(connect_attempts(&rig), vec!["home".to_string()]);

    let events = rig.sink.events();
    assert!(events.contains(&DeviceEvent::WiFiConnectivityChange(
        ConnectivityChange::Established
    )));
    assert!(events.contains(&DeviceEvent::InternetConnectivityChange {
        ipv4: ConnectivityChange::Established,
        ipv6: ConnectivityChange::NoChange,
    }));
}

#[test]
fn test_disable_disconnects() {
    let (mut manager, rig) = connected();
    rig.sink.take();

    manager.set_station_mode(StationMode::Disabled).unwrap();
    rig.settle(&mut manager);

    assert_eq!(manager.station_state(), StationState::NotConnected);
    assert!(!manager.have_ipv4_internet());
    let events = rig.sink.take();
    assert!(events.contains(&DeviceEvent::WiFiConnectivityChange(ConnectivityChange::Lost)));
}

#[test]
fn test_clearing_provision_disconnects() {
    let (mut manager, rig) = connected();
    manager.clear_station_provision().unwrap();
    rig.settle(&mut manager);

    assert_eq!(manager.station_state(), StationState::NotConnected);
    assert!(manager.station_provision().is_none());
    assert_eq!(rig.wifi.connect_count(), 1);
}

#[test]
fn test_reconnect_backoff() {
    let (mut manager, rig) = started();
    rig.wifi.state().ap_in_range = false;
    manager.set_station_provision(home()).unwrap();
    manager.set_station_mode(StationMode::Enabled).unwrap();
    rig.settle(&mut manager);

    assert_eq!(rig.wifi.connect_count(), 1);
    assert_eq!(manager.station_state(), StationState::NotConnected);

    let interval = manager.station_reconnect_interval_ms();
    rig.advance(&mut manager, interval - 1);
    assert_eq!(rig.wifi.connect_count(), 1);

    rig.advance(&mut manager, 1);
    assert_eq!(rig.wifi.connect_count(), 2);

    // Spurious notifications do not shortcut the interval
    manager
        .post_wifi_event(crate::driver::WifiEvent::ScanDone)
        .unwrap();
    rig.advance(&mut manager, interval / 2);
    assert_eq!(rig.wifi.connect_count(), 2);

    rig.wifi.state().ap_in_range = true;
    rig.advance(&mut manager, interval / 2);
    assert_eq!(rig.wifi.connect_count(), 3);
    assert_eq!(manager.station_state(), StationState::Connected);
}

#[test]
fn test_lost_association_reported_and_retried() {
    let (mut manager, rig) = connected();
    rig.sink.take();
    rig.wifi.state().ap_in_range = false;
    rig.wifi.drop_association();
    rig.settle(&mut manager);

    let events = rig.sink.take();
    assert!(events.contains(&DeviceEvent::WiFiConnectivityChange(ConnectivityChange::Lost)));
    assert!(events.contains(&DeviceEvent::InternetConnectivityChange {
        ipv4: ConnectivityChange::Lost,
        ipv6: ConnectivityChange::NoChange,
    }));
    // First retry is immediate, the next waits for the interval
    assert_eq!(rig.wifi.connect_count(), 2);
    assert_eq!(manager.station_state(), StationState::NotConnected);
}

#[test]
fn test_default_station_from_settings() {
    let mut settings = Settings::default();
    settings.default_station = Some(home());
    let (mut manager, rig) = sim_manager_with(settings);
    manager.init().unwrap();
    rig.settle(&mut manager);

    assert_eq!(manager.station_state(), StationState::Connected);
}

#[test]
fn test_station_driver_failure_goes_quiet() {
    let (mut manager, rig) = started();
    manager.set_station_provision(home()).unwrap();
    rig.wifi.state().fail_on.push("start");
    manager.set_station_mode(StationMode::Enabled).unwrap();

    let steps = (0..100).take_while(|_| manager.run_next()).count();
    assert!(steps < 100, "work queue never drained");
    assert!(!manager.has_pending_work());
    assert_eq!(manager.station_mode(), StationMode::Disabled);
    assert!(!rig.wifi.state().auto_connect);

    rig.advance(&mut manager, 60_000);
    assert_eq!(rig.wifi.connect_count(), 0);
    assert_eq!(manager.station_state(), StationState::NotConnected);
}

// ==================== Access Point Scenarios ====================

#[test]
fn test_on_demand_ap_idles_out() {
    let (mut manager, rig) = started();
    manager.set_ap_idle_timeout(30_000).unwrap();
    manager.set_ap_mode(ApMode::OnDemand).unwrap();
    rig.settle(&mut manager);
    assert_eq!(manager.ap_state(), ApState::NotActive);

    manager.demand_start_ap().unwrap();
    rig.settle(&mut manager);
    assert_eq!(manager.ap_state(), ApState::Active);
    assert!(rig.wifi.state().commands.iter().any(
        |c| matches!(c, WifiCommand::ConfigureAp(config) if config.ssid == "NEST-BEEF")
    ));

    rig.advance(&mut manager, 29_999);
    assert_eq!(manager.ap_state(), ApState::Active);

    rig.advance(&mut manager, 1);
    assert_eq!(manager.ap_state(), ApState::NotActive);
}

#[test]
fn test_maintain_extends_on_demand_ap() {
    let (mut manager, rig) = started();
    manager.set_ap_idle_timeout(30_000).unwrap();
    manager.set_ap_mode(ApMode::OnDemand).unwrap();
    manager.demand_start_ap().unwrap();
    rig.settle(&mut manager);

    rig.advance(&mut manager, 20_000);
    manager.maintain_on_demand_ap();
    rig.advance(&mut manager, 20_000);
    assert_eq!(manager.ap_state(), ApState::Active);

    rig.advance(&mut manager, 10_000);
    assert_eq!(manager.ap_state(), ApState::NotActive);
}

#[test]
fn test_stop_on_demand_ap() {
    let (mut manager, rig) = started();
    manager.set_ap_mode(ApMode::OnDemand).unwrap();
    manager.demand_start_ap().unwrap();
    rig.settle(&mut manager);
    assert_eq!(manager.ap_state(), ApState::Active);

    manager.stop_on_demand_ap().unwrap();
    rig.settle(&mut manager);
    assert_eq!(manager.ap_state(), ApState::NotActive);
}

#[test]
fn test_demand_ignored_outside_on_demand_modes() {
    let (mut manager, rig) = started();
    manager.demand_start_ap().unwrap();
    rig.settle(&mut manager);
    assert_eq!(manager.ap_state(), ApState::NotActive);
}

#[test]
fn test_ap_for_unprovisioned_station() {
    let (mut manager, rig) = started();
    manager
        .set_ap_mode(ApMode::OnDemandNoStationProvision)
        .unwrap();
    rig.settle(&mut manager);
    assert_eq!(manager.ap_state(), ApState::Active);

    manager.set_station_provision(home()).unwrap();
    manager.set_station_mode(StationMode::Enabled).unwrap();
    rig.settle(&mut manager);
    assert_eq!(manager.station_state(), StationState::Connected);
    assert_eq!(manager.ap_state(), ApState::NotActive);
}

#[test]
fn test_ap_driver_failure_disables_ap() {
    let (mut manager, rig) = started();
    rig.wifi.state().fail_on.push("configure_ap");
    manager.set_ap_mode(ApMode::Enabled).unwrap();
    rig.settle(&mut manager);

    assert_eq!(manager.ap_mode(), ApMode::Disabled);
    assert_eq!(manager.ap_state(), ApState::NotActive);
    assert!(!rig.wifi.state().ap_enabled);
    assert!(rig
        .wifi
        .state()
        .commands
        .contains(&WifiCommand::SetInterface(WifiInterface::AccessPoint, false)));
}

// ==================== BLE Scenarios ====================

#[test]
fn test_ble_advertises_after_init() {
    let (manager, rig) = started();
    let status = manager.status();
    assert!(status.ble_advertising);
    assert_eq!(status.ble_device_name, "NEST-BEEF");
    assert!(rig.ble.state().advertising);
}

#[test]
fn test_full_pool_advertises_non_connectable() {
    let (mut manager, rig) = started();
    rig.ble.take_commands();

    manager.handle_ble_event(BleDriverEvent::Connected { conn_id: 1 });
    rig.settle(&mut manager);

    assert_eq!(manager.ble_connection_count(), 1);
    let kinds: Vec<_> = rig
        .ble
        .take_commands()
        .into_iter()
        .filter_map(|c| match c {
            BleCommand::StartAdvertising(params) => Some(params.kind),
            _ => None,
        })
        .collect();
    assert_eq!(kinds, vec![AdvertisingKind::NonConnectable]);

    manager.handle_ble_event(BleDriverEvent::Disconnected {
        conn_id: 1,
        reason: crate::ble::gatt::DisconnectReason::PeerUser,
    });
    rig.settle(&mut manager);
    assert_eq!(manager.ble_connection_count(), 0);
    assert!(rig.ble.take_commands().iter().any(|c| matches!(
        c,
        BleCommand::StartAdvertising(params) if params.kind == AdvertisingKind::Connectable
    )));
}

#[test]
fn test_double_indication_rejected() {
    let (mut manager, rig) = started();
    manager.handle_ble_event(BleDriverEvent::Connected { conn_id: 1 });
    rig.settle(&mut manager);

    manager.send_ble_indication(1, b"first".to_vec()).unwrap();
    assert!(matches!(
        manager.send_ble_indication(1, b"second".to_vec()),
        Err(ConnectivityError::IncorrectState)
    ));

    manager.handle_ble_event(BleDriverEvent::IndicationConfirmed {
        conn_id: 1,
        status: Ok(()),
    });
    rig.settle(&mut manager);
    assert!(rig
        .sink
        .events()
        .contains(&DeviceEvent::Ble(BleEvent::IndicationConfirmed { conn_id: 1 })));
    assert!(manager.send_ble_indication(1, b"second".to_vec()).is_ok());
}

#[test]
fn test_single_ble_control_op_in_flight() {
    let (mut manager, rig) = sim_manager();
    manager.init().unwrap();
    manager.run_pending();
    manager.set_ble_advertising_enabled(true).unwrap();
    manager.set_ble_fast_advertising_enabled(true).unwrap();
    manager.run_pending();

    let in_flight = rig
        .ble
        .take_commands()
        .into_iter()
        .filter(BleCommand::is_control_op)
        .count();
    assert_eq!(in_flight, 1);
}

#[test]
fn test_rename_refreshes_advertising() {
    let (mut manager, rig) = started();
    rig.ble.take_commands();
    manager.set_ble_device_name("Kitchen").unwrap();
    rig.settle(&mut manager);

    assert_eq!(manager.ble_device_name(), "Kitchen");
    assert!(rig.ble.take_commands().iter().any(|c| matches!(
        c,
        BleCommand::ConfigureAdvertising(data) if data.device_name == "Kitchen"
    )));
    assert!(manager.status().ble_advertising);
}

#[test]
fn test_rx_write_reaches_sink() {
    let (mut manager, rig) = started();
    manager.handle_ble_event(BleDriverEvent::Connected { conn_id: 2 });
    let rx = crate::driver::sim::SIM_FIRST_HANDLE + 2;
    manager.handle_ble_event(BleDriverEvent::Write(crate::ble::gatt::GattWrite {
        conn_id: 2,
        trans_id: 1,
        handle: rx,
        offset: 0,
        value: vec![0xCA, 0xFE],
        is_prepared: false,
        need_response: true,
    }));
    rig.settle(&mut manager);

    assert!(rig.sink.events().contains(&DeviceEvent::Ble(BleEvent::WriteReceived {
        conn_id: 2,
        data: vec![0xCA, 0xFE],
    })));
}

// ==================== Tunnel and Pairing Scenarios ====================

fn provision_service(manager: &mut ConnectivityManager, rig: &SimRig) {
    {
        let mut flags = rig.provisioning.flags();
        flags.member = true;
        flags.provisioned = true;
    }
    manager
        .post_event(DeviceEvent::ServiceProvisioningChange {
            is_provisioned: true,
        })
        .unwrap();
    rig.settle(manager);
}

#[test]
fn test_tunnel_follows_internet_and_provisioning() {
    let (mut manager, rig) = connected();
    rig.tunnel.state().auto_up = true;
    assert!(!rig.tunnel.state().running);

    provision_service(&mut manager, &rig);
    assert!(rig.tunnel.state().running);
    assert!(manager.have_service_connectivity());
    assert!(rig.sink.events().contains(&DeviceEvent::ServiceConnectivityChange(
        ConnectivityChange::Established
    )));

    rig.sink.take();
    rig.wifi.state().ap_in_range = false;
    rig.wifi.drop_association();
    rig.settle(&mut manager);
    assert!(!rig.tunnel.state().running);
    assert!(!manager.have_service_connectivity());
    assert!(rig.sink.take().contains(&DeviceEvent::ServiceConnectivityChange(
        ConnectivityChange::Lost
    )));
}

#[test]
fn test_tunnel_mode_disabled_stops_tunnel() {
    let (mut manager, rig) = connected();
    rig.tunnel.state().auto_up = true;
    provision_service(&mut manager, &rig);
    let starts = rig.tunnel.state().start_count;

    manager.set_tunnel_mode(TunnelMode::Disabled).unwrap();
    rig.settle(&mut manager);
    assert!(!rig.tunnel.state().running);

    manager.set_tunnel_mode(TunnelMode::Enabled).unwrap();
    rig.settle(&mut manager);
    assert!(rig.tunnel.state().running);
    assert_eq!(rig.tunnel.state().start_count, starts + 1);
}

#[test]
fn test_pairing_waits_for_tunnel() {
    let (mut manager, rig) = connected();
    rig.tunnel.state().auto_up = true;
    manager.request_account_pairing().unwrap();
    rig.settle(&mut manager);
    assert!(matches!(
        manager.request_account_pairing(),
        Err(ConnectivityError::IncorrectState)
    ));

    provision_service(&mut manager, &rig);
    let progress: Vec<_> = rig
        .sink
        .events()
        .into_iter()
        .filter_map(|e| match e {
            DeviceEvent::AccountPairingProgress(p) => Some(p),
            _ => None,
        })
        .collect();
    assert_eq!(progress, vec![AccountPairingProgress::Ready]);

    // The stale timer does nothing once the wait is over
    rig.advance(&mut manager, 60_000);
    assert!(!rig.sink.events().contains(&DeviceEvent::AccountPairingProgress(
        AccountPairingProgress::TimedOut
    )));
}

#[test]
fn test_pairing_times_out() {
    let (mut manager, rig) = started();
    manager.request_account_pairing().unwrap();
    rig.settle(&mut manager);

    rig.advance(&mut manager, 9_999);
    assert!(rig.sink.events().is_empty());

    rig.advance(&mut manager, 1);
    assert_eq!(
        rig.sink.events(),
        vec![DeviceEvent::AccountPairingProgress(
            AccountPairingProgress::TimedOut
        )]
    );
    assert!(manager.request_account_pairing().is_ok());
}
