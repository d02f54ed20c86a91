//! Host simulator for the connectivity manager.
//!
//! Runs the orchestrator against simulated radios and provides:
//! - A line-based console on stdin for scripting radio and API events
//! - HTTP status endpoint at http://localhost:8080/status
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin connmgr-sim -- [settings.json]
//! ```
//!
//! Type `help` at the prompt for the command list.

use connmgr_esp32::ble::gatt::{DisconnectReason, GattWrite};
use connmgr_esp32::driver::sim::{SimRig, SIM_FIRST_HANDLE};
use connmgr_esp32::driver::{BleDriverEvent, ConfigStore};
use connmgr_esp32::event_loop::{self, MonotonicClock};
use connmgr_esp32::manager::Collaborators;
use connmgr_esp32::persistence_host::FileConfigStore;
use connmgr_esp32::{
    ApMode, BleServiceMode, Bridge, ConnectivityError, ConnectivityManager, DeviceEvent, Settings,
    StationMode, StatusServer, TunnelMode, WifiConfig,
};
use log::{error, info, warn};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// How often simulated completions are handed to the orchestrator.
const PUMP_INTERVAL: Duration = Duration::from_millis(20);

/// Offset of the RX value handle in the simulated attribute table.
const RX_VALUE_OFFSET: u16 = 2;

const HELP: &str = "\
commands:
  provision <ssid> [password]   store station credentials
  forget                        clear station credentials
  station <enabled|disabled|app>
  ap <enabled|disabled|app|ondemand|ondemand-noprov|demand|stop|maintain>
  tunnel <enabled|disabled>
  ble <enabled|disabled>
  ble-name <name>               custom advertising name (empty resets)
  connect <conn_id>             simulate a BLE central connecting
  disconnect <conn_id>          simulate the central dropping the link
  write <conn_id> <text>        simulate a write to the RX characteristic
  indicate <conn_id> <text>     send an indication to a central
  confirm <conn_id>             simulate the central confirming an indication
  close <conn_id>               close a BLE connection from this side
  range <on|off>                whether the access point is reachable
  drop                          drop the station association
  service <up|down>             simulated fabric membership and service provisioning
  pair                          request account pairing
  status                        print the status snapshot
  help";

/// One console line, parsed.
enum Command {
    Provision(WifiConfig),
    Forget,
    Station(StationMode),
    Ap(ApMode),
    ApDemand,
    ApStop,
    ApMaintain,
    Tunnel(TunnelMode),
    Ble(BleServiceMode),
    BleName(String),
    Connect(u16),
    Disconnect(u16),
    Write(u16, Vec<u8>),
    Indicate(u16, Vec<u8>),
    Confirm(u16),
    Close(u16),
    Range(bool),
    Drop,
    Service(bool),
    Pair,
    Status,
    Help,
}

fn parse_conn_id(arg: Option<&str>) -> Result<u16, String> {
    arg.ok_or("missing connection id")?
        .parse()
        .map_err(|_| "connection id must be a number".to_string())
}

fn parse_switch(arg: Option<&str>) -> Result<bool, String> {
    match arg {
        Some("on") | Some("up") | Some("enabled") => Ok(true),
        Some("off") | Some("down") | Some("disabled") => Ok(false),
        _ => Err("expected on/off".to_string()),
    }
}

fn parse(line: &str) -> Result<Command, String> {
    let mut words = line.split_whitespace();
    let verb = words.next().ok_or("empty command")?;
    let arg = words.next();
    let rest = || words.clone().collect::<Vec<_>>().join(" ");

    Ok(match verb {
        "provision" => {
            let ssid = arg.ok_or("missing SSID")?;
            let password = rest();
            Command::Provision(WifiConfig::new(ssid, password).map_err(|e| e.to_string())?)
        }
        "forget" => Command::Forget,
        "station" => Command::Station(match arg {
            Some("enabled") => StationMode::Enabled,
            Some("disabled") => StationMode::Disabled,
            Some("app") => StationMode::ApplicationControlled,
            _ => return Err("expected enabled/disabled/app".to_string()),
        }),
        "ap" => match arg {
            Some("enabled") => Command::Ap(ApMode::Enabled),
            Some("disabled") => Command::Ap(ApMode::Disabled),
            Some("app") => Command::Ap(ApMode::ApplicationControlled),
            Some("ondemand") => Command::Ap(ApMode::OnDemand),
            Some("ondemand-noprov") => Command::Ap(ApMode::OnDemandNoStationProvision),
            Some("demand") => Command::ApDemand,
            Some("stop") => Command::ApStop,
            Some("maintain") => Command::ApMaintain,
            _ => return Err("unknown AP command".to_string()),
        },
        "tunnel" => Command::Tunnel(if parse_switch(arg)? {
            TunnelMode::Enabled
        } else {
            TunnelMode::Disabled
        }),
        "ble" => Command::Ble(if parse_switch(arg)? {
            BleServiceMode::Enabled
        } else {
            BleServiceMode::Disabled
        }),
        "ble-name" => Command::BleName(line.trim_start()[verb.len()..].trim().to_string()),
        "connect" => Command::Connect(parse_conn_id(arg)?),
        "disconnect" => Command::Disconnect(parse_conn_id(arg)?),
        "write" => Command::Write(parse_conn_id(arg)?, rest().into_bytes()),
        "indicate" => Command::Indicate(parse_conn_id(arg)?, rest().into_bytes()),
        "confirm" => Command::Confirm(parse_conn_id(arg)?),
        "close" => Command::Close(parse_conn_id(arg)?),
        "range" => Command::Range(parse_switch(arg)?),
        "drop" => Command::Drop,
        "service" => Command::Service(parse_switch(arg)?),
        "pair" => Command::Pair,
        "status" => Command::Status,
        "help" => Command::Help,
        other => return Err(format!("unknown command '{}'", other)),
    })
}

fn execute(command: Command, bridge: &Bridge, rig: &SimRig) -> Result<(), ConnectivityError> {
    match command {
        Command::Provision(credentials) => {
            bridge.with(|m| m.set_station_provision(credentials))?
        }
        Command::Forget => bridge.with(ConnectivityManager::clear_station_provision)?,
        Command::Station(mode) => bridge.with(|m| m.set_station_mode(mode))?,
        Command::Ap(mode) => bridge.with(|m| m.set_ap_mode(mode))?,
        Command::ApDemand => bridge.with(ConnectivityManager::demand_start_ap)?,
        Command::ApStop => bridge.with(ConnectivityManager::stop_on_demand_ap)?,
        Command::ApMaintain => bridge.with(ConnectivityManager::maintain_on_demand_ap),
        Command::Tunnel(mode) => bridge.with(|m| m.set_tunnel_mode(mode))?,
        Command::Ble(mode) => bridge.with(|m| m.set_ble_service_mode(mode))?,
        Command::BleName(name) => bridge.with(|m| m.set_ble_device_name(&name))?,
        Command::Connect(conn_id) => {
            bridge.handle_ble_event(BleDriverEvent::Connected { conn_id })
        }
        Command::Disconnect(conn_id) => bridge.handle_ble_event(BleDriverEvent::Disconnected {
            conn_id,
            reason: DisconnectReason::PeerUser,
        }),
        Command::Write(conn_id, value) => {
            bridge.handle_ble_event(BleDriverEvent::Write(GattWrite {
                conn_id,
                trans_id: 0,
                handle: SIM_FIRST_HANDLE + RX_VALUE_OFFSET,
                offset: 0,
                value,
                is_prepared: false,
                need_response: true,
            }))
        }
        Command::Indicate(conn_id, data) => {
            bridge.with(|m| m.send_ble_indication(conn_id, data))?
        }
        Command::Confirm(conn_id) => {
            bridge.handle_ble_event(BleDriverEvent::IndicationConfirmed {
                conn_id,
                status: Ok(()),
            })
        }
        Command::Close(conn_id) => bridge.with(|m| m.close_ble_connection(conn_id))?,
        Command::Range(in_range) => rig.wifi.state().ap_in_range = in_range,
        Command::Drop => rig.wifi.drop_association(),
        Command::Service(up) => {
            let mut flags = rig.provisioning.flags();
            flags.member = up;
            flags.provisioned = up;
            drop(flags);
            bridge.post_event(DeviceEvent::ServiceProvisioningChange { is_provisioned: up })?;
        }
        Command::Pair => bridge.with(ConnectivityManager::request_account_pairing)?,
        Command::Status => match serde_json::to_string_pretty(&bridge.status()) {
            Ok(json) => println!("{}", json),
            Err(e) => error!("Failed to serialize status: {}", e),
        },
        Command::Help => println!("{}", HELP),
    }
    Ok(())
}

/// Read console lines on a plain thread; stdin has no async reader here.
fn spawn_console(bridge: Bridge, rig: SimRig) {
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    warn!("Console read failed: {}", e);
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match parse(&line) {
                Ok(command) => {
                    if let Err(e) = execute(command, &bridge, &rig) {
                        warn!("Command failed: {}", e);
                    }
                }
                Err(e) => warn!("{} (try 'help')", e),
            }
        }
    });
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("=== Connectivity manager simulator starting ===");

    let settings = match std::env::args().nth(1).map(PathBuf::from) {
        Some(path) => match Settings::load(&path) {
            Ok(settings) => settings,
            Err(e) => {
                error!("Failed to load settings from {:?}: {}", path, e);
                std::process::exit(1);
            }
        },
        None => Settings::default(),
    };

    let store = match FileConfigStore::open_default() {
        Ok(store) => store,
        Err(e) => {
            error!("Failed to open device store: {}", e);
            std::process::exit(1);
        }
    };
    info!("Device id {:016X} ({:?})", store.device_id(), store.path());

    let rig = SimRig::new(store.device_id());
    rig.tunnel.state().auto_up = true;

    let (sink, mut device_events) = mpsc::unbounded_channel::<DeviceEvent>();
    let collaborators = Collaborators {
        store: Box::new(store),
        sink: Box::new(sink),
        ..rig.collaborators()
    };

    let status_port = settings.status_port;
    let mut manager = match ConnectivityManager::new(
        settings,
        collaborators,
        Arc::new(MonotonicClock::new()),
    ) {
        Ok(manager) => manager,
        Err(e) => {
            error!("Invalid settings: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = manager.init() {
        error!("Initialization failed: {}", e);
        std::process::exit(1);
    }

    let bridge = Bridge::new(manager);

    // Keep server alive - variable intentionally unused except for Drop
    let _status_server = match StatusServer::start(None, status_port, bridge.clone()) {
        Ok(server) => {
            info!(
                "Status server running at http://localhost:{}/status",
                status_port
            );
            Some(server)
        }
        Err(e) => {
            warn!("Failed to start status server: {}", e);
            warn!("Continuing without status server");
            None
        }
    };

    let cancel = CancellationToken::new();
    let runner = tokio::spawn(event_loop::run(bridge.clone(), cancel.clone()));

    // Simulated completions
    let pump_bridge = bridge.clone();
    let pump_rig = rig.clone();
    let pump_cancel = cancel.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PUMP_INTERVAL);
        loop {
            tokio::select! {
                _ = pump_cancel.cancelled() => break,
                _ = interval.tick() => {
                    for event in pump_rig.outbox.drain() {
                        if let Err(e) = pump_bridge.deliver(event) {
                            warn!("Simulated event not delivered: {}", e);
                        }
                    }
                }
            }
        }
    });

    tokio::spawn(async move {
        while let Some(event) = device_events.recv().await {
            info!("Device event: {:?}", event);
        }
    });

    spawn_console(bridge.clone(), rig.clone());
    println!("{}", HELP);

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to wait for Ctrl+C: {}", e);
    }
    info!("Shutting down");
    cancel.cancel();
    if let Err(e) = runner.await {
        error!("Event loop task failed: {}", e);
    }

    // Leave pending completions visible in the final log
    let leftover = rig.outbox.drain();
    if !leftover.is_empty() {
        info!("{} simulated events were still pending", leftover.len());
    }
}
