//! Connectivity manager ESP32 firmware binary.

#[cfg(feature = "esp32")]
fn main() {
    // Link ESP-IDF patches (must be first!)
    esp_idf_sys::link_patches();

    // Initialize ESP-IDF logger for log crate integration
    esp_idf_svc::log::EspLogger::initialize_default();

    log::info!("=== Connectivity manager starting ===");

    if let Err(e) = firmware::run() {
        log::error!("Connectivity manager stopped: {}", e);
    }

    loop {
        std::thread::sleep(std::time::Duration::from_secs(60));
    }
}

#[cfg(feature = "esp32")]
mod firmware {
    use connmgr_esp32::driver::DriverEvent;
    use connmgr_esp32::manager::Collaborators;
    use connmgr_esp32::event_loop::{self, MonotonicClock};
    use connmgr_esp32::platform::esp32::{
        EspWifiDriver, FixedProvisioning, LogSink, NimbleDriver, NvsConfigStore,
        UnavailableTunnel,
    };
    use connmgr_esp32::{
        Bridge, ConnectivityError, ConnectivityManager, DriverError, Settings, StatusServer,
        TunnelMode,
    };
    use esp_idf_hal::peripherals::Peripherals;
    use esp_idf_svc::eventloop::EspSystemEventLoop;
    use log::{info, warn};
    use std::sync::Arc;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    /// Bring up drivers, the status endpoint and the event loop.
    ///
    /// Returns only if start-up fails or the event loop exits.
    pub fn run() -> Result<(), ConnectivityError> {
        let peripherals = Peripherals::take().map_err(DriverError::from)?;
        let sysloop = EspSystemEventLoop::take().map_err(DriverError::from)?;

        let (events, mut driver_events) = mpsc::unbounded_channel::<DriverEvent>();
        let collaborators = Collaborators {
            wifi: Box::new(EspWifiDriver::new(peripherals.modem, sysloop, events.clone())?),
            ble: Box::new(NimbleDriver::new(events)),
            tunnel: Box::new(UnavailableTunnel),
            store: Box::new(NvsConfigStore::open()?),
            provisioning: Box::new(FixedProvisioning::default()),
            sink: Box::new(LogSink),
        };

        let settings = Settings::default();
        let status_port = settings.status_port;
        let mut manager =
            ConnectivityManager::new(settings, collaborators, Arc::new(MonotonicClock::new()))?;
        manager.set_tunnel_mode(TunnelMode::Disabled)?;
        manager.init()?;

        let bridge = Bridge::new(manager);
        let _status = StatusServer::start(None, status_port, bridge.clone())?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()?;

        runtime.block_on(async move {
            let forward = bridge.clone();
            tokio::spawn(async move {
                while let Some(event) = driver_events.recv().await {
                    if let Err(e) = forward.deliver(event) {
                        warn!("Driver event not delivered: {}", e);
                    }
                }
            });

            info!("Entering event loop...");
            event_loop::run(bridge, CancellationToken::new()).await;
        });
        Ok(())
    }
}

#[cfg(not(feature = "esp32"))]
fn main() {
    println!("This binary requires the 'esp32' feature.");
    println!("Run 'cargo run --bin connmgr-sim' for the host simulator.");
}
