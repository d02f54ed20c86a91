//! WiFi driver on top of `EspWifi`.
//!
//! Uses the non-blocking driver: commands return as soon as ESP-IDF accepts
//! them and completions come back through system event loop subscriptions.

use crate::config::WifiConfig;
use crate::driver::{
    ApConfiguration, DriverEvent, Ipv4Lease, Ipv6Assignment, NetifState, WifiDriver, WifiEvent,
    WifiInterface,
};
use crate::error::DriverError;
use crate::platform::{emit, EventSender};
use esp_idf_hal::modem::Modem;
use esp_idf_svc::eventloop::{EspSubscription, EspSystemEventLoop, System};
use esp_idf_svc::netif::IpEvent;
use esp_idf_svc::wifi::{
    AccessPointConfiguration, AuthMethod, ClientConfiguration, Configuration, EspWifi,
    WifiEvent as EspWifiEvent,
};
use log::{debug, info};
use std::net::{IpAddr, Ipv6Addr};

const INVALID_ARG: i32 = esp_idf_sys::ESP_ERR_INVALID_ARG as i32;

/// Station and soft-AP driver.
pub struct EspWifiDriver {
    wifi: EspWifi<'static>,
    client: ClientConfiguration,
    access_point: AccessPointConfiguration,
    station_enabled: bool,
    ap_enabled: bool,
    auto_connect: bool,
    _wifi_events: EspSubscription<'static, System>,
    _ip_events: EspSubscription<'static, System>,
}

impl EspWifiDriver {
    /// Create the driver and subscribe to WiFi and IP events.
    pub fn new(
        modem: Modem,
        sysloop: EspSystemEventLoop,
        events: EventSender,
    ) -> Result<Self, DriverError> {
        let wifi = EspWifi::new(modem, sysloop.clone(), None)?;

        let tx = events.clone();
        let wifi_events = sysloop.subscribe::<EspWifiEvent, _>(move |event| {
            if let Some(event) = map_wifi_event(&event) {
                emit(&tx, DriverEvent::Wifi(event));
            }
        })?;

        let tx = events;
        let ip_events = sysloop.subscribe::<IpEvent, _>(move |event| {
            if let Some(event) = map_ip_event(&event) {
                emit(&tx, DriverEvent::Wifi(event));
            }
        })?;

        Ok(Self {
            wifi,
            client: ClientConfiguration::default(),
            access_point: AccessPointConfiguration::default(),
            station_enabled: false,
            ap_enabled: false,
            auto_connect: false,
            _wifi_events: wifi_events,
            _ip_events: ip_events,
        })
    }

    /// Push the enabled interfaces to the driver.
    fn apply_configuration(&mut self) -> Result<(), DriverError> {
        let configuration = match (self.station_enabled, self.ap_enabled) {
            (true, true) => Configuration::Mixed(self.client.clone(), self.access_point.clone()),
            (true, false) => Configuration::Client(self.client.clone()),
            (false, true) => Configuration::AccessPoint(self.access_point.clone()),
            (false, false) => Configuration::None,
        };
        self.wifi.set_configuration(&configuration)?;
        Ok(())
    }
}

fn map_wifi_event(event: &EspWifiEvent) -> Option<WifiEvent> {
    match event {
        EspWifiEvent::StaStarted => Some(WifiEvent::StaStart),
        EspWifiEvent::StaStopped => Some(WifiEvent::StaStop),
        EspWifiEvent::StaConnected(_) => Some(WifiEvent::StaConnected),
        EspWifiEvent::StaDisconnected(_) => Some(WifiEvent::StaDisconnected),
        EspWifiEvent::ScanDone(_) => Some(WifiEvent::ScanDone),
        EspWifiEvent::ApStarted => Some(WifiEvent::ApStart),
        EspWifiEvent::ApStopped => Some(WifiEvent::ApStop),
        EspWifiEvent::ApStaConnected(_) => Some(WifiEvent::ApStaConnected),
        EspWifiEvent::ApStaDisconnected(_) => Some(WifiEvent::ApStaDisconnected),
        _ => None,
    }
}

fn map_ip_event(event: &IpEvent) -> Option<WifiEvent> {
    match event {
        IpEvent::DhcpIpAssigned(_) => Some(WifiEvent::GotIp),
        IpEvent::DhcpIpDeassigned(_) => Some(WifiEvent::LostIp),
        IpEvent::DhcpIp6Assigned(_) => Some(WifiEvent::GotIp6),
        _ => None,
    }
}

impl WifiDriver for EspWifiDriver {
    fn start(&mut self) -> Result<(), DriverError> {
        if !self.wifi.is_started()? {
            info!("Starting WiFi");
            self.wifi.start()?;
        }
        Ok(())
    }

    fn set_interface_enabled(
        &mut self,
        iface: WifiInterface,
        enabled: bool,
    ) -> Result<(), DriverError> {
        match iface {
            WifiInterface::Station => self.station_enabled = enabled,
            WifiInterface::AccessPoint => self.ap_enabled = enabled,
        }
        debug!("WiFi interface {:?} enabled={}", iface, enabled);
        self.apply_configuration()
    }

    fn interface_enabled(&self, iface: WifiInterface) -> Result<bool, DriverError> {
        Ok(match iface {
            WifiInterface::Station => self.station_enabled,
            WifiInterface::AccessPoint => self.ap_enabled,
        })
    }

    fn auto_connect(&self) -> Result<bool, DriverError> {
        Ok(self.auto_connect)
    }

    fn set_auto_connect(&mut self, enabled: bool) -> Result<(), DriverError> {
        self.auto_connect = enabled;
        Ok(())
    }

    fn station_associated(&self) -> Result<bool, DriverError> {
        Ok(self.wifi.is_connected()?)
    }

    fn scan_in_progress(&self) -> bool {
        // Scans are never started by this driver.
        false
    }

    fn connect(&mut self, credentials: &WifiConfig) -> Result<(), DriverError> {
        info!("Connecting to WiFi: {}", credentials.ssid);

        let auth_method = if credentials.is_open() {
            AuthMethod::None
        } else {
            AuthMethod::WPA2Personal
        };
        self.client = ClientConfiguration {
            ssid: credentials
                .ssid
                .as_str()
                .try_into()
                .map_err(|_| DriverError::new("wifi ssid", INVALID_ARG))?,
            password: credentials
                .password
                .as_str()
                .try_into()
                .map_err(|_| DriverError::new("wifi password", INVALID_ARG))?,
            auth_method,
            ..Default::default()
        };

        self.apply_configuration()?;
        self.wifi.connect()?;
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), DriverError> {
        info!("Disconnecting from WiFi");
        self.wifi.disconnect()?;
        Ok(())
    }

    fn configure_ap(&mut self, config: &ApConfiguration) -> Result<(), DriverError> {
        self.access_point = AccessPointConfiguration {
            ssid: config
                .ssid
                .as_str()
                .try_into()
                .map_err(|_| DriverError::new("ap ssid", INVALID_ARG))?,
            channel: config.channel,
            auth_method: AuthMethod::None,
            max_connections: u16::from(config.max_stations),
            ..Default::default()
        };
        // The beacon interval keeps the ESP-IDF default; the safe API has no
        // setting for it.
        debug!(
            "AP configured: {} (channel {}, beacon {} ms requested)",
            config.ssid, config.channel, config.beacon_interval_ms
        );
        if self.ap_enabled {
            self.apply_configuration()?;
        }
        Ok(())
    }

    fn station_netif(&self) -> NetifState {
        let netif = self.wifi.sta_netif();
        let mut state = NetifState {
            link_up: netif.is_up().unwrap_or(false),
            ..Default::default()
        };

        if let Ok(info) = netif.get_ip_info() {
            if let Some(dns) = info.dns {
                state.dns_servers.push(IpAddr::V4(dns));
            }
            if let Some(dns) = info.secondary_dns {
                state.dns_servers.push(IpAddr::V4(dns));
            }
            state.ipv4 = Some(Ipv4Lease {
                addr: info.ip,
                gateway: info.subnet.gateway,
            });
        }

        let mut addrs =
            [esp_idf_sys::esp_ip6_addr_t::default(); esp_idf_sys::LWIP_IPV6_NUM_ADDRESSES as usize];
        // SAFETY: the buffer holds LWIP_IPV6_NUM_ADDRESSES entries, the most
        // the call writes.
        let count = unsafe { esp_idf_sys::esp_netif_get_all_ip6(netif.handle(), addrs.as_mut_ptr()) };
        for addr in addrs.iter().take(count.max(0) as usize) {
            let mut octets = [0u8; 16];
            for (chunk, word) in octets.chunks_exact_mut(4).zip(addr.addr.iter()) {
                chunk.copy_from_slice(&word.to_ne_bytes());
            }
            state.ipv6.push(Ipv6Assignment {
                addr: Ipv6Addr::from(octets),
                valid: true,
            });
        }

        // SLAAC only assigns a global address after a router advertisement,
        // so one present means a default router exists. Its address is not
        // exposed by esp-netif.
        let has_global = state
            .ipv6
            .iter()
            .any(|a| a.addr.segments()[0] & 0xE000 == 0x2000);
        if has_global {
            state.ipv6_router = Some(Ipv6Addr::UNSPECIFIED);
        }

        state
    }
}
