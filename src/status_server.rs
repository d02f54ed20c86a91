//! HTTP status endpoint.
//!
//! Serves `GET /status` with a JSON snapshot of the orchestrator. Uses
//! `tiny_http`, which runs on both host and ESP32 (via std::net).
//!
//! # Example Response
//!
//! ```json
//! {
//!   "station_mode": "Enabled",
//!   "station_state": "Connected",
//!   "station_provisioned": true,
//!   "ap_mode": "OnDemand",
//!   "ap_state": "NotActive",
//!   "tunnel_mode": "Enabled",
//!   "ble_service_mode": "Enabled",
//!   "ble_advertising": true,
//!   "ble_connections": 0,
//!   "ble_device_name": "NEST-AB3F",
//!   "connectivity": {
//!     "ipv4_reachable": true,
//!     "ipv6_reachable": false,
//!     "tunnel_started": true,
//!     "tunnel_up": true,
//!     "awaiting_connectivity": false
//!   },
//!   "pending_work": 0
//! }
//! ```

use crate::bridge::Bridge;
use crate::manager::ConnectivityStatus;
use log::{error, info, warn};
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tiny_http::{Header, Method, Response, Server};

/// Poll interval of the request loop, which bounds shutdown latency.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A response before it is turned into a `tiny_http` one.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Reply {
    code: u16,
    body: String,
    json: bool,
    location: Option<&'static str>,
    allow_get: bool,
}

impl Reply {
    fn text(code: u16, body: &str) -> Self {
        Self {
            code,
            body: body.to_string(),
            json: false,
            location: None,
            allow_get: false,
        }
    }
}

fn route(method: &Method, path: &str, status: impl FnOnce() -> ConnectivityStatus) -> Reply {
    if method != &Method::Get {
        return Reply {
            allow_get: true,
            ..Reply::text(405, "Method Not Allowed")
        };
    }

    match path {
        "/status" | "/status/" => match serde_json::to_string(&status()) {
            Ok(body) => Reply {
                code: 200,
                body,
                json: true,
                location: None,
                allow_get: false,
            },
            Err(e) => {
                error!("Failed to serialize status: {}", e);
                Reply::text(500, "Internal Server Error")
            }
        },
        "/" => Reply {
            location: Some("/status"),
            ..Reply::text(302, "See /status for connectivity status")
        },
        _ => Reply::text(404, "Not Found"),
    }
}

fn header(name: &str, value: &str) -> Option<Header> {
    Header::from_bytes(name.as_bytes(), value.as_bytes()).ok()
}

/// Background HTTP server for the status endpoint.
pub struct StatusServer {
    handle: Option<thread::JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl StatusServer {
    /// Start serving on `bind_addr:port` (`0.0.0.0` when `None`).
    ///
    /// Drop the returned handle to stop the server.
    pub fn start(bind_addr: Option<IpAddr>, port: u16, bridge: Bridge) -> std::io::Result<Self> {
        let addr = match bind_addr {
            Some(ip) => format!("{}:{}", ip, port),
            None => format!("0.0.0.0:{}", port),
        };

        let server = Server::http(&addr)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::AddrInUse, e.to_string()))?;
        info!("Status server listening on http://{}/status", addr);

        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = shutdown.clone();
        let handle = thread::spawn(move || Self::serve(server, bridge, flag));

        Ok(Self {
            handle: Some(handle),
            shutdown,
        })
    }

    fn serve(server: Server, bridge: Bridge, shutdown: Arc<AtomicBool>) {
        while !shutdown.load(Ordering::Acquire) {
            let request = match server.recv_timeout(POLL_INTERVAL) {
                Ok(Some(request)) => request,
                Ok(None) => continue,
                Err(e) => {
                    error!("Status server error: {}", e);
                    break;
                }
            };

            let reply = route(request.method(), request.url(), || bridge.status());
            let mut response = Response::from_string(reply.body).with_status_code(reply.code);
            if reply.json {
                if let Some(h) = header("Content-Type", "application/json") {
                    response = response.with_header(h);
                }
            }
            if let Some(h) = reply.location.and_then(|target| header("Location", target)) {
                response = response.with_header(h);
            }
            if reply.allow_get {
                if let Some(h) = header("Allow", "GET") {
                    response = response.with_header(h);
                }
            }

            if let Err(e) = request.respond(response) {
                warn!("Failed to send status response: {}", e);
            }
        }
        info!("Status server shutting down");
    }

    /// Stop the server. Takes up to one poll interval.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for StatusServer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::tests_support::sim_manager;
    use std::net::Ipv4Addr;

    fn snapshot() -> ConnectivityStatus {
        sim_manager().0.status()
    }

    // ==================== Routing Tests ====================

    #[test]
    fn test_status_is_json() {
        let reply = route(&Method::Get, "/status", snapshot);
        assert_eq!(reply.code, 200);
        assert!(reply.json);
        let value: serde_json::Value = serde_json::from_str(&reply.body).unwrap();
        assert_eq!(value["station_state"], "NotConnected");
        assert_eq!(value["ble_connections"], 0);
    }

    #[test]
    fn test_root_redirects() {
        let reply = route(&Method::Get, "/", snapshot);
        assert_eq!(reply.code, 302);
        assert_eq!(reply.location, Some("/status"));
    }

    #[test]
    fn test_unknown_path_not_found() {
        assert_eq!(route(&Method::Get, "/stats", snapshot).code, 404);
    }

    #[test]
    fn test_non_get_rejected() {
        let reply = route(&Method::Post, "/status", snapshot);
        assert_eq!(reply.code, 405);
        assert!(reply.allow_get);
    }

    // ==================== Lifecycle Tests ====================

    #[test]
    fn test_start_and_stop() {
        let (manager, _rig) = sim_manager();
        let mut server =
            StatusServer::start(Some(IpAddr::V4(Ipv4Addr::LOCALHOST)), 0, Bridge::new(manager))
                .unwrap();
        server.stop();
        server.stop();
    }
}
