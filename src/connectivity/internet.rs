//! Internet reachability derived from the station interface.
//!
//! Reachability is inferred from interface state only: no probes are sent.
//! Edges are posted as `InternetConnectivityChange` and nothing is posted
//! when neither family changed.

use crate::driver::NetifState;
use crate::events::{ConnectivityChange, DeviceEvent};
use crate::manager::Context;
use log::info;
use std::net::Ipv6Addr;

/// IPv4 needs link, a resolver, and a lease with an address and a gateway.
pub fn has_ipv4_internet(netif: &NetifState) -> bool {
    netif.link_up
        && !netif.dns_servers.is_empty()
        && netif
            .ipv4
            .is_some_and(|lease| !lease.addr.is_unspecified() && !lease.gateway.is_unspecified())
}

/// IPv6 needs link, a resolver, a valid global address and a default router.
pub fn has_ipv6_internet(netif: &NetifState) -> bool {
    netif.link_up
        && !netif.dns_servers.is_empty()
        && netif.ipv6_router.is_some()
        && netif
            .ipv6
            .iter()
            .any(|assignment| assignment.valid && is_global_unicast(&assignment.addr))
}

/// 2000::/3
fn is_global_unicast(addr: &Ipv6Addr) -> bool {
    addr.segments()[0] & 0xE000 == 0x2000
}

/// Recompute reachability and post an event on any edge.
///
/// Reachability is only evaluated while the station is connected. Returns
/// whether either family changed.
pub fn update(ctx: &mut Context, station_connected: bool) -> bool {
    let (ipv4, ipv6) = if station_connected {
        let netif = ctx.wifi.station_netif();
        (has_ipv4_internet(&netif), has_ipv6_internet(&netif))
    } else {
        (false, false)
    };

    let flags = &mut ctx.flags;
    let ipv4_change = ConnectivityChange::between(flags.ipv4_reachable, ipv4);
    let ipv6_change = ConnectivityChange::between(flags.ipv6_reachable, ipv6);
    if ipv4_change == ConnectivityChange::NoChange && ipv6_change == ConnectivityChange::NoChange {
        return false;
    }

    flags.ipv4_reachable = ipv4;
    flags.ipv6_reachable = ipv6;
    info!(
        "Internet connectivity: IPv4 {}, IPv6 {}",
        if ipv4 { "up" } else { "down" },
        if ipv6 { "up" } else { "down" }
    );
    ctx.post_event(DeviceEvent::InternetConnectivityChange {
        ipv4: ipv4_change,
        ipv6: ipv6_change,
    });
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::sim::SimWifi;
    use crate::driver::{Ipv4Lease, Ipv6Assignment};
    use crate::manager::tests_support::sim_context;
    use crate::manager::WorkItem;
    use std::net::{IpAddr, Ipv4Addr};

    fn ipv6_netif(addr: Ipv6Addr) -> NetifState {
        NetifState {
            link_up: true,
            dns_servers: vec![IpAddr::V6("2001:4860:4860::8888".parse().unwrap())],
            ipv4: None,
            ipv6: vec![Ipv6Assignment { addr, valid: true }],
            ipv6_router: Some("fe80::1".parse().unwrap()),
        }
    }

    // ==================== Evaluation Tests ====================

    #[test]
    fn test_ipv4_with_full_lease() {
        assert!(has_ipv4_internet(&SimWifi::ipv4_lease()));
    }

    #[test]
    fn test_ipv4_requires_every_piece() {
        let mut netif = SimWifi::ipv4_lease();
        netif.dns_servers.clear();
        assert!(!has_ipv4_internet(&netif));

        let mut netif = SimWifi::ipv4_lease();
        netif.ipv4 = Some(Ipv4Lease {
            addr: Ipv4Addr::new(192, 168, 1, 42),
            gateway: Ipv4Addr::UNSPECIFIED,
        });
        assert!(!has_ipv4_internet(&netif));

        let mut netif = SimWifi::ipv4_lease();
        netif.link_up = false;
        assert!(!has_ipv4_internet(&netif));
    }

    #[test]
    fn test_ipv6_needs_global_address() {
        assert!(has_ipv6_internet(&ipv6_netif("2001:db8::5".parse().unwrap())));
        assert!(!has_ipv6_internet(&ipv6_netif("fe80::5".parse().unwrap())));
        assert!(!has_ipv6_internet(&ipv6_netif("fd00::5".parse().unwrap())));

        let mut netif = ipv6_netif("2001:db8::5".parse().unwrap());
        netif.ipv6_router = None;
        assert!(!has_ipv6_internet(&netif));

        let mut netif = ipv6_netif("2001:db8::5".parse().unwrap());
        netif.ipv6[0].valid = false;
        assert!(!has_ipv6_internet(&netif));
    }

    // ==================== Update Tests ====================

    #[test]
    fn test_update_posts_only_on_edges() {
        let (mut ctx, rig) = sim_context();
        rig.wifi.state().associated = true;

        assert!(update(&mut ctx, true));
        assert!(ctx.flags.ipv4_reachable);
        assert!(matches!(
            ctx.work.pop(),
            Some(WorkItem::Event(DeviceEvent::InternetConnectivityChange {
                ipv4: ConnectivityChange::Established,
                ipv6: ConnectivityChange::NoChange,
            }))
        ));

        assert!(!update(&mut ctx, true));
        assert!(ctx.work.is_empty());

        assert!(update(&mut ctx, false));
        assert!(!ctx.flags.ipv4_reachable);
    }
}
