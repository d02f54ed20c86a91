//! Service tunnel gating.
//!
//! The tunnel runs only while the tunnel mode is enabled, IPv4 internet is
//! reachable, and the device is both a fabric member and service provisioned.
//! Each evaluation issues at most one start or stop.

use crate::config::TunnelMode;
use crate::driver::TunnelNotification;
use crate::events::{ConnectivityChange, DeviceEvent};
use crate::manager::Context;
use log::{error, info, warn};

/// Whether every precondition for running the tunnel holds.
pub fn should_run(ctx: &Context) -> bool {
    ctx.config.tunnel_mode == TunnelMode::Enabled
        && ctx.flags.ipv4_reachable
        && ctx.provisioning.is_member_of_fabric()
        && ctx.provisioning.is_service_provisioned()
}

/// Start or stop the tunnel agent to match [`should_run`].
pub fn drive(ctx: &mut Context) {
    let run = should_run(ctx);
    if run == ctx.flags.tunnel_started {
        return;
    }

    ctx.flags.tunnel_started = run;
    if run {
        info!("Starting service tunnel");
        if let Err(e) = ctx.tunnel.start() {
            error!("Failed to start service tunnel: {}", e);
            ctx.flags.tunnel_started = false;
        }
    } else {
        info!("Stopping service tunnel");
        ctx.tunnel.stop();
    }
}

/// Track the agent's view of the tunnel and post service connectivity edges.
pub fn on_notification(ctx: &mut Context, notification: TunnelNotification) {
    let up = match notification {
        TunnelNotification::PrimaryUp => {
            info!("Service tunnel up");
            true
        }
        TunnelNotification::Down => {
            info!("Service tunnel down");
            false
        }
        TunnelNotification::PrimaryConnError(e) => {
            warn!("Service tunnel connection error: {}", e);
            false
        }
    };

    let was_up = ctx.flags.tunnel_up;
    if up != was_up {
        ctx.flags.tunnel_up = up;
        ctx.post_event(DeviceEvent::ServiceConnectivityChange(
            ConnectivityChange::between(was_up, up),
        ));
    }
}
