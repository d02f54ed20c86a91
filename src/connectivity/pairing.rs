//! Account pairing wait for service connectivity.
//!
//! Pairing needs the service tunnel. A request made while the tunnel is down
//! waits for it, bounded by the provisioning connectivity timeout.

use crate::error::ConnectivityError;
use crate::event_loop::TimerKind;
use crate::events::{AccountPairingProgress, ConnectivityChange, DeviceEvent};
use crate::manager::Context;
use log::{info, warn};

/// Begin an account pairing request.
pub fn request(ctx: &mut Context) -> Result<(), ConnectivityError> {
    if ctx.flags.awaiting_connectivity {
        return Err(ConnectivityError::IncorrectState);
    }

    if ctx.flags.tunnel_up {
        ctx.post_event(DeviceEvent::AccountPairingProgress(
            AccountPairingProgress::Ready,
        ));
        return Ok(());
    }

    let timeout = ctx.settings.service.provisioning_connectivity_timeout_ms;
    info!(
        "Waiting up to {} ms for service connectivity before pairing",
        timeout
    );
    ctx.flags.awaiting_connectivity = true;
    let deadline = ctx.now_ms() + timeout;
    ctx.start_timer(TimerKind::PairingConnectivity, deadline);
    Ok(())
}

/// Resume a waiting request once the tunnel is up.
pub fn on_service_connectivity(ctx: &mut Context, change: ConnectivityChange) {
    if change == ConnectivityChange::Established && ctx.flags.awaiting_connectivity {
        ctx.flags.awaiting_connectivity = false;
        ctx.post_event(DeviceEvent::AccountPairingProgress(
            AccountPairingProgress::Ready,
        ));
    }
}

/// Fail a request still waiting when its timer fires.
pub fn on_timeout(ctx: &mut Context) {
    if !ctx.flags.awaiting_connectivity {
        return;
    }
    warn!("Timed out waiting for service connectivity");
    ctx.flags.awaiting_connectivity = false;
    ctx.post_event(DeviceEvent::AccountPairingProgress(
        AccountPairingProgress::TimedOut,
    ));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::tests_support::sim_context;
    use crate::manager::WorkItem;

    fn progress(ctx: &mut Context) -> Vec<AccountPairingProgress> {
        std::iter::from_fn(|| ctx.work.pop())
            .filter_map(|item| match item {
                WorkItem::Event(DeviceEvent::AccountPairingProgress(p)) => Some(p),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_ready_immediately_when_tunnel_up() {
        let (mut ctx, _rig) = sim_context();
        ctx.flags.tunnel_up = true;
        request(&mut ctx).unwrap();
        assert_eq!(progress(&mut ctx), vec![AccountPairingProgress::Ready]);
        assert!(!ctx.flags.awaiting_connectivity);
    }

    #[test]
    fn test_waits_then_ready() {
        let (mut ctx, rig) = sim_context();
        rig.clock.set(500);
        request(&mut ctx).unwrap();
        assert_eq!(
            ctx.timers.deadline(TimerKind::PairingConnectivity),
            Some(500 + ctx.settings.service.provisioning_connectivity_timeout_ms)
        );
        assert!(matches!(
            request(&mut ctx),
            Err(ConnectivityError::IncorrectState)
        ));

        on_service_connectivity(&mut ctx, ConnectivityChange::Established);
        assert_eq!(progress(&mut ctx), vec![AccountPairingProgress::Ready]);

        // A late timer finds nothing to do.
        on_timeout(&mut ctx);
        assert!(progress(&mut ctx).is_empty());
    }

    #[test]
    fn test_timeout_fails_request() {
        let (mut ctx, _rig) = sim_context();
        request(&mut ctx).unwrap();
        on_service_connectivity(&mut ctx, ConnectivityChange::Lost);
        on_timeout(&mut ctx);
        assert_eq!(progress(&mut ctx), vec![AccountPairingProgress::TimedOut]);
        assert!(request(&mut ctx).is_ok());
    }
}
