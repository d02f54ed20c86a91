//! Async event loop task.
//!
//! Each iteration takes the stack lock, fires due timers, drains the work
//! queue, and releases the lock before sleeping. The sleep ends early when
//! the bridge posts work or the token is cancelled.

use crate::bridge::Bridge;
use log::info;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Upper bound on a sleep with no armed timer.
const IDLE_WAIT: Duration = Duration::from_secs(60);

/// Run the event loop until `cancel` fires.
pub async fn run(bridge: Bridge, cancel: CancellationToken) {
    info!("Event loop started");

    loop {
        let wait = {
            let mut manager = bridge.lock();
            manager.run_once();
            manager.next_timer_delay()
        };

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = bridge.notified() => {}
            _ = tokio::time::sleep(wait.unwrap_or(IDLE_WAIT)) => {}
        }
    }

    info!("Event loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::Bridge;
    use crate::manager::tests_support::sim_manager;

    #[tokio::test]
    async fn test_runner_stops_on_cancel() {
        let (manager, _rig) = sim_manager();
        let bridge = Bridge::new(manager);
        let cancel = CancellationToken::new();

        let task = tokio::spawn(run(bridge.clone(), cancel.clone()));
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("runner did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_runner_processes_scheduled_work() {
        let (manager, _rig) = sim_manager();
        let bridge = Bridge::new(manager);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(bridge.clone(), cancel.clone()));

        let (tx, rx) = tokio::sync::oneshot::channel();
        bridge
            .schedule_work(move |manager| {
                let _ = tx.send(manager.station_state());
            })
            .unwrap();

        let state = tokio::time::timeout(Duration::from_secs(5), rx)
            .await
            .expect("work item never ran")
            .unwrap();
        assert_eq!(state, crate::wifi::StationState::NotConnected);

        cancel.cancel();
        task.await.unwrap();
    }
}
