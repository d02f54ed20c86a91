//! Platform driver bindings.
//!
//! Drivers never call into the orchestrator directly. They push
//! [`DriverEvent`]s into a channel which a forwarding task drains into the
//! [`Bridge`](crate::bridge::Bridge), so no driver callback ever runs under
//! the stack lock.

use crate::driver::DriverEvent;
use log::warn;
use tokio::sync::mpsc::UnboundedSender;

pub mod esp32;

/// Channel end handed to every platform driver.
pub type EventSender = UnboundedSender<DriverEvent>;

pub(crate) fn emit(tx: &EventSender, event: DriverEvent) {
    if tx.send(event).is_err() {
        warn!("Driver event dropped, forwarder has stopped");
    }
}
