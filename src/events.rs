//! Typed device events.
//!
//! Events posted by the state machines travel through the work queue, are
//! dispatched to the orchestrator's own handlers first, and are then handed
//! to the application's [`EventSink`].

use serde::Serialize;

/// Direction of a boolean connectivity edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectivityChange {
    Established,
    Lost,
    NoChange,
}

impl ConnectivityChange {
    /// Classify the transition from `prev` to `now`.
    pub fn between(prev: bool, now: bool) -> Self {
        match (prev, now) {
            (false, true) => Self::Established,
            (true, false) => Self::Lost,
            _ => Self::NoChange,
        }
    }
}

/// Why a BLE connection stopped being usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorReason {
    /// The peer closed the link.
    RemoteDeviceDisconnected,
    /// This device closed the link.
    AppClosedConnection,
    /// Link lost for any other reason (supervision timeout, stack error).
    ProtocolAbort,
    /// The peer did not confirm an indication. Carries the GATT status.
    IndicationFailed(u16),
}

/// Events from the BLE transport to the protocol layer above it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BleEvent {
    /// Peer enabled indications on the TX characteristic.
    Subscribe { conn_id: u16 },
    /// Peer disabled indications on the TX characteristic.
    Unsubscribe { conn_id: u16 },
    /// Data written to the RX characteristic.
    WriteReceived { conn_id: u16, data: Vec<u8> },
    /// Peer confirmed the pending indication.
    IndicationConfirmed { conn_id: u16 },
    ConnectionError {
        conn_id: u16,
        reason: ConnectionErrorReason,
    },
}

/// Progress of an account pairing request waiting on service connectivity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountPairingProgress {
    /// Service connectivity is available, pairing can proceed.
    Ready,
    /// Service connectivity did not come up in time.
    TimedOut,
}

/// Events posted to interested subsystems.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    WiFiConnectivityChange(ConnectivityChange),
    InternetConnectivityChange {
        ipv4: ConnectivityChange,
        ipv6: ConnectivityChange,
    },
    ServiceConnectivityChange(ConnectivityChange),
    FabricMembershipChange { is_member: bool },
    ServiceProvisioningChange { is_provisioned: bool },
    AccountPairingChange { is_paired: bool },
    AccountPairingProgress(AccountPairingProgress),
    Ble(BleEvent),
}

/// Receiver of device events outside the orchestrator.
pub trait EventSink: Send {
    fn post(&mut self, event: &DeviceEvent);
}

impl EventSink for tokio::sync::mpsc::UnboundedSender<DeviceEvent> {
    fn post(&mut self, event: &DeviceEvent) {
        if self.send(event.clone()).is_err() {
            log::debug!("Event receiver dropped, discarding {:?}", event);
        }
    }
}

/// Sink that discards every event.
#[derive(Debug, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn post(&mut self, _event: &DeviceEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connectivity_change_between() {
        assert_eq!(
            ConnectivityChange::between(false, true),
            ConnectivityChange::Established
        );
        assert_eq!(
            ConnectivityChange::between(true, false),
            ConnectivityChange::Lost
        );
        assert_eq!(
            ConnectivityChange::between(true, true),
            ConnectivityChange::NoChange
        );
        assert_eq!(
            ConnectivityChange::between(false, false),
            ConnectivityChange::NoChange
        );
    }

    #[test]
    fn test_channel_sink_forwards() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut sink = tx;
        sink.post(&DeviceEvent::FabricMembershipChange { is_member: true });
        assert_eq!(
            rx.try_recv().unwrap(),
            DeviceEvent::FabricMembershipChange { is_member: true }
        );
    }

    #[test]
    fn test_channel_sink_tolerates_closed_receiver() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        drop(rx);
        let mut sink = tx;
        sink.post(&DeviceEvent::AccountPairingChange { is_paired: false });
    }
}
