//! Fixed-capacity table of BLE connections.
//!
//! Each entry owns at most one pending indication buffer. The buffer is
//! dropped when the peer confirms the indication or when the entry is
//! released, whichever happens first.

use crate::error::ConnectivityError;

/// Default ATT MTU before negotiation.
pub const DEFAULT_MTU: u16 = 23;

/// State of one BLE connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BleConnection {
    pub conn_id: u16,
    pub allocated: bool,
    pub mtu: u16,
    pub subscribed: bool,
    pending_indication: Option<Vec<u8>>,
}

impl BleConnection {
    fn claim(conn_id: u16) -> Self {
        Self {
            conn_id,
            allocated: true,
            mtu: DEFAULT_MTU,
            subscribed: false,
            pending_indication: None,
        }
    }

    /// True while an indication is waiting for confirmation.
    pub fn has_pending_indication(&self) -> bool {
        self.pending_indication.is_some()
    }

    /// The buffer of the in-flight indication.
    pub fn pending_indication(&self) -> Option<&[u8]> {
        self.pending_indication.as_deref()
    }

    /// Take ownership of an indication buffer.
    ///
    /// Fails with `IncorrectState` if one is already pending, leaving the
    /// existing buffer untouched.
    pub fn set_pending_indication(&mut self, data: Vec<u8>) -> Result<(), ConnectivityError> {
        if self.pending_indication.is_some() {
            return Err(ConnectivityError::IncorrectState);
        }
        self.pending_indication = Some(data);
        Ok(())
    }

    /// Release the pending buffer, returning it if there was one.
    pub fn take_pending_indication(&mut self) -> Option<Vec<u8>> {
        self.pending_indication.take()
    }
}

/// Connection table with a capacity fixed at construction.
#[derive(Debug)]
pub struct ConnectionPool {
    slots: Vec<BleConnection>,
}

impl ConnectionPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![BleConnection::default(); capacity],
        }
    }

    /// Find the entry for `conn_id`, claiming the lowest free slot if it is
    /// not present yet.
    ///
    /// A full pool fails with `PoolExhausted` and leaves every entry as it was.
    pub fn acquire(&mut self, conn_id: u16) -> Result<&mut BleConnection, ConnectivityError> {
        if let Some(existing) = self
            .slots
            .iter()
            .position(|slot| slot.allocated && slot.conn_id == conn_id)
        {
            return Ok(&mut self.slots[existing]);
        }

        let index = self
            .slots
            .iter()
            .position(|slot| !slot.allocated)
            .ok_or(ConnectivityError::PoolExhausted)?;
        self.slots[index] = BleConnection::claim(conn_id);
        Ok(&mut self.slots[index])
    }

    pub fn get(&self, conn_id: u16) -> Option<&BleConnection> {
        self.slots
            .iter()
            .find(|slot| slot.allocated && slot.conn_id == conn_id)
    }

    pub fn get_mut(&mut self, conn_id: u16) -> Option<&mut BleConnection> {
        self.slots
            .iter_mut()
            .find(|slot| slot.allocated && slot.conn_id == conn_id)
    }

    /// Free the entry for `conn_id` and any buffer it owns.
    ///
    /// Returns whether an entry existed. Releasing twice is harmless.
    pub fn release(&mut self, conn_id: u16) -> bool {
        match self.get_mut(conn_id) {
            Some(slot) => {
                *slot = BleConnection::default();
                true
            }
            None => false,
        }
    }

    /// Number of allocated entries.
    pub fn active(&self) -> usize {
        self.slots.iter().filter(|slot| slot.allocated).count()
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn is_full(&self) -> bool {
        self.active() >= self.capacity()
    }

    /// Ids of every allocated connection, in slot order.
    pub fn connection_ids(&self) -> Vec<u16> {
        self.slots
            .iter()
            .filter(|slot| slot.allocated)
            .map(|slot| slot.conn_id)
            .collect()
    }
}
