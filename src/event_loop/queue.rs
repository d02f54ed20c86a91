//! Bounded FIFO of deferred work.

use crate::error::ConnectivityError;
use std::collections::VecDeque;

/// Fixed-capacity FIFO queue.
///
/// Overflow is reported to the caller, items are never dropped silently.
#[derive(Debug)]
pub struct WorkQueue<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> WorkQueue<T> {
    /// Create a queue holding at most `capacity` items.
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append an item.
    ///
    /// Returns [`ConnectivityError::QueueFull`] when the queue is at capacity.
    pub fn push(&mut self, item: T) -> Result<(), ConnectivityError> {
        if self.items.len() >= self.capacity {
            return Err(ConnectivityError::QueueFull);
        }
        self.items.push_back(item);
        Ok(())
    }

    /// Remove the oldest item.
    pub fn pop(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
