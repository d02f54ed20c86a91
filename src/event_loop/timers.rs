//! One-shot timers keyed by kind.
//!
//! There is no explicit cancellation. A timer that fires after the condition
//! it was armed for has gone away finds nothing to do, so handlers must check
//! the current state before acting.

/// Timers used by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Backoff before the next station connect attempt.
    StationReconnect,
    /// End of the on-demand AP idle window.
    ApIdle,
    /// Account pairing gave up waiting for service connectivity.
    PairingConnectivity,
}

#[derive(Debug, Clone, Copy)]
struct Timer<K> {
    kind: K,
    deadline_ms: u64,
}

/// Set of armed one-shot timers, at most one per kind.
#[derive(Debug)]
pub struct TimerQueue<K> {
    timers: Vec<Timer<K>>,
}

impl<K: Copy + PartialEq> TimerQueue<K> {
    pub fn new() -> Self {
        Self { timers: Vec::new() }
    }

    /// Arm `kind` to fire at `deadline_ms`.
    ///
    /// Re-arming a kind that is already pending moves its deadline.
    pub fn start(&mut self, kind: K, deadline_ms: u64) {
        match self.timers.iter_mut().find(|t| t.kind == kind) {
            Some(timer) => timer.deadline_ms = deadline_ms,
            None => self.timers.push(Timer { kind, deadline_ms }),
        }
    }

    /// Deadline of `kind`, if armed.
    pub fn deadline(&self, kind: K) -> Option<u64> {
        self.timers
            .iter()
            .find(|t| t.kind == kind)
            .map(|t| t.deadline_ms)
    }

    /// Earliest pending deadline.
    pub fn next_deadline(&self) -> Option<u64> {
        self.timers.iter().map(|t| t.deadline_ms).min()
    }

    /// Remove and return every timer due at `now_ms`, earliest first.
    pub fn take_due(&mut self, now_ms: u64) -> Vec<K> {
        let mut due: Vec<Timer<K>> = Vec::new();
        self.timers.retain(|t| {
            if t.deadline_ms <= now_ms {
                due.push(*t);
                false
            } else {
                true
            }
        });
        due.sort_by_key(|t| t.deadline_ms);
        due.into_iter().map(|t| t.kind).collect()
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }
}

impl<K: Copy + PartialEq> Default for TimerQueue<K> {
    fn default() -> Self {
        Self::new()
    }
}
