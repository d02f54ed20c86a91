//! Single-threaded event loop primitives.
//!
//! All orchestrator state is mutated from one logical thread. Work reaches it
//! through a bounded FIFO, deferred actions through one-shot timers, and the
//! async [`runner`] ties both to a tokio task.
//!
//! # Components
//!
//! - [`clock`] - monotonic millisecond time, real or manual
//! - [`queue`] - bounded work queue
//! - [`timers`] - one-shot timers keyed by kind
//! - [`runner`] - tokio task that drains work and fires timers

pub mod clock;
pub mod queue;
pub mod runner;
pub mod timers;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use queue::WorkQueue;
pub use runner::run;
pub use timers::{TimerKind, TimerQueue};
