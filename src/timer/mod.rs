//! Deferred single-shot timers
//!
//! A [`DeferredTimer`] fires once after a programmable delay and can be moved or
//! cancelled before it fires. Firings are not delivered as callbacks into the
//! controller; instead every firing produces a [`TimerExpiry`] message that the
//! owner of the timer feeds back through [`DeferredTimer::accept`]. Each
//! schedule, reschedule and cancel bumps the handle's generation, and only an
//! expiry carrying the current generation is accepted, at most once.
//!
//! ```text
//! schedule ──► gen 1 ──(reschedule)──► gen 2 ──► expiry(gen 2) ✓
//!                 └──► expiry(gen 1) ✗ (stale, dropped by accept)
//! ```

pub mod manual;
pub mod tokio_timer;

use std::time::Duration;

pub use manual::ManualTimer;
pub use tokio_timer::TokioTimer;

/// Identifies one timer slot owned by a [`DeferredTimer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(pub(crate) u64);

impl TimerHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// A firing of a timer slot, tagged with the generation that armed it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerExpiry {
    pub handle: TimerHandle,
    pub generation: u64,
}

pub trait DeferredTimer {
    /// Allocates a new slot and arms it to fire after `delay`
    fn schedule(&mut self, delay: Duration) -> TimerHandle;

    /// Re-arms `handle` to fire after `delay` from now, superseding any
    /// pending firing. Works whether or not the slot already fired.
    fn reschedule(&mut self, handle: TimerHandle, delay: Duration);

    /// Drops any pending firing of `handle`
    fn cancel(&mut self, handle: TimerHandle);

    /// Returns true exactly once for the expiry of the current generation
    fn accept(&mut self, expiry: &TimerExpiry) -> bool;
}

/// Generation bookkeeping for a single slot, shared by the timer backends
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct SlotGeneration {
    current: u64,
    consumed: bool,
}

impl SlotGeneration {
    pub(crate) fn bump(&mut self) -> u64 {
        self.current += 1;
        self.consumed = false;
        self.current
    }

    pub(crate) fn accept(&mut self, generation: u64) -> bool {
        if generation != self.current || self.consumed {
            return false;
        }
        self.consumed = true;
        true
    }
}
