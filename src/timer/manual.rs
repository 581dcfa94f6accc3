//! Virtual-clock timer
//!
//! Time only moves when [`ManualTimer::advance`] or [`ManualTimer::advance_to`] is
//! called. Useful for replaying recorded motion traces and for deterministic tests.

use super::{DeferredTimer, SlotGeneration, TimerExpiry, TimerHandle};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Default)]
struct ManualSlot {
    generation: SlotGeneration,
    armed: Option<(u64, Duration)>,
}

#[derive(Debug, Default)]
pub struct ManualTimer {
    now: Duration,
    next_id: u64,
    slots: HashMap<u64, ManualSlot>,
}

impl ManualTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Virtual time elapsed since construction
    pub fn now(&self) -> Duration {
        self.now
    }

    /// Absolute virtual deadline of `handle`, if armed
    pub fn deadline(&self, handle: TimerHandle) -> Option<Duration> {
        self.slots
            .get(&handle.0)
            .and_then(|slot| slot.armed.map(|(_, deadline)| deadline))
    }

    pub fn next_deadline(&self) -> Option<Duration> {
        self.slots
            .values()
            .filter_map(|slot| slot.armed.map(|(_, deadline)| deadline))
            .min()
    }

    pub fn advance(&mut self, by: Duration) -> Vec<TimerExpiry> {
        self.advance_to(self.now + by)
    }

    /// Moves the clock to `time` and returns every expiry that came due, in
    /// deadline order. Moving backwards is ignored.
    pub fn advance_to(&mut self, time: Duration) -> Vec<TimerExpiry> {
        if time > self.now {
            self.now = time;
        }

        let mut due: Vec<(Duration, TimerExpiry)> = Vec::new();
        for (id, slot) in self.slots.iter_mut() {
            if let Some((generation, deadline)) = slot.armed {
                if deadline <= self.now {
                    slot.armed = None;
                    due.push((
                        deadline,
                        TimerExpiry {
                            handle: TimerHandle(*id),
                            generation,
                        },
                    ));
                }
            }
        }

        due.sort_by_key(|(deadline, _)| *deadline);
        due.into_iter().map(|(_, expiry)| expiry).collect()
    }

    fn arm(&mut self, id: u64, delay: Duration) {
        let deadline = self.now + delay;
        let slot = self.slots.entry(id).or_default();
        let generation = slot.generation.bump();
        slot.armed = Some((generation, deadline));
    }
}

impl DeferredTimer for ManualTimer {
    fn schedule(&mut self, delay: Duration) -> TimerHandle {
        self.next_id += 1;
        let id = self.next_id;
        self.arm(id, delay);
        TimerHandle(id)
    }

    fn reschedule(&mut self, handle: TimerHandle, delay: Duration) {
        self.arm(handle.0, delay);
    }

    fn cancel(&mut self, handle: TimerHandle) {
        if let Some(slot) = self.slots.get_mut(&handle.0) {
            slot.generation.bump();
            slot.armed = None;
        }
    }

    fn accept(&mut self, expiry: &TimerExpiry) -> bool {
        self.slots
            .get_mut(&expiry.handle.0)
            .map(|slot| slot.generation.accept(expiry.generation))
            .unwrap_or(false)
    }
}
