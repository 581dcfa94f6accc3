//! [`DeferredTimer`] backed by tokio sleep tasks
//!
//! Every arm spawns one sleeping task that posts a [`TimerExpiry`] to the expiry
//! channel when it wakes. Re-arming aborts the previous task; if that task already
//! woke and its message is in flight, the bumped generation makes `accept` drop it.
//!
//! Must be used from within a tokio runtime.

use super::{DeferredTimer, SlotGeneration, TimerExpiry, TimerHandle};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct TokioSlot {
    generation: SlotGeneration,
    task: Option<JoinHandle<()>>,
}

#[derive(Debug)]
pub struct TokioTimer {
    expiry_sender: mpsc::UnboundedSender<TimerExpiry>,
    next_id: u64,
    slots: HashMap<u64, TokioSlot>,
}

impl TokioTimer {
    /// Creates the timer together with the receiver its expiries arrive on
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TimerExpiry>) {
        let (expiry_sender, expiry_receiver) = mpsc::unbounded_channel();
        (
            Self {
                expiry_sender,
                next_id: 0,
                slots: HashMap::new(),
            },
            expiry_receiver,
        )
    }

    fn arm(&mut self, id: u64, delay: Duration) {
        let slot = self.slots.entry(id).or_default();
        if let Some(task) = slot.task.take() {
            task.abort();
        }

        let generation = slot.generation.bump();
        let sender = self.expiry_sender.clone();
        let expiry = TimerExpiry {
            handle: TimerHandle(id),
            generation,
        };

        slot.task = Some(tokio::spawn(async move {
            sleep(delay).await;
            if sender.send(expiry).is_err() {
                warn!("Timer {} fired after its owner went away", id);
            }
        }));

        debug!("Timer {} armed (generation {}, delay {:?})", id, generation, delay);
    }
}

impl DeferredTimer for TokioTimer {
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
            if let Some(task) = slot.task.take() {
                task.abort();
            }
            slot.generation.bump();
            debug!("Timer {} cancelled", handle.0);
        }
    }

    fn accept(&mut self, expiry: &TimerExpiry) -> bool {
        match self.slots.get_mut(&expiry.handle.0) {
            Some(slot) => {
                let accepted = slot.generation.accept(expiry.generation);
                if accepted {
                    slot.task = None;
                } else {
                    debug!(
                        "Dropping stale expiry of timer {} (generation {})",
                        expiry.handle.0, expiry.generation
                    );
                }
                accepted
            }
            None => false,
        }
    }
}

impl Drop for TokioTimer {
    fn drop(&mut self) {
        for slot in self.slots.values_mut() {
            if let Some(task) = slot.task.take() {
                task.abort();
            }
        }
    }
}
