//! Behavior queue - tokio backed [`ActionSink`]
//!
//! Invocations are pushed into a bounded channel and executed in order by a
//! single worker task. Each queued entry first waits out its delay, then expands
//! its descriptor into one [`ActionEvent`] per step and forwards them to the
//! output channel. Because the worker is sequential, a delayed press can never
//! be overtaken by the release queued after it.

use super::{ActionDescriptor, ActionSink, BehaviorBinding, InvocationError, Polarity};
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

/// One executed step of an action descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionStep {
    Keycode(u32),
    Behavior(BehaviorBinding),
}

impl fmt::Display for ActionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionStep::Keycode(code) => write!(f, "keycode 0x{:02X}", code),
            ActionStep::Behavior(binding) => write!(
                f,
                "{}({}, {})",
                binding.behavior, binding.param1, binding.param2
            ),
        }
    }
}

/// Emitted by the queue worker for every step it executes
#[derive(Debug, Clone)]
pub struct ActionEvent {
    pub step: ActionStep,
    pub polarity: Polarity,
    pub at: Instant,
}

#[derive(Clone, Debug)]
pub struct QueueSettings {
    pub capacity: usize,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self { capacity: 64 }
    }
}

#[derive(Debug)]
struct QueuedAction {
    action: ActionDescriptor,
    polarity: Polarity,
    delay: Duration,
}

/// Sink handle; cheap to clone, all clones feed the same worker
#[derive(Clone, Debug)]
pub struct BehaviorQueue {
    sender: mpsc::Sender<QueuedAction>,
}

impl BehaviorQueue {
    /// Spawns the queue worker on the current tokio runtime
    ///
    /// The worker runs until every `BehaviorQueue` clone is dropped or the
    /// `output` receiver goes away.
    pub fn spawn(
        settings: Option<QueueSettings>,
        output: mpsc::Sender<ActionEvent>,
    ) -> (Self, JoinHandle<()>) {
        let settings = settings.unwrap_or_default();
        info!("Spawning behavior queue with settings: {:?}", settings);

        let (sender, receiver) = mpsc::channel(settings.capacity.max(1));
        let handle = tokio::spawn(run_queue(receiver, output));

        (Self { sender }, handle)
    }
}

impl ActionSink for BehaviorQueue {
    fn invoke(
        &self,
        action: &ActionDescriptor,
        polarity: Polarity,
        delay: Duration,
    ) -> Result<(), InvocationError> {
        if let ActionDescriptor::Bindings(bindings) = action {
            if bindings.is_empty() {
                return Err(InvocationError::InvalidDescriptor(
                    "binding list is empty".to_string(),
                ));
            }
        }

        let queued = QueuedAction {
            action: action.clone(),
            polarity,
            delay,
        };

        match self.sender.try_send(queued) {
            Ok(_) => {
                debug!("Queued {} of {} (delay {:?})", polarity, action, delay);
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                warn!("Behavior queue full, dropping {} of {}", polarity, action);
                Err(InvocationError::Rejected("behavior queue full".to_string()))
            }
            Err(TrySendError::Closed(_)) => Err(InvocationError::Unavailable(
                "behavior queue worker stopped".to_string(),
            )),
        }
    }
}

async fn run_queue(mut receiver: mpsc::Receiver<QueuedAction>, output: mpsc::Sender<ActionEvent>) {
    debug!("Behavior queue worker started");

    while let Some(queued) = receiver.recv().await {
        if !queued.delay.is_zero() {
            sleep(queued.delay).await;
        }

        for step in expand(&queued.action) {
            let event = ActionEvent {
                step,
                polarity: queued.polarity,
                at: Instant::now(),
            };
            if let Err(e) = output.send(event).await {
                error!("Action output channel closed: {}", e);
                return;
            }
        }
    }

    info!("Behavior queue worker finished");
}

fn expand(action: &ActionDescriptor) -> Vec<ActionStep> {
    match action {
        ActionDescriptor::Keycode(code) => vec![ActionStep::Keycode(*code)],
        ActionDescriptor::Bindings(bindings) => bindings
            .iter()
            .cloned()
            .map(ActionStep::Behavior)
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kp(code: u32) -> BehaviorBinding {
        BehaviorBinding {
            behavior: "kp".into(),
            param1: code,
            param2: 0,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn executes_in_order_after_delay() {
        let (tx, mut rx) = mpsc::channel(16);
        let (queue, _worker) = BehaviorQueue::spawn(None, tx);
        let start = Instant::now();

        queue
            .invoke(&ActionDescriptor::Keycode(4), Polarity::Press, Duration::from_millis(20))
            .unwrap();
        queue
            .invoke(&ActionDescriptor::Keycode(4), Polarity::Release, Duration::ZERO)
            .unwrap();

        let press = rx.recv().await.unwrap();
        assert_eq!(press.step, ActionStep::Keycode(4));
        assert_eq!(press.polarity, Polarity::Press);
        assert!(press.at - start >= Duration::from_millis(20));

        let release = rx.recv().await.unwrap();
        assert_eq!(release.polarity, Polarity::Release);
        assert!(release.at >= press.at);
    }

    #[tokio::test]
    async fn fans_out_binding_list() {
        let (tx, mut rx) = mpsc::channel(16);
        let (queue, _worker) = BehaviorQueue::spawn(None, tx);

        let action = ActionDescriptor::Bindings(vec![kp(4), kp(5)]);
        queue.invoke(&action, Polarity::Press, Duration::ZERO).unwrap();

        assert_eq!(rx.recv().await.unwrap().step, ActionStep::Behavior(kp(4)));
        assert_eq!(rx.recv().await.unwrap().step, ActionStep::Behavior(kp(5)));
    }

    #[tokio::test]
    async fn rejects_empty_binding_list() {
        let (tx, _rx) = mpsc::channel(1);
        let (queue, _worker) = BehaviorQueue::spawn(None, tx);

        let err = queue
            .invoke(&ActionDescriptor::Bindings(vec![]), Polarity::Press, Duration::ZERO)
            .unwrap_err();
        assert!(matches!(err, InvocationError::InvalidDescriptor(_)));
    }

    #[tokio::test]
    async fn reports_stopped_worker() {
        let (tx, rx) = mpsc::channel(1);
        let (queue, worker) = BehaviorQueue::spawn(None, tx);
        drop(rx);

        // First send wakes the worker, which exits once the output is gone
        let _ = queue.invoke(&ActionDescriptor::Keycode(1), Polarity::Press, Duration::ZERO);
        worker.await.unwrap();

        let err = queue
            .invoke(&ActionDescriptor::Keycode(1), Polarity::Release, Duration::ZERO)
            .unwrap_err();
        assert!(matches!(err, InvocationError::Unavailable(_)));
    }
}
