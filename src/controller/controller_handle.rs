//! Toggle Handle - tokio runtime for toggle controllers
//!
//! Every configured instance gets its own worker task. The worker owns the
//! [`ToggleController`] and its [`TokioTimer`], and is the only place where
//! controller state is touched, so motion samples and timer expiries are applied
//! strictly one after the other.
//!
//! # Architecture
//!
//! ```text
//!                ┌──────────── ToggleWorker task ─────────────┐
//! InputPipeline ─┼─[motion]──►                               │
//!  (ToggleHandle)│            ToggleController ──► ActionSink ┼─► BehaviorQueue
//! TokioTimer ────┼─[expiry]──►       │                        │
//!                │                   └──► watch<ToggleState> ─┼─► observers
//!                └────────────────────────────────────────────┘
//! ```
//!
//! # Worker Lifecycle
//!
//! ```text
//! Initializing ──start()──► Running ──(cancel / channel closed)──► done
//! ```

use super::toggle_controller::{ToggleController, ToggleSettings, ToggleState};
use crate::action::ActionSink;
use crate::config::{Config, ConfigError};
use crate::pipeline::{EventType, InputEvent, InputProcessor, ProcessorFlow};
use crate::timer::{DeferredTimer, TimerExpiry, TokioTimer};
use statum::{machine, state};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Buffered motion samples per instance before the stage starts dropping
pub const MOTION_CHANNEL_CAPACITY: usize = 1000;

type SharedSink = Arc<dyn ActionSink>;

/// Errors that can occur while spawning or driving a toggle instance
#[derive(Debug, thiserror::Error)]
pub enum ToggleError {
    /// Instance could not be created (no runtime, unusable settings)
    #[error("Initialization error: {0}")]
    InitializationError(String),

    /// Motion channel to the worker is full or closed
    #[error("Channel error: {0}")]
    ChannelError(String),

    /// Worker task panicked or was aborted
    #[error("Task error: {0}")]
    TaskError(String),

    #[error("Config error: {0}")]
    ConfigError(#[from] ConfigError),
}

#[state]
#[derive(Debug, Clone)]
pub enum WorkerState {
    Initializing,
    Running,
}

#[machine]
pub struct ToggleWorker<S: WorkerState> {
    controller: ToggleController<SharedSink, TokioTimer>,
    motion_receiver: mpsc::Receiver<i32>,
    expiry_receiver: mpsc::UnboundedReceiver<TimerExpiry>,
    state_sender: watch::Sender<ToggleState>,
    shutdown: CancellationToken,
}

impl<S: WorkerState> ToggleWorker<S> {
    pub fn name(&self) -> &str {
        self.controller.name()
    }
}

impl ToggleWorker<Initializing> {
    pub fn create(
        name: String,
        settings: ToggleSettings,
        sink: SharedSink,
        motion_receiver: mpsc::Receiver<i32>,
        state_sender: watch::Sender<ToggleState>,
        shutdown: CancellationToken,
    ) -> Self {
        let (timer, expiry_receiver) = TokioTimer::new();
        let controller = ToggleController::new(name, settings, sink, timer);

        Self::new(
            controller,
            motion_receiver,
            expiry_receiver,
            state_sender,
            shutdown,
        )
    }

    pub fn start(self) -> ToggleWorker<Running> {
        info!("Toggle worker '{}' running", self.name());
        self.transition()
    }
}

impl ToggleWorker<Running> {
    /// Applies motion samples and timer expiries until cancelled
    ///
    /// Motion is polled before expiries so that a sample and an expiry that
    /// become ready together resolve as "motion continued".
    pub async fn run_until_shutdown(mut self) {
        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => {
                    info!("Toggle worker '{}' received shutdown", self.name());
                    break;
                }

                motion = self.motion_receiver.recv() => match motion {
                    Some(magnitude) => {
                        if let Err(e) = self.controller.on_motion(magnitude) {
                            warn!("[{}] Motion handled with sink error: {}", self.name(), e);
                        }
                    }
                    None => {
                        info!("Motion channel of '{}' closed", self.name());
                        break;
                    }
                },

                Some(expiry) = self.expiry_receiver.recv() => {
                    if let Err(e) = self.controller.handle_timer_expiry(&expiry) {
                        warn!("[{}] Release handled with sink error: {}", self.name(), e);
                    }
                }
            }

            self.state_sender.send_replace(self.controller.state());
        }

        self.release_held();
    }

    fn release_held(&mut self) {
        if !self.controller.is_pressed() {
            return;
        }

        debug!("Releasing held action of '{}' on shutdown", self.name());
        if let Some(handle) = self.controller.state().pending_timer {
            self.controller.timer_mut().cancel(handle);
        }
        if let Err(e) = self.controller.on_release_timer_fired() {
            error!("[{}] Release on shutdown failed: {}", self.name(), e);
        }
        self.state_sender.send_replace(self.controller.state());
    }
}

/// Handle for one running toggle instance
///
/// Doubles as the instance's pipeline stage: relative motion events are
/// forwarded to the worker, every event is passed on unchanged.
pub struct ToggleHandle {
    name: String,
    motion_sender: mpsc::Sender<i32>,
    state_receiver: watch::Receiver<ToggleState>,
    shutdown: CancellationToken,
    task_handle: Option<JoinHandle<()>>,
}

impl ToggleHandle {
    /// Spawns a worker for one instance on the current tokio runtime
    ///
    /// The worker stops when `shutdown` (or [`ToggleHandle::shutdown`]) is
    /// cancelled, releasing the action first if it is still held.
    ///
    /// # Errors
    ///
    /// * [`ToggleError::InitializationError`] - called outside a tokio runtime,
    ///   or `release_delay` is zero
    pub fn spawn(
        name: impl Into<String>,
        settings: ToggleSettings,
        sink: SharedSink,
        shutdown: &CancellationToken,
    ) -> Result<Self, ToggleError> {
        let name = name.into();
        info!("Spawning toggle instance '{}'", name);

        tokio::runtime::Handle::try_current()
            .map_err(|e| ToggleError::InitializationError(e.to_string()))?;

        if settings.release_delay.is_zero() {
            return Err(ToggleError::InitializationError(format!(
                "instance '{}': release delay must be greater than 0",
                name
            )));
        }

        let (motion_sender, motion_receiver) = mpsc::channel(MOTION_CHANNEL_CAPACITY);
        let (state_sender, state_receiver) = watch::channel(ToggleState::default());
        let shutdown = shutdown.child_token();

        let worker = ToggleWorker::create(
            name.clone(),
            settings,
            sink,
            motion_receiver,
            state_sender,
            shutdown.clone(),
        )
        .start();

        let task_handle = tokio::spawn(worker.run_until_shutdown());
        debug!("Toggle worker task spawned for '{}'", name);

        Ok(Self {
            name,
            motion_sender,
            state_receiver,
            shutdown,
            task_handle: Some(task_handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Last state published by the worker
    pub fn state(&self) -> ToggleState {
        *self.state_receiver.borrow()
    }

    pub fn state_receiver(&self) -> watch::Receiver<ToggleState> {
        self.state_receiver.clone()
    }

    pub fn motion_sender(&self) -> mpsc::Sender<i32> {
        self.motion_sender.clone()
    }

    /// Queues a motion sample without waiting
    pub fn submit_motion(&self, magnitude: i32) -> Result<(), ToggleError> {
        self.motion_sender
            .try_send(magnitude)
            .map_err(|e| match e {
                TrySendError::Full(_) => {
                    ToggleError::ChannelError(format!("motion queue of '{}' full", self.name))
                }
                TrySendError::Closed(_) => {
                    ToggleError::ChannelError(format!("worker '{}' stopped", self.name))
                }
            })
    }

    /// Stops the worker and waits for it to finish
    pub async fn shutdown(&mut self) -> Result<(), ToggleError> {
        debug!("Sending shutdown signal to toggle instance '{}'", self.name);
        self.shutdown.cancel();

        match self.task_handle.take() {
            Some(handle) => handle.await.map_err(|e| {
                error!("Toggle worker '{}' failed: {}", self.name, e);
                ToggleError::TaskError(e.to_string())
            }),
            None => {
                debug!("Toggle instance '{}' already shut down", self.name);
                Ok(())
            }
        }
    }
}

impl InputProcessor for ToggleHandle {
    fn name(&self) -> &str {
        &self.name
    }

    fn handle_event(&mut self, event: &InputEvent) -> ProcessorFlow {
        if event.event_type == EventType::Rel && event.value != 0 {
            if let Err(e) = self.submit_motion(event.value) {
                warn!("Dropping motion sample: {}", e);
            }
        }
        ProcessorFlow::Continue
    }
}

/// Spawns one [`ToggleHandle`] per configured instance, sharing `sink`
pub fn spawn_instances(
    config: &Config,
    sink: SharedSink,
    shutdown: &CancellationToken,
) -> Result<Vec<ToggleHandle>, ToggleError> {
    let mut handles = Vec::with_capacity(config.instances.len());
    for instance in &config.instances {
        let settings = instance.settings()?;
        handles.push(ToggleHandle::spawn(
            instance.name.clone(),
            settings,
            sink.clone(),
            shutdown,
        )?);
    }
    info!("Spawned {} toggle instance(s)", handles.len());
    Ok(handles)
}
