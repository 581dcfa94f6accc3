//! Toggle controller - motion driven hold with debounced release
//!
//! Turns a stream of relative motion samples into a held action. The first
//! non-zero sample presses, every further sample pushes the release deadline
//! out, and once the input has been quiet for `release_delay` the action is
//! released again.
//!
//! # State Machine
//!
//! ```text
//!             motion ≠ 0 / press, arm timer
//!   Released ─────────────────────────────► Pressed ──┐
//!      ▲  │                                   │  ▲    │ motion ≠ 0 / rearm timer
//!      │  └─┐ timer / (stale, no-op)          │  └────┘
//!      │    │                                 │
//!      └────┴──────── timer / release ────────┘
//! ```
//!
//! The controller itself is synchronous and never spawns anything. Serializing
//! motion samples against timer expiries is the caller's job; see
//! [`super::controller_handle`] for the tokio runtime that does it.

use crate::action::{ActionDescriptor, ActionSink, InvocationError, Polarity};
use crate::timer::{DeferredTimer, TimerExpiry, TimerHandle};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info};

/// How a press is emitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToggleMode {
    /// Press on first motion, release after the quiet period
    #[default]
    Hold,
    /// Emit press + release immediately on first motion; the quiet period only
    /// re-arms the instance for the next burst
    Tap,
}

/// Resolved per-instance settings, fixed for the lifetime of the controller
#[derive(Clone, Debug, PartialEq)]
pub struct ToggleSettings {
    /// Asserted on the first motion sample after a release
    pub press_action: ActionDescriptor,

    /// Dropped once the input went quiet. Usually the same as `press_action`
    pub release_action: ActionDescriptor,

    /// Quiet time after the last motion sample before releasing
    pub release_delay: Duration,

    /// Handed to the sink with the press
    pub initial_press_delay: Duration,

    /// Handed to the sink with the release half of a tap
    pub post_action_delay: Duration,

    /// Sustained hold or one tap per motion burst
    pub mode: ToggleMode,
}

impl ToggleSettings {
    /// Hold settings for a single action with no extra delays
    pub fn hold(action: ActionDescriptor, release_delay: Duration) -> Self {
        Self {
            release_action: action.clone(),
            press_action: action,
            release_delay,
            initial_press_delay: Duration::ZERO,
            post_action_delay: Duration::ZERO,
            mode: ToggleMode::Hold,
        }
    }
}

/// Mutable part of a controller, published to observers after every event
///
/// Starts released with no timer slot allocated.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ToggleState {
    /// Press invoked without a matching release yet
    pub is_pressed: bool,
    /// Release timer slot, allocated on first motion and reused afterwards
    pub pending_timer: Option<TimerHandle>,
}

/// One toggle instance: settings, state, and the sink and timer it drives
///
/// `A` receives the press/release invocations, `T` owns the release timer
/// slot. Expiries coming back from `T` must be routed to
/// [`ToggleController::handle_timer_expiry`].
pub struct ToggleController<A, T> {
    name: String,
    settings: ToggleSettings,
    state: ToggleState,
    sink: A,
    timer: T,
}

impl<A: ActionSink, T: DeferredTimer> ToggleController<A, T> {
    /// Creates a released controller. `settings.release_delay` should be non-zero
    pub fn new(name: impl Into<String>, settings: ToggleSettings, sink: A, timer: T) -> Self {
        let name = name.into();
        debug!("Creating toggle controller '{}': {:?}", name, settings);
        Self {
            name,
            settings,
            state: ToggleState::default(),
            sink,
            timer,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &ToggleSettings {
        &self.settings
    }

    pub fn state(&self) -> ToggleState {
        self.state
    }

    pub fn is_pressed(&self) -> bool {
        self.state.is_pressed
    }

    /// Timer backing the release slot, e.g. to look up the current deadline
    pub fn timer(&self) -> &T {
        &self.timer
    }

    pub fn timer_mut(&mut self) -> &mut T {
        &mut self.timer
    }

    /// Handles one relative motion sample
    ///
    /// A zero magnitude is ignored entirely. Otherwise the action is pressed if
    /// it is not already held and the release timer is pushed out to
    /// `release_delay` from now.
    ///
    /// # Errors
    ///
    /// Returns the sink's error if the press was refused. The state still moves
    /// to pressed and the timer is still armed, so the release path runs as usual.
    pub fn on_motion(&mut self, magnitude: i32) -> Result<(), InvocationError> {
        if magnitude == 0 {
            return Ok(());
        }

        let mut result = Ok(());
        if !self.state.is_pressed {
            result = self.press();
            self.state.is_pressed = true;
        }

        self.arm_release_timer();
        result
    }

    /// Handles expiry of the release timer
    ///
    /// No-op when nothing is held. The state is cleared even if the sink
    /// refuses the release.
    pub fn on_release_timer_fired(&mut self) -> Result<(), InvocationError> {
        if !self.state.is_pressed {
            debug!("[{}] Release timer fired while released, ignoring", self.name);
            return Ok(());
        }

        self.state.is_pressed = false;

        match self.settings.mode {
            ToggleMode::Hold => {
                debug!(
                    "[{}] Releasing {} after no movement",
                    self.name, self.settings.release_action
                );
                self.sink
                    .invoke(&self.settings.release_action, Polarity::Release, Duration::ZERO)
                    .inspect_err(|e| error!("[{}] Release failed: {}", self.name, e))
            }
            ToggleMode::Tap => {
                debug!("[{}] Quiet period over, tap re-armed", self.name);
                Ok(())
            }
        }
    }

    /// Feeds a timer expiry message back into the controller
    ///
    /// Expiries from superseded generations, or for a slot this controller does
    /// not own, are dropped.
    pub fn handle_timer_expiry(&mut self, expiry: &TimerExpiry) -> Result<(), InvocationError> {
        if self.state.pending_timer != Some(expiry.handle) || !self.timer.accept(expiry) {
            debug!("[{}] Ignoring stale timer expiry {:?}", self.name, expiry);
            return Ok(());
        }
        self.on_release_timer_fired()
    }

    fn press(&self) -> Result<(), InvocationError> {
        info!(
            "[{}] Pressing {} due to movement",
            self.name, self.settings.press_action
        );

        let press = self.sink.invoke(
            &self.settings.press_action,
            Polarity::Press,
            self.settings.initial_press_delay,
        );

        let result = match (self.settings.mode, press) {
            (ToggleMode::Tap, Ok(())) => self.sink.invoke(
                &self.settings.release_action,
                Polarity::Release,
                self.settings.post_action_delay,
            ),
            (_, press) => press,
        };

        result.inspect_err(|e| error!("[{}] Press failed: {}", self.name, e))
    }

    fn arm_release_timer(&mut self) {
        let delay = self.settings.release_delay;
        match self.state.pending_timer {
            Some(handle) => self.timer.reschedule(handle, delay),
            None => self.state.pending_timer = Some(self.timer.schedule(delay)),
        }
    }
}
