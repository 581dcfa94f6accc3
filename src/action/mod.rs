//! Action descriptors and the sink that executes them
//!
//! The toggle controller never looks inside an [`ActionDescriptor`]. It only hands
//! the descriptor to an [`ActionSink`] together with a [`Polarity`] and a delay.
//! Whether a descriptor expands into one key event or a whole chain of behaviors
//! is decided by the sink.
//!
//! ```text
//! ToggleController ─[descriptor, polarity, delay]─► ActionSink ─► (key events)
//! ```

pub mod behavior_queue;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub use behavior_queue::{ActionEvent, ActionStep, BehaviorQueue, QueueSettings};

/// A single behavior invocation, e.g. `kp` with a keycode as first parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BehaviorBinding {
    pub behavior: String,
    #[serde(default)]
    pub param1: u32,
    #[serde(default)]
    pub param2: u32,
}

/// What to assert on press and drop on release
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionDescriptor {
    /// A plain HID usage / keycode
    Keycode(u32),
    /// Ordered list of behavior bindings, invoked back to back
    Bindings(Vec<BehaviorBinding>),
}

impl fmt::Display for ActionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionDescriptor::Keycode(code) => write!(f, "keycode 0x{:02X}", code),
            ActionDescriptor::Bindings(bindings) => {
                write!(f, "bindings [")?;
                for (idx, binding) in bindings.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(
                        f,
                        "{}({}, {})",
                        binding.behavior, binding.param1, binding.param2
                    )?;
                }
                write!(f, "]")
            }
        }
    }
}

/// Direction of an action invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Polarity {
    Press,
    Release,
}

impl fmt::Display for Polarity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Polarity::Press => write!(f, "press"),
            Polarity::Release => write!(f, "release"),
        }
    }
}

/// Errors reported by an [`ActionSink`] when it refuses an invocation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvocationError {
    /// The action backend is gone or not running
    #[error("Action backend unavailable: {0}")]
    Unavailable(String),

    /// The backend is up but refused the request (e.g. queue full)
    #[error("Action rejected: {0}")]
    Rejected(String),

    /// The descriptor cannot be executed by this backend
    #[error("Invalid action descriptor: {0}")]
    InvalidDescriptor(String),
}

/// Executes press/release actions on behalf of a controller
///
/// Implementations must not block: the controller calls `invoke` from its event
/// loop and expects the sink to queue the work. `delay` is applied by the sink
/// before the action takes effect.
pub trait ActionSink: Send + Sync {
    fn invoke(
        &self,
        action: &ActionDescriptor,
        polarity: Polarity,
        delay: Duration,
    ) -> Result<(), InvocationError>;
}

impl<S: ActionSink + ?Sized> ActionSink for Arc<S> {
    fn invoke(
        &self,
        action: &ActionDescriptor,
        polarity: Polarity,
        delay: Duration,
    ) -> Result<(), InvocationError> {
        (**self).invoke(action, polarity, delay)
    }
}

impl<S: ActionSink + ?Sized> ActionSink for Box<S> {
    fn invoke(
        &self,
        action: &ActionDescriptor,
        polarity: Polarity,
        delay: Duration,
    ) -> Result<(), InvocationError> {
        (**self).invoke(action, polarity, delay)
    }
}
