//! Toggle controller subsystem
//!
//! 1. [`toggle_controller`] - press/release state machine with debounced release
//! 2. [`controller_handle`] - per-instance tokio worker and pipeline stage
//!
//! ```text
//! InputEvent ──► ToggleHandle ──► ToggleWorker ──► ToggleController ──► ActionSink
//!                                     ▲                   │
//!                                     └──── TokioTimer ◄──┘
//! ```

pub mod controller_handle;
pub mod toggle_controller;

pub use controller_handle::{spawn_instances, ToggleError, ToggleHandle, MOTION_CHANNEL_CAPACITY};
pub use toggle_controller::{ToggleController, ToggleMode, ToggleSettings, ToggleState};
