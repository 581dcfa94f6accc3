//! Motion-driven key toggle
//!
//! Converts relative motion samples into a held action that is released once
//! the motion has been quiet for a configured interval.

pub mod action;
pub mod config;
pub mod controller;
pub mod pipeline;
pub mod timer;
