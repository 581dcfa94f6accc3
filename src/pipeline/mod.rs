//! Host input pipeline boundary
//!
//! Raw input arrives as `(type, code, value)` triples using the evdev numbering
//! (`EV_SYN = 0`, `EV_KEY = 1`, `EV_REL = 2`, `EV_ABS = 3`). Each stage of an
//! [`InputPipeline`] sees the event in turn and decides whether later stages
//! still get it.
//!
//! ```text
//! InputEvent ──► stage 0 ──Continue──► stage 1 ──Continue──► ... ──► host
//!                   │
//!                  Stop (event consumed)
//! ```

pub mod script;

use std::fmt;
use std::str::FromStr;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    Syn,
    Key,
    Rel,
    Abs,
    Other(u16),
}

impl From<u16> for EventType {
    fn from(raw: u16) -> Self {
        match raw {
            0 => EventType::Syn,
            1 => EventType::Key,
            2 => EventType::Rel,
            3 => EventType::Abs,
            other => EventType::Other(other),
        }
    }
}

impl From<EventType> for u16 {
    fn from(event_type: EventType) -> Self {
        match event_type {
            EventType::Syn => 0,
            EventType::Key => 1,
            EventType::Rel => 2,
            EventType::Abs => 3,
            EventType::Other(raw) => raw,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventType::Syn => write!(f, "syn"),
            EventType::Key => write!(f, "key"),
            EventType::Rel => write!(f, "rel"),
            EventType::Abs => write!(f, "abs"),
            EventType::Other(raw) => write!(f, "{}", raw),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputEvent {
    pub event_type: EventType,
    pub code: u16,
    pub value: i32,
}

impl InputEvent {
    pub fn new(event_type: EventType, code: u16, value: i32) -> Self {
        Self {
            event_type,
            code,
            value,
        }
    }

    pub fn rel(code: u16, value: i32) -> Self {
        Self::new(EventType::Rel, code, value)
    }
}

impl fmt::Display for InputEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.event_type, self.code, self.value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseEventError {
    #[error("Expected '<type> <code> <value>', got '{0}'")]
    Malformed(String),

    #[error("Unknown event type '{0}'")]
    UnknownType(String),

    #[error("Invalid number '{0}'")]
    InvalidNumber(String),
}

impl FromStr for EventType {
    type Err = ParseEventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "syn" => Ok(EventType::Syn),
            "key" => Ok(EventType::Key),
            "rel" => Ok(EventType::Rel),
            "abs" => Ok(EventType::Abs),
            other => other
                .parse::<u16>()
                .map(EventType::from)
                .map_err(|_| ParseEventError::UnknownType(s.to_string())),
        }
    }
}

/// Parses the text form `"<type> <code> <value>"`, e.g. `rel 0 5` or `2 0 5`
impl FromStr for InputEvent {
    type Err = ParseEventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split_whitespace().collect();
        let [event_type, code, value] = parts.as_slice() else {
            return Err(ParseEventError::Malformed(s.trim().to_string()));
        };

        let code = code
            .parse::<u16>()
            .map_err(|_| ParseEventError::InvalidNumber(code.to_string()))?;
        let value = value
            .parse::<i32>()
            .map_err(|_| ParseEventError::InvalidNumber(value.to_string()))?;

        Ok(Self::new(event_type.parse()?, code, value))
    }
}

/// Result of a pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorFlow {
    /// Pass the event on to the next stage
    Continue,
    /// The event was consumed
    Stop,
}

pub trait InputProcessor: Send {
    fn name(&self) -> &str;

    fn handle_event(&mut self, event: &InputEvent) -> ProcessorFlow;
}

#[derive(Default)]
pub struct InputPipeline {
    stages: Vec<Box<dyn InputProcessor>>,
}

impl InputPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_stage(&mut self, stage: Box<dyn InputProcessor>) {
        debug!("Adding pipeline stage '{}'", stage.name());
        self.stages.push(stage);
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Runs `event` through the stages until one of them stops it
    pub fn process(&mut self, event: &InputEvent) -> ProcessorFlow {
        for stage in self.stages.iter_mut() {
            if stage.handle_event(event) == ProcessorFlow::Stop {
                debug!("Event {} consumed by '{}'", event, stage.name());
                return ProcessorFlow::Stop;
            }
        }
        ProcessorFlow::Continue
    }
}
