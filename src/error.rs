use std::io;

use thiserror::Error;

use crate::config::Direction;

pub type Result<T> = std::result::Result<T, PinError>;

#[derive(Debug, Error)]
pub enum PinError {
    #[error("failed to export pin {pin}: {source}")]
    Export {
        pin: u32,
        #[source]
        source: io::Error,
    },
    #[error("failed to unexport pin {pin}: {source}")]
    Unexport {
        pin: u32,
        #[source]
        source: io::Error,
    },
    #[error("failed to set pin {pin} direction to {direction}: {source}")]
    Direction {
        pin: u32,
        direction: Direction,
        #[source]
        source: io::Error,
    },
    #[error("pin {0} is not an output pin")]
    NotOutput(u32),
    #[error("pin {0} is not an input pin")]
    NotInput(u32),
    #[error("pin {0} is not exported")]
    NotExported(u32),
    #[error("pin {0} already has an edge notifier armed")]
    AlreadyArmed(u32),
    #[error("pin {0} does not have an edge notifier armed")]
    NotArmed(u32),
    #[error("invalid edge mode {0:?}, expected one of rising, falling, both")]
    InvalidEdgeMode(String),
    #[error("invalid level {0}, must be 0 or 1")]
    InvalidLevel(u8),
    #[error("{op} failed on pin {pin}: {source}")]
    Io {
        pin: u32,
        op: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("pin {pin} value {value:?} is not a logic level")]
    Parse { pin: u32, value: String },
    #[error("poll failed on pin {pin}: {source}")]
    Poll {
        pin: u32,
        #[source]
        source: io::Error,
    },
    #[error("failed to spawn task for pin {pin}: {source}")]
    Spawn {
        pin: u32,
        #[source]
        source: io::Error,
    },
    #[error("configuration error: {0}")]
    Config(String),
}

impl PinError {
    pub(crate) fn io(pin: u32, op: &'static str) -> impl FnOnce(io::Error) -> Self {
        move |source| PinError::Io { pin, op, source }
    }
}
