use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::command::CommandKind;

/// A request/response exchange that did not complete.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("serial error: {0}")]
    Serial(#[from] serialport::Error),
    #[error("no response to command {opcode:#04X} within {waited:?}")]
    Timeout { opcode: u8, waited: Duration },
    #[error("malformed frame: {0}")]
    Frame(String),
    #[error("device rejected command {opcode:#04X} with state {state:#04X}")]
    Device { opcode: u8, state: u8 },
}

/// Failure of a single device operation.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("{command} command failed: {source}")]
    Transport {
        command: CommandKind,
        #[source]
        source: TransportError,
    },
    #[error("{command} response malformed: expected {expected} bytes, received {actual}")]
    MalformedResponse {
        command: CommandKind,
        expected: usize,
        actual: usize,
    },
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

/// Errors that end an acquisition run early.
#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error("could not start measurement: {0}")]
    Start(#[source] DriverError),
    #[error("record sink failed: {0}")]
    Sink(#[from] SinkError),
}

pub type Result<T> = std::result::Result<T, DriverError>;
