//! SPS30 command definitions.
//!
//! Each command the logger issues is a constant entry: opcode, request
//! payload, expected response length and the maximum time the device may take
//! to answer. Encoding and decoding are pure and know nothing about framing.

use std::fmt;
use std::time::Duration;

use crate::errors::{DriverError, Result};
use crate::sample::{MeasurementSample, FIELD_COUNT};

// ============================================================================
// Constants
// ============================================================================

/// Maximum response time for every command the logger uses
const MAX_RESPONSE_TIME: Duration = Duration::from_millis(100);

const CMD_START_MEASUREMENT: u8 = 0x00;
const CMD_STOP_MEASUREMENT: u8 = 0x01;
const CMD_READ_MEASURED_VALUES: u8 = 0x03;

/// Sub-command 0x01, output format 0x03 (big-endian IEEE754 float)
const START_PAYLOAD: [u8; 2] = [0x01, 0x03];

/// Length of the Read response: ten big-endian f32 values
pub const MEASUREMENT_LEN: usize = FIELD_COUNT * 4;

// ============================================================================
// Command Table
// ============================================================================

/// Commands understood by this logger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    /// Start measurement in mass-concentration (float) output mode.
    Start,
    /// Stop measurement, returning the sensor to idle.
    Stop,
    /// Read the latest measured values.
    Read,
}

/// Immutable definition of a single command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    pub opcode: u8,
    pub payload: &'static [u8],
    /// `None` accepts a response of any length.
    pub response_len: Option<usize>,
    pub max_response_time: Duration,
}

const START: Command = Command {
    opcode: CMD_START_MEASUREMENT,
    payload: &START_PAYLOAD,
    response_len: None,
    max_response_time: MAX_RESPONSE_TIME,
};

const STOP: Command = Command {
    opcode: CMD_STOP_MEASUREMENT,
    payload: &[],
    response_len: None,
    max_response_time: MAX_RESPONSE_TIME,
};

const READ: Command = Command {
    opcode: CMD_READ_MEASURED_VALUES,
    payload: &[],
    response_len: Some(MEASUREMENT_LEN),
    max_response_time: MAX_RESPONSE_TIME,
};

impl CommandKind {
    pub fn command(self) -> &'static Command {
        match self {
            CommandKind::Start => &START,
            CommandKind::Stop => &STOP,
            CommandKind::Read => &READ,
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CommandKind::Start => "StartMeasurement",
            CommandKind::Stop => "StopMeasurement",
            CommandKind::Read => "ReadMeasuredValues",
        };
        write!(f, "{name} ({:#04X})", self.command().opcode)
    }
}

/// Decoded result of a command.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// Command acknowledged, no payload decoded.
    Ack,
    Measurement(MeasurementSample),
}

// ============================================================================
// Codec
// ============================================================================

/// Opcode and request payload for a command.
pub fn encode(kind: CommandKind) -> (u8, &'static [u8]) {
    let cmd = kind.command();
    (cmd.opcode, cmd.payload)
}

/// Interpret raw response bytes for `kind`.
///
/// The length is checked against the command's `response_len`: Start and
/// Stop accept any response, Read requires exactly [`MEASUREMENT_LEN`]
/// bytes. A mismatch is a [`DriverError::MalformedResponse`], never a
/// partial sample.
pub fn decode(kind: CommandKind, data: &[u8]) -> Result<Response> {
    check_len(kind, data)?;
    match kind {
        CommandKind::Start | CommandKind::Stop => Ok(Response::Ack),
        CommandKind::Read => Ok(Response::Measurement(parse_measurement(data))),
    }
}

/// Decode a Read response into a sample.
pub fn decode_measurement(data: &[u8]) -> Result<MeasurementSample> {
    check_len(CommandKind::Read, data)?;
    Ok(parse_measurement(data))
}

fn check_len(kind: CommandKind, data: &[u8]) -> Result<()> {
    match kind.command().response_len {
        Some(expected) if data.len() != expected => Err(DriverError::MalformedResponse {
            command: kind,
            expected,
            actual: data.len(),
        }),
        _ => Ok(()),
    }
}

/// `data` must already be [`MEASUREMENT_LEN`] bytes.
fn parse_measurement(data: &[u8]) -> MeasurementSample {
    let mut values = [0f32; FIELD_COUNT];
    for (value, chunk) in values.iter_mut().zip(data.chunks_exact(4)) {
        *value = f32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    MeasurementSample::from_array(values)
}
