//! SPS30 device session: the three operations the logger needs.

use log::debug;

use crate::command::{self, CommandKind};
use crate::errors::{DriverError, Result, TransportError};
use crate::sample::MeasurementSample;
use crate::transport::Transport;

/// Default SHDLC slave address of the SPS30
pub const DEFAULT_ADDRESS: u8 = 0x00;

/// A connected SPS30.
///
/// Holds nothing but the transport and the device address; every operation
/// is exactly one request/response exchange with no retries. Acquisition
/// state is tracked by the caller.
///
/// # Example (Rust)
/// ```ignore
/// let port = ShdlcPort::open("/dev/ttyAMA0", BAUD_RATE)?;
/// let mut device = Sps30::new(port, DEFAULT_ADDRESS);
///
/// device.start()?;
/// let sample = device.read()?;
/// println!("PM2.5: {:.2}", sample.pm2_5);
/// device.stop()?;
/// device.close()?;
/// ```
pub struct Sps30<T: Transport> {
    transport: T,
    address: u8,
}

impl<T: Transport> Sps30<T> {
    pub fn new(transport: T, address: u8) -> Self {
        Self { transport, address }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    /// Start measurement in float output mode.
    pub fn start(&mut self) -> Result<()> {
        debug!("Sending StartMeasurement command...");
        let data = self.exchange(CommandKind::Start)?;
        command::decode(CommandKind::Start, &data).map(|_| ())
    }

    /// Stop measurement. Valid even when no measurement was started.
    pub fn stop(&mut self) -> Result<()> {
        debug!("Sending StopMeasurement command...");
        let data = self.exchange(CommandKind::Stop)?;
        command::decode(CommandKind::Stop, &data).map(|_| ())
    }

    /// Read the latest measured values.
    pub fn read(&mut self) -> Result<MeasurementSample> {
        let data = self.exchange(CommandKind::Read)?;
        command::decode_measurement(&data)
    }

    /// Release the transport. Consumes the session.
    pub fn close(self) -> std::result::Result<(), TransportError> {
        self.transport.close()
    }

    /// One exchange over the transport, tagging failures with the command.
    fn exchange(&mut self, kind: CommandKind) -> Result<Vec<u8>> {
        let (opcode, payload) = command::encode(kind);
        let max_response_time = kind.command().max_response_time;
        self.transport
            .execute(self.address, opcode, payload, max_response_time)
            .map_err(|source| DriverError::Transport {
                command: kind,
                source,
            })
    }
}
