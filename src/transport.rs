//! Request/response transport for the SPS30.
//!
//! [`Transport`] is the contract the device session is written against.
//! [`ShdlcPort`] implements it over a serial link with just enough of the
//! SHDLC framing for single-device request/response exchanges: byte
//! stuffing, checksum and state-byte checks. There is no retransmission.

use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};

use log::{debug, trace};

use crate::errors::TransportError;

// ============================================================================
// Constants
// ============================================================================

/// Default serial baud rate for the SPS30
pub const BAUD_RATE: u32 = 115200;

/// Per-read timeout on the serial port; the command deadline governs overall.
const PORT_TIMEOUT: Duration = Duration::from_millis(20);

/// Time on the wire for a full MISO frame at 115200 baud, rounded up
const TRANSFER_ALLOWANCE: Duration = Duration::from_millis(50);

const FRAME_BOUNDARY: u8 = 0x7E;
const ESCAPE: u8 = 0x7D;
const ESCAPE_XOR: u8 = 0x20;

/// Upper bounds on draining stale input before a request
const MAX_FLUSH: Duration = Duration::from_millis(200);
const MAX_FLUSH_READS: usize = 64;

/// Largest unstuffed MISO frame: address, command, state, length, 255 data, checksum
const MAX_FRAME_LEN: usize = 4 + 255 + 1;

// ============================================================================
// Transport Contract
// ============================================================================

/// One logical command exchange with a device.
pub trait Transport {
    /// Send `opcode` with `payload` to `address` and return the response data.
    fn execute(
        &mut self,
        address: u8,
        opcode: u8,
        payload: &[u8],
        max_response_time: Duration,
    ) -> Result<Vec<u8>, TransportError>;

    /// Release the underlying handle.
    fn close(self) -> Result<(), TransportError>
    where
        Self: Sized,
    {
        Ok(())
    }
}

/// Trait for Read + Write + Send, allowing different link backends.
trait Link: Read + Write + Send {}
impl<T: Read + Write + Send> Link for T {}

// ============================================================================
// SHDLC Port
// ============================================================================

/// SHDLC framing over a byte link (normally a serial port).
pub struct ShdlcPort {
    link: Box<dyn Link>,
}

impl ShdlcPort {
    /// Open the serial port at `path` (8N1).
    pub fn open(path: &str, baud_rate: u32) -> Result<Self, TransportError> {
        let port = serialport::new(path, baud_rate)
            .timeout(PORT_TIMEOUT)
            .open()?;
        debug!("Opened serial port {} at {} baud", path, baud_rate);
        Ok(Self::from_link(port))
    }

    /// Wrap an already-open link.
    pub fn from_link<L: Read + Write + Send + 'static>(link: L) -> Self {
        Self {
            link: Box::new(link),
        }
    }

    /// Discard anything left on the link, e.g. a reply that arrived after its deadline.
    fn flush_input(&mut self) -> Result<(), TransportError> {
        let mut buf = [0u8; 256];
        let start = Instant::now();
        let mut discarded = 0usize;
        for _ in 0..MAX_FLUSH_READS {
            match self.link.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => discarded += n,
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::TimedOut => break,
                Err(e) => return Err(e.into()),
            }
            if start.elapsed() > MAX_FLUSH {
                break;
            }
        }
        if discarded > 0 {
            debug!("Discarded {} stale bytes before request", discarded);
        }
        Ok(())
    }

    /// Collect the stuffed body between two frame boundaries.
    fn read_frame(
        &mut self,
        opcode: u8,
        deadline: Instant,
        waited: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        let mut raw = Vec::with_capacity(64);
        let mut started = false;

        loop {
            let mut byte = [0u8; 1];
            match self.link.read(&mut byte) {
                Ok(1) => {
                    if byte[0] == FRAME_BOUNDARY {
                        // An empty body means we saw a closing byte first or two in a row
                        if started && !raw.is_empty() {
                            return Ok(raw);
                        }
                        started = true;
                    } else if started {
                        raw.push(byte[0]);
                        if raw.len() > 2 * MAX_FRAME_LEN {
                            return Err(TransportError::Frame("response frame too long".into()));
                        }
                    }
                }
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                Err(e) if e.kind() == ErrorKind::TimedOut => {}
                Err(e) => return Err(e.into()),
            }

            if Instant::now() > deadline {
                return Err(TransportError::Timeout { opcode, waited });
            }
        }
    }
}

impl Transport for ShdlcPort {
    fn execute(
        &mut self,
        address: u8,
        opcode: u8,
        payload: &[u8],
        max_response_time: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        let frame = build_request(address, opcode, payload)?;
        self.flush_input()?;
        trace!("MOSI {:02X?}", frame);
        self.link.write_all(&frame)?;
        self.link.flush()?;

        let waited = max_response_time + TRANSFER_ALLOWANCE;
        let raw = self.read_frame(opcode, Instant::now() + waited, waited)?;
        trace!("MISO body {:02X?}", raw);
        parse_response(address, opcode, &unstuff(&raw)?)
    }

    fn close(mut self) -> Result<(), TransportError> {
        self.link.flush()?;
        Ok(())
    }
}

// ============================================================================
// Framing
// ============================================================================

fn checksum(bytes: &[u8]) -> u8 {
    !bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

fn stuff(bytes: &[u8], out: &mut Vec<u8>) {
    for &b in bytes {
        match b {
            0x7E | 0x7D | 0x11 | 0x13 => {
                out.push(ESCAPE);
                out.push(b ^ ESCAPE_XOR);
            }
            _ => out.push(b),
        }
    }
}

fn unstuff(bytes: &[u8]) -> Result<Vec<u8>, TransportError> {
    let mut out = Vec::with_capacity(bytes.len());
    let mut iter = bytes.iter();
    while let Some(&b) = iter.next() {
        if b == ESCAPE {
            let next = iter
                .next()
                .ok_or_else(|| TransportError::Frame("dangling escape byte".into()))?;
            out.push(next ^ ESCAPE_XOR);
        } else {
            out.push(b);
        }
    }
    Ok(out)
}

/// Build a stuffed MOSI frame: `7E ADR CMD L DATA.. CHK 7E`.
fn build_request(address: u8, opcode: u8, payload: &[u8]) -> Result<Vec<u8>, TransportError> {
    let len = u8::try_from(payload.len()).map_err(|_| {
        TransportError::Frame(format!("payload of {} bytes too long", payload.len()))
    })?;

    let mut body = Vec::with_capacity(payload.len() + 4);
    body.extend_from_slice(&[address, opcode, len]);
    body.extend_from_slice(payload);
    body.push(checksum(&body));

    let mut frame = Vec::with_capacity(body.len() * 2 + 2);
    frame.push(FRAME_BOUNDARY);
    stuff(&body, &mut frame);
    frame.push(FRAME_BOUNDARY);
    Ok(frame)
}

/// Validate an unstuffed MISO body `ADR CMD STATE L DATA.. CHK` and return DATA.
fn parse_response(address: u8, opcode: u8, body: &[u8]) -> Result<Vec<u8>, TransportError> {
    let Some((&chk, content)) = body.split_last() else {
        return Err(TransportError::Frame("empty response frame".into()));
    };
    if content.len() < 4 {
        return Err(TransportError::Frame(format!(
            "response frame of {} bytes is shorter than its header",
            body.len()
        )));
    }

    let expected = checksum(content);
    if chk != expected {
        return Err(TransportError::Frame(format!(
            "checksum mismatch (received {chk:#04X}, calculated {expected:#04X})"
        )));
    }

    let (adr, cmd, state, len) = (content[0], content[1], content[2], content[3]);
    if adr != address || cmd != opcode {
        return Err(TransportError::Frame(format!(
            "response for address {adr:#04X} command {cmd:#04X}, expected {address:#04X}/{opcode:#04X}"
        )));
    }
    if state != 0 {
        return Err(TransportError::Device { opcode, state });
    }

    let data = &content[4..];
    if data.len() != len as usize {
        return Err(TransportError::Frame(format!(
            "length field says {len} bytes, frame carries {}",
            data.len()
        )));
    }
    Ok(data.to_vec())
}
