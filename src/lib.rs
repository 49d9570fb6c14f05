//! Sensirion SPS30 particulate-matter logger.
//!
//! Talks to an SPS30 over its SHDLC serial protocol, starts a measurement,
//! reads the ten measured values on a fixed period and hands each reading to a
//! record sink (CSV by default) until cancelled.
//!
//! # Layers
//!
//! 1. [`command`]: opcode, payload and decode rule per command. Pure.
//! 2. [`session::Sps30`]: start / stop / read over any [`transport::Transport`].
//! 3. [`acquisition::Acquisition`]: the sampling loop with per-cycle failure
//!    containment and guaranteed teardown.
//!
//! Progress is reported as [`observer::Event`]s to an injected
//! [`observer::Observer`]; [`observer::LogObserver`] renders them via `log`.

pub mod acquisition;
pub mod command;
pub mod errors;
pub mod logging;
pub mod observer;
pub mod sample;
pub mod session;
pub mod sink;
pub mod transport;

pub use acquisition::{
    cancellation, Acquisition, AcquisitionConfig, AcquisitionState, CancelHandle, CancelToken,
    RunReport, Termination,
};
pub use command::{CommandKind, Response};
pub use errors::*;
pub use observer::{Event, LogObserver, Observer};
pub use sample::{MeasurementSample, Record};
pub use session::Sps30;
pub use sink::{CsvSink, RecordSink};
pub use transport::{ShdlcPort, Transport};
