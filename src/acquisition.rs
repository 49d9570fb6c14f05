//! Continuous acquisition: start, read on a fixed period, stop.
//!
//! # Failure containment
//!
//! A failed read (transport error or malformed response) is reported and the
//! cycle skipped; the next scheduled cycle is the retry. Only a failed start
//! or a failing record sink ends the run early.
//!
//! # Teardown
//!
//! Every run ends with exactly one stop attempt followed by releasing the
//! transport, whichever way it ended. The session is moved into teardown, so
//! it cannot be used afterwards. Failures during teardown are reported but
//! never replace the outcome of the run.

use std::time::Duration;

use chrono::Local;
use log::debug;
use tokio::sync::watch;

use crate::errors::{AcquisitionError, SinkError};
use crate::observer::{Event, Observer};
use crate::sample::Record;
use crate::session::Sps30;
use crate::sink::RecordSink;
use crate::transport::Transport;

// ============================================================================
// Constants
// ============================================================================

/// Time the sensor needs after start before readings are valid
pub const DEFAULT_WARM_UP: Duration = Duration::from_secs(2);

/// Delay between the end of one cycle and the start of the next
pub const DEFAULT_PERIOD: Duration = Duration::from_secs(60);

// ============================================================================
// Configuration and Results
// ============================================================================

/// Timing of a run. Fixed for its whole duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquisitionConfig {
    pub warm_up: Duration,
    /// Fixed delay after each cycle; read time is not compensated.
    pub period: Duration,
    /// Stop after this many cycles instead of waiting for cancellation.
    pub max_cycles: Option<u64>,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            warm_up: DEFAULT_WARM_UP,
            period: DEFAULT_PERIOD,
            max_cycles: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionState {
    Idle,
    Measuring,
    Stopped,
}

/// Why a run without a fatal error ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Cancelled,
    CycleLimit,
}

/// What happened during a run.
#[derive(Debug)]
pub struct RunReport {
    /// Always [`AcquisitionState::Stopped`] once `run` returns.
    pub state: AcquisitionState,
    /// Scheduled cycles executed, successful or not.
    pub cycles: u64,
    pub records: u64,
    pub failed_reads: u64,
    pub outcome: Result<Termination, AcquisitionError>,
}

// ============================================================================
// Cancellation
// ============================================================================

/// Requests cancellation of a run.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

/// Observed by a run at each wait.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    /// Resolves once cancellation is requested. Never resolves if the
    /// handle was dropped without cancelling.
    pub async fn cancelled(&mut self) {
        while !*self.rx.borrow_and_update() {
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Create a connected cancellation handle/token pair.
pub fn cancellation() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelToken { rx })
}

// ============================================================================
// Acquisition Loop
// ============================================================================

/// Drives a single acquisition run.
///
/// # Example (Rust)
/// ```ignore
/// let device = Sps30::new(ShdlcPort::open("/dev/ttyAMA0", BAUD_RATE)?, DEFAULT_ADDRESS);
/// let (handle, token) = cancellation();
/// let report = Acquisition::new(AcquisitionConfig::default(), LogObserver)
///     .run(device, || CsvSink::create("sps30_log.csv"), token)
///     .await;
/// println!("{} records", report.records);
/// ```
pub struct Acquisition<O: Observer> {
    config: AcquisitionConfig,
    observer: O,
    state: AcquisitionState,
    cycles: u64,
    records: u64,
    failed_reads: u64,
}

impl<O: Observer> Acquisition<O> {
    pub fn new(config: AcquisitionConfig, observer: O) -> Self {
        Self {
            config,
            observer,
            state: AcquisitionState::Idle,
            cycles: 0,
            records: 0,
            failed_reads: 0,
        }
    }

    /// Run until cancelled, the cycle limit is reached, or a fatal error.
    ///
    /// `open_sink` is called once, after warm-up, before the first read.
    pub async fn run<T, S, F>(
        mut self,
        mut device: Sps30<T>,
        open_sink: F,
        mut cancel: CancelToken,
    ) -> RunReport
    where
        T: Transport,
        S: RecordSink,
        F: FnOnce() -> Result<S, SinkError>,
    {
        self.emit(Event::SessionOpened {
            address: device.address(),
        });

        let outcome = self.measure(&mut device, open_sink, &mut cancel).await;
        match &outcome {
            Ok(Termination::Cancelled) => self.emit(Event::Cancelled),
            Ok(Termination::CycleLimit) => {
                debug!("Cycle limit reached after {} cycles", self.cycles)
            }
            // Already reported as StartFailed
            Err(AcquisitionError::Start(_)) => {}
            Err(error) => self.emit(Event::Fatal { error }),
        }

        self.teardown(device);

        RunReport {
            state: self.state,
            cycles: self.cycles,
            records: self.records,
            failed_reads: self.failed_reads,
            outcome,
        }
    }

    async fn measure<T, S, F>(
        &mut self,
        device: &mut Sps30<T>,
        open_sink: F,
        cancel: &mut CancelToken,
    ) -> Result<Termination, AcquisitionError>
    where
        T: Transport,
        S: RecordSink,
        F: FnOnce() -> Result<S, SinkError>,
    {
        if let Err(error) = device.start() {
            self.emit(Event::StartFailed { error: &error });
            return Err(AcquisitionError::Start(error));
        }
        self.transition(AcquisitionState::Measuring);
        self.emit(Event::MeasurementStarted);

        self.emit(Event::WarmingUp {
            duration: self.config.warm_up,
        });
        if wait(self.config.warm_up, cancel).await {
            return Ok(Termination::Cancelled);
        }

        let mut sink = open_sink()?;
        self.emit(Event::Logging);

        let result = self.sample(device, &mut sink, cancel).await;
        let flushed = sink.flush();
        let termination = result?;
        flushed?;
        Ok(termination)
    }

    async fn sample<T, S>(
        &mut self,
        device: &mut Sps30<T>,
        sink: &mut S,
        cancel: &mut CancelToken,
    ) -> Result<Termination, SinkError>
    where
        T: Transport,
        S: RecordSink,
    {
        loop {
            if self.limit_reached() {
                return Ok(Termination::CycleLimit);
            }
            self.cycles += 1;
            let cycle = self.cycles;

            match device.read() {
                Ok(sample) => {
                    let record = Record::new(Local::now(), sample);
                    sink.append(&record)?;
                    self.records += 1;
                    self.emit(Event::Sample {
                        cycle,
                        record: &record,
                    });
                }
                Err(error) => {
                    self.failed_reads += 1;
                    self.emit(Event::ReadFailed {
                        cycle,
                        error: &error,
                    });
                }
            }

            // No trailing wait once the last cycle is done
            if self.limit_reached() {
                return Ok(Termination::CycleLimit);
            }
            if wait(self.config.period, cancel).await {
                return Ok(Termination::Cancelled);
            }
        }
    }

    fn teardown<T: Transport>(&mut self, mut device: Sps30<T>) {
        match device.stop() {
            Ok(()) => self.emit(Event::MeasurementStopped),
            Err(error) => self.emit(Event::StopFailed { error: &error }),
        }
        match device.close() {
            Ok(()) => self.emit(Event::TransportClosed),
            Err(error) => self.emit(Event::CloseFailed { error: &error }),
        }
        self.transition(AcquisitionState::Stopped);
    }

    fn limit_reached(&self) -> bool {
        self.config.max_cycles.is_some_and(|max| self.cycles >= max)
    }

    fn transition(&mut self, to: AcquisitionState) {
        debug!("Acquisition state {:?} -> {:?}", self.state, to);
        self.state = to;
    }

    fn emit(&mut self, event: Event<'_>) {
        self.observer.on_event(&event);
    }
}

/// Sleep for `duration`; returns `true` if cancelled first.
async fn wait(duration: Duration, cancel: &mut CancelToken) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(duration) => false,
    }
}
