//! Structured events emitted by an acquisition run.

use std::time::Duration;

use log::{debug, error, info, warn};

use crate::errors::{AcquisitionError, DriverError, TransportError};
use crate::sample::Record;

/// Something worth reporting during a run.
#[derive(Debug)]
pub enum Event<'a> {
    SessionOpened { address: u8 },
    MeasurementStarted,
    StartFailed { error: &'a DriverError },
    WarmingUp { duration: Duration },
    Logging,
    Sample { cycle: u64, record: &'a Record },
    ReadFailed { cycle: u64, error: &'a DriverError },
    Cancelled,
    Fatal { error: &'a AcquisitionError },
    MeasurementStopped,
    StopFailed { error: &'a DriverError },
    TransportClosed,
    /// Close failures are not acted on; reported for diagnostics only.
    CloseFailed { error: &'a TransportError },
}

/// Receives the event stream of a run.
pub trait Observer {
    fn on_event(&mut self, event: &Event<'_>);
}

impl<O: Observer + ?Sized> Observer for &mut O {
    fn on_event(&mut self, event: &Event<'_>) {
        (**self).on_event(event)
    }
}

/// Renders events through the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl Observer for LogObserver {
    fn on_event(&mut self, event: &Event<'_>) {
        match event {
            Event::SessionOpened { address } => {
                info!("Connected to SPS30 device (address {:#04X}).", address)
            }
            Event::MeasurementStarted => info!("Started measurement."),
            Event::StartFailed { error } => error!("Start measurement failed: {}", error),
            Event::WarmingUp { duration } => debug!("Warming up for {:?}", duration),
            Event::Logging => info!("Logging now! (press Ctrl+C to stop)"),
            Event::Sample { cycle, record } => {
                debug!("Cycle {}: {:?}", cycle, record.sample);
                info!(
                    "PM2.5: {:.2} µg/m³ | PM10: {:.2} µg/m³",
                    record.sample.pm2_5, record.sample.pm10
                );
            }
            Event::ReadFailed { cycle, error } => {
                warn!("Measurement read failed (cycle {}): {}", cycle, error)
            }
            Event::Cancelled => info!("Measurement stopped by user."),
            Event::Fatal { error } => error!("Fatal error: {}", error),
            Event::MeasurementStopped => info!("Stopped measurement."),
            Event::StopFailed { error } => warn!("Could not stop measurement: {}", error),
            Event::TransportClosed => info!("Closed serial port."),
            Event::CloseFailed { error } => debug!("Closing serial port failed: {}", error),
        }
    }
}
