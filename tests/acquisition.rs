use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::io;
use std::rc::Rc;
use std::time::Duration;

use sps30_logger::{
    cancellation, Acquisition, AcquisitionConfig, AcquisitionError, AcquisitionState,
    CommandKind, DriverError, Event, MeasurementSample, Observer, Record, RecordSink, RunReport,
    SinkError, Sps30, Termination, Transport, TransportError,
};
use tokio::time::Instant;

// ============================================================================
// Fakes
// ============================================================================

#[derive(Default)]
struct Calls {
    starts: usize,
    stops: usize,
    reads: usize,
    closes: usize,
    /// Command names in the order they reached the transport.
    order: Vec<&'static str>,
    read_times: Vec<Instant>,
}

enum Reply {
    Sample(MeasurementSample),
    Fail,
    Short,
}

#[derive(Default)]
struct ScriptedTransport {
    calls: Rc<RefCell<Calls>>,
    start_fails: bool,
    stop_fails: bool,
    close_fails: bool,
    reads: VecDeque<Reply>,
}

impl Transport for ScriptedTransport {
    fn execute(
        &mut self,
        _address: u8,
        opcode: u8,
        payload: &[u8],
        max_response_time: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        let timeout = TransportError::Timeout {
            opcode,
            waited: max_response_time,
        };
        let mut calls = self.calls.borrow_mut();
        match opcode {
            0x00 => {
                assert_eq!(payload, &[0x01, 0x03]);
                calls.starts += 1;
                calls.order.push("start");
                if self.start_fails {
                    return Err(timeout);
                }
                Ok(Vec::new())
            }
            0x01 => {
                assert!(payload.is_empty());
                calls.stops += 1;
                calls.order.push("stop");
                if self.stop_fails {
                    return Err(timeout);
                }
                Ok(Vec::new())
            }
            0x03 => {
                calls.reads += 1;
                calls.order.push("read");
                calls.read_times.push(Instant::now());
                match self.reads.pop_front() {
                    Some(Reply::Sample(s)) => Ok(s.to_be_bytes().to_vec()),
                    Some(Reply::Fail) => Err(timeout),
                    Some(Reply::Short) => Ok(vec![0u8; 39]),
                    None => Ok(sample(0.0).to_be_bytes().to_vec()),
                }
            }
            other => panic!("unexpected opcode {other:#04X}"),
        }
    }

    fn close(self) -> Result<(), TransportError> {
        let mut calls = self.calls.borrow_mut();
        calls.closes += 1;
        calls.order.push("close");
        if self.close_fails {
            return Err(io::Error::other("port vanished").into());
        }
        Ok(())
    }
}

#[derive(Default, Clone)]
struct MemorySink {
    records: Rc<RefCell<Vec<Record>>>,
    /// Zero-based append index that fails.
    fail_at: Option<usize>,
}

impl RecordSink for MemorySink {
    fn append(&mut self, record: &Record) -> Result<(), SinkError> {
        let mut records = self.records.borrow_mut();
        if self.fail_at == Some(records.len()) {
            return Err(io::Error::other("disk full").into());
        }
        records.push(record.clone());
        Ok(())
    }
}

#[derive(Default)]
struct RecordingObserver {
    events: Vec<&'static str>,
    read_errors: Vec<String>,
}

impl Observer for RecordingObserver {
    fn on_event(&mut self, event: &Event<'_>) {
        let name = match event {
            Event::SessionOpened { .. } => "SessionOpened",
            Event::MeasurementStarted => "MeasurementStarted",
            Event::StartFailed { .. } => "StartFailed",
            Event::WarmingUp { .. } => "WarmingUp",
            Event::Logging => "Logging",
            Event::Sample { .. } => "Sample",
            Event::ReadFailed { error, .. } => {
                self.read_errors.push(error.to_string());
                "ReadFailed"
            }
            Event::Cancelled => "Cancelled",
            Event::Fatal { .. } => "Fatal",
            Event::MeasurementStopped => "MeasurementStopped",
            Event::StopFailed { .. } => "StopFailed",
            Event::TransportClosed => "TransportClosed",
            Event::CloseFailed { .. } => "CloseFailed",
        };
        self.events.push(name);
    }
}

impl RecordingObserver {
    fn count(&self, name: &str) -> usize {
        self.events.iter().filter(|e| **e == name).count()
    }
}

fn sample(n: f32) -> MeasurementSample {
    MeasurementSample {
        pm1_0: n,
        pm2_5: n + 0.25,
        pm10: n + 0.5,
        ..Default::default()
    }
}

fn config(max_cycles: Option<u64>) -> AcquisitionConfig {
    AcquisitionConfig {
        warm_up: Duration::from_secs(2),
        period: Duration::from_secs(60),
        max_cycles,
    }
}

struct Run {
    report: RunReport,
    calls: Rc<RefCell<Calls>>,
    records: Vec<Record>,
    sink_opened: bool,
    observer: RecordingObserver,
}

async fn run_with(
    transport: ScriptedTransport,
    sink: MemorySink,
    config: AcquisitionConfig,
) -> Run {
    let (_handle, token) = cancellation();
    run_cancellable(transport, sink, config, token).await
}

async fn run_cancellable(
    transport: ScriptedTransport,
    sink: MemorySink,
    config: AcquisitionConfig,
    token: sps30_logger::CancelToken,
) -> Run {
    let calls = transport.calls.clone();
    let records = sink.records.clone();
    let opened = Rc::new(Cell::new(false));
    let mut observer = RecordingObserver::default();

    let report = {
        let opened = opened.clone();
        Acquisition::new(config, &mut observer)
            .run(
                Sps30::new(transport, 0x00),
                move || {
                    opened.set(true);
                    Ok(sink)
                },
                token,
            )
            .await
    };

    let records = records.borrow().clone();
    Run {
        report,
        calls,
        records,
        sink_opened: opened.get(),
        observer,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test(start_paused = true)]
async fn failed_reads_are_skipped_and_run_continues() {
    let transport = ScriptedTransport {
        reads: VecDeque::from([
            Reply::Sample(sample(1.0)),
            Reply::Fail,
            Reply::Sample(sample(3.0)),
            Reply::Sample(sample(4.0)),
            Reply::Fail,
            Reply::Sample(sample(6.0)),
        ]),
        ..Default::default()
    };

    let run = run_with(transport, MemorySink::default(), config(Some(6))).await;

    assert!(matches!(run.report.outcome, Ok(Termination::CycleLimit)));
    assert_eq!(run.report.cycles, 6);
    assert_eq!(run.report.records, 4);
    assert_eq!(run.report.failed_reads, 2);
    assert_eq!(run.report.state, AcquisitionState::Stopped);

    let pm1: Vec<f32> = run.records.iter().map(|r| r.sample.pm1_0).collect();
    assert_eq!(pm1, vec![1.0, 3.0, 4.0, 6.0]);

    let calls = run.calls.borrow();
    assert_eq!(calls.reads, 6);
    assert_eq!(calls.stops, 1);
    assert_eq!(calls.closes, 1);
    assert_eq!(run.observer.count("ReadFailed"), 2);
    assert_eq!(run.observer.count("Sample"), 4);
}

#[tokio::test(start_paused = true)]
async fn malformed_response_only_skips_the_cycle() {
    let transport = ScriptedTransport {
        reads: VecDeque::from([
            Reply::Sample(sample(1.0)),
            Reply::Short,
            Reply::Sample(sample(2.0)),
        ]),
        ..Default::default()
    };

    let run = run_with(transport, MemorySink::default(), config(Some(3))).await;

    assert!(run.report.outcome.is_ok());
    assert_eq!(run.records.len(), 2);
    assert_eq!(run.report.failed_reads, 1);
    assert_eq!(run.observer.read_errors.len(), 1);
    assert!(run.observer.read_errors[0].contains("expected 40 bytes, received 39"));
}

#[tokio::test(start_paused = true)]
async fn start_failure_still_tears_down_once() {
    let transport = ScriptedTransport {
        start_fails: true,
        ..Default::default()
    };

    let run = run_with(transport, MemorySink::default(), config(None)).await;

    match run.report.outcome {
        Err(AcquisitionError::Start(DriverError::Transport { command, .. })) => {
            assert_eq!(command, CommandKind::Start)
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(!run.sink_opened);
    assert!(run.records.is_empty());
    assert_eq!(run.report.state, AcquisitionState::Stopped);

    let calls = run.calls.borrow();
    assert_eq!(calls.order, vec!["start", "stop", "close"]);
    assert_eq!(
        run.observer.events,
        vec!["SessionOpened", "StartFailed", "MeasurementStopped", "TransportClosed"]
    );
}

#[tokio::test(start_paused = true)]
async fn sink_append_failure_is_fatal() {
    let sink = MemorySink {
        fail_at: Some(1),
        ..Default::default()
    };

    let run = run_with(ScriptedTransport::default(), sink, config(None)).await;

    assert!(matches!(run.report.outcome, Err(AcquisitionError::Sink(_))));
    assert_eq!(run.records.len(), 1);
    assert_eq!(run.report.records, 1);

    let calls = run.calls.borrow();
    assert_eq!(calls.reads, 2);
    assert_eq!(calls.stops, 1);
    assert_eq!(calls.closes, 1);
    assert_eq!(run.observer.count("Fatal"), 1);
}

#[tokio::test(start_paused = true)]
async fn sink_open_failure_is_fatal() {
    let transport = ScriptedTransport::default();
    let calls = transport.calls.clone();
    let (_handle, token) = cancellation();

    let report = Acquisition::new(config(None), RecordingObserver::default())
        .run(
            Sps30::new(transport, 0x00),
            || -> Result<MemorySink, SinkError> {
                Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only").into())
            },
            token,
        )
        .await;

    assert!(matches!(report.outcome, Err(AcquisitionError::Sink(SinkError::Io(_)))));
    let calls = calls.borrow();
    assert_eq!(calls.order, vec!["start", "stop", "close"]);
}

#[tokio::test(start_paused = true)]
async fn cancellation_interrupts_the_wait() {
    let (handle, token) = cancellation();
    let begin = Instant::now();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(90)).await;
        handle.cancel();
    });

    let run = run_cancellable(
        ScriptedTransport::default(),
        MemorySink::default(),
        config(None),
        token,
    )
    .await;

    assert!(matches!(run.report.outcome, Ok(Termination::Cancelled)));
    // reads at t=2s and t=62s; the wait towards t=122s is cut short
    assert!(begin.elapsed() < Duration::from_secs(122));
    assert_eq!(run.records.len(), 2);

    let calls = run.calls.borrow();
    assert_eq!(calls.reads, 2);
    assert_eq!(calls.stops, 1);
    assert_eq!(calls.closes, 1);
    assert_eq!(run.observer.count("Cancelled"), 1);
}

#[tokio::test(start_paused = true)]
async fn cancelled_during_warm_up_never_reads() {
    let (handle, token) = cancellation();
    handle.cancel();

    let run = run_cancellable(
        ScriptedTransport::default(),
        MemorySink::default(),
        config(None),
        token,
    )
    .await;

    assert!(matches!(run.report.outcome, Ok(Termination::Cancelled)));
    assert!(!run.sink_opened);
    let calls = run.calls.borrow();
    assert_eq!(calls.order, vec!["start", "stop", "close"]);
}

#[tokio::test(start_paused = true)]
async fn teardown_failures_do_not_change_the_outcome() {
    let transport = ScriptedTransport {
        stop_fails: true,
        close_fails: true,
        ..Default::default()
    };

    let run = run_with(transport, MemorySink::default(), config(Some(2))).await;

    assert!(matches!(run.report.outcome, Ok(Termination::CycleLimit)));
    assert_eq!(run.records.len(), 2);
    assert_eq!(run.observer.count("StopFailed"), 1);
    assert_eq!(run.observer.count("CloseFailed"), 1);
    let calls = run.calls.borrow();
    assert_eq!(calls.stops, 1);
    assert_eq!(calls.closes, 1);
}

#[tokio::test(start_paused = true)]
async fn reads_follow_warm_up_and_fixed_period() {
    let begin = Instant::now();
    let run = run_with(ScriptedTransport::default(), MemorySink::default(), config(Some(3))).await;

    let calls = run.calls.borrow();
    let offsets: Vec<Duration> = calls.read_times.iter().map(|t| *t - begin).collect();
    assert_eq!(
        offsets,
        vec![
            Duration::from_secs(2),
            Duration::from_secs(62),
            Duration::from_secs(122)
        ]
    );
    // no trailing wait after the last cycle
    assert_eq!(begin.elapsed(), Duration::from_secs(122));
    assert_eq!(calls.order.last(), Some(&"close"));
}
