use std::path::PathBuf;
use std::process::exit;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use sps30_logger::session::DEFAULT_ADDRESS;
use sps30_logger::transport::BAUD_RATE;
use sps30_logger::{
    cancellation, logging, Acquisition, AcquisitionConfig, CsvSink, LogObserver, ShdlcPort, Sps30,
};

#[derive(Parser, Debug)]
#[command(
    name = "sps30-logger",
    about = "Log SPS30 particulate-matter readings to CSV (Ctrl+C to stop)"
)]
struct Args {
    /// Serial port the sensor is attached to (check with `ls -l /dev/serial*`)
    #[arg(long, default_value = "/dev/ttyAMA0")]
    port: String,
    #[arg(long, default_value_t = BAUD_RATE)]
    baud: u32,
    /// SHDLC slave address
    #[arg(long, default_value_t = DEFAULT_ADDRESS)]
    address: u8,
    /// Warm-up after starting measurement, in seconds
    #[arg(long, value_parser = parse_secs, default_value = "2")]
    warm_up: Duration,
    /// Delay between readings, in seconds
    #[arg(long, value_parser = parse_secs, default_value = "60")]
    period: Duration,
    /// Stop after this many readings instead of running until interrupted
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    cycles: Option<u64>,
    /// CSV file receiving one row per reading
    #[arg(long, default_value = "sps30_log.csv")]
    output: PathBuf,
    /// File mirroring the log output
    #[arg(long, default_value = "sps30_debug.log")]
    log_file: PathBuf,
    /// Log to stderr only
    #[arg(long)]
    no_log_file: bool,
}

fn parse_secs(s: &str) -> std::result::Result<Duration, String> {
    let secs: f64 = s.parse().map_err(|e| format!("invalid seconds '{s}': {e}"))?;
    Duration::try_from_secs_f64(secs).map_err(|e| format!("invalid seconds '{s}': {e}"))
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {e:#}");
        exit(1);
    }
}

fn run() -> Result<()> {
    let args = Args::parse();

    let log_file = (!args.no_log_file).then_some(args.log_file.as_path());
    logging::init_logging(log_file).context("Failed to open log file")?;

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("tokio runtime init failed")?;
    rt.block_on(acquire(args))
}

async fn acquire(args: Args) -> Result<()> {
    let port = ShdlcPort::open(&args.port, args.baud)
        .with_context(|| format!("Failed to open serial port at {}", args.port))?;
    let device = Sps30::new(port, args.address);

    let (handle, token) = cancellation();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            handle.cancel();
        }
    });
    // Let the signal listener register before the first blocking exchange
    tokio::task::yield_now().await;

    let config = AcquisitionConfig {
        warm_up: args.warm_up,
        period: args.period,
        max_cycles: args.cycles,
    };
    let output = args.output;
    let report = Acquisition::new(config, LogObserver)
        .run(device, || CsvSink::create(&output), token)
        .await;

    info!(
        "{} cycles, {} records, {} failed reads",
        report.cycles, report.records, report.failed_reads
    );
    report.outcome.context("Acquisition failed")?;
    Ok(())
}
