//! Record sinks.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use log::info;
use serde::Serialize;

use crate::errors::SinkError;
use crate::sample::{Record, FIELD_NAMES};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Durable destination for acquired records.
pub trait RecordSink {
    fn append(&mut self, record: &Record) -> Result<(), SinkError>;

    fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

#[derive(Serialize)]
struct CsvRow {
    timestamp: String,
    pm1_0: f32,
    pm2_5: f32,
    pm4_0: f32,
    pm10: f32,
    nc0_5: f32,
    nc1_0: f32,
    nc2_5: f32,
    nc4_0: f32,
    nc10: f32,
    typical_particle_size: f32,
}

impl From<&Record> for CsvRow {
    fn from(record: &Record) -> Self {
        let s = &record.sample;
        Self {
            timestamp: record.timestamp.format(TIMESTAMP_FORMAT).to_string(),
            pm1_0: s.pm1_0,
            pm2_5: s.pm2_5,
            pm4_0: s.pm4_0,
            pm10: s.pm10,
            nc0_5: s.nc0_5,
            nc1_0: s.nc1_0,
            nc2_5: s.nc2_5,
            nc4_0: s.nc4_0,
            nc10: s.nc10,
            typical_particle_size: s.typical_particle_size,
        }
    }
}

/// Tabular sink: a header row at creation, then one row per record.
///
/// Rows are flushed as they are written so a killed process loses nothing
/// already acquired.
pub struct CsvSink<W: Write> {
    writer: csv::Writer<W>,
}

impl CsvSink<File> {
    /// Create (truncate) the CSV file at `path` and write the header row.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path: PathBuf = path.as_ref().into();
        let file = File::create(&path)?;
        let sink = Self::from_writer(file)?;
        info!("CSV records will be written to '{}'", path.display());
        Ok(sink)
    }
}

impl<W: Write> CsvSink<W> {
    pub fn from_writer(inner: W) -> Result<Self, SinkError> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(inner);
        writer.write_record(header())?;
        writer.flush()?;
        Ok(Self { writer })
    }

    /// Flush and return the underlying writer.
    pub fn into_inner(self) -> Result<W, SinkError> {
        self.writer
            .into_inner()
            .map_err(|e| SinkError::Io(e.into_error()))
    }
}

impl<W: Write> RecordSink for CsvSink<W> {
    fn append(&mut self, record: &Record) -> Result<(), SinkError> {
        self.writer.serialize(CsvRow::from(record))?;
        self.writer.flush()?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        self.writer.flush()?;
        Ok(())
    }
}

fn header() -> impl Iterator<Item = &'static str> {
    std::iter::once("Timestamp").chain(FIELD_NAMES)
}
