//! Measurement values reported by the SPS30.

use chrono::{DateTime, Local};

/// Number of float fields in a measurement.
pub const FIELD_COUNT: usize = 10;

/// Column names in wire order.
pub const FIELD_NAMES: [&str; FIELD_COUNT] = [
    "PM1.0",
    "PM2.5",
    "PM4.0",
    "PM10",
    "NC0.5",
    "NC1.0",
    "NC2.5",
    "NC4.0",
    "NC10",
    "Typical Particle Size",
];

/// One reading of the sensor, fields in the order the device sends them.
///
/// The field order is part of the wire contract: the Read response carries
/// exactly these ten values as consecutive big-endian `f32`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MeasurementSample {
    /// Mass concentration PM1.0 [µg/m³]
    pub pm1_0: f32,
    /// Mass concentration PM2.5 [µg/m³]
    pub pm2_5: f32,
    /// Mass concentration PM4.0 [µg/m³]
    pub pm4_0: f32,
    /// Mass concentration PM10 [µg/m³]
    pub pm10: f32,
    /// Number concentration PM0.5 [#/cm³]
    pub nc0_5: f32,
    /// Number concentration PM1.0 [#/cm³]
    pub nc1_0: f32,
    /// Number concentration PM2.5 [#/cm³]
    pub nc2_5: f32,
    /// Number concentration PM4.0 [#/cm³]
    pub nc4_0: f32,
    /// Number concentration PM10 [#/cm³]
    pub nc10: f32,
    /// Typical particle size [µm]
    pub typical_particle_size: f32,
}

impl MeasurementSample {
    pub fn from_array(values: [f32; FIELD_COUNT]) -> Self {
        let [pm1_0, pm2_5, pm4_0, pm10, nc0_5, nc1_0, nc2_5, nc4_0, nc10, typical_particle_size] =
            values;
        Self {
            pm1_0,
            pm2_5,
            pm4_0,
            pm10,
            nc0_5,
            nc1_0,
            nc2_5,
            nc4_0,
            nc10,
            typical_particle_size,
        }
    }

    /// Values in wire order.
    pub fn to_array(&self) -> [f32; FIELD_COUNT] {
        [
            self.pm1_0,
            self.pm2_5,
            self.pm4_0,
            self.pm10,
            self.nc0_5,
            self.nc1_0,
            self.nc2_5,
            self.nc4_0,
            self.nc10,
            self.typical_particle_size,
        ]
    }

    /// Encode as a Read response payload (inverse of the Read decode rule).
    pub fn to_be_bytes(&self) -> [u8; FIELD_COUNT * 4] {
        let mut out = [0u8; FIELD_COUNT * 4];
        for (chunk, value) in out.chunks_exact_mut(4).zip(self.to_array()) {
            chunk.copy_from_slice(&value.to_be_bytes());
        }
        out
    }
}

/// A timestamped sample, handed to the record sink once per successful read.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub timestamp: DateTime<Local>,
    pub sample: MeasurementSample,
}

impl Record {
    pub fn new(timestamp: DateTime<Local>, sample: MeasurementSample) -> Self {
        Self { timestamp, sample }
    }
}
