use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{TelemetryError, TelemetryResult};
use crate::types::EmgSample;

/// Which end of the voltage range a capture records.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureMode {
    Rest,
    Max,
}

impl FromStr for CaptureMode {
    type Err = TelemetryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rest" => Ok(CaptureMode::Rest),
            "max" | "peak" => Ok(CaptureMode::Max),
            other => Err(TelemetryError::InvalidMode(other.to_string())),
        }
    }
}

/// Calibrated voltage range. Both ends start absent.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MuscleCalibration {
    pub rest_voltage: Option<f64>,
    pub peak_voltage: Option<f64>,
}

impl MuscleCalibration {
    /// `InvalidCalibrationRange` when both ends are set but peak ≤ rest.
    ///
    /// Such a range is still used; activation is clamped instead of inverted.
    pub fn validate(&self) -> TelemetryResult<()> {
        match (self.rest_voltage, self.peak_voltage) {
            (Some(rest), Some(peak)) if peak <= rest => {
                Err(TelemetryError::InvalidCalibrationRange { rest, peak })
            }
            _ => Ok(()),
        }
    }
}

pub struct MuscleMonitor {
    calibration: MuscleCalibration,
    min_span: f64,
    last_voltage: f64,
    last_timestamp: Option<f64>,
}

impl MuscleMonitor {
    pub fn new(min_span: f64) -> Self {
        Self {
            calibration: MuscleCalibration::default(),
            min_span: min_span.max(f64::EPSILON),
            last_voltage: 0.0,
            last_timestamp: None,
        }
    }

    /// Record this tick's reading and return the voltage to report.
    ///
    /// Returns `(voltage, stale)`; a missing or non-advancing sample reports
    /// the last known voltage as stale.
    pub fn sample(&mut self, reading: Option<&EmgSample>) -> (f64, bool) {
        match reading {
            Some(s)
                if s.voltage.is_finite()
                    && self.last_timestamp.map_or(true, |t| s.timestamp > t) =>
            {
                self.last_voltage = s.voltage;
                self.last_timestamp = Some(s.timestamp);
                (s.voltage, false)
            }
            _ => (self.last_voltage, true),
        }
    }

    pub fn calibration(&self) -> MuscleCalibration {
        self.calibration
    }

    /// Store `voltage` as the rest level. Any previous peak is discarded.
    pub fn begin_rest_capture(&mut self, voltage: f64) -> f64 {
        self.calibration = MuscleCalibration {
            rest_voltage: Some(voltage),
            peak_voltage: None,
        };
        voltage
    }

    /// Store `voltage` as the peak level. Requires rest to be captured first.
    pub fn begin_peak_capture(&mut self, voltage: f64) -> TelemetryResult<f64> {
        if self.calibration.rest_voltage.is_none() {
            return Err(TelemetryError::CalibrationOrder);
        }
        self.calibration.peak_voltage = Some(voltage);
        Ok(voltage)
    }

    pub fn clear(&mut self) {
        self.calibration = MuscleCalibration::default();
    }

    /// Percentage of the calibrated range, clamped to [0, 100]. Zero until
    /// both ends are captured.
    pub fn relative_activation(&self, voltage: f64) -> f64 {
        let (rest, peak) = match (self.calibration.rest_voltage, self.calibration.peak_voltage) {
            (Some(rest), Some(peak)) => (rest, peak),
            _ => return 0.0,
        };
        let span = (peak - rest).max(self.min_span);
        let percent = 100.0 * (voltage - rest) / span;
        if percent.is_finite() {
            percent.clamp(0.0, 100.0)
        } else {
            0.0
        }
    }
}
