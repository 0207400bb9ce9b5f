use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::error::{TelemetryError, TelemetryResult};
use crate::fusion::{JointAngles, OrientationEstimate};
use crate::health::HealthReport;
use crate::muscle::MuscleCalibration;

/// Guided muscle calibration state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationStep {
    /// No calibration attempted yet
    Ready,
    /// Waiting for the relaxed-muscle capture
    AwaitingRest,
    /// Rest captured, waiting for the maximal-effort capture
    AwaitingPeak,
    /// Both ends captured
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationCommand {
    Start,
    CaptureRest,
    CaptureMax,
}

impl CalibrationStep {
    /// Transition function. Illegal transitions leave the caller's state as is.
    pub fn next(self, command: CalibrationCommand) -> TelemetryResult<CalibrationStep> {
        use CalibrationCommand::*;
        use CalibrationStep::*;

        match (self, command) {
            (_, Start) => Ok(AwaitingRest),
            (_, CaptureRest) => Ok(AwaitingPeak),
            (AwaitingPeak | Done, CaptureMax) => Ok(Done),
            (Ready | AwaitingRest, CaptureMax) => Err(TelemetryError::CalibrationOrder),
        }
    }

    pub fn is_calibrating(self) -> bool {
        matches!(self, CalibrationStep::AwaitingRest | CalibrationStep::AwaitingPeak)
    }
}

/// One streamed snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub sequence: u64,
    pub timestamp: f64,
    pub flexion_angle: f64,
    pub extension_angle: f64,
    pub muscle_voltage: f64,
    pub muscle_relative: f64,
    pub torque: f64,
    pub max_flexion: f64,
    pub max_extension: f64,
    pub max_torque: f64,
    pub imu: OrientationEstimate,
    pub muscle_stale: bool,
    pub muscle_rest_voltage: Option<f64>,
    pub muscle_peak_voltage: Option<f64>,
    pub calibration_step: CalibrationStep,
}

/// Derived values for one tick, before session bookkeeping
#[derive(Debug, Clone)]
pub struct TickReadings {
    pub timestamp: f64,
    pub angles: JointAngles,
    pub orientation: OrientationEstimate,
    pub muscle_voltage: f64,
    pub muscle_stale: bool,
    pub muscle_relative: f64,
    pub torque: f64,
    pub calibration: MuscleCalibration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub calibration_step: CalibrationStep,
    pub sequence: u64,
    pub history_len: usize,
    pub history_capacity: usize,
    pub max_flexion: f64,
    pub max_extension: f64,
    pub max_torque: f64,
}

/// Authoritative session record, shared behind a lock.
pub struct SessionStore {
    step: CalibrationStep,
    max_flexion: f64,
    max_extension: f64,
    max_torque: f64,
    history: VecDeque<Metrics>,
    capacity: usize,
    sequence: u64,
    latest: Option<Metrics>,
    health: Option<HealthReport>,
}

impl SessionStore {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        SessionStore {
            step: CalibrationStep::Ready,
            max_flexion: 0.0,
            max_extension: 0.0,
            max_torque: 0.0,
            history: VecDeque::with_capacity(capacity),
            capacity,
            sequence: 0,
            latest: None,
            health: None,
        }
    }

    /// Fold one tick into the session and return the snapshot to broadcast.
    pub fn record(&mut self, readings: TickReadings) -> Metrics {
        self.max_flexion = self.max_flexion.max(readings.angles.flexion);
        self.max_extension = self.max_extension.max(readings.angles.extension);
        self.max_torque = self.max_torque.max(readings.torque);
        self.sequence += 1;

        let metrics = Metrics {
            sequence: self.sequence,
            timestamp: readings.timestamp,
            flexion_angle: readings.angles.flexion,
            extension_angle: readings.angles.extension,
            muscle_voltage: readings.muscle_voltage,
            muscle_relative: readings.muscle_relative,
            torque: readings.torque,
            max_flexion: self.max_flexion,
            max_extension: self.max_extension,
            max_torque: self.max_torque,
            imu: readings.orientation,
            muscle_stale: readings.muscle_stale,
            muscle_rest_voltage: readings.calibration.rest_voltage,
            muscle_peak_voltage: readings.calibration.peak_voltage,
            calibration_step: self.step,
        };

        if self.history.len() == self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(metrics.clone());
        self.latest = Some(metrics.clone());
        metrics
    }

    /// Clear history, running maxima and the cached snapshot. Calibration is
    /// left alone.
    pub fn reset(&mut self) -> SessionSummary {
        self.history.clear();
        self.latest = None;
        self.max_flexion = 0.0;
        self.max_extension = 0.0;
        self.max_torque = 0.0;
        self.summary()
    }

    pub fn step(&self) -> CalibrationStep {
        self.step
    }

    pub fn set_step(&mut self, step: CalibrationStep) {
        self.step = step;
    }

    pub fn latest(&self) -> Option<&Metrics> {
        self.latest.as_ref()
    }

    pub fn history(&self) -> impl Iterator<Item = &Metrics> {
        self.history.iter()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn set_health(&mut self, report: HealthReport) {
        self.health = Some(report);
    }

    pub fn health(&self) -> Option<&HealthReport> {
        self.health.as_ref()
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            calibration_step: self.step,
            sequence: self.sequence,
            history_len: self.history.len(),
            history_capacity: self.capacity,
            max_flexion: self.max_flexion,
            max_extension: self.max_extension,
            max_torque: self.max_torque,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fusion::SegmentReport;

    fn readings(flexion: f64, torque: f64) -> TickReadings {
        TickReadings {
            timestamp: 0.0,
            angles: JointAngles {
                flexion,
                extension: 180.0 - flexion,
            },
            orientation: OrientationEstimate {
                thigh: SegmentReport::default(),
                shin: SegmentReport::default(),
            },
            muscle_voltage: 1.2,
            muscle_stale: false,
            muscle_relative: 10.0,
            torque,
            calibration: MuscleCalibration {
                rest_voltage: Some(1.0),
                peak_voltage: Some(3.0),
            },
        }
    }

    #[test]
    fn test_calibration_transitions() {
        use CalibrationCommand::*;
        use CalibrationStep::*;

        assert_eq!(Ready.next(Start), Ok(AwaitingRest));
        assert_eq!(AwaitingRest.next(CaptureRest), Ok(AwaitingPeak));
        assert_eq!(AwaitingPeak.next(CaptureMax), Ok(Done));
        assert_eq!(Done.next(Start), Ok(AwaitingRest));
        assert_eq!(Ready.next(CaptureRest), Ok(AwaitingPeak));
        assert_eq!(Done.next(CaptureMax), Ok(Done));
    }

    #[test]
    fn test_invalid_calibration_transitions() {
        use CalibrationCommand::*;
        use CalibrationStep::*;

        assert_eq!(Ready.next(CaptureMax), Err(TelemetryError::CalibrationOrder));
        assert_eq!(AwaitingRest.next(CaptureMax), Err(TelemetryError::CalibrationOrder));
        assert!(!Ready.is_calibrating());
        assert!(AwaitingPeak.is_calibrating());
    }

    #[test]
    fn test_maxima_only_increase() {
        let mut store = SessionStore::new(10);
        store.record(readings(40.0, 3.0));
        let m = store.record(readings(20.0, 1.0));
        assert_eq!(m.flexion_angle, 20.0);
        assert_eq!(m.max_flexion, 40.0);
        assert_eq!(m.max_extension, 160.0);
        assert_eq!(m.max_torque, 3.0);
    }

    #[test]
    fn test_history_bound_keeps_most_recent() {
        let mut store = SessionStore::new(5);
        for i in 0..12 {
            store.record(readings(i as f64, 0.0));
        }
        assert_eq!(store.history_len(), 5);
        let sequences: Vec<u64> = store.history().map(|m| m.sequence).collect();
        assert_eq!(sequences, vec![8, 9, 10, 11, 12]);
    }

    #[test]
    fn test_reset_is_idempotent() {
        let mut store = SessionStore::new(5);
        store.set_step(CalibrationStep::Done);
        store.record(readings(90.0, 5.0));

        let first = store.reset();
        let second = store.reset();
        assert_eq!(first.history_len, 0);
        assert_eq!(second.history_len, 0);
        assert_eq!(second.max_flexion, 0.0);
        assert_eq!(second.max_torque, 0.0);
        assert_eq!(second.calibration_step, CalibrationStep::Done);
        assert_eq!(first.sequence, second.sequence);
    }

    #[test]
    fn test_reset_drops_cached_snapshot() {
        let mut store = SessionStore::new(5);
        store.record(readings(80.0, 4.0));
        assert!(store.latest().is_some());

        store.reset();
        assert!(store.latest().is_none());

        let m = store.record(readings(10.0, 0.5));
        assert_eq!(m.max_flexion, 10.0);
        assert_eq!(m.max_torque, 0.5);
        assert_eq!(store.latest(), Some(&m));
    }

    #[test]
    fn test_sequence_survives_reset() {
        let mut store = SessionStore::new(5);
        store.record(readings(1.0, 0.0));
        store.reset();
        let m = store.record(readings(1.0, 0.0));
        assert_eq!(m.sequence, 2);
    }

    #[test]
    fn test_wire_field_names() {
        let mut store = SessionStore::new(2);
        let m = store.record(readings(30.0, 1.5));
        let json = serde_json::to_value(&m).unwrap();
        for key in [
            "flexion_angle",
            "extension_angle",
            "muscle_voltage",
            "muscle_relative",
            "torque",
            "max_flexion",
            "max_extension",
            "max_torque",
            "muscle_rest_voltage",
            "muscle_peak_voltage",
            "timestamp",
        ] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
        assert!(json["imu"]["thigh"]["pitch"].is_number());
        assert!(json["imu"]["shin"]["roll"].is_number());
        assert_eq!(json["calibration_step"], "ready");
    }
}
