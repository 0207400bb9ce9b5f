// pipeline.rs - One acquisition tick and the control operations that mutate
// calibration state.
//
// Owns all per-component state. Only the acquisition task holds one.

use serde::{Deserialize, Serialize};

use crate::config::TelemetryConfig;
use crate::error::TelemetryResult;
use crate::fusion::{CalibrationPose, OrientationFusion, SegmentReadout};
use crate::health::HealthMonitor;
use crate::muscle::{CaptureMode, MuscleCalibration, MuscleMonitor};
use crate::sensors::SampleSource;
use crate::session::{CalibrationCommand, CalibrationStep, Metrics, SessionStore, TickReadings};
use crate::torque::TorqueEstimator;
use crate::types::{RawFrame, Segment};

/// Reply to muscle calibration commands.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationStatus {
    pub step: CalibrationStep,
    pub rest_voltage: Option<f64>,
    pub peak_voltage: Option<f64>,
    /// `false` when a captured peak is not above rest; activation is clamped.
    pub valid_range: bool,
}

impl CalibrationStatus {
    fn new(step: CalibrationStep, calibration: MuscleCalibration) -> Self {
        Self {
            step,
            rest_voltage: calibration.rest_voltage,
            peak_voltage: calibration.peak_voltage,
            valid_range: calibration.validate().is_ok(),
        }
    }
}

pub struct Pipeline {
    source: Box<dyn SampleSource>,
    fusion: OrientationFusion,
    muscle: MuscleMonitor,
    torque: TorqueEstimator,
    health: HealthMonitor,
}

impl Pipeline {
    pub fn new(config: &TelemetryConfig, source: Box<dyn SampleSource>) -> Self {
        Self {
            source,
            fusion: OrientationFusion::new(config),
            muscle: MuscleMonitor::new(config.min_muscle_span),
            torque: TorqueEstimator::new(config),
            health: HealthMonitor::new(config.stale_warning_ticks),
        }
    }

    /// Pull raw samples for one tick. Does not touch shared state.
    pub fn acquire(&mut self) -> RawFrame {
        self.source.read_frame()
    }

    /// Derive this tick's metrics and fold them into the session.
    pub fn process(&mut self, frame: &RawFrame, store: &mut SessionStore) -> Metrics {
        let orientation = self.fusion.update(frame.thigh.as_ref(), frame.shin.as_ref());
        let angles = self.fusion.joint_angles();
        let (muscle_voltage, muscle_stale) = self.muscle.sample(frame.emg.as_ref());
        let muscle_relative = self.muscle.relative_activation(muscle_voltage);
        let torque = self.torque.estimate(angles.flexion, muscle_relative);

        self.health.thigh.record(!orientation.thigh.stale);
        self.health.shin.record(!orientation.shin.stale);
        self.health.muscle.record(!muscle_stale);
        store.set_health(self.health.check_health());

        store.record(TickReadings {
            timestamp: frame.timestamp,
            angles,
            orientation,
            muscle_voltage,
            muscle_stale,
            muscle_relative,
            torque,
            calibration: self.muscle.calibration(),
        })
    }

    pub fn tick(&mut self, store: &mut SessionStore) -> Metrics {
        let frame = self.acquire();
        self.process(&frame, store)
    }

    pub fn calibrate_imu(&mut self) -> CalibrationPose {
        let pose = self.fusion.calibrate_zero();
        log::info!(
            "IMU zero pose: thigh pitch {:.1}° roll {:.1}°, shin pitch {:.1}° roll {:.1}°",
            pose.thigh.pitch,
            pose.thigh.roll,
            pose.shin.pitch,
            pose.shin.roll
        );
        pose
    }

    /// Enter (or re-enter) the guided flow; the previous range is discarded.
    pub fn start_calibration(
        &mut self,
        store: &mut SessionStore,
    ) -> TelemetryResult<CalibrationStatus> {
        let next = store.step().next(CalibrationCommand::Start)?;
        self.muscle.clear();
        store.set_step(next);
        log::info!("Muscle calibration started, awaiting rest capture");
        Ok(self.status(store))
    }

    /// Capture one end of the muscle range from an instantaneous reading.
    ///
    /// On error nothing changes: the step, the range and the IMU pose are
    /// all left as they were.
    pub fn capture_muscle(
        &mut self,
        mode: CaptureMode,
        store: &mut SessionStore,
    ) -> TelemetryResult<CalibrationStatus> {
        let command = match mode {
            CaptureMode::Rest => CalibrationCommand::CaptureRest,
            CaptureMode::Max => CalibrationCommand::CaptureMax,
        };
        let next = store.step().next(command).map_err(|e| {
            log::warn!("Rejected {:?} capture in step {:?}: {}", mode, store.step(), e);
            e
        })?;
        let voltage = self.source.read_emg()?.voltage;

        match mode {
            CaptureMode::Rest => {
                self.muscle.begin_rest_capture(voltage);
                self.calibrate_imu();
            }
            CaptureMode::Max => {
                self.muscle.begin_peak_capture(voltage)?;
            }
        }
        store.set_step(next);

        let status = self.status(store);
        if !status.valid_range {
            log::warn!(
                "Peak {:.3} V is not above rest {:.3} V; activation will be clamped",
                status.peak_voltage.unwrap_or_default(),
                status.rest_voltage.unwrap_or_default()
            );
        }
        log::info!("Captured {:?} voltage {:.3} V, step now {:?}", mode, voltage, next);
        Ok(status)
    }

    pub fn status(&self, store: &SessionStore) -> CalibrationStatus {
        CalibrationStatus::new(store.step(), self.muscle.calibration())
    }

    pub fn readout(&self, segment: Segment) -> SegmentReadout {
        self.fusion.readout(segment)
    }

    pub fn health_status(&self) -> String {
        self.health.format_status()
    }
}
