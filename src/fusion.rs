// fusion.rs - Orientation fusion for the thigh/shin sensor pair
//
// Pure computation: raw samples in, segment attitudes and knee angles out.
// Owned by the acquisition loop; nothing here is shared across tasks.

use serde::{Deserialize, Serialize};

use crate::config::{ExtensionConvention, JointAxis, TelemetryConfig};
use crate::filters::complementary::ComplementaryFilter;
use crate::types::{wrap_degrees, Attitude, ImuSample, Segment};

/// Zero-reference attitude captured per segment at IMU calibration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CalibrationPose {
    pub thigh: Attitude,
    pub shin: Attitude,
}

/// Calibrated attitude of one segment plus staleness for this tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SegmentReport {
    pub pitch: f64,
    pub roll: f64,
    pub stale: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OrientationEstimate {
    pub thigh: SegmentReport,
    pub shin: SegmentReport,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct JointAngles {
    pub flexion: f64,
    pub extension: f64,
}

impl JointAngles {
    /// Knee angles from calibrated segment attitudes.
    ///
    /// Flexion is the wrapped absolute difference shin − thigh on the chosen
    /// axis, clamped to [0, 180].
    pub fn from_attitudes(
        thigh: &Attitude,
        shin: &Attitude,
        axis: JointAxis,
        extension: ExtensionConvention,
    ) -> Self {
        let (t, s) = match axis {
            JointAxis::Pitch => (thigh.pitch, shin.pitch),
            JointAxis::Roll => (thigh.roll, shin.roll),
        };
        let delta = wrap_degrees(s - t).abs();
        let flexion = if delta.is_finite() {
            delta.clamp(0.0, 180.0)
        } else {
            0.0
        };
        let extension = match extension {
            ExtensionConvention::Complement => 180.0 - flexion,
            ExtensionConvention::Disabled => 0.0,
        };
        Self { flexion, extension }
    }
}

/// Segment readout for the per-segment endpoints.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SegmentReadout {
    pub segment: Segment,
    pub pitch: f64,
    pub roll: f64,
    pub raw_pitch: f64,
    pub raw_roll: f64,
    pub stale: bool,
    pub initialized: bool,
}

pub struct OrientationFusion {
    thigh: ComplementaryFilter,
    shin: ComplementaryFilter,
    pose: CalibrationPose,
    axis: JointAxis,
    extension: ExtensionConvention,
    last: OrientationEstimate,
}

impl OrientationFusion {
    pub fn new(config: &TelemetryConfig) -> Self {
        let filter = || {
            ComplementaryFilter::new(
                config.complementary_gain,
                config.alpha,
                config.max_integration_step,
            )
        };
        Self {
            thigh: filter(),
            shin: filter(),
            pose: CalibrationPose::default(),
            axis: config.joint_axis,
            extension: config.extension,
            last: OrientationEstimate::default(),
        }
    }

    /// Fuse this tick's samples. A missing or non-advancing sample leaves that
    /// segment's estimate where it was and marks it stale.
    pub fn update(
        &mut self,
        thigh: Option<&ImuSample>,
        shin: Option<&ImuSample>,
    ) -> OrientationEstimate {
        let thigh_fresh = thigh.map(|s| self.thigh.update(s)).unwrap_or(false);
        let shin_fresh = shin.map(|s| self.shin.update(s)).unwrap_or(false);

        self.last = OrientationEstimate {
            thigh: self.report(Segment::Thigh, thigh_fresh),
            shin: self.report(Segment::Shin, shin_fresh),
        };
        self.last
    }

    /// Capture the current estimates as the zero pose and clear filter memory.
    pub fn calibrate_zero(&mut self) -> CalibrationPose {
        self.pose = CalibrationPose {
            thigh: self.thigh.estimate(),
            shin: self.shin.estimate(),
        };
        self.thigh.reset();
        self.shin.reset();
        self.last = OrientationEstimate {
            thigh: SegmentReport {
                stale: self.last.thigh.stale,
                ..SegmentReport::default()
            },
            shin: SegmentReport {
                stale: self.last.shin.stale,
                ..SegmentReport::default()
            },
        };
        self.pose
    }

    pub fn pose(&self) -> CalibrationPose {
        self.pose
    }

    pub fn last_estimate(&self) -> OrientationEstimate {
        self.last
    }

    pub fn joint_angles(&self) -> JointAngles {
        let thigh = Attitude::new(self.last.thigh.pitch, self.last.thigh.roll);
        let shin = Attitude::new(self.last.shin.pitch, self.last.shin.roll);
        JointAngles::from_attitudes(&thigh, &shin, self.axis, self.extension)
    }

    pub fn readout(&self, segment: Segment) -> SegmentReadout {
        let (filter, report) = match segment {
            Segment::Thigh => (&self.thigh, &self.last.thigh),
            Segment::Shin => (&self.shin, &self.last.shin),
        };
        let state = filter.get_state();
        SegmentReadout {
            segment,
            pitch: report.pitch,
            roll: report.roll,
            raw_pitch: state.accel_pitch,
            raw_roll: state.accel_roll,
            stale: report.stale,
            initialized: state.initialized,
        }
    }

    /// Calibrated report for a fresh segment, or the previous report marked
    /// stale. The filter may be unseeded right after calibration, so a stale
    /// segment never reads from it.
    fn report(&self, segment: Segment, fresh: bool) -> SegmentReport {
        let (filter, reference, previous) = match segment {
            Segment::Thigh => (&self.thigh, &self.pose.thigh, &self.last.thigh),
            Segment::Shin => (&self.shin, &self.pose.shin, &self.last.shin),
        };
        if !fresh {
            return SegmentReport {
                stale: true,
                ..*previous
            };
        }
        let calibrated = filter.estimate().offset_by(reference);
        SegmentReport {
            pitch: calibrated.pitch,
            roll: calibrated.roll,
            stale: false,
        }
    }
}
