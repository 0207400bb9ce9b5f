use serde::{Deserialize, Serialize};

use crate::types::{Attitude, ImuSample};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ComplementaryFilterState {
    pub pitch: f64,
    pub roll: f64,
    pub accel_pitch: f64,
    pub accel_roll: f64,
    pub initialized: bool,
}

/// Per-segment attitude filter.
///
/// Two stages run on every fresh sample:
/// 1. complementary blend of gyro-integrated attitude and accelerometer tilt
///    (`gain` weights the gyro path),
/// 2. recursive smoothing `est = alpha * est + (1 - alpha) * comp`.
///
/// The first sample after construction or `reset` seeds both stages with the
/// accelerometer tilt.
pub struct ComplementaryFilter {
    // Filter gains
    gain: f64,
    alpha: f64,
    max_dt: f64,

    comp: Attitude,
    smoothed: Attitude,
    accel_tilt: Attitude,

    last_timestamp: Option<f64>,
    initialized: bool,
}

impl ComplementaryFilter {
    pub fn new(gain: f64, alpha: f64, max_dt: f64) -> Self {
        Self {
            gain: gain.clamp(0.0, 1.0),
            alpha: alpha.clamp(0.0, 1.0),
            max_dt: max_dt.max(0.0),
            comp: Attitude::ZERO,
            smoothed: Attitude::ZERO,
            accel_tilt: Attitude::ZERO,
            last_timestamp: None,
            initialized: false,
        }
    }

    /// Fuse one sample. Returns `false` and leaves the estimate untouched when
    /// the sample does not advance past the last fused timestamp.
    pub fn update(&mut self, sample: &ImuSample) -> bool {
        let dt = match self.last_timestamp {
            Some(last) if sample.timestamp <= last => return false,
            Some(last) => (sample.timestamp - last).min(self.max_dt),
            None => 0.0,
        };
        self.last_timestamp = Some(sample.timestamp);

        let tilt = Attitude::from_gravity(&sample.accel);
        self.accel_tilt = tilt;

        if !self.initialized {
            self.comp = tilt;
            self.smoothed = tilt;
            self.initialized = true;
            return true;
        }

        if dt > 0.0 {
            // Pitch rate comes from the gyro Y axis, roll rate from X.
            self.comp = Attitude {
                pitch: self.gain * (self.comp.pitch + sample.gyro.y * dt)
                    + (1.0 - self.gain) * tilt.pitch,
                roll: self.gain * (self.comp.roll + sample.gyro.x * dt)
                    + (1.0 - self.gain) * tilt.roll,
            };
        } else {
            self.comp = tilt;
        }

        self.smoothed = Attitude {
            pitch: self.alpha * self.smoothed.pitch + (1.0 - self.alpha) * self.comp.pitch,
            roll: self.alpha * self.smoothed.roll + (1.0 - self.alpha) * self.comp.roll,
        };
        true
    }

    pub fn estimate(&self) -> Attitude {
        self.smoothed
    }

    pub fn accel_tilt(&self) -> Attitude {
        self.accel_tilt
    }

    /// Zero the running state; the next fresh sample re-seeds it.
    ///
    /// The last timestamp is kept so a repeated sample is still rejected.
    pub fn reset(&mut self) {
        self.comp = Attitude::ZERO;
        self.smoothed = Attitude::ZERO;
        self.accel_tilt = Attitude::ZERO;
        self.initialized = false;
    }

    pub fn get_state(&self) -> ComplementaryFilterState {
        ComplementaryFilterState {
            pitch: self.smoothed.pitch,
            roll: self.smoothed.roll,
            accel_pitch: self.accel_tilt.pitch,
            accel_roll: self.accel_tilt.roll,
            initialized: self.initialized,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Segment;
    use approx::assert_abs_diff_eq;
    use nalgebra::Vector3;

    fn pitched(timestamp: f64, pitch_deg: f64) -> ImuSample {
        let p = pitch_deg.to_radians();
        ImuSample {
            segment: Segment::Shin,
            timestamp,
            accel: Vector3::new(-p.sin(), 0.0, p.cos()),
            gyro: Vector3::zeros(),
        }
    }

    #[test]
    fn test_first_sample_seeds_estimate() {
        let mut filter = ComplementaryFilter::new(0.98, 0.85, 0.25);
        assert!(filter.update(&pitched(0.0, 40.0)));
        assert_abs_diff_eq!(filter.estimate().pitch, 40.0, epsilon = 1e-9);
    }

    #[test]
    fn test_converges_to_new_tilt() {
        let mut filter = ComplementaryFilter::new(0.9, 0.8, 0.25);
        filter.update(&pitched(0.0, 0.0));
        for i in 1..400 {
            filter.update(&pitched(i as f64 * 0.033, 45.0));
        }
        assert_abs_diff_eq!(filter.estimate().pitch, 45.0, epsilon = 0.5);
    }

    #[test]
    fn test_single_spike_is_damped() {
        let mut filter = ComplementaryFilter::new(0.98, 0.85, 0.25);
        filter.update(&pitched(0.0, 0.0));
        filter.update(&pitched(0.033, 60.0));
        assert!(filter.estimate().pitch < 5.0);
    }

    #[test]
    fn test_repeated_timestamp_is_rejected() {
        let mut filter = ComplementaryFilter::new(0.98, 0.85, 0.25);
        filter.update(&pitched(1.0, 10.0));
        let before = filter.estimate();
        assert!(!filter.update(&pitched(1.0, 80.0)));
        assert!(!filter.update(&pitched(0.5, 80.0)));
        assert_eq!(filter.estimate(), before);
    }

    #[test]
    fn test_reset_zeroes_and_reseeds() {
        let mut filter = ComplementaryFilter::new(0.98, 0.85, 0.25);
        filter.update(&pitched(0.0, 20.0));
        filter.reset();
        assert_eq!(filter.estimate(), Attitude::ZERO);
        assert!(!filter.get_state().initialized);

        filter.update(&pitched(0.1, 35.0));
        assert_abs_diff_eq!(filter.estimate().pitch, 35.0, epsilon = 1e-9);
    }

    #[test]
    fn test_gyro_rate_moves_estimate() {
        let mut filter = ComplementaryFilter::new(0.98, 0.0, 0.25);
        filter.update(&pitched(0.0, 0.0));
        let mut sample = pitched(0.1, 0.0);
        sample.gyro = Vector3::new(0.0, 100.0, 0.0);
        filter.update(&sample);
        // 0.98 * (0 + 100 * 0.1) + 0.02 * 0
        assert_abs_diff_eq!(filter.estimate().pitch, 9.8, epsilon = 1e-9);
    }
}
