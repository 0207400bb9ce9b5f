use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Limb segment carrying an inertial sensor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Segment {
    Thigh,
    Shin,
}

impl Segment {
    pub const ALL: [Segment; 2] = [Segment::Thigh, Segment::Shin];

    pub fn as_str(&self) -> &'static str {
        match self {
            Segment::Thigh => "thigh",
            Segment::Shin => "shin",
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One accelerometer + gyroscope reading from a segment sensor.
///
/// Acceleration is in g, angular rate in deg/s. Consumed by a single
/// fusion step and then dropped.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImuSample {
    pub segment: Segment,
    pub timestamp: f64,
    pub accel: Vector3<f64>,
    pub gyro: Vector3<f64>,
}

/// Analog muscle sensor reading in volts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EmgSample {
    pub timestamp: f64,
    pub voltage: f64,
}

/// Everything acquired for one tick. `None` means the read failed.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RawFrame {
    pub timestamp: f64,
    #[serde(default)]
    pub thigh: Option<ImuSample>,
    #[serde(default)]
    pub shin: Option<ImuSample>,
    #[serde(default)]
    pub emg: Option<EmgSample>,
}

impl RawFrame {
    pub fn imu(&self, segment: Segment) -> Option<&ImuSample> {
        match segment {
            Segment::Thigh => self.thigh.as_ref(),
            Segment::Shin => self.shin.as_ref(),
        }
    }
}

/// Pitch/roll pair in degrees.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Attitude {
    pub pitch: f64,
    pub roll: f64,
}

impl Attitude {
    pub const ZERO: Attitude = Attitude { pitch: 0.0, roll: 0.0 };

    pub fn new(pitch: f64, roll: f64) -> Self {
        Self { pitch, roll }
    }

    /// Tilt implied by the gravity vector alone.
    pub fn from_gravity(accel: &Vector3<f64>) -> Self {
        let roll = accel.y.atan2(accel.z).to_degrees();
        let pitch = (-accel.x)
            .atan2((accel.y * accel.y + accel.z * accel.z).sqrt())
            .to_degrees();
        Self { pitch, roll }
    }

    pub fn offset_by(&self, reference: &Attitude) -> Attitude {
        Attitude {
            pitch: self.pitch - reference.pitch,
            roll: self.roll - reference.roll,
        }
    }
}

/// Wall-clock seconds since the Unix epoch.
pub fn current_timestamp() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Wrap an angle in degrees into (-180, 180].
pub fn wrap_degrees(angle: f64) -> f64 {
    let wrapped = (angle + 180.0).rem_euclid(360.0) - 180.0;
    if wrapped == -180.0 {
        180.0
    } else {
        wrapped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_level_sensor_has_zero_tilt() {
        let tilt = Attitude::from_gravity(&Vector3::new(0.0, 0.0, 1.0));
        assert_abs_diff_eq!(tilt.pitch, 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(tilt.roll, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_pitched_sensor() {
        let p = 30.0_f64.to_radians();
        let tilt = Attitude::from_gravity(&Vector3::new(-p.sin(), 0.0, p.cos()));
        assert_abs_diff_eq!(tilt.pitch, 30.0, epsilon = 1e-9);
        assert_abs_diff_eq!(tilt.roll, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_wrap_degrees() {
        assert_abs_diff_eq!(wrap_degrees(190.0), -170.0, epsilon = 1e-9);
        assert_abs_diff_eq!(wrap_degrees(-190.0), 170.0, epsilon = 1e-9);
        assert_abs_diff_eq!(wrap_degrees(-180.0), 180.0, epsilon = 1e-9);
        assert_abs_diff_eq!(wrap_degrees(45.0), 45.0, epsilon = 1e-9);
    }

    #[test]
    fn test_frame_deserializes_with_missing_sensors() {
        let frame: RawFrame = serde_json::from_str(r#"{"timestamp": 1.5}"#).unwrap();
        assert!(frame.thigh.is_none());
        assert!(frame.imu(Segment::Shin).is_none());
        assert!(frame.emg.is_none());
    }
}
