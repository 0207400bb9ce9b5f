//! Knee torque proxy
//! Combines effort (muscle activation) with the gravitational moment of the
//! shank about the knee. Not a calibrated physical torque: the figure is
//! non-negative, zero without activation, and non-decreasing in both
//! flexion and activation.

use crate::config::TelemetryConfig;

#[derive(Clone, Debug)]
pub struct TorqueEstimator {
    activation_gain_nm: f64,
    gravity_moment_nm: f64,
}

impl TorqueEstimator {
    pub fn new(config: &TelemetryConfig) -> Self {
        Self {
            activation_gain_nm: config.activation_gain_nm.max(0.0),
            gravity_moment_nm: (config.shin_mass_kg * config.gravity * config.com_distance_m)
                .max(0.0),
        }
    }

    /// Torque in N·m from flexion (degrees) and relative activation (percent).
    ///
    /// τ = a · (gain + m·g·r·sin(min(θ, 90°)))
    pub fn estimate(&self, flexion_angle: f64, muscle_relative: f64) -> f64 {
        let activation = if muscle_relative.is_finite() {
            (muscle_relative / 100.0).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let theta = if flexion_angle.is_finite() {
            flexion_angle.clamp(0.0, 90.0)
        } else {
            0.0
        };
        let lever = self.gravity_moment_nm * theta.to_radians().sin();
        activation * (self.activation_gain_nm + lever)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn estimator() -> TorqueEstimator {
        TorqueEstimator::new(&TelemetryConfig::default())
    }

    #[test]
    fn test_zero_activation() {
        let torque = estimator();
        for angle in [0.0, 45.0, 90.0, 135.0, 180.0] {
            assert_eq!(torque.estimate(angle, 0.0), 0.0);
        }
    }

    #[test]
    fn test_full_effort_at_right_angle() {
        // 1.0 * (2.0 + 4.0 * 9.80665 * 0.2)
        let output = estimator().estimate(90.0, 100.0);
        assert_abs_diff_eq!(output, 2.0 + 4.0 * 9.80665 * 0.2, epsilon = 1e-9);
    }

    #[test]
    fn test_non_decreasing_in_both_inputs() {
        let torque = estimator();
        for a in (0..=100).step_by(10) {
            let mut previous = 0.0;
            for angle in 0..=180 {
                let t = torque.estimate(angle as f64, a as f64);
                assert!(t >= previous);
                assert!(t >= 0.0);
                previous = t;
            }
        }
        for angle in (0..=180).step_by(15) {
            let mut previous = 0.0;
            for a in 0..=100 {
                let t = torque.estimate(angle as f64, a as f64);
                assert!(t >= previous);
                previous = t;
            }
        }
    }

    #[test]
    fn test_out_of_range_inputs_are_clamped() {
        let torque = estimator();
        assert_eq!(torque.estimate(-20.0, 50.0), torque.estimate(0.0, 50.0));
        assert_eq!(torque.estimate(60.0, 150.0), torque.estimate(60.0, 100.0));
        assert_eq!(torque.estimate(f64::NAN, 50.0), torque.estimate(0.0, 50.0));
    }
}
