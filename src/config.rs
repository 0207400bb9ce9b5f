use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Orientation component used for the knee angle.
///
/// `Roll` suits sensors strapped to the side of the leg.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum JointAxis {
    Pitch,
    Roll,
}

/// How `extension_angle` is derived from flexion.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ExtensionConvention {
    /// 180° minus flexion.
    Complement,
    /// Always reported as zero.
    Disabled,
}

#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    // ── Acquisition ──
    pub tick_hz: f64,
    pub broadcast_capacity: usize,

    // ── Orientation fusion ──
    pub complementary_gain: f64,
    pub alpha: f64,
    pub max_integration_step: f64,
    pub joint_axis: JointAxis,
    pub extension: ExtensionConvention,

    // ── Muscle activation ──
    pub min_muscle_span: f64,

    // ── Torque model ──
    pub shin_mass_kg: f64,
    pub com_distance_m: f64,
    pub gravity: f64,
    pub activation_gain_nm: f64,

    // ── Session ──
    pub history_capacity: usize,

    // ── Sensor health ──
    pub stale_warning_ticks: u32,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            tick_hz: 30.0,
            broadcast_capacity: 64,
            complementary_gain: 0.98,
            alpha: 0.85,
            max_integration_step: 0.25,
            joint_axis: JointAxis::Pitch,
            extension: ExtensionConvention::Complement,
            min_muscle_span: 1e-3,
            shin_mass_kg: 4.0,
            com_distance_m: 0.2,
            gravity: 9.80665,
            activation_gain_nm: 2.0,
            history_capacity: 300,
            stale_warning_ticks: 3,
        }
    }
}

impl TelemetryConfig {
    pub fn tick_interval(&self) -> Duration {
        let hz = if self.tick_hz.is_finite() && self.tick_hz > 0.0 {
            self.tick_hz
        } else {
            TelemetryConfig::default().tick_hz
        };
        Duration::from_secs_f64(1.0 / hz)
    }
}
