//! Knee rehabilitation telemetry: fuses a thigh/shin IMU pair and a surface
//! EMG channel into knee angle, muscle activation and torque, and streams the
//! result to subscribers over a websocket.

pub mod config;
pub mod error;
pub mod filters;
pub mod fusion;
pub mod health;
pub mod muscle;
pub mod pipeline;
pub mod sensors;
pub mod server;
pub mod session;
pub mod telemetry;
pub mod torque;
pub mod types;

pub use config::{ExtensionConvention, JointAxis, TelemetryConfig};
pub use error::{TelemetryError, TelemetryResult};
pub use session::{CalibrationStep, Metrics};
pub use telemetry::TelemetryHandle;
