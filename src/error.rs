use thiserror::Error;

/// Telemetry pipeline error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TelemetryError {
    #[error("Sensor unavailable: {sensor}")]
    SensorUnavailable { sensor: String },

    #[error("Peak capture requested before rest capture")]
    CalibrationOrder,

    #[error("Invalid calibration range: peak {peak:.3} V is not above rest {rest:.3} V")]
    InvalidCalibrationRange { rest: f64, peak: f64 },

    #[error("Invalid mode: {0} (expected 'rest' or 'max')")]
    InvalidMode(String),

    #[error("Subscriber delivery failed: {0}")]
    SubscriberDelivery(String),

    #[error("Acquisition loop is not running")]
    ChannelClosed,

    #[error("Replay error: {0}")]
    Replay(String),
}

impl TelemetryError {
    pub fn unavailable(sensor: impl Into<String>) -> Self {
        TelemetryError::SensorUnavailable {
            sensor: sensor.into(),
        }
    }
}

pub type TelemetryResult<T> = Result<T, TelemetryError>;
