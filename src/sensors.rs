use flate2::read::GzDecoder;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::time::Instant;

use crate::error::{TelemetryError, TelemetryResult};
use crate::types::{current_timestamp, EmgSample, ImuSample, RawFrame, Segment};

/// Uniform "read one raw sample" surface over the rig's sensors.
///
/// Reads are best effort: an `Err` marks that sensor unavailable for the
/// tick and never stops acquisition.
pub trait SampleSource: Send {
    fn read_imu(&mut self, segment: Segment) -> TelemetryResult<ImuSample>;

    fn read_emg(&mut self) -> TelemetryResult<EmgSample>;

    /// Acquire everything for one tick.
    fn read_frame(&mut self) -> RawFrame {
        let thigh = self.read_imu(Segment::Thigh);
        let shin = self.read_imu(Segment::Shin);
        let emg = self.read_emg();
        RawFrame {
            timestamp: current_timestamp(),
            thigh: keep_fresh(thigh),
            shin: keep_fresh(shin),
            emg: keep_fresh(emg),
        }
    }
}

fn keep_fresh<T>(result: TelemetryResult<T>) -> Option<T> {
    match result {
        Ok(sample) => Some(sample),
        Err(e) => {
            log::debug!("{}", e);
            None
        }
    }
}

/// Synthetic rig: static thigh, shin swinging through a knee bend, muscle
/// voltage following the bend.
pub struct MockSource {
    started: Instant,
    period_secs: f64,
    peak_bend_deg: f64,
    rest_voltage: f64,
    peak_voltage: f64,
}

impl MockSource {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            period_secs: 4.0,
            peak_bend_deg: 90.0,
            rest_voltage: 0.4,
            peak_voltage: 2.4,
        }
    }

    fn phase(&self) -> f64 {
        let t = self.started.elapsed().as_secs_f64();
        2.0 * std::f64::consts::PI * t / self.period_secs
    }

    fn bend_deg(&self) -> f64 {
        0.5 * self.peak_bend_deg * (1.0 - self.phase().cos())
    }
}

impl Default for MockSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SampleSource for MockSource {
    fn read_imu(&mut self, segment: Segment) -> TelemetryResult<ImuSample> {
        let phase = self.phase();
        let (pitch_deg, rate_dps) = match segment {
            Segment::Thigh => (2.0 * (phase * 0.5).sin(), 0.0),
            Segment::Shin => {
                let omega = 2.0 * std::f64::consts::PI / self.period_secs;
                (
                    self.bend_deg(),
                    0.5 * self.peak_bend_deg * omega * phase.sin(),
                )
            }
        };
        let p = pitch_deg.to_radians();
        Ok(ImuSample {
            segment,
            timestamp: current_timestamp(),
            accel: Vector3::new(-p.sin(), 0.0, p.cos()),
            gyro: Vector3::new(0.0, rate_dps, 0.0),
        })
    }

    fn read_emg(&mut self) -> TelemetryResult<EmgSample> {
        let effort = self.bend_deg() / self.peak_bend_deg;
        Ok(EmgSample {
            timestamp: current_timestamp(),
            voltage: self.rest_voltage + (self.peak_voltage - self.rest_voltage) * effort,
        })
    }
}

#[derive(Serialize, Deserialize)]
pub struct ReplayLog {
    pub frames: Vec<RawFrame>,
}

/// Load a recorded frame log (`.json` or `.json.gz`).
pub fn load_log(path: &Path) -> TelemetryResult<ReplayLog> {
    let file = File::open(path)
        .map_err(|e| TelemetryError::Replay(format!("{}: {}", path.display(), e)))?;
    let reader: Box<dyn Read> = if path.extension().map(|e| e == "gz").unwrap_or(false) {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };
    serde_json::from_reader(BufReader::new(reader))
        .map_err(|e| TelemetryError::Replay(format!("{}: {}", path.display(), e)))
}

/// Plays back a recorded log, one frame per tick.
pub struct ReplaySource {
    frames: Vec<RawFrame>,
    cursor: usize,
    looping: bool,
    // Added to timestamps on each pass so looped samples keep advancing.
    time_offset: f64,
    span: f64,
}

impl ReplaySource {
    pub fn new(frames: Vec<RawFrame>, looping: bool) -> TelemetryResult<Self> {
        if frames.is_empty() {
            return Err(TelemetryError::Replay("log contains no frames".to_string()));
        }
        let first = frames.first().map(|f| f.timestamp).unwrap_or(0.0);
        let last = frames.last().map(|f| f.timestamp).unwrap_or(0.0);
        let step = if frames.len() > 1 {
            (last - first) / (frames.len() - 1) as f64
        } else {
            0.0
        };
        Ok(Self {
            frames,
            cursor: 0,
            looping,
            time_offset: 0.0,
            span: (last - first + step).max(1e-3),
        })
    }

    pub fn open(path: &Path, looping: bool) -> TelemetryResult<Self> {
        let log = load_log(path)?;
        log::info!("Loaded {} replay frames from {}", log.frames.len(), path.display());
        Self::new(log.frames, looping)
    }

    pub fn is_exhausted(&self) -> bool {
        self.cursor > self.frames.len()
    }

    fn current(&self) -> Option<&RawFrame> {
        self.cursor.checked_sub(1).and_then(|i| self.frames.get(i))
    }

    fn advance(&mut self) {
        if self.cursor >= self.frames.len() && self.looping {
            self.cursor = 0;
            self.time_offset += self.span;
        }
        self.cursor = (self.cursor + 1).min(self.frames.len() + 1);
    }
}

impl SampleSource for ReplaySource {
    fn read_imu(&mut self, segment: Segment) -> TelemetryResult<ImuSample> {
        let offset = self.time_offset;
        self.current()
            .and_then(|f| f.imu(segment))
            .map(|s| ImuSample {
                timestamp: s.timestamp + offset,
                ..s.clone()
            })
            .ok_or_else(|| TelemetryError::unavailable(segment.as_str()))
    }

    fn read_emg(&mut self) -> TelemetryResult<EmgSample> {
        let offset = self.time_offset;
        self.current()
            .and_then(|f| f.emg.as_ref())
            .map(|s| EmgSample {
                timestamp: s.timestamp + offset,
                voltage: s.voltage,
            })
            .ok_or_else(|| TelemetryError::unavailable("muscle"))
    }

    fn read_frame(&mut self) -> RawFrame {
        self.advance();
        let timestamp = self
            .current()
            .map(|f| f.timestamp + self.time_offset)
            .unwrap_or_else(current_timestamp);
        RawFrame {
            timestamp,
            thigh: keep_fresh(self.read_imu(Segment::Thigh)),
            shin: keep_fresh(self.read_imu(Segment::Shin)),
            emg: keep_fresh(self.read_emg()),
        }
    }
}
