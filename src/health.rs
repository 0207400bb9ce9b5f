use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Tracks read failures for one sensor across ticks
#[derive(Clone, Debug)]
pub struct SensorHealth {
    pub name: String,
    last_update: Option<Instant>,
    consecutive_misses: u32,
    total_misses: u64,
    warning_threshold: u32,
    outage_reported: bool,
}

impl SensorHealth {
    pub fn new(name: &str, warning_threshold: u32) -> Self {
        SensorHealth {
            name: name.to_string(),
            last_update: None,
            consecutive_misses: 0,
            total_misses: 0,
            warning_threshold: warning_threshold.max(1),
            outage_reported: false,
        }
    }

    /// Record the outcome of this tick's read.
    pub fn record(&mut self, fresh: bool) {
        if fresh {
            if self.outage_reported {
                log::info!(
                    "{} sensor recovered after {} missed reads",
                    self.name,
                    self.consecutive_misses
                );
            }
            self.last_update = Some(Instant::now());
            self.consecutive_misses = 0;
            self.outage_reported = false;
            return;
        }

        self.consecutive_misses = self.consecutive_misses.saturating_add(1);
        self.total_misses += 1;
        if !self.outage_reported && self.consecutive_misses >= self.warning_threshold {
            log::warn!(
                "{} sensor stale for {} consecutive reads, carrying last known value",
                self.name,
                self.consecutive_misses
            );
            self.outage_reported = true;
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.consecutive_misses < self.warning_threshold
    }

    pub fn consecutive_misses(&self) -> u32 {
        self.consecutive_misses
    }

    pub fn time_since_last_update(&self) -> Option<Duration> {
        self.last_update.map(|t| t.elapsed())
    }

    pub fn status(&self) -> SensorStatus {
        SensorStatus {
            name: self.name.clone(),
            healthy: self.is_healthy(),
            consecutive_misses: self.consecutive_misses,
            total_misses: self.total_misses,
            silence_secs: self.time_since_last_update().map(|d| d.as_secs_f64()),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SensorStatus {
    pub name: String,
    pub healthy: bool,
    pub consecutive_misses: u32,
    pub total_misses: u64,
    /// `None` until the first fresh read.
    pub silence_secs: Option<f64>,
}

/// Health of the three rig sensors
pub struct HealthMonitor {
    pub thigh: SensorHealth,
    pub shin: SensorHealth,
    pub muscle: SensorHealth,
}

impl HealthMonitor {
    pub fn new(warning_threshold: u32) -> Self {
        HealthMonitor {
            thigh: SensorHealth::new("Thigh IMU", warning_threshold),
            shin: SensorHealth::new("Shin IMU", warning_threshold),
            muscle: SensorHealth::new("Muscle", warning_threshold),
        }
    }

    pub fn check_health(&self) -> HealthReport {
        HealthReport {
            thigh: self.thigh.status(),
            shin: self.shin.status(),
            muscle: self.muscle.status(),
        }
    }

    /// Format health status for logging
    pub fn format_status(&self) -> String {
        let describe = |h: &SensorHealth| {
            if h.is_healthy() {
                "ok".to_string()
            } else {
                format!("stale ({} reads)", h.consecutive_misses())
            }
        };
        format!(
            "Health: Thigh {} | Shin {} | Muscle {}",
            describe(&self.thigh),
            describe(&self.shin),
            describe(&self.muscle)
        )
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HealthReport {
    pub thigh: SensorStatus,
    pub shin: SensorStatus,
    pub muscle: SensorStatus,
}
