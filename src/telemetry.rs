// telemetry.rs - Acquisition task and the handle used by the HTTP layer
//
// One task owns the `Pipeline`. Control commands arrive over an mpsc
// channel and are applied between ticks. Snapshots fan out over a broadcast
// channel; the session store sits behind a RwLock for queries.

use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::config::TelemetryConfig;
use crate::error::{TelemetryError, TelemetryResult};
use crate::fusion::{CalibrationPose, SegmentReadout};
use crate::health::HealthReport;
use crate::muscle::CaptureMode;
use crate::pipeline::{CalibrationStatus, Pipeline};
use crate::sensors::SampleSource;
use crate::session::{Metrics, SessionStore, SessionSummary};
use crate::types::Segment;

pub type SharedStore = Arc<RwLock<SessionStore>>;

const COMMAND_QUEUE: usize = 16;

pub enum ControlCommand {
    CalibrateImu(oneshot::Sender<CalibrationPose>),
    StartCalibration(oneshot::Sender<TelemetryResult<CalibrationStatus>>),
    CalibrateMuscle(CaptureMode, oneshot::Sender<TelemetryResult<CalibrationStatus>>),
    Status(oneshot::Sender<CalibrationStatus>),
    ResetSession(oneshot::Sender<SessionSummary>),
    Readout(Segment, oneshot::Sender<SegmentReadout>),
}

#[derive(Clone)]
pub struct TelemetryHandle {
    commands: mpsc::Sender<ControlCommand>,
    metrics: broadcast::Sender<Metrics>,
    store: SharedStore,
}

impl TelemetryHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> ControlCommand,
    ) -> TelemetryResult<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(build(tx))
            .await
            .map_err(|_| TelemetryError::ChannelClosed)?;
        rx.await.map_err(|_| TelemetryError::ChannelClosed)
    }

    pub async fn calibrate_imu(&self) -> TelemetryResult<CalibrationPose> {
        self.request(ControlCommand::CalibrateImu).await
    }

    pub async fn start_calibration(&self) -> TelemetryResult<CalibrationStatus> {
        self.request(ControlCommand::StartCalibration).await?
    }

    pub async fn calibrate_muscle(&self, mode: CaptureMode) -> TelemetryResult<CalibrationStatus> {
        self.request(|tx| ControlCommand::CalibrateMuscle(mode, tx)).await?
    }

    pub async fn calibration_status(&self) -> TelemetryResult<CalibrationStatus> {
        self.request(ControlCommand::Status).await
    }

    pub async fn reset_session(&self) -> TelemetryResult<SessionSummary> {
        self.request(ControlCommand::ResetSession).await
    }

    pub async fn segment(&self, segment: Segment) -> TelemetryResult<SegmentReadout> {
        self.request(|tx| ControlCommand::Readout(segment, tx)).await
    }

    /// Receive every snapshot published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Metrics> {
        self.metrics.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.metrics.receiver_count()
    }

    pub async fn latest(&self) -> Option<Metrics> {
        self.store.read().await.latest().cloned()
    }

    pub async fn history(&self) -> Vec<Metrics> {
        self.store.read().await.history().cloned().collect()
    }

    pub async fn health(&self) -> Option<HealthReport> {
        self.store.read().await.health().cloned()
    }

    pub async fn summary(&self) -> SessionSummary {
        self.store.read().await.summary()
    }
}

struct Acquisition {
    pipeline: Pipeline,
    store: SharedStore,
    commands: mpsc::Receiver<ControlCommand>,
    metrics: broadcast::Sender<Metrics>,
    config: TelemetryConfig,
}

/// Start the acquisition task. It runs until every handle is dropped.
pub fn spawn(
    config: TelemetryConfig,
    source: Box<dyn SampleSource>,
) -> (TelemetryHandle, JoinHandle<()>) {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE);
    let (metrics_tx, _) = broadcast::channel(config.broadcast_capacity.max(1));
    let store = Arc::new(RwLock::new(SessionStore::new(config.history_capacity)));

    let handle = TelemetryHandle {
        commands: cmd_tx,
        metrics: metrics_tx.clone(),
        store: store.clone(),
    };
    let acquisition = Acquisition {
        pipeline: Pipeline::new(&config, source),
        store,
        commands: cmd_rx,
        metrics: metrics_tx,
        config,
    };
    (handle, tokio::spawn(acquisition.run()))
}

impl Acquisition {
    async fn run(mut self) {
        let period = self.config.tick_interval();
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        log::info!("Acquisition started at {:.1} Hz", 1.0 / period.as_secs_f64());

        let mut ticks: u64 = 0;
        let status_every = (self.config.tick_hz.max(1.0) * 10.0) as u64;

        loop {
            tokio::select! {
                biased;

                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => self.handle(cmd).await,
                    None => break,
                },
                _ = ticker.tick() => {
                    self.tick().await;
                    ticks += 1;
                    if status_every > 0 && ticks % status_every == 0 {
                        log::debug!(
                            "{} | subscribers {}",
                            self.pipeline.health_status(),
                            self.metrics.receiver_count()
                        );
                    }
                }
            }
        }
        log::info!("Acquisition stopped after {} ticks", ticks);
    }

    async fn tick(&mut self) {
        let frame = self.pipeline.acquire();
        let metrics = {
            let mut store = self.store.write().await;
            self.pipeline.process(&frame, &mut store)
        };
        // No subscribers is fine; the snapshot is still in the store.
        let _ = self.metrics.send(metrics);
    }

    async fn handle(&mut self, cmd: ControlCommand) {
        match cmd {
            ControlCommand::CalibrateImu(reply) => {
                let _ = reply.send(self.pipeline.calibrate_imu());
            }
            ControlCommand::StartCalibration(reply) => {
                let mut store = self.store.write().await;
                let _ = reply.send(self.pipeline.start_calibration(&mut store));
            }
            ControlCommand::CalibrateMuscle(mode, reply) => {
                let mut store = self.store.write().await;
                let _ = reply.send(self.pipeline.capture_muscle(mode, &mut store));
            }
            ControlCommand::Status(reply) => {
                let store = self.store.read().await;
                let _ = reply.send(self.pipeline.status(&store));
            }
            ControlCommand::ResetSession(reply) => {
                let summary = self.store.write().await.reset();
                log::info!("Session reset (sequence {})", summary.sequence);
                let _ = reply.send(summary);
            }
            ControlCommand::Readout(segment, reply) => {
                let _ = reply.send(self.pipeline.readout(segment));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::tests::ScriptedSource;
    use crate::session::CalibrationStep;
    use std::time::Duration;
    use tokio::time::timeout;

    fn fast_config() -> TelemetryConfig {
        TelemetryConfig {
            tick_hz: 200.0,
            history_capacity: 8,
            ..TelemetryConfig::default()
        }
    }

    #[tokio::test]
    async fn test_snapshots_arrive_in_order() {
        let (handle, _task) = spawn(fast_config(), Box::new(ScriptedSource::new()));
        let mut rx = handle.subscribe();

        let mut last = 0;
        for _ in 0..5 {
            let m = timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
            assert!(m.sequence > last);
            last = m.sequence;
        }
        assert!(handle.latest().await.is_some());
        assert!(handle.history().await.len() <= 8);
    }

    #[tokio::test]
    async fn test_control_commands_round_trip() {
        let source = ScriptedSource::new();
        source.set(|s| s.voltage = 1.0);
        let (handle, _task) = spawn(fast_config(), Box::new(source.clone()));

        assert_eq!(
            handle.calibrate_muscle(CaptureMode::Max).await.unwrap_err(),
            TelemetryError::CalibrationOrder
        );

        let status = handle.start_calibration().await.unwrap();
        assert_eq!(status.step, CalibrationStep::AwaitingRest);

        handle.calibrate_muscle(CaptureMode::Rest).await.unwrap();
        source.set(|s| s.voltage = 2.5);
        let status = handle.calibrate_muscle(CaptureMode::Max).await.unwrap();
        assert_eq!(status.step, CalibrationStep::Done);
        assert_eq!(status.rest_voltage, Some(1.0));
        assert_eq!(status.peak_voltage, Some(2.5));
        assert_eq!(handle.calibration_status().await.unwrap(), status);

        let summary = handle.reset_session().await.unwrap();
        assert_eq!(summary.history_len, 0);
        assert_eq!(summary.calibration_step, CalibrationStep::Done);

        let readout = handle.segment(Segment::Shin).await.unwrap();
        assert_eq!(readout.segment, Segment::Shin);
        handle.calibrate_imu().await.unwrap();
    }

    #[tokio::test]
    async fn test_slow_subscriber_does_not_stall_others() {
        let config = TelemetryConfig {
            broadcast_capacity: 2,
            ..fast_config()
        };
        let (handle, _task) = spawn(config, Box::new(ScriptedSource::new()));
        let mut slow = handle.subscribe();
        let mut fast = handle.subscribe();

        for _ in 0..10 {
            timeout(Duration::from_secs(2), fast.recv()).await.unwrap().unwrap();
        }
        match slow.recv().await {
            Err(broadcast::error::RecvError::Lagged(n)) => assert!(n > 0),
            other => panic!("expected lag, got {:?}", other.map(|m| m.sequence)),
        }
        // After the lag report the receiver resumes with recent snapshots.
        assert!(slow.recv().await.is_ok());
    }

    #[tokio::test]
    async fn test_loop_stops_when_handles_dropped() {
        let (handle, task) = spawn(fast_config(), Box::new(ScriptedSource::new()));
        drop(handle);
        timeout(Duration::from_secs(2), task).await.unwrap().unwrap();
    }
}
