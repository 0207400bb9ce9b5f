use anyhow::{Context, Result};
use clap::Parser;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use rehab_tracker_rs::config::{ExtensionConvention, JointAxis, TelemetryConfig};
use rehab_tracker_rs::sensors::{MockSource, ReplaySource, SampleSource};
use rehab_tracker_rs::{server, telemetry};

#[derive(Parser, Debug)]
#[command(name = "rehab_tracker", long_about = None)]
#[command(about = "Knee rehab telemetry: joint angle, muscle activation, torque")]
struct Args {
    /// Address to bind
    #[arg(long, env = "REHAB_BIND", default_value = "0.0.0.0")]
    bind: IpAddr,

    /// HTTP/websocket port
    #[arg(long, env = "REHAB_PORT", default_value_t = 8010)]
    port: u16,

    /// Acquisition rate in Hz
    #[arg(long, env = "REHAB_TICK_HZ", default_value_t = 30.0)]
    tick_hz: f64,

    /// Orientation smoothing factor (0..1, higher is smoother)
    #[arg(long, env = "REHAB_ALPHA", default_value_t = 0.85)]
    alpha: f64,

    /// Number of snapshots kept in session history
    #[arg(long, env = "REHAB_HISTORY", default_value_t = 300)]
    history: usize,

    /// Orientation component used for the knee angle
    #[arg(long, env = "REHAB_JOINT_AXIS", value_enum, default_value = "pitch")]
    joint_axis: JointAxis,

    /// How extension_angle is reported
    #[arg(long, env = "REHAB_EXTENSION", value_enum, default_value = "complement")]
    extension: ExtensionConvention,

    /// Replay a recorded frame log (.json or .json.gz) instead of the mock rig
    #[arg(long, env = "REHAB_REPLAY")]
    replay: Option<PathBuf>,

    /// Restart the replay log when it runs out
    #[arg(long, env = "REHAB_REPLAY_LOOP")]
    replay_loop: bool,
}

impl Args {
    fn telemetry_config(&self) -> TelemetryConfig {
        TelemetryConfig {
            tick_hz: self.tick_hz,
            alpha: self.alpha.clamp(0.0, 1.0),
            history_capacity: self.history,
            joint_axis: self.joint_axis,
            extension: self.extension,
            ..TelemetryConfig::default()
        }
    }

    fn source(&self) -> Result<Box<dyn SampleSource>> {
        match &self.replay {
            Some(path) => {
                let source = ReplaySource::open(path, self.replay_loop)
                    .with_context(|| format!("loading replay log {}", path.display()))?;
                Ok(Box::new(source))
            }
            None => {
                log::info!("No replay log given, using mock sensor rig");
                Ok(Box::new(MockSource::new()))
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = args.telemetry_config();
    log::info!(
        "Rehab tracker starting: {:.1} Hz, alpha {:.2}, axis {:?}, history {}",
        config.tick_hz,
        config.alpha,
        config.joint_axis,
        config.history_capacity
    );

    let source = args.source()?;
    let (handle, acquisition) = telemetry::spawn(config, source);
    let addr = SocketAddr::new(args.bind, args.port);

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to listen for shutdown signal: {}", e);
        }
        log::info!("Shutdown requested");
    };
    server::serve(handle, addr, shutdown).await?;

    acquisition.abort();
    log::info!("Rehab tracker stopped");
    Ok(())
}
