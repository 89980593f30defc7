//! qrscan-sim: drive a scanning session against the simulated camera
//!
//! Starts a session with configured defaults (overridable per flag), feeds
//! synthetic frames whose payloads the simulated detector decodes, prints
//! every detection batch as one JSON line on stdout, then stops and prints
//! the frame counters.
//!
//! ```text
//! qrscan-sim --payload 'QR_CODE:https://example.org' --frames 30
//! qrscan-sim --api-level 19 --facing towardsUser --heartbeat-ms 500
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use qrscan::sim::{PayloadDetectorFactory, SimEnvironment, SimUnit};
use qrscan::{DetectionStream, Facing, SessionController, StartRequest};
use scanconf::ScanConfig;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(version, about = "Run a barcode scanning session against a simulated camera")]
struct Cli {
    /// Config file (replaces ./qrscan.toml in the search path)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print the effective configuration and exit
    #[arg(long)]
    dump_config: bool,

    /// Target preview width
    #[arg(long)]
    width: Option<u32>,

    /// Target preview height
    #[arg(long)]
    height: Option<u32>,

    /// Camera facing: awayFromUser or towardsUser
    #[arg(long)]
    facing: Option<String>,

    /// Heartbeat timeout in milliseconds (0 disables the watchdog)
    #[arg(long)]
    heartbeat_ms: Option<u64>,

    /// Stop sending heartbeats, letting the watchdog end the session
    #[arg(long)]
    no_heartbeat: bool,

    /// Host camera API level; decides legacy vs modern backend
    #[arg(long, default_value = "28")]
    api_level: u32,

    /// Format names to scan for (comma separated); all when omitted
    #[arg(long, value_delimiter = ',')]
    formats: Vec<String>,

    /// Frame payload, `FORMAT:text` per line; repeat to cycle payloads
    #[arg(short, long, default_value = "QR_CODE:hello")]
    payload: Vec<String>,

    /// Number of frames to emit
    #[arg(short = 'n', long, default_value = "10")]
    frames: usize,

    /// Delay between frames in milliseconds
    #[arg(long, default_value = "33")]
    interval_ms: u64,

    /// Simulated detector latency in milliseconds
    #[arg(long, default_value = "0")]
    detect_latency_ms: u64,

    /// Turn the torch on once streaming
    #[arg(long)]
    torch: bool,
}

fn init_tracing(log_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn build_request(cli: &Cli, config: &ScanConfig) -> Result<StartRequest> {
    let mut request =
        StartRequest::from_defaults(&config.session).context("Invalid [session] defaults")?;
    if let Some(width) = cli.width {
        request.target_width = width;
    }
    if let Some(height) = cli.height {
        request.target_height = height;
    }
    if let Some(facing) = &cli.facing {
        request.facing = facing.parse::<Facing>()?;
    }
    if let Some(ms) = cli.heartbeat_ms {
        request.heartbeat_timeout = Duration::from_millis(ms);
    }
    if !cli.formats.is_empty() {
        request = request.with_formats(cli.formats.iter().cloned());
    }
    Ok(request)
}

fn simulated_units() -> Vec<SimUnit> {
    let sizes = [(640, 480), (1280, 720), (1920, 1080)];
    vec![
        SimUnit::back(90)
            .with_preview_sizes(&sizes)
            .with_jpeg_sizes(&sizes)
            .with_flash(),
        SimUnit::front(270)
            .with_preview_sizes(&sizes)
            .with_jpeg_sizes(&sizes),
    ]
}

fn print_batches(detections: &mut DetectionStream) -> Result<usize> {
    let mut printed = 0;
    while let Some(batch) = detections.try_recv() {
        println!("{}", serde_json::to_string(&batch)?);
        printed += 1;
    }
    Ok(printed)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (config, sources) = ScanConfig::load_with_sources_from(cli.config.as_deref())
        .context("Failed to load configuration")?;
    init_tracing(&config.telemetry.log_level);
    for file in &sources.files {
        info!("Loaded config from {}", file.display());
    }
    for var in &sources.env_overrides {
        info!("Config override from ${}", var);
    }

    if cli.dump_config {
        print!("{}", config.to_toml());
        return Ok(());
    }

    let request = build_request(&cli, &config)?;
    let detectors = match cli.detect_latency_ms {
        0 => PayloadDetectorFactory::new(),
        ms => PayloadDetectorFactory::with_latency(Duration::from_millis(ms)),
    };
    let env = SimEnvironment::with_detectors(simulated_units(), detectors);
    let (controller, mut detections) =
        SessionController::new(env.platform(cli.api_level), config.camera.clone());

    let session = controller
        .start(request)?
        .await
        .context("Camera failed to start")?;
    info!(
        "{} streaming {}x{} at {} degrees on the {:?} backend",
        session.session_id,
        session.surface_width,
        session.surface_height,
        session.surface_orientation,
        session.backend
    );
    println!("{}", serde_json::to_string(&session)?);

    if cli.torch {
        controller.set_torch(true);
    }

    let interval = Duration::from_millis(cli.interval_ms);
    let mut batches = 0;
    for frame in 0..cli.frames {
        if let Some(payload) = cli.payload.get(frame % cli.payload.len().max(1)) {
            env.camera.emit_frame(payload.replace("\\n", "\n").as_bytes());
        }
        if !cli.no_heartbeat {
            controller.heartbeat();
        }

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted; stopping session");
                break;
            }
            _ = tokio::time::sleep(interval) => {}
        }
        batches += print_batches(&mut detections)?;

        if controller.session_id().is_none() {
            warn!("Session ended before all frames were sent");
            break;
        }
    }

    // Let the last detection land before tearing down.
    let camera = env.camera.clone();
    tokio::task::spawn_blocking(move || camera.flush()).await?;
    tokio::time::sleep(interval + Duration::from_millis(cli.detect_latency_ms)).await;
    batches += print_batches(&mut detections)?;

    controller.stop();
    if let Some(stats) = controller.stats() {
        println!("{}", serde_json::to_string(&stats)?);
    }
    info!("{} detection batch(es) printed", batches);
    Ok(())
}
