//! `fusionfeed-cli` – FusionFeed node launcher
//!
//! This binary runs one fusion node against the simulated rig:
//!
//! 1. Loads `~/.fusionfeed/config.toml`, writing the defaults on first run.
//! 2. Publishes the static camera poses and bootstraps the engine at the
//!    primary camera's pose.  Exits non-zero if the pose never appears.
//! 3. Starts a capture thread feeding both cameras into the node.
//! 4. Runs the node and an operator console with slash-commands
//!    (`/reset`, `/extract`, `/activate`, `/status`, `/help`).
//! 5. Intercepts **Ctrl-C** to stop everything in order.

mod config;
mod repl;

use colored::Colorize;
use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

use fusionfeed_hal::DepthSensor;
use fusionfeed_hal::sim::{SimDepthSensor, SimFusionEngine, SimOcclusionAnalyzer};
use fusionfeed_middleware::{EventBus, Topic};
use fusionfeed_perception::tf_buffer::TfBuffer;
use fusionfeed_perception::transform::{Quaternion, Transform3D, Vec3};
use fusionfeed_runtime::{FrameIngest, FusionNode, NodeConfig, init_tracing};
use fusionfeed_types::{EventPayload, SensorId};

const CAPTURE_PERIOD: Duration = Duration::from_millis(33);

/// Process-wide stop signal, observable from plain threads and async tasks.
#[derive(Clone)]
pub(crate) struct Shutdown {
    flag: Arc<AtomicBool>,
    tx: Arc<watch::Sender<bool>>,
}

impl Shutdown {
    fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            tx: Arc::new(tx),
        }
    }

    pub(crate) fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.tx.send_replace(true);
    }

    pub(crate) fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

fn main() -> ExitCode {
    // Set FUSIONFEED_LOG_FORMAT=json for newline-delimited JSON logs.
    // Console output for the operator stays on println!.
    let telemetry = init_tracing("fusionfeed");

    print_banner();

    let shutdown = Shutdown::new();
    let ctrlc_shutdown = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping the fusion node …".yellow().bold());
        ctrlc_shutdown.trigger();
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; graceful shutdown on Ctrl-C will not be available");
    }

    let cfg = load_or_create_config();
    let node_config = match cfg.to_node_config() {
        Ok(c) => c,
        Err(e) => {
            println!("{}: {}", "Invalid configuration".red(), e);
            return ExitCode::from(2);
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            println!("{}: {}", "Failed to start async runtime".red(), e);
            return ExitCode::FAILURE;
        }
    };

    let code = runtime.block_on(run_node(cfg, node_config, shutdown));
    drop(runtime);
    drop(telemetry);
    code
}

async fn run_node(cfg: config::Config, node_config: NodeConfig, shutdown: Shutdown) -> ExitCode {
    let transforms = Arc::new(TfBuffer::new());
    publish_rig(&transforms, &node_config);

    let bus = Arc::new(EventBus::default());
    let engine = SimFusionEngine::new(node_config.volume);
    let analyzer = Arc::new(SimOcclusionAnalyzer::new());

    let node = match FusionNode::new(node_config, engine, transforms, bus.clone(), Some(analyzer)) {
        Ok(n) => n,
        Err(e) => {
            println!("{}: {}", "Invalid configuration".red(), e);
            return ExitCode::from(2);
        }
    };

    print!("\n  Waiting for the camera pose … ");
    std::io::stdout().flush().ok();
    if let Err(e) = node.bootstrap().await {
        println!("{}", "failed".red());
        println!("  {}", e);
        return ExitCode::FAILURE;
    }
    println!("{}", "ready".green());

    let sensors = match open_sensors(&cfg) {
        Ok(s) => s,
        Err(e) => {
            println!("{}: {}", "Sensor error".red(), e);
            return ExitCode::FAILURE;
        }
    };
    let capture = spawn_capture(sensors, node.ingest(), shutdown.clone());

    tokio::spawn(print_diagnostics(bus.clone(), shutdown.subscribe()));

    println!();
    println!("  Type {} for a list of commands.\n", "/help".bold().cyan());

    let console_node = node.clone();
    let console_shutdown = shutdown.clone();
    // The console owns stdin; on a fatal fault the process exits without
    // waiting for it.
    thread::spawn(move || repl::run(console_node, console_shutdown));

    let result = node.run(shutdown.subscribe()).await;
    shutdown.trigger();
    if capture.join().is_err() {
        error!("capture thread panicked");
    }

    match result {
        Ok(()) => {
            info!("fusionfeed exited cleanly");
            ExitCode::SUCCESS
        }
        Err(e) => {
            println!();
            println!("{} {}", "✗ Fusion node stopped:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

/// Static rig: both cameras look down +z from the front face of the volume.
fn publish_rig(transforms: &TfBuffer, node: &NodeConfig) {
    let half = node.volume.size_m / 2.0;
    transforms.set_transform(
        &node.world_frame,
        &node.primary.frame_id,
        Transform3D::new(Vec3::new(half, half, 0.0), Quaternion::identity()),
    );
    transforms.set_transform(
        &node.world_frame,
        &node.secondary.frame_id,
        Transform3D::new(Vec3::new(half - 0.2, half, 0.2), Quaternion::identity()),
    );
}

fn open_sensors(cfg: &config::Config) -> Result<Vec<SimDepthSensor>, fusionfeed_types::FeedError> {
    let mut sensors = vec![SimDepthSensor::open(
        &cfg.device,
        SensorId::Primary,
        cfg.camera_frame.clone(),
        cfg.camera,
        true,
    )?];
    if cfg.dual_sensor {
        sensors.push(
            SimDepthSensor::open(
                &cfg.secondary_device,
                SensorId::Secondary,
                cfg.secondary_camera_frame.clone(),
                cfg.camera,
                false,
            )?
            .with_plane_depth(1.2),
        );
    }
    Ok(sensors)
}

/// Capture every sensor at a steady rate until shutdown.  A sensor that
/// fails is dropped; the node keeps fusing whatever frames remain.
fn spawn_capture(
    mut sensors: Vec<SimDepthSensor>,
    ingest: FrameIngest,
    shutdown: Shutdown,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        while !shutdown.is_triggered() && !sensors.is_empty() {
            sensors.retain_mut(|sensor| match sensor.capture() {
                Ok(frame) => {
                    ingest.ingest(frame);
                    true
                }
                Err(e) => {
                    error!(
                        sensor = %sensor.sensor(),
                        frames = sensor.frames_captured(),
                        error = %e,
                        "sensor capture failed; dropping sensor"
                    );
                    false
                }
            });
            thread::sleep(CAPTURE_PERIOD);
        }
    })
}

async fn print_diagnostics(bus: Arc<EventBus>, mut shutdown: watch::Receiver<bool>) {
    let mut diagnostics = bus.subscribe_to(Topic::Diagnostics);
    let mut alerts = bus.subscribe_to(Topic::SystemAlerts);
    loop {
        tokio::select! {
            Ok(event) = diagnostics.recv() => {
                if let EventPayload::LogLine { topic, line } = event.payload {
                    println!("  {} {}", format!("[{topic}]").as_str().dimmed(), line);
                }
            }
            Ok(event) = alerts.recv() => {
                if let EventPayload::Fault { component, message } = event.payload {
                    println!("  {} {}: {}", "[alert]".red().bold(), component, message);
                }
            }
            _ = shutdown.changed() => break,
        }
    }
}

fn load_or_create_config() -> config::Config {
    match config::load() {
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Ok(None) => {
            let mut cfg = config::Config::default();
            match config::save(&cfg) {
                Ok(()) => println!(
                    "  {} Default config written to {}",
                    "✓".green().bold(),
                    config::config_path().display().to_string().bold()
                ),
                Err(e) => println!("{}: {}", "Error saving config".red(), e),
            }
            config::apply_env_overrides(&mut cfg);
            cfg
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            let mut cfg = config::Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    }
}

fn print_banner() {
    println!();
    println!("{}", r#"   ____         _           ____            __"#.bold().cyan());
    println!("{}", r#"  / __/_ _____ (_)__  ___  / __/__ ___ ___/ /"#.bold().cyan());
    println!("{}", r#" / _// // (_-</ / _ \/ _ \/ _// -_) -_) _  / "#.bold().cyan());
    println!("{}", r#"/_/  \_,_/___/_/\___/_//_/_/  \__/\__/\_,_/  "#.bold().cyan());
    println!();
    println!("  {}", "Volumetric fusion feed".dimmed());
    println!();
}
