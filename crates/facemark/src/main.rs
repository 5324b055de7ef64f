use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facemark_core::{
    Delegate, InitializationError, LandmarkEngine, OnnxLandmarker, OverlayRenderer, RunningMode,
    Surface,
};
use facemark_hw::{probe, CaptureError, V4lHost};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::LocalSet;
use tracing_subscriber::EnvFilter;

mod config;
mod controller;
mod detection_loop;
mod presenter;
mod refresh;
mod session;

use config::Config;
use controller::{CaptureController, StartOutcome};
use presenter::CanvasPresenter;
use refresh::IntervalRefresh;
use session::{Ended, Session, Toggled};

const PANEL_BAR_WIDTH: usize = 20;

#[derive(Error, Debug)]
#[error("camera capture is not supported in this environment")]
struct UnsupportedEnvironment;

#[derive(Parser)]
#[command(name = "facemark", about = "Live face-landmark overlay for V4L2 webcams")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Report whether camera capture is available and list devices
    Probe {
        /// Print the device list as JSON
        #[arg(long)]
        json: bool,
    },
    /// Capture from the camera and overlay face landmarks until Ctrl-C
    Run {
        /// Stop after this many seconds
        #[arg(long)]
        duration: Option<u64>,
        /// Camera device path (overrides config)
        #[arg(short, long)]
        device: Option<String>,
        /// Inference delegate: cpu or gpu (overrides config)
        #[arg(long)]
        delegate: Option<Delegate>,
        /// Flip the overlay horizontally
        #[arg(long)]
        mirror: bool,
        /// Write the overlay as PNG here periodically
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },
    /// Detect landmarks on a still image
    Detect {
        /// Image to analyze
        image: PathBuf,
        /// Where to write the annotated PNG
        #[arg(short, long)]
        out: Option<PathBuf>,
        /// Print the detection result as JSON instead of the blend-shape list
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = Config::load().context("failed to load configuration")?;

    match cli.command {
        Commands::Probe { json } => probe_command(json),
        Commands::Run {
            duration,
            device,
            delegate,
            mirror,
            snapshot,
        } => {
            if let Some(device) = device {
                config.camera_device = device;
            }
            if let Some(delegate) = delegate {
                config.delegate = delegate;
            }
            config.mirror |= mirror;
            if snapshot.is_some() {
                config.snapshot_path = snapshot;
            }
            // The loop and its engine are !Send; everything runs on one thread.
            LocalSet::new()
                .run_until(run_command(config, duration.map(Duration::from_secs)))
                .await
        }
        Commands::Detect { image, out, json } => detect_command(&config, &image, out, json).await,
    }
}

fn probe_command(json: bool) -> Result<()> {
    let devices = probe::capture_devices();
    if json {
        println!("{}", serde_json::to_string_pretty(&devices)?);
        return Ok(());
    }
    if devices.is_empty() {
        println!("camera capture: not supported (no video capture devices)");
        return Ok(());
    }
    println!("camera capture: supported");
    for d in &devices {
        println!("  {}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
    }
    Ok(())
}

async fn run_command(config: Config, duration: Option<Duration>) -> Result<()> {
    let controller = CaptureController::new(V4lHost, config.stream_constraints());
    let presenter = CanvasPresenter::new(OverlayRenderer::new(config.overlay_style()?, config.mirror))
        .with_snapshots(config.snapshot_path.clone(), config.snapshot_every)
        .with_panel_log(config.panel_every);
    let refresh_hz = config.refresh_hz;
    let mut session = Session::new(controller, presenter, move |_sink| IntervalRefresh::new(refresh_hz));

    // Probe before touching the engine: an unsupported host never loads a model.
    if !session.supports_capture() {
        eprintln!("{UnsupportedEnvironment}");
        return Err(UnsupportedEnvironment.into());
    }

    let engine = match OnnxLandmarker::initialize(config.landmarker_config(RunningMode::Image)).await {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("{}", init_failure_message(&e));
            return Err(e.into());
        }
    };
    session.install_detector(engine);

    start_with_retries(&mut session, &config).await?;
    println!("capturing; press Enter to pause or resume, Ctrl-C to quit");

    let deadline = async {
        match duration {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut capture_failure = None;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                break;
            }
            _ = &mut deadline => {
                tracing::info!("duration elapsed");
                break;
            }
            ended = session.wait() => {
                match ended {
                    Ended::Loop(stats) => {
                        tracing::warn!(?stats, "detection loop exited on its own");
                    }
                    Ended::Capture(e) => {
                        eprintln!("{e}");
                        capture_failure = Some(e);
                    }
                }
                break;
            }
            line = stdin.next_line(), if stdin_open => match line {
                Ok(Some(_)) => match session.toggle().await {
                    Ok(Toggled::Stopped) => println!("paused"),
                    Ok(Toggled::Started(StartOutcome::Started)) => println!("resumed"),
                    Ok(Toggled::Started(other)) => println!("not resumed: {other:?}"),
                    Err(e) => tracing::warn!(error = %e, "failed to resume capture"),
                },
                _ => stdin_open = false,
            },
        }
    }

    if let Some(stats) = session.stop().await {
        println!(
            "{} ticks, {} detections, {} failed, {} rendered",
            stats.ticks, stats.detections, stats.failures, stats.renders
        );
    }
    if let (Some(path), Some(presenter)) = (&config.snapshot_path, session.target()) {
        if presenter.renders() > 0 {
            presenter.surface().save_png(path)?;
            println!("overlay saved to {}", path.display());
        }
    }
    match capture_failure {
        Some(e) => Err(e).context("capture stopped unexpectedly"),
        None => Ok(()),
    }
}

/// A refused or busy camera is retried; anything else is returned at once.
async fn start_with_retries<H, E, T, R>(
    session: &mut Session<H, E, T, R>,
    config: &Config,
) -> Result<()>
where
    H: facemark_hw::CaptureHost,
    E: LandmarkEngine + 'static,
    T: detection_loop::OverlayTarget + 'static,
    R: refresh::RefreshSignal + 'static,
{
    anyhow::ensure!(session.detector_ready(), "detector is not initialized");
    let mut attempt = 0;
    loop {
        match session.start().await {
            Ok(StartOutcome::Started) | Ok(StartOutcome::AlreadyActive) => return Ok(()),
            Ok(StartOutcome::Unsupported) => return Err(UnsupportedEnvironment.into()),
            Ok(StartOutcome::NotReady) => anyhow::bail!("detector is not initialized"),
            Err(e @ (CaptureError::PermissionDenied(_) | CaptureError::Busy))
                if attempt < config.capture_retries =>
            {
                attempt += 1;
                tracing::warn!(error = %e, attempt, "camera request failed; retrying");
                tokio::time::sleep(Duration::from_millis(config.retry_delay_ms)).await;
            }
            Err(e) => return Err(e).context("failed to start capture"),
        }
    }
}

fn init_failure_message(e: &InitializationError) -> &'static str {
    match e {
        InitializationError::NoModelConfigured => {
            "No face landmark model configured. Set model_path or model_url."
        }
        InitializationError::ModelUnavailable(_) => "The face landmark model could not be loaded.",
        InitializationError::DelegateUnavailable(_) => {
            "The requested inference delegate is not available. Try --delegate cpu."
        }
        _ => "The face landmark detector failed to start.",
    }
}

async fn detect_command(
    config: &Config,
    image_path: &std::path::Path,
    out: Option<PathBuf>,
    json: bool,
) -> Result<()> {
    let photo = image::open(image_path)
        .with_context(|| format!("failed to open {}", image_path.display()))?;
    let rgb = photo.to_rgb8();
    let (width, height) = rgb.dimensions();

    let mut engine = OnnxLandmarker::initialize(config.landmarker_config(RunningMode::Image))
        .await
        .map_err(|e| {
            eprintln!("{}", init_failure_message(&e));
            e
        })?;
    let result = engine.detect(rgb.as_raw(), width, height, 0.0).await?;
    tracing::info!(faces = result.faces.len(), "detection complete");

    let renderer = OverlayRenderer::new(config.overlay_style()?, config.mirror);
    let mut surface = Surface::new(width, height);
    let output = renderer.render(&mut surface, &result);

    if let Some(out) = out {
        let mut annotated = photo.to_rgba8();
        image::imageops::overlay(&mut annotated, surface.image(), 0, 0);
        annotated
            .save_with_format(&out, image::ImageFormat::Png)
            .with_context(|| format!("failed to write {}", out.display()))?;
        println!("annotated image saved to {}", out.display());
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else if result.is_empty() {
        println!("no face detected");
    } else {
        let panel = &output.panel;
        println!("{} connector groups drawn", output.groups_drawn);
        if panel.is_empty() {
            println!("no blend shapes (no blend-shape model configured)");
        } else {
            print!("{}", panel.to_text(PANEL_BAR_WIDTH));
        }
    }
    Ok(())
}
