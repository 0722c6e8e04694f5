use facecheck::{
    camera::{synthetic::SyntheticProvider, CameraProvider, V4lProvider},
    cli::{self, EnrollmentOutcome},
    common::config::CapturePreset,
    core::{Angle, AcceptancePolicy, CaptureController, Frame, QualityAnalyzer, SessionEvent},
    service::{HttpRegistrationClient, RegistrationSink},
    storage::EnrollmentStore,
    Config, DevMode,
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "facecheck")]
#[command(about = "Multi-angle face capture for employee registration")]
struct Cli {
    /// Enable development mode (saves data locally for testing)
    #[arg(long, global = true)]
    dev: bool,

    /// Config file to use instead of the default search path
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture the required angles for an employee and submit them
    Enroll {
        #[arg(short, long)]
        employee: String,
        /// quick (2 of 5, manual) or guided (5 of 5, automatic)
        #[arg(long, value_parser = parse_preset)]
        preset: Option<CapturePreset>,
        /// Registration backend base URL; overrides submission.base_url
        #[arg(long)]
        submit_url: Option<String>,
        /// Store locally instead of calling the backend
        #[arg(long)]
        offline: bool,
        /// Use the built-in synthetic camera instead of /dev/video*
        #[arg(long)]
        synthetic: bool,
        /// Camera index; overrides camera.device_index
        #[arg(long)]
        camera: Option<u32>,
    },
    /// Score a still image and show the acceptance decision
    Analyze {
        image: PathBuf,
        #[arg(long, default_value = "frontal")]
        angle: Angle,
    },
    /// List video devices
    ListCameras,
    /// Load, validate and print the effective configuration
    CheckConfig,
}

fn parse_preset(value: &str) -> std::result::Result<CapturePreset, String> {
    match value.to_ascii_lowercase().as_str() {
        "quick" => Ok(CapturePreset::Quick),
        "guided" => Ok(CapturePreset::Guided),
        other => Err(format!("unknown preset '{}', expected quick or guided", other)),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.dev);

    let dev_mode = DevMode::new(cli.dev)?;
    let mut config = match &cli.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };

    match cli.command {
        Commands::Enroll { employee, preset, submit_url, offline, synthetic, camera } => {
            if let Some(preset) = preset {
                config.capture.preset = preset;
            }
            if let Some(index) = camera {
                config.camera.device_index = index;
            }
            if let Some(url) = submit_url {
                config.submission.base_url = Some(url);
            }
            config.validate()?;
            enroll(&employee, &config, &dev_mode, offline, synthetic)?;
        }
        Commands::Analyze { image, angle } => {
            analyze(&image, angle, &config)?;
        }
        Commands::ListCameras => {
            list_cameras()?;
        }
        Commands::CheckConfig => {
            config.validate()?;
            println!("{}", toml::to_string_pretty(&config).context("Failed to render config")?);
            println!("# configuration is valid");
        }
    }

    Ok(())
}

fn enroll(employee: &str, config: &Config, dev_mode: &DevMode, offline: bool, synthetic: bool) -> Result<()> {
    let sink: Box<dyn RegistrationSink> = match (&config.submission.base_url, offline) {
        (Some(_), false) => Box::new(HttpRegistrationClient::new(&config.submission)?),
        _ => Box::new(EnrollmentStore::new_with_dev_mode(dev_mode, &config.storage)?),
    };

    let mut synthetic_camera = None;
    let provider: Arc<dyn CameraProvider> = if synthetic {
        let camera = SyntheticProvider::new();
        synthetic_camera = Some(camera.clone());
        Arc::new(camera)
    } else {
        Arc::new(V4lProvider::new(&config.camera))
    };

    let mut controller = CaptureController::new(provider, config);

    // The synthetic subject turns toward whichever angle is still missing.
    if let Some(camera) = synthetic_camera {
        let events = controller.subscribe();
        std::thread::spawn(move || {
            for event in events {
                match event {
                    SessionEvent::Progress(progress) => {
                        if let Some(angle) = progress.missing.first() {
                            camera.show_angle(*angle);
                        }
                    }
                    SessionEvent::Retaken { angle: Some(angle) } => camera.show_angle(angle),
                    _ => {}
                }
            }
        });
    }

    controller.begin_session(employee);
    println!("Enrolling employee: {} (sink: {})", employee, sink.name());

    let outcome = cli::run_enrollment(&mut controller, sink.as_ref(), &config.preview)?;

    match outcome {
        EnrollmentOutcome::Submitted(receipt) => {
            println!("\n✅ {}", receipt.message);
            println!("   payload:   {}", receipt.payload_id);
            if let Some(reference) = receipt.reference {
                println!("   reference: {}", reference);
            }
        }
        EnrollmentOutcome::Aborted => {
            println!("\nEnrollment cancelled, captures discarded.");
        }
    }
    Ok(())
}

fn analyze(path: &Path, angle: Angle, config: &Config) -> Result<()> {
    let image = image::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let frame = Frame::new(image, 0);

    let mut analyzer = QualityAnalyzer::new(&config.acceptance);
    let report = analyzer.analyze(&frame)?;
    let decision = AcceptancePolicy::from_config(&config.acceptance).evaluate(angle, &report);

    println!("{}", serde_json::to_string_pretty(&report)?);
    println!();
    println!("Assessment: {} (quality {:.2}, confidence {:.2})", report.assessment(), report.quality, report.confidence);
    println!("Pose: yaw {:.1}, pitch {:.1}, roll {:.1}", report.pose().yaw, report.pose().pitch, report.pose().roll);
    println!("Decision: {}", decision);
    for hint in decision.hints() {
        println!("  - {}", hint);
    }
    for suggestion in report.suggestions() {
        println!("  - {}", suggestion);
    }
    if report.liveness.simulated {
        println!("Note: liveness and anti-spoofing scores are simulated.");
    }
    Ok(())
}

fn list_cameras() -> Result<()> {
    println!("🔍 Detecting available cameras...\n");

    let cameras = V4lProvider::list_all_cameras()?;
    if cameras.is_empty() {
        println!("❌ No cameras found!");
        println!("\nTroubleshooting:");
        println!("  1. Check if cameras are connected");
        println!("  2. Ensure you have permission to access /dev/video*");
        return Ok(());
    }

    for camera in &cameras {
        println!("📷 /dev/video{}: {}", camera.index, camera.name);
        println!("   formats: {}", camera.formats.join(", "));
        if !camera.can_capture {
            println!("   (metadata node, cannot capture)");
        }
    }

    println!("\nSet [camera] device_index in configs/facecheck.toml, or 999 to auto-detect.");
    Ok(())
}

fn setup_logging(dev_mode: bool) {
    if dev_mode {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
            .with_writer(std::io::stderr)
            .with_file(true)
            .with_line_number(true)
            .with_thread_ids(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
            .with_writer(std::io::stderr)
            .init();
    }
}
