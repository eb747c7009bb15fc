use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use image::{Rgba, RgbaImage};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tryon_core::asset::{Asset, AssetSpec, TryOnTarget};
use tryon_core::session::{Session, SessionConfig, Tick};
use tryon_core::tracker::StaticDetector;
use tryon_core::types::Point;
use tryon_hw::{CameraBackend, DeviceManager, Facing, SyntheticBackend};

#[zbus::proxy(
    interface = "io.tryon.Compositor1",
    default_service = "io.tryon.Compositor1",
    default_path = "/io/tryon/Compositor1"
)]
trait Compositor {
    async fn start(&self, facing: &str) -> zbus::Result<()>;
    async fn stop(&self) -> zbus::Result<()>;
    async fn switch_facing(&self) -> zbus::Result<()>;
    async fn retry(&self) -> zbus::Result<()>;
    async fn capture(&self) -> zbus::Result<String>;
    async fn set_scale(&self, percent: u32) -> zbus::Result<u32>;
    async fn set_opacity(&self, percent: u32) -> zbus::Result<u32>;
    async fn reset_scale(&self) -> zbus::Result<()>;
    async fn reset_opacity(&self) -> zbus::Result<()>;
    async fn reset_params(&self) -> zbus::Result<()>;
    async fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "tryon", about = "Virtual try-on compositor CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum ResetTarget {
    Scale,
    Opacity,
    All,
}

#[derive(Subcommand)]
enum Commands {
    /// List cameras visible to this machine
    Devices,
    /// Show daemon session status
    Status,
    /// Start the camera
    Start {
        /// "front" or "rear"; the daemon default when omitted
        facing: Option<Facing>,
    },
    /// Stop the camera
    Stop,
    /// Switch between front and rear cameras
    Flip,
    /// Retry after a camera error
    Retry,
    /// Save the current composite as a PNG
    Capture,
    /// Set the overlay size (80-120%)
    Scale { percent: u32 },
    /// Set the overlay opacity (50-100%)
    Opacity { percent: u32 },
    /// Restore default scale and/or opacity
    Reset {
        #[arg(value_enum, default_value = "all")]
        what: ResetTarget,
    },
    /// Run the pipeline locally against the synthetic camera and write a capture
    Demo {
        /// Product manifest; a generated pair of glasses is used when omitted
        #[arg(short, long)]
        manifest: Option<PathBuf>,
        /// Frames to process before capturing
        #[arg(short, long, default_value_t = 30)]
        frames: u32,
        #[arg(short, long, default_value_t = 100)]
        scale: u32,
        #[arg(short, long, default_value_t = 100)]
        opacity: u32,
        /// Directory the capture is written to
        #[arg(long, default_value = ".")]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Devices => list_devices(),
        Commands::Demo {
            manifest,
            frames,
            scale,
            opacity,
            out,
        } => run_demo(manifest.as_deref(), frames, scale, opacity, &out).await?,
        command => call_daemon(command).await?,
    }

    Ok(())
}

async fn call_daemon(command: Commands) -> Result<()> {
    let conn = zbus::Connection::session()
        .await
        .context("connecting to the session bus")?;
    let proxy = CompositorProxy::new(&conn)
        .await
        .context("tryond is not reachable")?;

    match command {
        Commands::Status => {
            let json = proxy.status().await?;
            let value: serde_json::Value = serde_json::from_str(&json)?;
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        Commands::Start { facing } => {
            let facing = facing.map(|f| f.to_string()).unwrap_or_default();
            proxy.start(&facing).await?;
            println!("Camera started");
        }
        Commands::Stop => {
            proxy.stop().await?;
            println!("Camera stopped");
        }
        Commands::Flip => {
            proxy.switch_facing().await?;
            println!("Camera switched");
        }
        Commands::Retry => {
            proxy.retry().await?;
            println!("Camera started");
        }
        Commands::Capture => {
            let path = proxy.capture().await?;
            println!("Saved {path}");
        }
        Commands::Scale { percent } => {
            let applied = proxy.set_scale(percent).await?;
            println!("Scale: {applied}%");
        }
        Commands::Opacity { percent } => {
            let applied = proxy.set_opacity(percent).await?;
            println!("Opacity: {applied}%");
        }
        Commands::Reset { what } => {
            match what {
                ResetTarget::Scale => proxy.reset_scale().await?,
                ResetTarget::Opacity => proxy.reset_opacity().await?,
                ResetTarget::All => proxy.reset_params().await?,
            }
            println!("Reset");
        }
        Commands::Devices | Commands::Demo { .. } => anyhow::bail!("not a daemon command"),
    }
    Ok(())
}

fn list_devices() {
    #[cfg(feature = "v4l2")]
    {
        let nodes = tryon_hw::v4l2::list_devices();
        if nodes.is_empty() {
            println!("No V4L2 capture devices found");
        }
        for d in nodes {
            println!("{:<14} {:<32} {} ({})", d.path, d.name, d.driver, d.bus);
        }
    }
    #[cfg(not(feature = "v4l2"))]
    println!("V4L2 support not compiled in (build with --features v4l2)");

    for d in SyntheticBackend::new().enumerate() {
        println!(
            "{:<14} {:<32} {} {}x{}",
            d.id, d.name, d.facing, d.resolutions.max.width, d.resolutions.max.height
        );
    }
}

/// Lens centres 120 px apart, bridge anchored between them.
fn demo_asset() -> Result<Asset> {
    let (w, h) = (240u32, 80u32);
    let lenses = [(60.0f32, 36.0f32), (180.0, 36.0)];
    let img = RgbaImage::from_fn(w, h, |x, y| {
        let (px, py) = (x as f32 + 0.5, y as f32 + 0.5);
        let lens = lenses.iter().map(|&(cx, cy)| {
            let dx = (px - cx) / 48.0;
            let dy = (py - cy) / 30.0;
            dx * dx + dy * dy
        });
        let nearest = lens.fold(f32::INFINITY, f32::min);
        let bridge = (100.0..140.0).contains(&px) && (26.0..32.0).contains(&py);
        if (0.85..=1.0).contains(&nearest) || bridge {
            Rgba([25, 25, 30, 255])
        } else if nearest < 0.85 {
            Rgba([40, 60, 80, 140])
        } else {
            Rgba([0, 0, 0, 0])
        }
    });
    let spec = AssetSpec {
        image: PathBuf::from("demo-glasses.png"),
        anchor: Point::new(120.0, 30.0),
        calibration_eye_distance: 120.0,
        aspect_ratio: None,
    };
    Ok(Asset::from_image(spec, img)?)
}

async fn run_demo(
    manifest: Option<&Path>,
    frames: u32,
    scale: u32,
    opacity: u32,
    out: &Path,
) -> Result<()> {
    let target = match manifest {
        Some(path) => TryOnTarget::load(path)?,
        None => TryOnTarget::new("demo", None, demo_asset()?),
    };

    let backend = SyntheticBackend::new();
    let devices = DeviceManager::new(Arc::new(backend)).with_acquire_timeout(Some(Duration::from_secs(5)));
    let detector = StaticDetector::frontal(640, 480, 110.0).with_jitter(1.5);
    let mut session = Session::new(devices, Box::new(detector), target, SessionConfig::default());

    session.set_scale(scale);
    session.set_opacity(opacity);
    session.start(Facing::Front).await?;

    let mut processed = 0;
    while processed < frames {
        match tokio::time::timeout(Duration::from_secs(2), session.next_tick()).await {
            Ok(Tick::Frame(_)) => processed += 1,
            Ok(Tick::Lost(err)) => anyhow::bail!("camera lost: {err}"),
            Err(_) => anyhow::bail!("no frame within 2s"),
        }
    }

    let path = session.capture_to(out)?;
    let status = session.status();
    tracing::info!(frames = processed, path = %path.display(), "demo capture written");
    session.stop();

    println!("{}", serde_json::to_string_pretty(&status)?);
    println!("Saved {}", path.display());
    Ok(())
}
