use anyhow::{Context, Result};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tryon_core::asset::TryOnTarget;
use tryon_core::session::Session;
use tryon_core::tracker::{LandmarkDetector, StaticDetector};
use tryon_hw::{CameraBackend, DeviceManager, SyntheticBackend};

mod config;
mod dbus_interface;
mod engine;

use config::{CameraBackendKind, Config, DetectorKind};

/// Frame size the static detector places its face in.
const STATIC_FRAME: (u32, u32) = (640, 480);
const STATIC_EYE_DISTANCE: f32 = 120.0;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env();
    tracing::info!(?config, "tryond starting");

    let target = TryOnTarget::load(&config.manifest_path)
        .with_context(|| format!("loading manifest {}", config.manifest_path.display()))?;
    let backend = camera_backend(&config)?;
    let detector = landmark_detector(&config)?;

    let devices = DeviceManager::new(backend)
        .with_acquire_timeout(config.acquire_timeout)
        .with_stall_limit(config.stall_limit);
    let session = Session::new(devices, detector, target, config.session_config());
    let engine = engine::spawn_engine(session, config.capture_dir.clone())?;

    let service = dbus_interface::CompositorService::new(engine.clone(), config.preferred_facing);
    let _conn = zbus::connection::Builder::session()?
        .name(dbus_interface::BUS_NAME)?
        .serve_at(dbus_interface::OBJECT_PATH, service)?
        .build()
        .await
        .context("registering on the session bus")?;

    tracing::info!(
        bus = dbus_interface::BUS_NAME,
        path = dbus_interface::OBJECT_PATH,
        "tryond ready"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("tryond shutting down");
    if let Err(err) = engine.stop().await {
        tracing::warn!(error = %err, "engine did not stop cleanly");
    }

    Ok(())
}

fn camera_backend(config: &Config) -> Result<Arc<dyn CameraBackend>> {
    match config.backend {
        CameraBackendKind::Synthetic => {
            tracing::info!("using synthetic camera");
            Ok(Arc::new(SyntheticBackend::new()))
        }
        #[cfg(feature = "v4l2")]
        CameraBackendKind::V4l2 => {
            tracing::info!(
                front = ?config.front_device,
                rear = ?config.rear_device,
                "using V4L2 cameras"
            );
            Ok(Arc::new(tryon_hw::v4l2::V4l2Backend::new(
                config.front_device.clone(),
                config.rear_device.clone(),
            )))
        }
        #[cfg(not(feature = "v4l2"))]
        CameraBackendKind::V4l2 => {
            anyhow::bail!("TRYON_CAMERA_BACKEND=v4l2 requires tryond built with --features v4l2")
        }
    }
}

fn landmark_detector(config: &Config) -> Result<Box<dyn LandmarkDetector>> {
    match config.detector {
        DetectorKind::Static => {
            let (w, h) = STATIC_FRAME;
            Ok(Box::new(StaticDetector::frontal(w, h, STATIC_EYE_DISTANCE)))
        }
        #[cfg(feature = "onnx")]
        DetectorKind::Scrfd => {
            let path = config.scrfd_model_path();
            let detector = tryon_core::scrfd::ScrfdDetector::load(&path)
                .with_context(|| format!("loading SCRFD model {}", path.display()))?;
            Ok(Box::new(detector))
        }
        #[cfg(not(feature = "onnx"))]
        DetectorKind::Scrfd => {
            anyhow::bail!("TRYON_DETECTOR=scrfd requires tryond built with --features onnx")
        }
    }
}
