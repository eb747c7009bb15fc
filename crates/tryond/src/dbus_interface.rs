use crate::engine::{EngineError, EngineHandle};
use tryon_core::session::SessionError;
use tryon_hw::{DeviceError, Facing};
use zbus::interface;

pub const BUS_NAME: &str = "io.tryon.Compositor1";
pub const OBJECT_PATH: &str = "/io/tryon/Compositor1";

/// D-Bus interface for the try-on compositor daemon.
///
/// Bus name: io.tryon.Compositor1
/// Object path: /io/tryon/Compositor1
pub struct CompositorService {
    engine: EngineHandle,
    default_facing: Facing,
}

impl CompositorService {
    pub fn new(engine: EngineHandle, default_facing: Facing) -> Self {
        Self {
            engine,
            default_facing,
        }
    }
}

fn to_fdo(err: EngineError) -> zbus::fdo::Error {
    let msg = err.to_string();
    match err {
        EngineError::Session(SessionError::Device(DeviceError::PermissionDenied)) => {
            zbus::fdo::Error::AccessDenied(msg)
        }
        EngineError::Session(SessionError::Device(DeviceError::Timeout)) => {
            zbus::fdo::Error::TimedOut(msg)
        }
        _ => zbus::fdo::Error::Failed(msg),
    }
}

#[interface(name = "io.tryon.Compositor1")]
impl CompositorService {
    /// Start the camera. An empty `facing` uses the configured default.
    async fn start(&self, facing: &str) -> zbus::fdo::Result<()> {
        let facing = if facing.trim().is_empty() {
            self.default_facing
        } else {
            facing
                .parse::<Facing>()
                .map_err(zbus::fdo::Error::InvalidArgs)?
        };
        tracing::info!(%facing, "start requested");
        self.engine.start(facing).await.map_err(to_fdo)
    }

    async fn stop(&self) -> zbus::fdo::Result<()> {
        tracing::info!("stop requested");
        self.engine.stop().await.map_err(to_fdo)
    }

    async fn switch_facing(&self) -> zbus::fdo::Result<()> {
        tracing::info!("switch facing requested");
        self.engine.switch_facing().await.map_err(to_fdo)
    }

    async fn retry(&self) -> zbus::fdo::Result<()> {
        tracing::info!("retry requested");
        self.engine.retry().await.map_err(to_fdo)
    }

    /// Capture the current composite and return the PNG path.
    async fn capture(&self) -> zbus::fdo::Result<String> {
        let path = self.engine.capture().await.map_err(to_fdo)?;
        Ok(path.to_string_lossy().into_owned())
    }

    /// Returns the applied (clamped) percentage.
    async fn set_scale(&self, percent: u32) -> zbus::fdo::Result<u32> {
        self.engine.set_scale(percent).await.map_err(to_fdo)
    }

    /// Returns the applied (clamped) percentage.
    async fn set_opacity(&self, percent: u32) -> zbus::fdo::Result<u32> {
        self.engine.set_opacity(percent).await.map_err(to_fdo)
    }

    async fn reset_scale(&self) -> zbus::fdo::Result<()> {
        self.engine.reset_scale().await.map_err(to_fdo)
    }

    async fn reset_opacity(&self) -> zbus::fdo::Result<()> {
        self.engine.reset_opacity().await.map_err(to_fdo)
    }

    async fn reset_params(&self) -> zbus::fdo::Result<()> {
        self.engine.reset_params().await.map_err(to_fdo)
    }

    /// Session status as JSON.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let status = self.engine.status().await.map_err(to_fdo)?;
        let mut value = serde_json::to_value(status)
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
        value["version"] = env!("CARGO_PKG_VERSION").into();
        Ok(value.to_string())
    }
}
