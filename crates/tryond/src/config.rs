use std::path::PathBuf;
use std::time::Duration;
use tryon_core::session::SessionConfig;
use tryon_hw::manager::DEFAULT_STALL_LIMIT;
use tryon_hw::Facing;

/// Which camera implementation the daemon drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraBackendKind {
    Synthetic,
    V4l2,
}

/// Which landmark detector feeds the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorKind {
    /// Fixed frontal face; useful without a model or with the synthetic camera.
    Static,
    Scrfd,
}

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub backend: CameraBackendKind,
    /// V4L2 node for the front (selfie) camera.
    pub front_device: Option<String>,
    /// V4L2 node for the rear camera.
    pub rear_device: Option<String>,
    /// Facing used when `Start` is called without one.
    pub preferred_facing: Facing,
    /// TOML manifest describing the product and its overlay asset.
    pub manifest_path: PathBuf,
    /// Where captured stills are written.
    pub capture_dir: PathBuf,
    /// Camera acquisition timeout; `None` waits indefinitely.
    pub acquire_timeout: Option<Duration>,
    /// A held camera silent for this long is treated as disconnected.
    pub stall_limit: Duration,
    pub detector: DetectorKind,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    pub confidence_threshold: f32,
    pub min_eye_distance: f32,
    pub smoothing: f32,
    pub frame_budget: Duration,
}

impl Config {
    /// Load configuration from `TRYON_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let defaults = SessionConfig::default();

        let backend = match env_string("TRYON_CAMERA_BACKEND").as_deref() {
            Some("v4l2") => CameraBackendKind::V4l2,
            Some("synthetic") | None => CameraBackendKind::Synthetic,
            Some(other) => {
                tracing::warn!(value = other, "unknown TRYON_CAMERA_BACKEND; using synthetic");
                CameraBackendKind::Synthetic
            }
        };

        let detector = match env_string("TRYON_DETECTOR").as_deref() {
            Some("scrfd") => DetectorKind::Scrfd,
            Some("static") | None => DetectorKind::Static,
            Some(other) => {
                tracing::warn!(value = other, "unknown TRYON_DETECTOR; using static");
                DetectorKind::Static
            }
        };

        let preferred_facing = env_string("TRYON_FACING")
            .and_then(|v| match v.parse() {
                Ok(facing) => Some(facing),
                Err(err) => {
                    tracing::warn!(%err, "ignoring TRYON_FACING");
                    None
                }
            })
            .unwrap_or(Facing::Front);

        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());

        let capture_dir = env_string("TRYON_CAPTURE_DIR")
            .map(PathBuf::from)
            .or_else(|| env_string("XDG_PICTURES_DIR").map(|d| PathBuf::from(d).join("tryon")))
            .unwrap_or_else(|| PathBuf::from(&home).join("Pictures/tryon"));

        let model_dir = env_string("TRYON_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(&home).join(".local/share/tryon/models"));

        let acquire_timeout = match env_u64("TRYON_ACQUIRE_TIMEOUT_MS", 0) {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        };

        let stall_limit = Duration::from_millis(env_u64(
            "TRYON_STALL_TIMEOUT_MS",
            DEFAULT_STALL_LIMIT.as_millis() as u64,
        ));

        Self {
            backend,
            front_device: env_string("TRYON_FRONT_DEVICE").or_else(|| Some("/dev/video0".into())),
            rear_device: env_string("TRYON_REAR_DEVICE"),
            preferred_facing,
            manifest_path: env_string("TRYON_MANIFEST")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("tryon.toml")),
            capture_dir,
            acquire_timeout,
            stall_limit,
            detector,
            model_dir,
            confidence_threshold: env_f32("TRYON_CONFIDENCE", defaults.confidence_threshold),
            min_eye_distance: env_f32("TRYON_MIN_EYE_DISTANCE", defaults.min_eye_distance),
            smoothing: env_f32("TRYON_SMOOTHING", defaults.smoothing),
            frame_budget: Duration::from_millis(env_u64(
                "TRYON_FRAME_BUDGET_MS",
                defaults.frame_budget.as_millis() as u64,
            )),
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            confidence_threshold: self.confidence_threshold,
            min_eye_distance: self.min_eye_distance,
            smoothing: self.smoothing,
            frame_budget: self.frame_budget,
            ..SessionConfig::default()
        }
    }

    /// Path to the SCRFD detection model.
    #[cfg_attr(not(feature = "onnx"), allow(dead_code))]
    pub fn scrfd_model_path(&self) -> PathBuf {
        self.model_dir.join("det_10g.onnx")
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_f32(key: &str, default: f32) -> f32 {
    env_string(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env_string(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_config_carries_tunables() {
        let mut config = Config::from_env();
        config.smoothing = 0.25;
        config.min_eye_distance = 20.0;
        let session = config.session_config();
        assert_eq!(session.smoothing, 0.25);
        assert_eq!(session.min_eye_distance, 20.0);
        assert_eq!(
            session.low_light_fraction,
            SessionConfig::default().low_light_fraction
        );
    }

    #[test]
    fn test_model_path_under_model_dir() {
        let mut config = Config::from_env();
        config.model_dir = PathBuf::from("/opt/models");
        assert_eq!(config.scrfd_model_path(), PathBuf::from("/opt/models/det_10g.onnx"));
    }
}
