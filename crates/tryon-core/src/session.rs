//! Try-on session: camera lifecycle, per-frame pipeline and user actions.
//!
//! ```text
//! Idle ──start──▶ Starting ──ok──▶ Active{face} ──stop──▶ Stopped
//!                    │                 │
//!                    └──err──▶ Error ◀─┘ (device loss)
//!                              │
//!                              └──retry──▶ Starting
//! ```
//!
//! Acquisition is split into [`Session::begin`] (validate and enter
//! `Starting`) and [`Session::acquire`] (await the camera) so a driver can
//! keep answering status queries, or cancel by dropping the acquire future
//! and calling [`Session::stop`], while a permission prompt is pending.

use crate::asset::TryOnTarget;
use crate::compositor::{CaptureError, CapturedImage, Compositor, DisplaySurface, DEFAULT_FRAME_BUDGET};
use crate::placement::{PlacementSolver, DEFAULT_SMOOTHING, MIN_EYE_DISTANCE_PX};
use crate::tracker::{FaceTracker, LandmarkDetector, PoseStream, DEFAULT_CONFIDENCE_THRESHOLD};
use crate::types::{FacePose, PlacementTransform, RenderParams};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tryon_hw::{CameraDevice, DeviceError, DeviceManager, Facing, FrameBuffer, FrameReceiver};
use uuid::Uuid;

/// Fraction of dark pixels above which the low-light hint is raised.
pub const DEFAULT_LOW_LIGHT_FRACTION: f32 = 0.6;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error("session is already starting or active")]
    AlreadyActive,
    #[error("cannot {action} while {state}")]
    InvalidTransition {
        action: &'static str,
        state: &'static str,
    },
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error("camera start was cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Idle,
    Starting,
    Active { face_detected: bool },
    Error(DeviceError),
    Stopped,
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Starting => "starting",
            SessionState::Active { .. } => "active",
            SessionState::Error(_) => "error",
            SessionState::Stopped => "stopped",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Active { .. })
    }
}

/// Tunables for the per-frame pipeline.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub confidence_threshold: f32,
    pub min_eye_distance: f32,
    pub smoothing: f32,
    pub frame_budget: Duration,
    pub low_light_fraction: f32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            min_eye_distance: MIN_EYE_DISTANCE_PX,
            smoothing: DEFAULT_SMOOTHING,
            frame_budget: DEFAULT_FRAME_BUDGET,
            low_light_fraction: DEFAULT_LOW_LIGHT_FRACTION,
        }
    }
}

/// What a validated start-like request will acquire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingStart {
    Open(Facing),
    Switch,
}

/// Request kinds accepted by [`Session::begin`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartKind {
    Start(Facing),
    Retry,
    SwitchFacing,
}

/// Outcome of one pipeline step.
#[derive(Debug, Clone)]
pub enum Tick {
    Frame(TickReport),
    Lost(DeviceError),
}

#[derive(Debug, Clone)]
pub struct TickReport {
    pub sequence: u32,
    pub face_detected: bool,
    pub transform: Option<PlacementTransform>,
    pub rendered: bool,
}

/// Snapshot for external observers.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub session_id: String,
    pub state: &'static str,
    pub face_detected: bool,
    pub error: Option<String>,
    pub facing: Facing,
    pub device: Option<String>,
    pub product_id: String,
    pub return_to: Option<String>,
    pub scale_pct: u32,
    pub opacity_pct: u32,
    pub low_light: bool,
    pub frames: u64,
    pub dropped_frames: u64,
    pub tracker_faults: u64,
    pub render_overruns: u64,
}

#[derive(Debug, Default)]
struct FrameStats {
    frames: u64,
    dropped: u64,
    last_sequence: Option<u32>,
}

impl FrameStats {
    fn record(&mut self, sequence: u32) {
        self.frames += 1;
        if let Some(prev) = self.last_sequence {
            let gap = sequence.wrapping_sub(prev);
            if gap > 1 && gap < u32::MAX / 2 {
                self.dropped += u64::from(gap - 1);
            }
        }
        self.last_sequence = Some(sequence);
    }
}

pub struct Session {
    id: Uuid,
    state: SessionState,
    devices: DeviceManager,
    poses: PoseStream,
    solver: PlacementSolver,
    compositor: Compositor,
    target: TryOnTarget,
    params: RenderParams,
    config: SessionConfig,
    stats: FrameStats,
    low_light: bool,
}

impl Session {
    pub fn new(
        devices: DeviceManager,
        detector: Box<dyn LandmarkDetector>,
        target: TryOnTarget,
        config: SessionConfig,
    ) -> Self {
        let id = Uuid::new_v4();
        tracing::info!(session = %id, product = %target.product_id, "try-on session created");
        Self {
            id,
            state: SessionState::Idle,
            devices,
            poses: PoseStream::new(FaceTracker::new(detector, config.confidence_threshold)),
            solver: PlacementSolver::new(config.smoothing, config.min_eye_distance),
            compositor: Compositor::new(Arc::clone(&target.asset), config.frame_budget),
            target,
            params: RenderParams::default(),
            config,
            stats: FrameStats::default(),
            low_light: false,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn target(&self) -> &TryOnTarget {
        &self.target
    }

    pub fn params(&self) -> RenderParams {
        self.params
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn current_device(&self) -> Option<&CameraDevice> {
        self.devices.current()
    }

    pub fn is_holding_device(&self) -> bool {
        self.devices.is_holding()
    }

    pub fn last_surface(&self) -> Option<Arc<DisplaySurface>> {
        self.compositor.last_surface()
    }

    /// Acquire the camera facing `facing` and enter `Active`.
    pub async fn start(&mut self, facing: Facing) -> Result<(), SessionError> {
        let pending = self.begin(StartKind::Start(facing))?;
        self.acquire(pending).await
    }

    /// Try the last requested facing again after an error.
    pub async fn retry(&mut self) -> Result<(), SessionError> {
        let pending = self.begin(StartKind::Retry)?;
        self.acquire(pending).await
    }

    /// Release the current camera and acquire the opposite facing.
    pub async fn switch_facing(&mut self) -> Result<(), SessionError> {
        let pending = self.begin(StartKind::SwitchFacing)?;
        self.acquire(pending).await
    }

    /// Validate a start-like request against the current state and enter
    /// `Starting`. Nothing is acquired until [`acquire`](Self::acquire).
    pub fn begin(&mut self, kind: StartKind) -> Result<PendingStart, SessionError> {
        let pending = match (kind, &self.state) {
            (StartKind::Start(_), SessionState::Starting | SessionState::Active { .. }) => {
                return Err(SessionError::AlreadyActive);
            }
            (StartKind::Start(_), state @ SessionState::Error(_)) => {
                return Err(SessionError::InvalidTransition {
                    action: "start",
                    state: state.name(),
                });
            }
            (StartKind::Start(facing), _) => PendingStart::Open(facing),
            (StartKind::Retry, SessionState::Error(_)) => PendingStart::Open(self.devices.facing()),
            (StartKind::Retry, state) => {
                return Err(SessionError::InvalidTransition {
                    action: "retry",
                    state: state.name(),
                });
            }
            (StartKind::SwitchFacing, SessionState::Active { .. }) => PendingStart::Switch,
            (StartKind::SwitchFacing, state) => {
                return Err(SessionError::InvalidTransition {
                    action: "switch camera",
                    state: state.name(),
                });
            }
        };
        tracing::info!(session = %self.id, ?kind, "starting camera");
        self.poses.stop();
        self.state = SessionState::Starting;
        Ok(pending)
    }

    /// Await the acquisition validated by [`begin`](Self::begin).
    ///
    /// Dropping this future leaves the session in `Starting`; call
    /// [`stop`](Self::stop) afterwards to settle it.
    pub async fn acquire(&mut self, pending: PendingStart) -> Result<(), SessionError> {
        let result = match pending {
            PendingStart::Open(facing) => self.devices.start(facing).await,
            PendingStart::Switch => self.devices.switch_facing().await,
        };
        self.finish_start(result)
    }

    fn finish_start(
        &mut self,
        result: Result<(CameraDevice, FrameReceiver), DeviceError>,
    ) -> Result<(), SessionError> {
        match result {
            Ok((device, frames)) => {
                self.poses.restart(frames);
                self.solver.reset();
                self.compositor.clear();
                self.stats.last_sequence = None;
                self.low_light = false;
                self.state = SessionState::Active {
                    face_detected: false,
                };
                tracing::info!(
                    session = %self.id,
                    device = %device.id,
                    facing = %device.facing,
                    "session active"
                );
                Ok(())
            }
            Err(err) => {
                self.fail(err.clone());
                Err(SessionError::Device(err))
            }
        }
    }

    /// Release everything and enter `Stopped`. Always succeeds.
    pub fn stop(&mut self) {
        self.devices.stop();
        self.poses.stop();
        self.solver.reset();
        if self.state != SessionState::Stopped {
            tracing::info!(session = %self.id, from = self.state.name(), "session stopped");
        }
        self.state = SessionState::Stopped;
    }

    fn fail(&mut self, err: DeviceError) {
        tracing::warn!(session = %self.id, error = %err, "camera error");
        self.devices.stop();
        self.poses.stop();
        self.solver.reset();
        self.state = SessionState::Error(err);
    }

    /// Wait for the next camera frame and run it through the pipeline.
    ///
    /// Pending forever while no camera is running. Cancel-safe: a frame is
    /// only taken once it is processed in the same poll.
    pub async fn next_tick(&mut self) -> Tick {
        match self.poses.next().await {
            Some(Ok((frame, pose))) => Tick::Frame(self.process_frame(&frame, &pose)),
            Some(Err(err)) => {
                self.fail(err.clone());
                Tick::Lost(err)
            }
            None => {
                let err = DeviceError::Disconnected("frame stream ended".into());
                self.fail(err.clone());
                Tick::Lost(err)
            }
        }
    }

    /// Solve and render one frame with an already tracked pose.
    pub fn process_frame(&mut self, frame: &FrameBuffer, pose: &FacePose) -> TickReport {
        self.stats.record(frame.sequence());

        let transform = self
            .solver
            .solve(pose, self.target.asset.spec(), &self.params);
        let face_detected = transform.is_some();

        let rendered = match self
            .compositor
            .render_frame(frame, transform.as_ref(), &self.params)
        {
            Ok(_) => true,
            Err(err) => {
                tracing::warn!(seq = frame.sequence(), error = %err, "frame not rendered");
                false
            }
        };

        let dark = frame.is_dark(self.config.low_light_fraction);
        if dark != self.low_light {
            tracing::info!(session = %self.id, low_light = dark, "lighting changed");
            self.low_light = dark;
        }

        if let SessionState::Active { face_detected: shown } = &mut self.state {
            if *shown != face_detected {
                tracing::debug!(session = %self.id, face_detected, "face presence changed");
                *shown = face_detected;
            }
        }

        TickReport {
            sequence: frame.sequence(),
            face_detected,
            transform,
            rendered,
        }
    }

    /// Snapshot the last rendered surface. Only valid while active.
    pub fn capture(&self) -> Result<CapturedImage, SessionError> {
        if !self.state.is_active() {
            return Err(SessionError::InvalidTransition {
                action: "capture",
                state: self.state.name(),
            });
        }
        let still = self.compositor.capture_still()?;
        tracing::info!(session = %self.id, filename = %still.filename, "captured still");
        Ok(still)
    }

    /// Capture and write the PNG into `dir`.
    pub fn capture_to(&self, dir: &Path) -> Result<PathBuf, SessionError> {
        Ok(self.capture()?.save(dir)?)
    }

    pub fn set_scale(&mut self, pct: u32) -> u32 {
        let applied = self.params.set_scale(pct);
        if applied != pct {
            tracing::debug!(requested = pct, applied, "scale clamped");
        }
        applied
    }

    pub fn set_opacity(&mut self, pct: u32) -> u32 {
        let applied = self.params.set_opacity(pct);
        if applied != pct {
            tracing::debug!(requested = pct, applied, "opacity clamped");
        }
        applied
    }

    pub fn reset_scale(&mut self) {
        self.params.reset_scale();
    }

    pub fn reset_opacity(&mut self) {
        self.params.reset_opacity();
    }

    pub fn reset_params(&mut self) {
        self.params.reset();
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            session_id: self.id.to_string(),
            state: self.state.name(),
            face_detected: matches!(
                self.state,
                SessionState::Active {
                    face_detected: true
                }
            ),
            error: match &self.state {
                SessionState::Error(err) => Some(err.to_string()),
                _ => None,
            },
            facing: self.devices.facing(),
            device: self.devices.current().map(|d| d.name.clone()),
            product_id: self.target.product_id.clone(),
            return_to: self.target.return_to.clone(),
            scale_pct: self.params.scale_pct(),
            opacity_pct: self.params.opacity_pct(),
            low_light: self.low_light,
            frames: self.stats.frames,
            dropped_frames: self.stats.dropped,
            tracker_faults: self.poses.tracker().fault_count(),
            render_overruns: self.compositor.over_budget_count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::{Asset, AssetSpec};
    use crate::tracker::StaticDetector;
    use crate::types::Point;
    use image::{Rgba, RgbaImage};
    use tryon_hw::synthetic::synthetic_device;
    use tryon_hw::SyntheticBackend;

    fn target() -> TryOnTarget {
        let spec = AssetSpec {
            image: PathBuf::from("frames.png"),
            anchor: Point::new(40.0, 10.0),
            calibration_eye_distance: 100.0,
            aspect_ratio: None,
        };
        let img = RgbaImage::from_pixel(80, 20, Rgba([20, 20, 20, 255]));
        TryOnTarget::new("7", Some("/product/7".into()), Asset::from_image(spec, img).unwrap())
    }

    fn backend() -> SyntheticBackend {
        SyntheticBackend::with_devices_and_interval(
            vec![
                synthetic_device("front", Facing::Front),
                synthetic_device("rear", Facing::Rear),
            ],
            Duration::from_millis(2),
        )
    }

    fn session(backend: &SyntheticBackend, detector: StaticDetector) -> Session {
        Session::new(
            DeviceManager::new(Arc::new(backend.clone())),
            Box::new(detector),
            target(),
            SessionConfig::default(),
        )
    }

    async fn tick(s: &mut Session) -> Tick {
        tokio::time::timeout(Duration::from_secs(2), s.next_tick())
            .await
            .expect("tick timed out")
    }

    #[test]
    fn test_frame_stats_count_gaps() {
        let mut stats = FrameStats::default();
        for seq in [0, 1, 4, 5, 9] {
            stats.record(seq);
        }
        assert_eq!(stats.frames, 5);
        assert_eq!(stats.dropped, 5);
    }

    #[tokio::test]
    async fn test_start_enters_active_without_face() {
        let backend = backend();
        let mut s = session(&backend, StaticDetector::new(None));
        assert_eq!(s.state(), &SessionState::Idle);

        s.start(Facing::Front).await.unwrap();
        assert_eq!(s.state(), &SessionState::Active { face_detected: false });
        assert_eq!(backend.held_count(), 1);
    }

    #[tokio::test]
    async fn test_start_twice_is_already_active() {
        let backend = backend();
        let mut s = session(&backend, StaticDetector::new(None));
        s.start(Facing::Front).await.unwrap();
        assert!(matches!(
            s.start(Facing::Rear).await,
            Err(SessionError::AlreadyActive)
        ));
        assert!(s.state().is_active());
        assert_eq!(backend.held_count(), 1);
    }

    #[tokio::test]
    async fn test_face_detection_updates_state() {
        let backend = backend();
        let detector = StaticDetector::new(None);
        let mut s = session(&backend, detector.clone());
        s.start(Facing::Front).await.unwrap();

        let Tick::Frame(report) = tick(&mut s).await else {
            panic!("expected a frame");
        };
        assert!(!report.face_detected);
        assert!(report.rendered);

        detector.set_face(StaticDetector::frontal(640, 480, 120.0).current());
        let Tick::Frame(report) = tick(&mut s).await else {
            panic!("expected a frame");
        };
        assert!(report.face_detected);
        assert_eq!(s.state(), &SessionState::Active { face_detected: true });
        assert!(s.status().face_detected);
    }

    #[tokio::test]
    async fn test_device_loss_enters_error_and_releases() {
        let backend = backend();
        backend.set_fail_after(Some(2));
        let mut s = session(&backend, StaticDetector::new(None));
        s.start(Facing::Front).await.unwrap();

        loop {
            if let Tick::Lost(err) = tick(&mut s).await {
                assert!(matches!(err, DeviceError::Disconnected(_)));
                break;
            }
        }
        assert!(matches!(s.state(), SessionState::Error(DeviceError::Disconnected(_))));
        assert!(!s.is_holding_device());
        assert_eq!(backend.held_count(), 0);

        backend.set_fail_after(None);
        s.retry().await.unwrap();
        assert!(s.state().is_active());
    }

    #[tokio::test]
    async fn test_start_from_error_is_rejected() {
        let backend = backend();
        backend.set_permission_denied(true);
        let mut s = session(&backend, StaticDetector::new(None));
        assert!(s.start(Facing::Front).await.is_err());

        backend.set_permission_denied(false);
        assert!(matches!(
            s.start(Facing::Front).await,
            Err(SessionError::InvalidTransition { action: "start", state: "error" })
        ));
        assert_eq!(s.state(), &SessionState::Error(DeviceError::PermissionDenied));
        assert_eq!(backend.held_count(), 0);

        s.retry().await.unwrap();
        assert!(s.state().is_active());
    }

    #[tokio::test]
    async fn test_acquire_timeout_enters_error() {
        let backend = backend();
        backend.set_acquire_delay(Duration::from_millis(150));
        let devices = DeviceManager::new(Arc::new(backend.clone()))
            .with_acquire_timeout(Some(Duration::from_millis(20)));
        let mut s = Session::new(
            devices,
            Box::new(StaticDetector::new(None)),
            target(),
            SessionConfig::default(),
        );

        assert!(matches!(
            s.start(Facing::Front).await,
            Err(SessionError::Device(DeviceError::Timeout))
        ));
        assert_eq!(s.state(), &SessionState::Error(DeviceError::Timeout));
        assert!(s.status().error.is_some());
        assert!(!s.is_holding_device());

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(backend.held_count(), 0, "late device must be released");

        backend.set_acquire_delay(Duration::ZERO);
        s.retry().await.unwrap();
        assert!(s.state().is_active());
    }

    #[tokio::test]
    async fn test_stalled_camera_enters_error() {
        let backend = backend();
        backend.set_stall_after(Some(2));
        let devices = DeviceManager::new(Arc::new(backend.clone()))
            .with_stall_limit(Duration::from_millis(40));
        let mut s = Session::new(
            devices,
            Box::new(StaticDetector::new(None)),
            target(),
            SessionConfig::default(),
        );
        s.start(Facing::Front).await.unwrap();

        loop {
            if let Tick::Lost(err) = tick(&mut s).await {
                assert!(matches!(err, DeviceError::Disconnected(_)));
                break;
            }
        }
        assert!(matches!(s.state(), SessionState::Error(DeviceError::Disconnected(_))));
        assert_eq!(backend.held_count(), 0);
    }

    #[tokio::test]
    async fn test_low_light_follows_frames() {
        let backend = backend();
        let mut s = session(&backend, StaticDetector::new(None));
        assert!(!s.status().low_light);

        s.process_frame(&FrameBuffer::filled(64, 48, [8, 8, 8], 0), &FacePose::NoFace);
        assert!(s.status().low_light);

        s.process_frame(&FrameBuffer::filled(64, 48, [180, 170, 160], 1), &FacePose::NoFace);
        assert!(!s.status().low_light);
    }

    #[tokio::test]
    async fn test_retry_only_from_error() {
        let backend = backend();
        let mut s = session(&backend, StaticDetector::new(None));
        assert!(matches!(
            s.retry().await,
            Err(SessionError::InvalidTransition { action: "retry", state: "idle" })
        ));
        assert_eq!(s.state(), &SessionState::Idle);
    }

    #[tokio::test]
    async fn test_switch_requires_active() {
        let backend = backend();
        let mut s = session(&backend, StaticDetector::new(None));
        assert!(matches!(
            s.switch_facing().await,
            Err(SessionError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_switch_round_trip() {
        let backend = backend();
        let mut s = session(&backend, StaticDetector::new(None));
        s.start(Facing::Front).await.unwrap();

        s.switch_facing().await.unwrap();
        assert_eq!(s.current_device().map(|d| d.facing), Some(Facing::Rear));
        assert_eq!(s.state(), &SessionState::Active { face_detected: false });

        s.switch_facing().await.unwrap();
        assert_eq!(s.current_device().map(|d| d.facing), Some(Facing::Front));
        assert_eq!(backend.held_count(), 1);
    }

    #[tokio::test]
    async fn test_capture_requires_active_and_frame() {
        let backend = backend();
        let mut s = session(&backend, StaticDetector::new(None));
        assert!(matches!(
            s.capture(),
            Err(SessionError::InvalidTransition { action: "capture", .. })
        ));

        s.start(Facing::Front).await.unwrap();
        assert!(matches!(
            s.capture(),
            Err(SessionError::Capture(CaptureError::NoFrameYet))
        ));
        assert!(s.state().is_active(), "capture errors leave state unchanged");

        tick(&mut s).await;
        assert!(s.capture().is_ok());
    }

    #[tokio::test]
    async fn test_params_available_in_every_state() {
        let backend = backend();
        let mut s = session(&backend, StaticDetector::new(None));
        assert_eq!(s.set_scale(150), 120);
        assert_eq!(s.set_opacity(40), 50);
        s.reset_scale();
        assert_eq!(s.params().scale_pct(), 100);
        assert_eq!(s.params().opacity_pct(), 50);
        s.stop();
        s.set_scale(90);
        s.reset_params();
        assert_eq!(s.params(), RenderParams::default());
    }

    #[tokio::test]
    async fn test_stop_from_any_state() {
        let backend = backend();
        let mut s = session(&backend, StaticDetector::new(None));
        s.stop();
        assert_eq!(s.state(), &SessionState::Stopped);

        s.start(Facing::Front).await.unwrap();
        s.stop();
        s.stop();
        assert_eq!(s.state(), &SessionState::Stopped);
        assert_eq!(backend.held_count(), 0);

        s.start(Facing::Front).await.unwrap();
        assert!(s.state().is_active());
    }

    #[tokio::test]
    async fn test_dropped_acquire_then_stop_releases() {
        let backend = backend();
        backend.set_acquire_delay(Duration::from_millis(80));
        let mut s = session(&backend, StaticDetector::new(None));

        let pending = s.begin(StartKind::Start(Facing::Front)).unwrap();
        assert_eq!(s.status().state, "starting");
        let cancelled = tokio::time::timeout(Duration::from_millis(10), s.acquire(pending)).await;
        assert!(cancelled.is_err());
        assert_eq!(s.state(), &SessionState::Starting);

        s.stop();
        assert_eq!(s.state(), &SessionState::Stopped);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(backend.held_count(), 0);
    }

    #[tokio::test]
    async fn test_status_serializes() {
        let backend = backend();
        let mut s = session(&backend, StaticDetector::new(None));
        s.set_opacity(70);
        let json = serde_json::to_value(s.status()).unwrap();
        assert_eq!(json["state"], "idle");
        assert_eq!(json["product_id"], "7");
        assert_eq!(json["return_to"], "/product/7");
        assert_eq!(json["opacity_pct"], 70);
        assert_eq!(json["facing"], "front");
        assert!(json["error"].is_null());
    }
}
