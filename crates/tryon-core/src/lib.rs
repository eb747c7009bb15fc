//! tryon-core — Face tracking, asset placement and compositing for virtual try-on.
//!
//! Frames from `tryon-hw` flow through the [`tracker`] (landmarks → pose),
//! the [`placement`] solver (pose → asset transform) and the [`compositor`]
//! (transform → display surface / still). [`session`] drives the pipeline and
//! owns the camera lifecycle.

pub mod asset;
pub mod compositor;
pub mod placement;
#[cfg(feature = "onnx")]
pub mod scrfd;
pub mod session;
pub mod tracker;
pub mod types;

pub use asset::{Asset, AssetError, AssetSpec, TryOnTarget};
pub use compositor::{CaptureError, CapturedImage, Compositor, DisplaySurface, RenderError};
pub use placement::PlacementSolver;
pub use session::{Session, SessionConfig, SessionError, SessionState, SessionStatus, StartKind, Tick};
pub use tracker::{Detection, FaceTracker, LandmarkDetector, PoseStream, StaticDetector, TrackerFault};
pub use types::{FaceGeometry, FacePose, Landmarks, PlacementTransform, Point, RenderParams};
