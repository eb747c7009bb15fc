//! Face tracker: turns frames into [`FacePose`]s.
//!
//! The landmark model is an injected [`LandmarkDetector`]. The tracker owns
//! the contract around it: low-confidence results become "no face", and any
//! fault (malformed frame, detector error or panic, landmarks outside the
//! frame) is logged and degrades to "no face" for that tick only.

use crate::types::{FaceGeometry, FacePose, Landmarks, Point};
use rand::Rng;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tryon_hw::{DeviceError, FrameBuffer, FrameReceiver};

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;

#[derive(Error, Debug)]
pub enum TrackerFault {
    #[error("malformed frame: {width}x{height} with {len} bytes")]
    MalformedFrame { width: u32, height: u32, len: usize },
    #[error("detector failed: {0}")]
    Detector(String),
    #[error("detector panicked")]
    Panicked,
    #[error("landmark {0} is outside the frame")]
    LandmarkOutOfBounds(&'static str),
}

/// The most prominent face a detector found in a frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub landmarks: Landmarks,
    pub confidence: f32,
}

/// Face-landmark capability. Implementations may be stateful (inference
/// sessions) but must treat each frame independently.
pub trait LandmarkDetector: Send {
    fn detect(&mut self, frame: &FrameBuffer) -> Result<Option<Detection>, TrackerFault>;
}

pub struct FaceTracker {
    detector: Box<dyn LandmarkDetector>,
    confidence_threshold: f32,
    faults: u64,
}

impl FaceTracker {
    pub fn new(detector: Box<dyn LandmarkDetector>, confidence_threshold: f32) -> Self {
        Self {
            detector,
            confidence_threshold,
            faults: 0,
        }
    }

    /// Estimate the face pose in `frame`. Never fails.
    pub fn track(&mut self, frame: &FrameBuffer) -> FacePose {
        match self.try_track(frame) {
            Ok(pose) => pose,
            Err(fault) => {
                self.faults += 1;
                tracing::debug!(seq = frame.sequence(), %fault, "tracker fault; reporting no face");
                FacePose::NoFace
            }
        }
    }

    /// Number of ticks that degraded to "no face" because of a fault.
    pub fn fault_count(&self) -> u64 {
        self.faults
    }

    fn try_track(&mut self, frame: &FrameBuffer) -> Result<FacePose, TrackerFault> {
        if !frame.is_well_formed() {
            return Err(TrackerFault::MalformedFrame {
                width: frame.width(),
                height: frame.height(),
                len: frame.data().len(),
            });
        }

        let detector = &mut self.detector;
        let detection = panic::catch_unwind(AssertUnwindSafe(|| detector.detect(frame)))
            .map_err(|_| TrackerFault::Panicked)??;

        let Some(detection) = detection else {
            return Ok(FacePose::NoFace);
        };
        // NaN confidence fails this comparison too.
        if !(detection.confidence >= self.confidence_threshold) {
            tracing::trace!(confidence = detection.confidence, "face below confidence threshold");
            return Ok(FacePose::NoFace);
        }
        if let Some(name) = detection
            .landmarks
            .first_out_of_bounds(frame.width(), frame.height())
        {
            return Err(TrackerFault::LandmarkOutOfBounds(name));
        }

        Ok(FacePose::Detected(FaceGeometry::new(
            detection.landmarks,
            detection.confidence,
        )))
    }
}

/// Lazy pose sequence: one pose per delivered frame, for as long as a camera
/// is running. [`restart`](Self::restart) attaches a fresh frame source.
pub struct PoseStream {
    tracker: FaceTracker,
    frames: Option<FrameReceiver>,
}

impl PoseStream {
    pub fn new(tracker: FaceTracker) -> Self {
        Self {
            tracker,
            frames: None,
        }
    }

    /// Begin a new sequence from `frames`, discarding any previous source.
    pub fn restart(&mut self, frames: FrameReceiver) {
        self.frames = Some(frames);
    }

    /// Detach the frame source. [`next`](Self::next) then waits forever.
    pub fn stop(&mut self) {
        self.frames = None;
    }

    pub fn is_running(&self) -> bool {
        self.frames.is_some()
    }

    pub fn tracker(&self) -> &FaceTracker {
        &self.tracker
    }

    /// Track a frame that did not come from the attached source.
    pub fn track(&mut self, frame: &FrameBuffer) -> FacePose {
        self.tracker.track(frame)
    }

    /// Wait for the freshest frame and track it.
    ///
    /// Pending forever while no source is attached. Yields `Some(Err(..))`
    /// when the camera is lost and `None` once the source has ended; in both
    /// cases the source is detached.
    pub async fn next(&mut self) -> Option<Result<(Arc<FrameBuffer>, FacePose), DeviceError>> {
        let Some(frames) = self.frames.as_mut() else {
            return std::future::pending().await;
        };
        match frames.next().await {
            Some(Ok(frame)) => {
                let pose = self.tracker.track(&frame);
                Some(Ok((frame, pose)))
            }
            Some(Err(err)) => {
                self.frames = None;
                Some(Err(err))
            }
            None => {
                self.frames = None;
                None
            }
        }
    }
}

/// Detector that reports a configured face regardless of frame content.
///
/// Clones share the configured face, so a caller can change what every clone
/// reports. Used for demos and for driving the pipeline without a model.
#[derive(Clone, Default)]
pub struct StaticDetector {
    face: Arc<Mutex<Option<Detection>>>,
    jitter_px: f32,
}

impl StaticDetector {
    pub fn new(face: Option<Detection>) -> Self {
        Self {
            face: Arc::new(Mutex::new(face)),
            jitter_px: 0.0,
        }
    }

    /// An upright frontal face centred in a `width` x `height` frame with the
    /// given inter-eye distance.
    pub fn frontal(width: u32, height: u32, eye_distance: f32) -> Self {
        let (cx, cy) = (width as f32 / 2.0, height as f32 * 0.42);
        let half = eye_distance / 2.0;
        Self::new(Some(Detection {
            landmarks: Landmarks {
                left_eye: Point::new(cx - half, cy),
                right_eye: Point::new(cx + half, cy),
                nose_bridge: Point::new(cx, cy + eye_distance * 0.08),
                chin: Point::new(cx, (cy + eye_distance * 1.6).min(height as f32 - 1.0)),
            },
            confidence: 0.99,
        }))
    }

    /// Add uniform noise of up to `px` pixels to every reported landmark.
    pub fn with_jitter(mut self, px: f32) -> Self {
        self.jitter_px = px.max(0.0);
        self
    }

    /// Change the face reported by this detector and all its clones.
    pub fn set_face(&self, face: Option<Detection>) {
        *self.face.lock().unwrap_or_else(|p| p.into_inner()) = face;
    }

    /// The configured face, before jitter.
    pub fn current(&self) -> Option<Detection> {
        *self.face.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl LandmarkDetector for StaticDetector {
    fn detect(&mut self, _frame: &FrameBuffer) -> Result<Option<Detection>, TrackerFault> {
        let Some(mut face) = self.current() else {
            return Ok(None);
        };
        if self.jitter_px > 0.0 {
            let mut rng = rand::thread_rng();
            let j = self.jitter_px;
            let lm = &mut face.landmarks;
            for p in [&mut lm.left_eye, &mut lm.right_eye, &mut lm.nose_bridge, &mut lm.chin] {
                p.x += rng.gen_range(-j..=j);
                p.y += rng.gen_range(-j..=j);
            }
        }
        Ok(Some(face))
    }
}
