use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;

/// A point in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f32 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    pub fn midpoint(&self, other: &Point) -> Point {
        self.lerp(other, 0.5)
    }

    /// Linear interpolation: `t = 0` is `self`, `t = 1` is `other`.
    pub fn lerp(&self, other: &Point, t: f32) -> Point {
        Point::new(
            self.x + (other.x - self.x) * t,
            self.y + (other.y - self.y) * t,
        )
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// The named facial landmarks the placement pipeline consumes.
///
/// "Left" and "right" are as seen in the image: `left_eye` has the smaller x
/// for an upright face.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Landmarks {
    pub left_eye: Point,
    pub right_eye: Point,
    pub nose_bridge: Point,
    pub chin: Point,
}

impl Landmarks {
    pub fn named(&self) -> [(&'static str, Point); 4] {
        [
            ("left_eye", self.left_eye),
            ("right_eye", self.right_eye),
            ("nose_bridge", self.nose_bridge),
            ("chin", self.chin),
        ]
    }

    /// Name of the first landmark that is non-finite or outside a
    /// `width` x `height` frame.
    pub fn first_out_of_bounds(&self, width: u32, height: u32) -> Option<&'static str> {
        let (w, h) = (width as f32, height as f32);
        self.named()
            .into_iter()
            .find(|(_, p)| !p.is_finite() || p.x < 0.0 || p.y < 0.0 || p.x >= w || p.y >= h)
            .map(|(name, _)| name)
    }
}

/// Geometry of a detected face in frame pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FaceGeometry {
    landmarks: Landmarks,
    inter_eye_distance: f32,
    roll: f32,
    confidence: f32,
}

impl FaceGeometry {
    /// Derive inter-eye distance and roll from the landmarks.
    pub fn new(landmarks: Landmarks, confidence: f32) -> Self {
        let dx = landmarks.right_eye.x - landmarks.left_eye.x;
        let dy = landmarks.right_eye.y - landmarks.left_eye.y;
        Self {
            landmarks,
            inter_eye_distance: dx.hypot(dy),
            roll: dy.atan2(dx),
            confidence,
        }
    }

    pub fn landmarks(&self) -> &Landmarks {
        &self.landmarks
    }

    pub fn inter_eye_distance(&self) -> f32 {
        self.inter_eye_distance
    }

    /// In-plane head rotation in radians; positive when the right eye sits
    /// lower in the image than the left.
    pub fn roll(&self) -> f32 {
        self.roll
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }
}

/// Per-frame tracker output. A missing face carries no geometry at all.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
#[serde(tag = "presence", content = "face", rename_all = "snake_case")]
pub enum FacePose {
    #[default]
    NoFace,
    Detected(FaceGeometry),
}

impl FacePose {
    pub fn is_present(&self) -> bool {
        matches!(self, FacePose::Detected(_))
    }

    pub fn face(&self) -> Option<&FaceGeometry> {
        match self {
            FacePose::Detected(face) => Some(face),
            FacePose::NoFace => None,
        }
    }
}

pub const SCALE_RANGE_PCT: RangeInclusive<u32> = 80..=120;
pub const OPACITY_RANGE_PCT: RangeInclusive<u32> = 50..=100;
pub const DEFAULT_SCALE_PCT: u32 = 100;
pub const DEFAULT_OPACITY_PCT: u32 = 100;

/// User-tunable overlay settings, in percent. Values are always inside
/// [`SCALE_RANGE_PCT`] and [`OPACITY_RANGE_PCT`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderParams {
    scale_pct: u32,
    opacity_pct: u32,
}

impl Default for RenderParams {
    fn default() -> Self {
        Self {
            scale_pct: DEFAULT_SCALE_PCT,
            opacity_pct: DEFAULT_OPACITY_PCT,
        }
    }
}

impl RenderParams {
    /// Build params, clamping both values into range.
    pub fn new(scale_pct: u32, opacity_pct: u32) -> Self {
        let mut params = Self::default();
        params.set_scale(scale_pct);
        params.set_opacity(opacity_pct);
        params
    }

    pub fn scale_pct(&self) -> u32 {
        self.scale_pct
    }

    pub fn opacity_pct(&self) -> u32 {
        self.opacity_pct
    }

    /// Multiplier applied on top of the face-derived scale.
    pub fn scale_factor(&self) -> f32 {
        self.scale_pct as f32 / 100.0
    }

    /// Overlay opacity in [0.5, 1.0].
    pub fn opacity(&self) -> f32 {
        self.opacity_pct as f32 / 100.0
    }

    /// Set the scale, clamped into range. Returns the applied value.
    pub fn set_scale(&mut self, pct: u32) -> u32 {
        self.scale_pct = pct.clamp(*SCALE_RANGE_PCT.start(), *SCALE_RANGE_PCT.end());
        self.scale_pct
    }

    /// Set the opacity, clamped into range. Returns the applied value.
    pub fn set_opacity(&mut self, pct: u32) -> u32 {
        self.opacity_pct = pct.clamp(*OPACITY_RANGE_PCT.start(), *OPACITY_RANGE_PCT.end());
        self.opacity_pct
    }

    pub fn reset_scale(&mut self) {
        self.scale_pct = DEFAULT_SCALE_PCT;
    }

    pub fn reset_opacity(&mut self) {
        self.opacity_pct = DEFAULT_OPACITY_PCT;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Where and how to draw the asset for one frame.
///
/// Maps an asset pixel `p` to `R(rotation) · S · (p − anchor) + translation`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PlacementTransform {
    /// Frame position of the asset anchor.
    pub translation: Point,
    pub scale_x: f32,
    pub scale_y: f32,
    /// Radians, clockwise in image coordinates (y down).
    pub rotation: f32,
    /// Asset-space pivot.
    pub anchor: Point,
}

impl PlacementTransform {
    /// Asset pixel → frame pixel.
    pub fn apply(&self, p: Point) -> Point {
        let (sin, cos) = self.rotation.sin_cos();
        let u = (p.x - self.anchor.x) * self.scale_x;
        let v = (p.y - self.anchor.y) * self.scale_y;
        Point::new(
            cos * u - sin * v + self.translation.x,
            sin * u + cos * v + self.translation.y,
        )
    }

    /// Frame pixel → asset pixel. `None` for a degenerate scale.
    pub fn invert(&self, p: Point) -> Option<Point> {
        if self.scale_x.abs() < 1e-6 || self.scale_y.abs() < 1e-6 {
            return None;
        }
        let (sin, cos) = self.rotation.sin_cos();
        let dx = p.x - self.translation.x;
        let dy = p.y - self.translation.y;
        let u = cos * dx + sin * dy;
        let v = -sin * dx + cos * dy;
        Some(Point::new(
            u / self.scale_x + self.anchor.x,
            v / self.scale_y + self.anchor.y,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_2;

    fn level_face(eye_distance: f32) -> Landmarks {
        Landmarks {
            left_eye: Point::new(100.0, 100.0),
            right_eye: Point::new(100.0 + eye_distance, 100.0),
            nose_bridge: Point::new(100.0 + eye_distance / 2.0, 105.0),
            chin: Point::new(100.0 + eye_distance / 2.0, 200.0),
        }
    }

    #[test]
    fn test_geometry_level_face() {
        let face = FaceGeometry::new(level_face(120.0), 0.9);
        assert!((face.inter_eye_distance() - 120.0).abs() < 1e-4);
        assert!(face.roll().abs() < 1e-6);
    }

    #[test]
    fn test_geometry_roll_sign() {
        let mut lm = level_face(100.0);
        lm.right_eye.y += 100.0; // right eye lower → clockwise tilt
        let face = FaceGeometry::new(lm, 0.9);
        assert!((face.roll() - std::f32::consts::FRAC_PI_4).abs() < 1e-5);
    }

    #[test]
    fn test_landmarks_bounds() {
        let lm = level_face(100.0);
        assert_eq!(lm.first_out_of_bounds(640, 480), None);
        assert_eq!(lm.first_out_of_bounds(150, 480), Some("right_eye"));

        let mut nan = lm;
        nan.chin.y = f32::NAN;
        assert_eq!(nan.first_out_of_bounds(640, 480), Some("chin"));
    }

    #[test]
    fn test_face_pose_absent_has_no_face() {
        assert!(!FacePose::NoFace.is_present());
        assert!(FacePose::NoFace.face().is_none());
        assert_eq!(FacePose::default(), FacePose::NoFace);
    }

    #[test]
    fn test_render_params_defaults() {
        let p = RenderParams::default();
        assert_eq!((p.scale_pct(), p.opacity_pct()), (100, 100));
        assert_eq!(p.scale_factor(), 1.0);
        assert_eq!(p.opacity(), 1.0);
    }

    #[test]
    fn test_render_params_clamped() {
        let mut p = RenderParams::default();
        assert_eq!(p.set_scale(200), 120);
        assert_eq!(p.set_scale(10), 80);
        assert_eq!(p.set_opacity(0), 50);
        assert_eq!(p.set_opacity(101), 100);
        assert_eq!(RenderParams::new(500, 5), RenderParams::new(120, 50));
    }

    #[test]
    fn test_render_params_independent_reset() {
        let mut p = RenderParams::new(90, 60);
        p.reset_scale();
        assert_eq!((p.scale_pct(), p.opacity_pct()), (100, 60));
        p.set_scale(110);
        p.reset_opacity();
        assert_eq!((p.scale_pct(), p.opacity_pct()), (110, 100));
        p.set_opacity(70);
        p.reset();
        assert_eq!(p, RenderParams::default());
    }

    #[test]
    fn test_transform_anchor_maps_to_translation() {
        let t = PlacementTransform {
            translation: Point::new(320.0, 240.0),
            scale_x: 1.5,
            scale_y: 1.5,
            rotation: 0.3,
            anchor: Point::new(50.0, 20.0),
        };
        let p = t.apply(t.anchor);
        assert!((p.x - 320.0).abs() < 1e-4 && (p.y - 240.0).abs() < 1e-4);
    }

    #[test]
    fn test_transform_rotation_direction() {
        let t = PlacementTransform {
            translation: Point::new(0.0, 0.0),
            scale_x: 1.0,
            scale_y: 1.0,
            rotation: FRAC_PI_2,
            anchor: Point::new(0.0, 0.0),
        };
        // +x in asset space turns to +y (down) in the frame.
        let p = t.apply(Point::new(10.0, 0.0));
        assert!(p.x.abs() < 1e-4 && (p.y - 10.0).abs() < 1e-4, "{p:?}");
    }

    #[test]
    fn test_transform_invert_round_trip() {
        let t = PlacementTransform {
            translation: Point::new(200.0, 150.0),
            scale_x: 0.8,
            scale_y: 1.3,
            rotation: -0.7,
            anchor: Point::new(64.0, 32.0),
        };
        let original = Point::new(12.0, 77.0);
        let back = t.invert(t.apply(original)).unwrap();
        assert!(back.distance(&original) < 1e-3, "{back:?}");
    }

    #[test]
    fn test_transform_degenerate_scale() {
        let t = PlacementTransform {
            translation: Point::default(),
            scale_x: 0.0,
            scale_y: 1.0,
            rotation: 0.0,
            anchor: Point::default(),
        };
        assert!(t.invert(Point::new(1.0, 1.0)).is_none());
    }
}
