//! Placement solver: face pose + asset + user params → asset transform.
//!
//! The asset anchor is pinned to the nose bridge, the face-derived scale is
//! the ratio of the measured inter-eye distance to the asset's calibration
//! distance, and rotation follows head roll. Position, face scale and roll
//! are smoothed with an exponential moving average:
//!
//! `ema[t] = alpha * current + (1 - alpha) * ema[t-1]`
//!
//! The user scale factor is applied after smoothing so slider changes take
//! effect on the next frame. Smoothing state is dropped whenever the face is
//! lost, so a re-acquired face starts from its own first sample.

use crate::asset::AssetSpec;
use crate::types::{FacePose, PlacementTransform, Point, RenderParams};
use std::f32::consts::{PI, TAU};

pub const DEFAULT_SMOOTHING: f32 = 0.5;
/// Faces with a smaller inter-eye distance are treated as absent.
pub const MIN_EYE_DISTANCE_PX: f32 = 12.0;

const SNAP_POSITION_PX: f32 = 0.05;
const SNAP_SCALE: f32 = 1e-4;
const SNAP_ROTATION_RAD: f32 = 1e-4;

/// The smoothed quantities.
#[derive(Debug, Clone, Copy, PartialEq)]
struct FaceFit {
    x: f32,
    y: f32,
    base_scale: f32,
    roll: f32,
}

/// EMA over [`FaceFit`] with snap-to-target once within fixed epsilons,
/// so a constant input is reached exactly after finitely many ticks.
#[derive(Debug, Clone)]
pub struct PoseSmoother {
    alpha: f32,
    state: Option<FaceFit>,
}

impl PoseSmoother {
    /// `alpha` is the weight of the newest sample, clamped to (0, 1];
    /// 1.0 disables smoothing.
    pub fn new(alpha: f32) -> Self {
        let alpha = if alpha.is_finite() {
            alpha.clamp(f32::EPSILON, 1.0)
        } else {
            DEFAULT_SMOOTHING
        };
        Self { alpha, state: None }
    }

    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    pub fn reset(&mut self) {
        self.state = None;
    }

    pub fn is_primed(&self) -> bool {
        self.state.is_some()
    }

    fn smooth(&mut self, target: FaceFit) -> FaceFit {
        let next = match self.state {
            None => target,
            Some(prev) => FaceFit {
                x: ease(prev.x, target.x, self.alpha, SNAP_POSITION_PX),
                y: ease(prev.y, target.y, self.alpha, SNAP_POSITION_PX),
                base_scale: ease(prev.base_scale, target.base_scale, self.alpha, SNAP_SCALE),
                roll: ease_angle(prev.roll, target.roll, self.alpha),
            },
        };
        self.state = Some(next);
        next
    }
}

impl Default for PoseSmoother {
    fn default() -> Self {
        Self::new(DEFAULT_SMOOTHING)
    }
}

fn ease(prev: f32, target: f32, alpha: f32, snap: f32) -> f32 {
    let next = prev + alpha * (target - prev);
    if (target - next).abs() < snap {
        target
    } else {
        next
    }
}

/// Ease along the shortest arc so ±π wrap-around does not spin the asset.
fn ease_angle(prev: f32, target: f32, alpha: f32) -> f32 {
    let delta = wrap_angle(target - prev);
    let next = wrap_angle(prev + alpha * delta);
    if wrap_angle(target - next).abs() < SNAP_ROTATION_RAD {
        target
    } else {
        next
    }
}

fn wrap_angle(a: f32) -> f32 {
    (a + PI).rem_euclid(TAU) - PI
}

pub struct PlacementSolver {
    smoother: PoseSmoother,
    min_eye_distance: f32,
}

impl Default for PlacementSolver {
    fn default() -> Self {
        Self::new(DEFAULT_SMOOTHING, MIN_EYE_DISTANCE_PX)
    }
}

impl PlacementSolver {
    pub fn new(smoothing: f32, min_eye_distance: f32) -> Self {
        Self {
            smoother: PoseSmoother::new(smoothing),
            min_eye_distance,
        }
    }

    /// Solve this frame's transform, smoothing against previous frames.
    ///
    /// Returns `None` (and forgets the smoothing history) when there is no
    /// usable face.
    pub fn solve(
        &mut self,
        pose: &FacePose,
        asset: &AssetSpec,
        params: &RenderParams,
    ) -> Option<PlacementTransform> {
        let Some(fit) = fit_face(pose, asset, self.min_eye_distance) else {
            if self.smoother.is_primed() {
                tracing::debug!("face lost; resetting placement smoothing");
            }
            self.smoother.reset();
            return None;
        };
        let smoothed = self.smoother.smooth(fit);
        Some(to_transform(smoothed, asset, params))
    }

    /// The transform for `pose` alone, without any cross-frame state.
    pub fn solve_unsmoothed(
        pose: &FacePose,
        asset: &AssetSpec,
        params: &RenderParams,
        min_eye_distance: f32,
    ) -> Option<PlacementTransform> {
        fit_face(pose, asset, min_eye_distance).map(|fit| to_transform(fit, asset, params))
    }

    pub fn reset(&mut self) {
        self.smoother.reset();
    }

    pub fn min_eye_distance(&self) -> f32 {
        self.min_eye_distance
    }
}

fn fit_face(pose: &FacePose, asset: &AssetSpec, min_eye_distance: f32) -> Option<FaceFit> {
    let face = pose.face()?;
    let eye_distance = face.inter_eye_distance();
    if !(eye_distance >= min_eye_distance) {
        tracing::trace!(eye_distance, min_eye_distance, "face too small to place asset");
        return None;
    }
    let bridge = face.landmarks().nose_bridge;
    Some(FaceFit {
        x: bridge.x,
        y: bridge.y,
        base_scale: eye_distance / asset.calibration_eye_distance,
        roll: face.roll(),
    })
}

fn to_transform(fit: FaceFit, asset: &AssetSpec, params: &RenderParams) -> PlacementTransform {
    let scale = fit.base_scale * params.scale_factor();
    PlacementTransform {
        translation: Point::new(fit.x, fit.y),
        scale_x: scale,
        scale_y: scale,
        rotation: fit.roll,
        anchor: asset.anchor,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FaceGeometry, Landmarks};
    use std::path::PathBuf;

    fn asset(calibration: f32) -> AssetSpec {
        AssetSpec {
            image: PathBuf::from("glasses.png"),
            anchor: Point::new(100.0, 40.0),
            calibration_eye_distance: calibration,
            aspect_ratio: Some(2.5),
        }
    }

    fn pose_at(cx: f32, cy: f32, eye_distance: f32, roll: f32) -> FacePose {
        let (sin, cos) = roll.sin_cos();
        let half = eye_distance / 2.0;
        let bridge = Point::new(cx, cy);
        FacePose::Detected(FaceGeometry::new(
            Landmarks {
                left_eye: Point::new(cx - cos * half, cy - sin * half),
                right_eye: Point::new(cx + cos * half, cy + sin * half),
                nose_bridge: bridge,
                chin: Point::new(cx - sin * eye_distance * 1.5, cy + cos * eye_distance * 1.5),
            },
            0.95,
        ))
    }

    fn close(a: f32, b: f32, eps: f32) -> bool {
        (a - b).abs() < eps
    }

    #[test]
    fn test_no_face_is_none() {
        let mut solver = PlacementSolver::default();
        assert!(solver
            .solve(&FacePose::NoFace, &asset(100.0), &RenderParams::default())
            .is_none());
    }

    #[test]
    fn test_scale_from_eye_distance() {
        // 120 px between the eyes on a 100 px calibrated asset → 1.2x.
        let mut solver = PlacementSolver::default();
        let t = solver
            .solve(&pose_at(320.0, 200.0, 120.0, 0.0), &asset(100.0), &RenderParams::default())
            .unwrap();
        assert!(close(t.scale_x, 1.2, 1e-5), "scale = {}", t.scale_x);
        assert_eq!(t.scale_x, t.scale_y);
        assert_eq!(t.translation, Point::new(320.0, 200.0));
        assert_eq!(t.anchor, Point::new(100.0, 40.0));
        assert!(close(t.rotation, 0.0, 1e-6));
    }

    #[test]
    fn test_user_scale_is_multiplicative_and_monotone() {
        let pose = pose_at(320.0, 200.0, 120.0, 0.1);
        let spec = asset(100.0);
        let mut previous = 0.0;
        for pct in 80..=120 {
            let t = PlacementSolver::solve_unsmoothed(
                &pose,
                &spec,
                &RenderParams::new(pct, 100),
                MIN_EYE_DISTANCE_PX,
            )
            .unwrap();
            assert!(close(t.scale_x, 1.2 * pct as f32 / 100.0, 1e-5));
            assert!(t.scale_x > previous, "scale must strictly increase at {pct}%");
            previous = t.scale_x;
        }
    }

    #[test]
    fn test_opacity_does_not_move_asset() {
        let pose = pose_at(300.0, 220.0, 110.0, -0.2);
        let spec = asset(100.0);
        let opaque = PlacementSolver::solve_unsmoothed(
            &pose,
            &spec,
            &RenderParams::new(105, 100),
            MIN_EYE_DISTANCE_PX,
        );
        let faded = PlacementSolver::solve_unsmoothed(
            &pose,
            &spec,
            &RenderParams::new(105, 50),
            MIN_EYE_DISTANCE_PX,
        );
        assert_eq!(opaque, faded);
    }

    #[test]
    fn test_rotation_follows_roll() {
        let mut solver = PlacementSolver::default();
        let t = solver
            .solve(&pose_at(320.0, 200.0, 100.0, 0.25), &asset(100.0), &RenderParams::default())
            .unwrap();
        assert!(close(t.rotation, 0.25, 1e-5), "rotation = {}", t.rotation);
    }

    #[test]
    fn test_tiny_face_treated_as_absent() {
        let mut solver = PlacementSolver::default();
        let pose = pose_at(320.0, 200.0, MIN_EYE_DISTANCE_PX - 1.0, 0.0);
        assert!(solver
            .solve(&pose, &asset(100.0), &RenderParams::default())
            .is_none());
    }

    #[test]
    fn test_smoothing_damps_single_frame_jump() {
        let mut solver = PlacementSolver::new(0.5, MIN_EYE_DISTANCE_PX);
        let spec = asset(100.0);
        let params = RenderParams::default();
        solver.solve(&pose_at(300.0, 200.0, 100.0, 0.0), &spec, &params);
        let t = solver
            .solve(&pose_at(310.0, 200.0, 100.0, 0.0), &spec, &params)
            .unwrap();
        assert!(close(t.translation.x, 305.0, 1e-4), "x = {}", t.translation.x);
    }

    #[test]
    fn test_smoothing_converges_without_oscillation() {
        let mut solver = PlacementSolver::new(0.5, MIN_EYE_DISTANCE_PX);
        let spec = asset(100.0);
        let params = RenderParams::new(110, 100);
        solver.solve(&pose_at(100.0, 100.0, 60.0, -0.4), &spec, &params);

        let target_pose = pose_at(400.0, 260.0, 140.0, 0.3);
        let expected =
            PlacementSolver::solve_unsmoothed(&target_pose, &spec, &params, MIN_EYE_DISTANCE_PX)
                .unwrap();

        let mut last_error = f32::INFINITY;
        let mut converged_at = None;
        for tick in 0..40 {
            let t = solver.solve(&target_pose, &spec, &params).unwrap();
            let error = t.translation.distance(&expected.translation)
                + (t.scale_x - expected.scale_x).abs() * 100.0
                + (t.rotation - expected.rotation).abs() * 100.0;
            assert!(error <= last_error, "error grew at tick {tick}: {error} > {last_error}");
            last_error = error;
            if t == expected {
                converged_at = Some(tick);
                break;
            }
        }
        let ticks = converged_at.expect("smoothing should reach the target exactly");
        assert!(ticks < 20, "took {ticks} ticks");
    }

    #[test]
    fn test_reacquired_face_is_not_smoothed_against_old_face() {
        let mut solver = PlacementSolver::new(0.2, MIN_EYE_DISTANCE_PX);
        let spec = asset(100.0);
        let params = RenderParams::default();
        solver.solve(&pose_at(100.0, 100.0, 100.0, 0.0), &spec, &params);
        assert!(solver.solve(&FacePose::NoFace, &spec, &params).is_none());

        let t = solver
            .solve(&pose_at(500.0, 300.0, 100.0, 0.0), &spec, &params)
            .unwrap();
        assert_eq!(t.translation, Point::new(500.0, 300.0));
    }

    #[test]
    fn test_user_scale_applies_immediately_while_smoothing() {
        let mut solver = PlacementSolver::new(0.2, MIN_EYE_DISTANCE_PX);
        let spec = asset(100.0);
        let pose = pose_at(320.0, 200.0, 100.0, 0.0);
        let a = solver.solve(&pose, &spec, &RenderParams::new(100, 100)).unwrap();
        let b = solver.solve(&pose, &spec, &RenderParams::new(120, 100)).unwrap();
        assert!(close(b.scale_x / a.scale_x, 1.2, 1e-5));
    }

    #[test]
    fn test_angle_smoothing_takes_short_path() {
        let next = ease_angle(PI - 0.1, -PI + 0.1, 0.5);
        // Halfway along the 0.2 rad arc through ±π, not back through zero.
        assert!(close(next.abs(), PI, 1e-4), "next = {next}");
    }

    #[test]
    fn test_invalid_alpha_falls_back() {
        assert_eq!(PoseSmoother::new(f32::NAN).alpha(), DEFAULT_SMOOTHING);
        assert_eq!(PoseSmoother::new(3.0).alpha(), 1.0);
    }
}
