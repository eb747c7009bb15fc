//! SCRFD face detector via ONNX Runtime.
//!
//! Anchor-free decoding over three strides followed by NMS. The most
//! confident face's five keypoints (eyes, nose, mouth corners) and box are
//! reduced to the four landmarks the placement pipeline uses.

use crate::tracker::{Detection, LandmarkDetector, TrackerFault};
use crate::types::{Landmarks, Point};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;
use tryon_hw::FrameBuffer;

const INPUT_SIZE: usize = 640;
const MEAN: f32 = 127.5;
const STD: f32 = 128.0;
/// Candidates below this never reach NMS; the tracker applies its own threshold.
const CANDIDATE_THRESHOLD: f32 = 0.3;
const NMS_THRESHOLD: f32 = 0.4;
const STRIDES: [usize; 3] = [8, 16, 32];
const ANCHORS_PER_CELL: usize = 2;
/// Nose bridge sits this far from the eye midpoint towards the nose tip.
const BRIDGE_FROM_EYES: f32 = 0.3;

#[derive(Error, Debug)]
pub enum ScrfdError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("unexpected model layout: {0}")]
    Layout(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Letterbox placement of the frame inside the square model input.
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn fit(width: usize, height: usize) -> Self {
        let scale = (INPUT_SIZE as f32 / width as f32).min(INPUT_SIZE as f32 / height as f32);
        let new_w = (width as f32 * scale).round();
        let new_h = (height as f32 * scale).round();
        Self {
            scale,
            pad_x: (INPUT_SIZE as f32 - new_w) / 2.0,
            pad_y: (INPUT_SIZE as f32 - new_h) / 2.0,
        }
    }

    fn to_frame(&self, x: f32, y: f32) -> Point {
        Point::new((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Output tensor indices for one stride: (score, bbox, kps).
type StrideOutputs = (usize, usize, usize);

#[derive(Debug, Clone)]
struct Candidate {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    score: f32,
    keypoints: Option<[Point; 5]>,
}

impl Candidate {
    fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }
}

pub struct ScrfdDetector {
    session: Session,
    outputs: [StrideOutputs; 3],
}

impl ScrfdDetector {
    pub fn load(model_path: &Path) -> Result<Self, ScrfdError> {
        if !model_path.exists() {
            return Err(ScrfdError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        if names.len() < 9 {
            return Err(ScrfdError::Layout(format!(
                "expected 9 outputs (score/bbox/kps per stride), got {}",
                names.len()
            )));
        }
        let outputs = output_indices(&names);
        tracing::info!(path = %model_path.display(), ?outputs, "loaded SCRFD model");

        Ok(Self { session, outputs })
    }

    fn run(&mut self, frame: &FrameBuffer) -> Result<Vec<Candidate>, TrackerFault> {
        let (w, h) = (frame.width() as usize, frame.height() as usize);
        let letterbox = Letterbox::fit(w, h);
        let input = preprocess(frame.data(), w, h, &letterbox);

        let infer = |e: ort::Error| TrackerFault::Detector(e.to_string());
        let view = TensorRef::from_array_view(input.view()).map_err(infer)?;
        let outputs = self.session.run(ort::inputs![view]).map_err(infer)?;

        let mut candidates = Vec::new();
        for (slot, &stride) in STRIDES.iter().enumerate() {
            let (si, bi, ki) = self.outputs[slot];
            let tensor = |idx: usize, what: &str| {
                outputs[idx]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data)
                    .map_err(|e| TrackerFault::Detector(format!("{what} stride {stride}: {e}")))
            };
            candidates.extend(decode_stride(
                tensor(si, "scores")?,
                tensor(bi, "boxes")?,
                tensor(ki, "keypoints")?,
                stride,
                &letterbox,
            ));
        }
        Ok(nms(candidates, NMS_THRESHOLD))
    }
}

impl LandmarkDetector for ScrfdDetector {
    fn detect(&mut self, frame: &FrameBuffer) -> Result<Option<Detection>, TrackerFault> {
        let candidates = self.run(frame)?;
        Ok(candidates
            .iter()
            .find_map(|c| to_detection(c, frame.width(), frame.height())))
    }
}

/// Reduce five keypoints plus box to eyes, nose bridge and chin.
fn to_detection(c: &Candidate, width: u32, height: u32) -> Option<Detection> {
    let [a, b, nose, mouth_a, mouth_b] = c.keypoints?;
    let (left_eye, right_eye) = if a.x <= b.x { (a, b) } else { (b, a) };
    let eyes_mid = left_eye.midpoint(&right_eye);
    let mouth_mid = mouth_a.midpoint(&mouth_b);

    let max_x = (width as f32 - 1.0).max(0.0);
    let max_y = (height as f32 - 1.0).max(0.0);
    let chin = Point::new(mouth_mid.x.clamp(0.0, max_x), c.y2.clamp(0.0, max_y));

    Some(Detection {
        landmarks: Landmarks {
            left_eye,
            right_eye,
            nose_bridge: eyes_mid.lerp(&nose, BRIDGE_FROM_EYES),
            chin,
        },
        confidence: c.score,
    })
}

/// Letterboxed, normalised NCHW tensor from an RGB frame.
fn preprocess(rgb: &[u8], width: usize, height: usize, lb: &Letterbox) -> Array4<f32> {
    let new_w = (width as f32 * lb.scale).round() as usize;
    let new_h = (height as f32 * lb.scale).round() as usize;
    let x_start = lb.pad_x.floor() as usize;
    let y_start = lb.pad_y.floor() as usize;
    let inv = 1.0 / lb.scale;

    // Padding normalises to zero.
    let mut tensor = Array4::<f32>::zeros((1, 3, INPUT_SIZE, INPUT_SIZE));
    for y in 0..new_h.min(INPUT_SIZE - y_start) {
        let sy = (y as f32 + 0.5) * inv - 0.5;
        let y0 = (sy.floor().max(0.0) as usize).min(height - 1);
        let y1 = (y0 + 1).min(height - 1);
        let fy = (sy - sy.floor()).clamp(0.0, 1.0);

        for x in 0..new_w.min(INPUT_SIZE - x_start) {
            let sx = (x as f32 + 0.5) * inv - 0.5;
            let x0 = (sx.floor().max(0.0) as usize).min(width - 1);
            let x1 = (x0 + 1).min(width - 1);
            let fx = (sx - sx.floor()).clamp(0.0, 1.0);

            for c in 0..3 {
                let px = |xx: usize, yy: usize| rgb[(yy * width + xx) * 3 + c] as f32;
                let v = px(x0, y0) * (1.0 - fx) * (1.0 - fy)
                    + px(x1, y0) * fx * (1.0 - fy)
                    + px(x0, y1) * (1.0 - fx) * fy
                    + px(x1, y1) * fx * fy;
                tensor[[0, c, y + y_start, x + x_start]] = (v - MEAN) / STD;
            }
        }
    }
    tensor
}

/// Map outputs named `score_8`, `bbox_16`, ... to stride slots, falling back
/// to the positional layout `[scores 8/16/32, boxes 8/16/32, kps 8/16/32]`.
fn output_indices(names: &[String]) -> [StrideOutputs; 3] {
    let find = |prefix: &str, stride: usize| {
        let wanted = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == wanted)
    };
    let named: Option<Vec<StrideOutputs>> = STRIDES
        .iter()
        .map(|&s| Some((find("score", s)?, find("bbox", s)?, find("kps", s)?)))
        .collect();

    match named {
        Some(v) if v.len() == 3 => [v[0], v[1], v[2]],
        _ => {
            tracing::debug!(?names, "SCRFD outputs unnamed; using positional layout");
            [(0, 3, 6), (1, 4, 7), (2, 5, 8)]
        }
    }
}

fn decode_stride(
    scores: &[f32],
    boxes: &[f32],
    kps: &[f32],
    stride: usize,
    lb: &Letterbox,
) -> Vec<Candidate> {
    let grid = INPUT_SIZE / stride;
    let anchors = grid * grid * ANCHORS_PER_CELL;
    let s = stride as f32;

    (0..anchors)
        .filter_map(|idx| {
            let score = *scores.get(idx)?;
            if score <= CANDIDATE_THRESHOLD {
                return None;
            }
            let cell = idx / ANCHORS_PER_CELL;
            let ax = (cell % grid) as f32 * s;
            let ay = (cell / grid) as f32 * s;

            let b = boxes.get(idx * 4..idx * 4 + 4)?;
            let tl = lb.to_frame(ax - b[0] * s, ay - b[1] * s);
            let br = lb.to_frame(ax + b[2] * s, ay + b[3] * s);

            let keypoints = kps.get(idx * 10..idx * 10 + 10).map(|k| {
                std::array::from_fn(|i| lb.to_frame(ax + k[i * 2] * s, ay + k[i * 2 + 1] * s))
            });

            Some(Candidate {
                x1: tl.x,
                y1: tl.y,
                x2: br.x,
                y2: br.y,
                score,
                keypoints,
            })
        })
        .collect()
}

/// Greedy NMS; the result is ordered by descending score.
fn nms(mut candidates: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut keep: Vec<Candidate> = Vec::new();
    for c in candidates {
        if keep.iter().all(|k| iou(k, &c) <= iou_threshold) {
            keep.push(c);
        }
    }
    keep
}

fn iou(a: &Candidate, b: &Candidate) -> f32 {
    let iw = (a.x2.min(b.x2) - a.x1.max(b.x1)).max(0.0);
    let ih = (a.y2.min(b.y2) - a.y1.max(b.y1)).max(0.0);
    let inter = iw * ih;
    let union = a.area() + b.area() - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cand(x: f32, y: f32, w: f32, h: f32, score: f32) -> Candidate {
        Candidate {
            x1: x,
            y1: y,
            x2: x + w,
            y2: y + h,
            score,
            keypoints: None,
        }
    }

    #[test]
    fn test_iou_partial_overlap() {
        let a = cand(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = cand(5.0, 0.0, 10.0, 10.0, 1.0);
        assert!((iou(&a, &b) - 50.0 / 150.0).abs() < 1e-6);
        assert!(iou(&a, &cand(20.0, 20.0, 5.0, 5.0, 1.0)).abs() < 1e-6);
    }

    #[test]
    fn test_nms_keeps_best_of_overlaps() {
        let kept = nms(
            vec![
                cand(5.0, 5.0, 100.0, 100.0, 0.8),
                cand(200.0, 200.0, 50.0, 50.0, 0.7),
                cand(0.0, 0.0, 100.0, 100.0, 0.9),
            ],
            0.4,
        );
        let scores: Vec<f32> = kept.iter().map(|c| c.score).collect();
        assert_eq!(scores, vec![0.9, 0.7]);
    }

    #[test]
    fn test_letterbox_maps_back_to_frame() {
        let lb = Letterbox::fit(640, 480);
        assert_eq!(lb.scale, 1.0);
        assert_eq!(lb.pad_y, 80.0);
        let p = lb.to_frame(100.0, 130.0);
        assert_eq!(p, Point::new(100.0, 50.0));
    }

    #[test]
    fn test_output_indices_named_and_positional() {
        let named: Vec<String> = ["bbox_8", "kps_8", "score_8", "bbox_16", "kps_16", "score_16", "bbox_32", "kps_32", "score_32"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(output_indices(&named), [(2, 0, 1), (5, 3, 4), (8, 6, 7)]);

        let numeric: Vec<String> = (0..9).map(|i| i.to_string()).collect();
        assert_eq!(output_indices(&numeric), [(0, 3, 6), (1, 4, 7), (2, 5, 8)]);
    }

    #[test]
    fn test_keypoints_reduce_to_landmarks() {
        let mut c = cand(200.0, 120.0, 200.0, 260.0, 0.93);
        c.keypoints = Some([
            Point::new(360.0, 200.0), // reported out of order
            Point::new(240.0, 200.0),
            Point::new(300.0, 260.0),
            Point::new(260.0, 320.0),
            Point::new(340.0, 320.0),
        ]);
        let d = to_detection(&c, 640, 480).unwrap();
        assert_eq!(d.landmarks.left_eye, Point::new(240.0, 200.0));
        assert_eq!(d.landmarks.right_eye, Point::new(360.0, 200.0));
        assert!((d.landmarks.nose_bridge.y - 218.0).abs() < 1e-4);
        assert_eq!(d.landmarks.chin, Point::new(300.0, 380.0));
        assert_eq!(d.confidence, 0.93);
    }

    #[test]
    fn test_chin_clamped_into_frame() {
        let mut c = cand(200.0, 300.0, 200.0, 400.0, 0.9);
        c.keypoints = Some([Point::new(250.0, 350.0); 5]);
        let d = to_detection(&c, 640, 480).unwrap();
        assert_eq!(d.landmarks.chin.y, 479.0);
    }

    #[test]
    fn test_decode_single_anchor() {
        let lb = Letterbox::fit(640, 640);
        let grid = INPUT_SIZE / 32;
        let anchors = grid * grid * ANCHORS_PER_CELL;
        let mut scores = vec![0.0; anchors];
        let mut boxes = vec![0.0; anchors * 4];
        let kps = vec![0.0; anchors * 10];
        // Cell (1, 2) first anchor: centre (32, 64).
        let idx = (2 * grid + 1) * ANCHORS_PER_CELL;
        scores[idx] = 0.8;
        boxes[idx * 4..idx * 4 + 4].copy_from_slice(&[1.0, 1.0, 1.0, 1.0]);

        let found = decode_stride(&scores, &boxes, &kps, 32, &lb);
        assert_eq!(found.len(), 1);
        let c = &found[0];
        assert_eq!((c.x1, c.y1, c.x2, c.y2), (0.0, 32.0, 64.0, 96.0));
        assert_eq!(c.keypoints.unwrap()[0], Point::new(32.0, 64.0));
    }

    #[test]
    fn test_preprocess_pads_with_zero() {
        let lb = Letterbox::fit(64, 32);
        let rgb = vec![255u8; 64 * 32 * 3];
        let t = preprocess(&rgb, 64, 32, &lb);
        assert_eq!(t[[0, 0, 0, 0]], 0.0, "top padding row");
        let v = t[[0, 1, INPUT_SIZE / 2, INPUT_SIZE / 2]];
        assert!((v - (255.0 - MEAN) / STD).abs() < 1e-4, "centre pixel {v}");
    }
}
