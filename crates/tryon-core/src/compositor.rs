//! Compositor: draws the asset over the frame and exports stills.
//!
//! Each destination pixel inside the transformed asset's bounding box is
//! mapped back into asset space and sampled bilinearly with premultiplied
//! alpha, then blended source-over at `alpha × opacity`.

use crate::asset::Asset;
use crate::types::{PlacementTransform, Point, RenderParams};
use chrono::{DateTime, Utc};
use image::{ImageFormat, RgbaImage};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tryon_hw::FrameBuffer;

/// 30 fps.
pub const DEFAULT_FRAME_BUDGET: Duration = Duration::from_millis(33);

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("malformed frame: {width}x{height} with {len} bytes")]
    MalformedFrame { width: u32, height: u32, len: usize },
}

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("no frame has been rendered yet")]
    NoFrameYet,
    #[error("failed to encode PNG: {0}")]
    Export(#[from] image::ImageError),
    #[error("failed to write capture: {0}")]
    Io(#[from] std::io::Error),
}

/// The most recently rendered output, shared with whoever displays it.
#[derive(Debug)]
pub struct DisplaySurface {
    image: RgbaImage,
    frame_sequence: u32,
    overlay_drawn: bool,
}

impl DisplaySurface {
    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    /// Sequence number of the camera frame this surface was rendered from.
    pub fn frame_sequence(&self) -> u32 {
        self.frame_sequence
    }

    pub fn overlay_drawn(&self) -> bool {
        self.overlay_drawn
    }
}

/// An exported still. Owned by the caller once returned.
#[derive(Debug, Clone)]
pub struct CapturedImage {
    pub image: RgbaImage,
    pub filename: String,
    pub captured_at: DateTime<Utc>,
}

impl CapturedImage {
    fn new(image: RgbaImage) -> Self {
        let captured_at = Utc::now();
        Self {
            image,
            filename: format!("tryon-{}.png", captured_at.timestamp_millis()),
            captured_at,
        }
    }

    pub fn encode_png(&self) -> Result<Vec<u8>, CaptureError> {
        let mut buf = Cursor::new(Vec::new());
        self.image.write_to(&mut buf, ImageFormat::Png)?;
        Ok(buf.into_inner())
    }

    /// Write the PNG into `dir` (created if missing) under its suggested
    /// filename and return the full path.
    pub fn save(&self, dir: &Path) -> Result<PathBuf, CaptureError> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(&self.filename);
        std::fs::write(&path, self.encode_png()?)?;
        tracing::info!(path = %path.display(), "capture saved");
        Ok(path)
    }
}

pub struct Compositor {
    asset: Arc<Asset>,
    frame_budget: Duration,
    last: Option<Arc<DisplaySurface>>,
    rendered: u64,
    over_budget: u64,
}

impl Compositor {
    pub fn new(asset: Arc<Asset>, frame_budget: Duration) -> Self {
        Self {
            asset,
            frame_budget,
            last: None,
            rendered: 0,
            over_budget: 0,
        }
    }

    /// Render `frame` with the asset drawn at `transform`, if any, and make
    /// the result the current display surface.
    pub fn render_frame(
        &mut self,
        frame: &FrameBuffer,
        transform: Option<&PlacementTransform>,
        params: &RenderParams,
    ) -> Result<Arc<DisplaySurface>, RenderError> {
        let started = Instant::now();

        let mut surface = frame_to_rgba(frame)?;
        let overlay_drawn = match transform {
            Some(t) => draw_asset(&mut surface, self.asset.image(), t, params.opacity()),
            None => false,
        };

        let surface = Arc::new(DisplaySurface {
            image: surface,
            frame_sequence: frame.sequence(),
            overlay_drawn,
        });
        self.last = Some(Arc::clone(&surface));
        self.rendered += 1;

        let elapsed = started.elapsed();
        if elapsed > self.frame_budget {
            self.over_budget += 1;
            tracing::debug!(
                seq = frame.sequence(),
                elapsed_ms = elapsed.as_secs_f64() * 1000.0,
                budget_ms = self.frame_budget.as_millis() as u64,
                overruns = self.over_budget,
                "render exceeded frame budget"
            );
        }

        Ok(surface)
    }

    /// Snapshot of the last rendered surface.
    pub fn capture_still(&self) -> Result<CapturedImage, CaptureError> {
        let surface = self.last.as_ref().ok_or(CaptureError::NoFrameYet)?;
        Ok(CapturedImage::new(surface.image.clone()))
    }

    pub fn last_surface(&self) -> Option<Arc<DisplaySurface>> {
        self.last.clone()
    }

    /// Forget the last surface, e.g. when a new camera stream begins.
    pub fn clear(&mut self) {
        self.last = None;
    }

    pub fn rendered_count(&self) -> u64 {
        self.rendered
    }

    pub fn over_budget_count(&self) -> u64 {
        self.over_budget
    }
}

fn frame_to_rgba(frame: &FrameBuffer) -> Result<RgbaImage, RenderError> {
    let malformed = || RenderError::MalformedFrame {
        width: frame.width(),
        height: frame.height(),
        len: frame.data().len(),
    };
    if !frame.is_well_formed() {
        return Err(malformed());
    }
    let mut rgba = Vec::with_capacity(frame.width() as usize * frame.height() as usize * 4);
    for px in frame.data().chunks_exact(3) {
        rgba.extend_from_slice(&[px[0], px[1], px[2], 255]);
    }
    RgbaImage::from_raw(frame.width(), frame.height(), rgba).ok_or_else(malformed)
}

/// Destination-pixel bounding box of the transformed asset, clipped to the
/// surface: `(x0, y0, x1, y1)` with exclusive upper bounds.
fn bounding_box(
    transform: &PlacementTransform,
    asset_w: u32,
    asset_h: u32,
    surface_w: u32,
    surface_h: u32,
) -> Option<(u32, u32, u32, u32)> {
    let (w, h) = (asset_w as f32, asset_h as f32);
    let corners = [
        transform.apply(Point::new(0.0, 0.0)),
        transform.apply(Point::new(w, 0.0)),
        transform.apply(Point::new(0.0, h)),
        transform.apply(Point::new(w, h)),
    ];
    if corners.iter().any(|c| !c.is_finite()) {
        return None;
    }
    let min_x = corners.iter().map(|c| c.x).fold(f32::INFINITY, f32::min);
    let max_x = corners.iter().map(|c| c.x).fold(f32::NEG_INFINITY, f32::max);
    let min_y = corners.iter().map(|c| c.y).fold(f32::INFINITY, f32::min);
    let max_y = corners.iter().map(|c| c.y).fold(f32::NEG_INFINITY, f32::max);

    // One pixel of slack for the bilinear fringe.
    let x0 = (min_x.floor() - 1.0).max(0.0) as u32;
    let y0 = (min_y.floor() - 1.0).max(0.0) as u32;
    let x1 = ((max_x.ceil() + 1.0).max(0.0) as u32).min(surface_w);
    let y1 = ((max_y.ceil() + 1.0).max(0.0) as u32).min(surface_h);
    (x0 < x1 && y0 < y1).then_some((x0, y0, x1, y1))
}

/// Premultiplied bilinear sample at asset coordinate `(sx, sy)`, where pixel
/// `(i, j)` is centred at `(i + 0.5, j + 0.5)`. Outside the image is
/// transparent.
fn sample_premultiplied(asset: &RgbaImage, sx: f32, sy: f32) -> [f32; 4] {
    let (w, h) = (asset.width() as i64, asset.height() as i64);
    let x = sx - 0.5;
    let y = sy - 0.5;
    let x0 = x.floor() as i64;
    let y0 = y.floor() as i64;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let texel = |tx: i64, ty: i64| -> [f32; 4] {
        if tx < 0 || ty < 0 || tx >= w || ty >= h {
            return [0.0; 4];
        }
        let p = asset.get_pixel(tx as u32, ty as u32).0;
        let a = p[3] as f32 / 255.0;
        [p[0] as f32 * a, p[1] as f32 * a, p[2] as f32 * a, a]
    };

    let tl = texel(x0, y0);
    let tr = texel(x0 + 1, y0);
    let bl = texel(x0, y0 + 1);
    let br = texel(x0 + 1, y0 + 1);

    let mut out = [0.0f32; 4];
    for c in 0..4 {
        out[c] = tl[c] * (1.0 - fx) * (1.0 - fy)
            + tr[c] * fx * (1.0 - fy)
            + bl[c] * (1.0 - fx) * fy
            + br[c] * fx * fy;
    }
    out
}

/// Returns whether any pixel was touched.
fn draw_asset(
    surface: &mut RgbaImage,
    asset: &RgbaImage,
    transform: &PlacementTransform,
    opacity: f32,
) -> bool {
    let Some((x0, y0, x1, y1)) = bounding_box(
        transform,
        asset.width(),
        asset.height(),
        surface.width(),
        surface.height(),
    ) else {
        return false;
    };

    let mut touched = false;
    for y in y0..y1 {
        for x in x0..x1 {
            let Some(src) = transform.invert(Point::new(x as f32 + 0.5, y as f32 + 0.5)) else {
                return touched;
            };
            let [r, g, b, a] = sample_premultiplied(asset, src.x, src.y);
            let alpha = a * opacity;
            if alpha <= 0.0 {
                continue;
            }
            let dst = surface.get_pixel_mut(x, y);
            for (c, s) in [r, g, b].into_iter().enumerate() {
                let blended = s * opacity + dst.0[c] as f32 * (1.0 - alpha);
                dst.0[c] = blended.round().clamp(0.0, 255.0) as u8;
            }
            touched = true;
        }
    }
    touched
}
