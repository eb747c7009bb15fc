//! Frame type and pixel conversion: YUYV to RGB, exposure checks.

use std::time::Instant;

/// Bytes per pixel of a [`FrameBuffer`] (packed RGB8).
pub const CHANNELS: usize = 3;

/// Luma below this value counts as a dark pixel.
const DARK_LUMA: f32 = 32.0;

/// One decoded camera frame: packed RGB8, row-major.
///
/// Frames are shared read-only between the tracker and the compositor and are
/// never mutated after capture.
#[derive(Clone, Debug)]
pub struct FrameBuffer {
    data: Vec<u8>,
    width: u32,
    height: u32,
    timestamp: Instant,
    sequence: u32,
}

impl FrameBuffer {
    /// Wrap raw RGB bytes. The length is not checked here; see [`Self::is_well_formed`].
    pub fn new(data: Vec<u8>, width: u32, height: u32, sequence: u32) -> Self {
        Self {
            data,
            width,
            height,
            timestamp: Instant::now(),
            sequence,
        }
    }

    /// A frame filled with a single colour.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3], sequence: u32) -> Self {
        let pixels = width as usize * height as usize;
        let data = rgb.iter().copied().cycle().take(pixels * CHANNELS).collect();
        Self::new(data, width, height, sequence)
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn timestamp(&self) -> Instant {
        self.timestamp
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    /// Non-empty and the buffer holds exactly `width * height` RGB pixels.
    pub fn is_well_formed(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.data.len() == self.width as usize * self.height as usize * CHANNELS
    }

    /// RGB value at (x, y), or `None` outside the frame.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = (y as usize * self.width as usize + x as usize) * CHANNELS;
        self.data
            .get(idx..idx + CHANNELS)
            .map(|p| [p[0], p[1], p[2]])
    }

    /// Average luma (0.0–255.0).
    pub fn avg_luma(&self) -> f32 {
        let pixels = self.data.len() / CHANNELS;
        if pixels == 0 {
            return 0.0;
        }
        self.data
            .chunks_exact(CHANNELS)
            .map(|p| luma(p[0], p[1], p[2]))
            .sum::<f32>()
            / pixels as f32
    }

    /// True if more than `threshold_pct` of the pixels are dark.
    pub fn is_dark(&self, threshold_pct: f32) -> bool {
        let pixels = self.data.len() / CHANNELS;
        if pixels == 0 {
            return true;
        }
        let dark = self
            .data
            .chunks_exact(CHANNELS)
            .filter(|p| luma(p[0], p[1], p[2]) < DARK_LUMA)
            .count();
        (dark as f32 / pixels as f32) > threshold_pct
    }
}

/// BT.601 luma.
pub fn luma(r: u8, g: u8, b: u8) -> f32 {
    0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32
}

/// Convert packed YUYV (4:2:2) to packed RGB8.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V]; both pixels share the
/// chroma pair. Conversion uses full-range BT.601 coefficients.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    if width % 2 != 0 {
        return Err(FrameError::OddWidth(width));
    }
    let pixels = width as usize * height as usize;
    let expected = pixels * 2;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }

    let mut rgb = Vec::with_capacity(pixels * CHANNELS);
    for quad in yuyv[..expected].chunks_exact(4) {
        let (y0, u, y1, v) = (quad[0], quad[1], quad[2], quad[3]);
        rgb.extend_from_slice(&yuv_to_rgb(y0, u, v));
        rgb.extend_from_slice(&yuv_to_rgb(y1, u, v));
    }
    Ok(rgb)
}

fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let y = y as f32;
    let u = u as f32 - 128.0;
    let v = v as f32 - 128.0;

    let r = y + 1.402 * v;
    let g = y - 0.344_136 * u - 0.714_136 * v;
    let b = y + 1.772 * u;

    [to_u8(r), to_u8(g), to_u8(b)]
}

fn to_u8(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid YUYV length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("YUYV frames need an even width, got {0}")]
    OddWidth(u32),
}
