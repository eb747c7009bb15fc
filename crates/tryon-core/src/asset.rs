//! Try-on assets and the manifest the product pages hand to the compositor.
//!
//! A manifest is a small TOML file:
//!
//! ```toml
//! product_id = "1"
//! return_to = "/product/1"
//!
//! [asset]
//! image = "glasses-1.png"          # relative to the manifest
//! anchor = { x = 256.0, y = 96.0 } # asset pixel that sits on the nose bridge
//! calibration_eye_distance = 180.0 # asset pixels between the lens centres
//! ```

use crate::types::Point;
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Relative tolerance before a declared aspect ratio is reported as stale.
const ASPECT_TOLERANCE: f32 = 0.02;

#[derive(Error, Debug)]
pub enum AssetError {
    #[error("failed to read manifest {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid manifest: {0}")]
    Manifest(#[from] toml::de::Error),
    #[error("failed to decode asset image {path}: {source}")]
    Image {
        path: PathBuf,
        source: image::ImageError,
    },
    #[error("invalid asset: {0}")]
    Invalid(String),
}

/// Placement metadata for an overlay image. Immutable per product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetSpec {
    /// Image file, relative to the manifest that declared it.
    pub image: PathBuf,
    /// Asset pixel aligned with the face's nose-bridge landmark.
    pub anchor: Point,
    /// Inter-eye distance, in asset pixels, the artwork was drawn for.
    pub calibration_eye_distance: f32,
    /// Width / height. Filled from the decoded image when omitted.
    #[serde(default)]
    pub aspect_ratio: Option<f32>,
}

/// Decoded asset: spec plus RGBA pixels.
#[derive(Debug, Clone)]
pub struct Asset {
    spec: AssetSpec,
    image: RgbaImage,
}

impl Asset {
    /// Validate `spec` against an already decoded image.
    pub fn from_image(mut spec: AssetSpec, image: RgbaImage) -> Result<Self, AssetError> {
        let (w, h) = image.dimensions();
        if w == 0 || h == 0 {
            return Err(AssetError::Invalid("asset image is empty".into()));
        }
        if !(spec.calibration_eye_distance.is_finite() && spec.calibration_eye_distance > 0.0) {
            return Err(AssetError::Invalid(format!(
                "calibration_eye_distance must be positive, got {}",
                spec.calibration_eye_distance
            )));
        }
        let a = spec.anchor;
        if !a.is_finite() || a.x < 0.0 || a.y < 0.0 || a.x > w as f32 || a.y > h as f32 {
            return Err(AssetError::Invalid(format!(
                "anchor ({}, {}) lies outside the {w}x{h} image",
                a.x, a.y
            )));
        }

        let natural = w as f32 / h as f32;
        match spec.aspect_ratio {
            Some(declared) if ((declared - natural) / natural).abs() > ASPECT_TOLERANCE => {
                tracing::warn!(
                    image = %spec.image.display(),
                    declared,
                    natural,
                    "declared aspect ratio does not match image; using image"
                );
                spec.aspect_ratio = Some(natural);
            }
            Some(_) => {}
            None => spec.aspect_ratio = Some(natural),
        }

        Ok(Self { spec, image })
    }

    /// Decode the image referenced by `spec`, resolving it against `base_dir`.
    pub fn load(spec: AssetSpec, base_dir: &Path) -> Result<Self, AssetError> {
        let path = base_dir.join(&spec.image);
        let image = image::open(&path)
            .map_err(|source| AssetError::Image {
                path: path.clone(),
                source,
            })?
            .to_rgba8();
        tracing::info!(
            path = %path.display(),
            width = image.width(),
            height = image.height(),
            "loaded asset image"
        );
        Self::from_image(spec, image)
    }

    pub fn spec(&self) -> &AssetSpec {
        &self.spec
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    /// Natural width / height of the artwork.
    pub fn aspect_ratio(&self) -> f32 {
        self.image.width() as f32 / self.image.height() as f32
    }
}

#[derive(Debug, Deserialize)]
struct Manifest {
    product_id: String,
    #[serde(default)]
    return_to: Option<String>,
    asset: AssetSpec,
}

/// What a product page hands to a try-on session.
#[derive(Debug, Clone)]
pub struct TryOnTarget {
    pub product_id: String,
    /// Navigation target to return to when the session ends.
    pub return_to: Option<String>,
    pub asset: Arc<Asset>,
}

impl TryOnTarget {
    pub fn new(product_id: impl Into<String>, return_to: Option<String>, asset: Asset) -> Self {
        Self {
            product_id: product_id.into(),
            return_to,
            asset: Arc::new(asset),
        }
    }

    /// Read a TOML manifest and decode its asset image.
    pub fn load(manifest_path: &Path) -> Result<Self, AssetError> {
        let src = std::fs::read_to_string(manifest_path).map_err(|source| AssetError::Read {
            path: manifest_path.to_path_buf(),
            source,
        })?;
        let manifest: Manifest = toml::from_str(&src)?;
        let base_dir = manifest_path.parent().unwrap_or_else(|| Path::new("."));
        let asset = Asset::load(manifest.asset, base_dir)?;

        tracing::info!(
            product = %manifest.product_id,
            manifest = %manifest_path.display(),
            "try-on target loaded"
        );
        Ok(Self::new(manifest.product_id, manifest.return_to, asset))
    }
}
