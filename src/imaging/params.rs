//! Parameter types for codec operations.
//!
//! These structs describe *what* to do, not *how* to do it. They are the
//! interface between the pipeline stages (which decide which files to
//! produce) and the [`backend`](super::backend) (which does the pixel work).
//! Keeping them plain data lets tests swap in a recording mock without
//! touching pipeline logic.
//!
//! ## Types
//!
//! - [`Quality`]: Lossy encoding quality (1–100). Clamped on construction.
//! - [`Sharpening`]: Unsharp-mask parameters applied after a downscale.
//! - [`JpegOptions`] / [`PngOptions`]: Per-format encoder knobs.
//! - [`Orientation`]: EXIF orientation (1–8) to bake into pixels.
//! - [`CompressParams`]: Recompress a primary file, optionally bounded by a max box.
//! - [`ResizeParams`]: Produce one size variant.
//! - [`WebpParams`]: Encode a WebP clone of a JPEG/PNG source.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Quality setting for lossy image encoding (1-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Quality(pub u32);

impl Quality {
    pub fn new(value: u32) -> Self {
        Self(value.clamp(1, 100))
    }

    pub fn value(self) -> u32 {
        self.0
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(82)
    }
}

/// Sharpening parameters for unsharp mask.
///
/// - `sigma`: Standard deviation of the Gaussian blur (higher = more sharpening)
/// - `threshold`: Minimum brightness difference to sharpen (0 = sharpen all pixels)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sharpening {
    pub sigma: f32,
    pub threshold: i32,
}

impl Sharpening {
    /// Light sharpening suitable for downscaled sizes.
    pub fn light() -> Self {
        Self {
            sigma: 0.5,
            threshold: 0,
        }
    }
}

/// Chroma subsampling for JPEG output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChromaSampling {
    #[serde(rename = "4:4:4")]
    Full,
    #[serde(rename = "4:2:2")]
    Half,
    #[serde(rename = "4:2:0")]
    Quarter,
}

impl ChromaSampling {
    /// Pixel sizes for the Cb and Cr components, as mozjpeg expects them.
    pub fn pixel_sizes(self) -> ((u8, u8), (u8, u8)) {
        match self {
            ChromaSampling::Full => ((1, 1), (1, 1)),
            ChromaSampling::Half => ((2, 1), (2, 1)),
            ChromaSampling::Quarter => ((2, 2), (2, 2)),
        }
    }
}

/// Output color space for JPEG.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JpegColorSpace {
    Ycbcr,
    Grayscale,
}

/// JPEG encoder knobs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JpegOptions {
    pub quality: Quality,
    /// Progressive (interlaced) scan order.
    pub progressive: bool,
    pub sampling: ChromaSampling,
    pub color_space: JpegColorSpace,
}

impl Default for JpegOptions {
    fn default() -> Self {
        Self {
            quality: Quality::default(),
            progressive: true,
            sampling: ChromaSampling::Quarter,
            color_space: JpegColorSpace::Ycbcr,
        }
    }
}

/// PNG encoder knobs. PNG output is always lossless.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PngOptions {
    /// Let the optimizer rewrite true-color images with few colors as indexed.
    pub palette_reduction: bool,
    /// Optimizer preset, 0 (fast) to 6 (slow).
    pub level: u8,
}

impl Default for PngOptions {
    fn default() -> Self {
        Self {
            palette_reduction: true,
            level: 2,
        }
    }
}

/// Encoder selection for an output file. The variant must match the
/// source's mime type: JPEG stays JPEG and PNG stays PNG.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EncodeOptions {
    Jpeg(JpegOptions),
    Png(PngOptions),
}

/// EXIF orientation tag values.
///
/// `Normal` (1) is the identity; the others name the transform needed to
/// display the stored pixels upright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    Normal,
    FlipHorizontal,
    Rotate180,
    FlipVertical,
    Transpose,
    Rotate90,
    Transverse,
    Rotate270,
}

impl Orientation {
    /// Map an EXIF orientation value. Out-of-range values yield `None`.
    pub fn from_exif(value: u32) -> Option<Self> {
        Some(match value {
            1 => Orientation::Normal,
            2 => Orientation::FlipHorizontal,
            3 => Orientation::Rotate180,
            4 => Orientation::FlipVertical,
            5 => Orientation::Transpose,
            6 => Orientation::Rotate90,
            7 => Orientation::Transverse,
            8 => Orientation::Rotate270,
            _ => return None,
        })
    }

    /// True when applying this orientation swaps width and height.
    pub fn swaps_dimensions(self) -> bool {
        matches!(
            self,
            Orientation::Transpose
                | Orientation::Rotate90
                | Orientation::Transverse
                | Orientation::Rotate270
        )
    }
}

/// Recompress a primary file in its own format.
///
/// `source` and `output` may be the same path; the backend writes through a
/// temporary file and renames, so a failure never truncates the source.
#[derive(Debug, Clone, PartialEq)]
pub struct CompressParams {
    pub source: PathBuf,
    pub output: PathBuf,
    /// Optional bounding box; `None` on an axis leaves it unconstrained.
    pub max_width: Option<u32>,
    pub max_height: Option<u32>,
    pub encode: EncodeOptions,
    pub sharpening: Option<Sharpening>,
}

/// Produce one size variant from a thumbnails source.
#[derive(Debug, Clone, PartialEq)]
pub struct ResizeParams {
    pub source: PathBuf,
    pub output: PathBuf,
    /// Final output dimensions (after orientation).
    pub width: u32,
    pub height: u32,
    /// Fill the box and center-crop instead of fitting inside it.
    pub crop: bool,
    /// Orientation to bake in before resizing; `None` leaves pixels as stored.
    pub orientation: Option<Orientation>,
    pub encode: EncodeOptions,
    pub sharpening: Option<Sharpening>,
}

/// Encode a WebP clone of a JPEG or PNG file.
#[derive(Debug, Clone, PartialEq)]
pub struct WebpParams {
    pub source: PathBuf,
    /// `None` uses the WebP encoder's own default quality.
    pub quality: Option<Quality>,
    /// Promote palette (indexed) PNG sources to true color before encoding.
    pub promote_palette: bool,
}
