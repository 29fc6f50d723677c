//! Press configuration.
//!
//! Handles loading, validating, and merging `press.toml`. Stock defaults are
//! the base layer; a `press.toml` in the library root overrides any subset of
//! keys.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [jpeg]
//! quality = 82              # Recompression quality (1-100)
//! progressive = true        # Progressive (interlaced) scans
//! sampling = "4:2:0"        # Chroma subsampling: "4:2:0", "4:2:2", "4:4:4"
//! color_space = "ycbcr"     # "ycbcr" or "grayscale"
//!
//! [png]
//! palette_reduction = true  # Allow lossless true-color → indexed rewrites
//! level = 2                 # Optimizer preset 0-6
//!
//! [webp]
//! policy = 2                # 0 delete, 1 always, 2 if missing, 3 never
//! quality_offset = "-5%"    # "-15%", "-10%", "-5%", "0%", or "default"
//! # png_quality = 90        # Omit to use the encoder default for PNG sources
//!
//! [quality]
//! min = 50
//! max = 95
//!
//! [resize]
//! # max_width = 2560        # Bound applied when recompressing a primary file
//! # max_height = 2560
//! sharpen = true            # Light unsharp mask on downscaled sizes
//!
//! [sizes.thumbnail]
//! width = 150
//! height = 150
//! crop = true
//!
//! [processing]
//! time_limit_secs = 60      # Per codec operation; 0 disables the limit
//!
//! [upload]
//! auto_rotate = true
//! # big_image_threshold = 2560
//! ```
//!
//! ## Partial Configuration
//!
//! Config files are sparse: override just the values you want:
//!
//! ```toml
//! [webp]
//! policy = 1
//! ```
//!
//! Unknown keys are rejected to catch typos early.
//!
//! `[sizes.<name>]` tables merge the same way: a user table adds a size or
//! overrides keys of a stock size, and the stock sizes are always present.

use crate::imaging::{
    ChromaSampling, EncodeOptions, JpegColorSpace, JpegOptions, PngOptions, Quality, Sharpening,
};
use crate::metadata::{MimeType, SizeRequest, SizeRequests};
use crate::webp::{QualityOffset, WebpPolicy, WebpSettings};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Name of the config file inside the library root.
pub const CONFIG_FILENAME: &str = "press.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Configuration loaded from `press.toml`.
///
/// All fields have sensible defaults. Unknown keys are rejected.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct PressConfig {
    pub jpeg: JpegConfig,
    pub png: PngConfig,
    pub webp: WebpConfig,
    pub quality: QualityBounds,
    pub resize: ResizeConfig,
    pub sizes: BTreeMap<String, SizeRequest>,
    pub processing: ProcessingConfig,
    pub upload: UploadConfig,
}

impl Default for PressConfig {
    fn default() -> Self {
        Self {
            jpeg: JpegConfig::default(),
            png: PngConfig::default(),
            webp: WebpConfig::default(),
            quality: QualityBounds::default(),
            resize: ResizeConfig::default(),
            sizes: stock_sizes(),
            processing: ProcessingConfig::default(),
            upload: UploadConfig::default(),
        }
    }
}

fn stock_sizes() -> BTreeMap<String, SizeRequest> {
    [
        ("thumbnail", 150, 150, true),
        ("medium", 300, 300, false),
        ("medium_large", 768, 0, false),
        ("large", 1024, 1024, false),
    ]
    .into_iter()
    .map(|(name, width, height, crop)| {
        (
            name.to_string(),
            SizeRequest {
                width,
                height,
                crop,
            },
        )
    })
    .collect()
}

impl PressConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=100).contains(&self.jpeg.quality) {
            return Err(ConfigError::Validation(
                "jpeg.quality must be 1-100".into(),
            ));
        }
        if self.png.level > 6 {
            return Err(ConfigError::Validation("png.level must be 0-6".into()));
        }
        if self.quality.min < 1 || self.quality.min > self.quality.max || self.quality.max > 100 {
            return Err(ConfigError::Validation(
                "quality bounds must satisfy 1 <= min <= max <= 100".into(),
            ));
        }
        if let Some(q) = self.webp.png_quality
            && !(1..=100).contains(&q)
        {
            return Err(ConfigError::Validation(
                "webp.png_quality must be 1-100".into(),
            ));
        }
        if self.resize.max_width == Some(0) || self.resize.max_height == Some(0) {
            return Err(ConfigError::Validation(
                "resize.max_width/max_height must be non-zero when set".into(),
            ));
        }
        if self.upload.big_image_threshold == Some(0) {
            return Err(ConfigError::Validation(
                "upload.big_image_threshold must be non-zero when set".into(),
            ));
        }
        for (name, size) in &self.sizes {
            if size.width == 0 && size.height == 0 {
                return Err(ConfigError::Validation(format!(
                    "sizes.{name} needs a non-zero width or height"
                )));
            }
        }
        Ok(())
    }

    /// Encoder knobs for files of the given type.
    pub fn encode_options(&self, mime: MimeType) -> EncodeOptions {
        match mime {
            MimeType::Jpeg => EncodeOptions::Jpeg(JpegOptions {
                quality: Quality::new(self.jpeg.quality),
                progressive: self.jpeg.progressive,
                sampling: self.jpeg.sampling,
                color_space: self.jpeg.color_space,
            }),
            MimeType::Png => EncodeOptions::Png(PngOptions {
                palette_reduction: self.png.palette_reduction,
                level: self.png.level,
            }),
        }
    }

    pub fn webp_settings(&self) -> WebpSettings {
        WebpSettings {
            offset: self.webp.quality_offset,
            jpeg_quality: Quality::new(self.jpeg.quality),
            png_quality: self.webp.png_quality.map(Quality::new),
            min_quality: Quality::new(self.quality.min),
            max_quality: Quality::new(self.quality.max),
        }
    }

    pub fn sharpening(&self) -> Option<Sharpening> {
        self.resize.sharpen.then(Sharpening::light)
    }

    pub fn size_requests(&self) -> SizeRequests {
        self.sizes.clone()
    }

    pub fn time_limit(&self) -> Duration {
        Duration::from_secs(self.processing.time_limit_secs)
    }
}

/// JPEG recompression settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct JpegConfig {
    pub quality: u32,
    pub progressive: bool,
    pub sampling: ChromaSampling,
    pub color_space: JpegColorSpace,
}

impl Default for JpegConfig {
    fn default() -> Self {
        let options = JpegOptions::default();
        Self {
            quality: options.quality.value(),
            progressive: options.progressive,
            sampling: options.sampling,
            color_space: options.color_space,
        }
    }
}

/// PNG optimization settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct PngConfig {
    pub palette_reduction: bool,
    pub level: u8,
}

impl Default for PngConfig {
    fn default() -> Self {
        let options = PngOptions::default();
        Self {
            palette_reduction: options.palette_reduction,
            level: options.level,
        }
    }
}

/// WebP clone settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct WebpConfig {
    pub policy: WebpPolicy,
    pub quality_offset: QualityOffset,
    /// Quality for clones of PNG sources. Absent uses the encoder default.
    pub png_quality: Option<u32>,
}

impl Default for WebpConfig {
    fn default() -> Self {
        Self {
            policy: WebpPolicy::IfMissing,
            quality_offset: QualityOffset::Minus5,
            png_quality: None,
        }
    }
}

/// Global lossy quality bounds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct QualityBounds {
    pub min: u32,
    pub max: u32,
}

impl Default for QualityBounds {
    fn default() -> Self {
        Self { min: 50, max: 95 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ResizeConfig {
    pub max_width: Option<u32>,
    pub max_height: Option<u32>,
    pub sharpen: bool,
}

impl Default for ResizeConfig {
    fn default() -> Self {
        Self {
            max_width: None,
            max_height: None,
            sharpen: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Budget for a single codec operation, reset before each one.
    pub time_limit_secs: u64,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            time_limit_secs: 60,
        }
    }
}

/// Upload-time behavior of the reference library.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct UploadConfig {
    /// Bake EXIF orientation into a `-rotated` copy on upload.
    pub auto_rotate: bool,
    /// Longest edge above which uploads get a `-scaled` copy.
    pub big_image_threshold: Option<u32>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            auto_rotate: true,
            big_image_threshold: None,
        }
    }
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    Ok(toml::Value::try_from(PressConfig::default())?)
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load `press.toml` from a directory as a raw TOML value.
///
/// Returns `Ok(None)` if the file does not exist.
pub fn load_raw_config(dir: &Path) -> Result<Option<toml::Value>, ConfigError> {
    let config_path = dir.join(CONFIG_FILENAME);
    if !config_path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&config_path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto the stock defaults, then deserialize and
/// validate.
pub fn resolve_config(overlay: Option<toml::Value>) -> Result<PressConfig, ConfigError> {
    let base = stock_defaults_value()?;
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: PressConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load config from `press.toml` in the given directory.
pub fn load_config(root: &Path) -> Result<PressConfig, ConfigError> {
    resolve_config(load_raw_config(root)?)
}

/// Returns a fully-commented stock `press.toml`.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# imgpress configuration
# ======================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults. Unknown keys cause an error.

# ---------------------------------------------------------------------------
# JPEG recompression
# ---------------------------------------------------------------------------
[jpeg]
# Quality for recompressed JPEG files and sizes (1-100).
quality = 82

# Progressive (interlaced) scan order.
progressive = true

# Chroma subsampling: "4:2:0", "4:2:2" or "4:4:4".
sampling = "4:2:0"

# Output color space: "ycbcr" or "grayscale".
color_space = "ycbcr"

# ---------------------------------------------------------------------------
# PNG optimization (always lossless)
# ---------------------------------------------------------------------------
[png]
# Allow rewriting true-color images with few colors as indexed.
palette_reduction = true

# Optimizer preset, 0 (fast) to 6 (slow).
level = 2

# ---------------------------------------------------------------------------
# WebP clones (photo.jpg -> photo.jpg.webp)
# ---------------------------------------------------------------------------
[webp]
# 0 = delete existing clones, 1 = always regenerate,
# 2 = generate only when missing, 3 = never touch clones.
policy = 2

# WebP quality relative to jpeg.quality: "-15%", "-10%", "-5%", "0%",
# or "default" to use the WebP encoder's own default.
quality_offset = "-5%"

# Quality for clones of PNG files. Omit to use the encoder default.
# png_quality = 90

# ---------------------------------------------------------------------------
# Global quality bounds (applied to derived WebP quality)
# ---------------------------------------------------------------------------
[quality]
min = 50
max = 95

# ---------------------------------------------------------------------------
# Resizing
# ---------------------------------------------------------------------------
[resize]
# Bounding box applied when a primary file is recompressed.
# max_width = 2560
# max_height = 2560

# Light unsharp mask on downscaled sizes.
sharpen = true

# ---------------------------------------------------------------------------
# Sizes (width/height 0 = unconstrained; crop = fill and center-crop)
#
# A [sizes.<name>] table in press.toml adds a size or overrides keys of a
# stock one. Stock sizes cannot be removed.
# ---------------------------------------------------------------------------
[sizes.large]
width = 1024
height = 1024
crop = false

[sizes.medium]
width = 300
height = 300
crop = false

[sizes.medium_large]
width = 768
height = 0
crop = false

[sizes.thumbnail]
width = 150
height = 150
crop = true

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Seconds allowed for a single codec operation; 0 disables the limit.
time_limit_secs = 60

# ---------------------------------------------------------------------------
# Upload (reference library only)
# ---------------------------------------------------------------------------
[upload]
# Bake EXIF orientation into a "-rotated" copy.
auto_rotate = true

# Longest edge above which uploads get a "-scaled" copy. Omit to disable.
# big_image_threshold = 2560
"##
}
