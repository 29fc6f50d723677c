//! Pure calculation functions for image dimensions and quality.
//!
//! All functions here are pure and testable without any I/O or images.

use super::params::{Orientation, Quality};

/// Longest edge above which in-place recompression is skipped.
///
/// Fixed on purpose: it does not follow `[resize] max_width`/`max_height`.
pub const RESOURCE_GUARD_EDGE: u32 = 2500;

/// True when an image is too large to recompress in this pass.
pub fn exceeds_resource_guard(width: u32, height: u32) -> bool {
    width.max(height) > RESOURCE_GUARD_EDGE
}

/// Dimensions after an EXIF orientation has been baked into the pixels.
pub fn oriented_dimensions(dims: (u32, u32), orientation: Option<Orientation>) -> (u32, u32) {
    match orientation {
        Some(o) if o.swaps_dimensions() => (dims.1, dims.0),
        _ => dims,
    }
}

/// Scale factor that fits `source` inside an optional bounding box.
///
/// `None` (or 0) on an axis leaves that axis unconstrained. Never above 1.0:
/// images are only ever shrunk.
fn fit_ratio(source: (u32, u32), max_w: Option<u32>, max_h: Option<u32>) -> f64 {
    let (src_w, src_h) = source;
    let rw = match max_w {
        Some(w) if w > 0 => w as f64 / src_w as f64,
        _ => f64::INFINITY,
    };
    let rh = match max_h {
        Some(h) if h > 0 => h as f64 / src_h as f64,
        _ => f64::INFINITY,
    };
    rw.min(rh).min(1.0)
}

fn scale(source: (u32, u32), ratio: f64) -> (u32, u32) {
    (
        ((source.0 as f64 * ratio).round() as u32).max(1),
        ((source.1 as f64 * ratio).round() as u32).max(1),
    )
}

/// Fit `source` inside an optional max box, preserving aspect ratio.
///
/// # Examples
/// ```
/// # use imgpress::imaging::calculations::fit_within;
/// assert_eq!(fit_within((4000, 3000), Some(2000), None), (2000, 1500));
/// assert_eq!(fit_within((800, 600), Some(2000), Some(2000)), (800, 600));
/// ```
pub fn fit_within(source: (u32, u32), max_w: Option<u32>, max_h: Option<u32>) -> (u32, u32) {
    scale(source, fit_ratio(source, max_w, max_h))
}

/// Output dimensions for one requested size, or `None` when the size would
/// not shrink the source.
///
/// - Fit mode (`crop == false`, or either target axis is 0): scale the source
///   into the `width`x`height` box, 0 meaning unconstrained.
/// - Crop mode: the output is `min(target, source)` on each axis; the backend
///   fills that box and center-crops.
///
/// A result equal to the source dimensions is treated as "nothing to do".
pub fn plan_size(source: (u32, u32), width: u32, height: u32, crop: bool) -> Option<(u32, u32)> {
    if width == 0 && height == 0 {
        return None;
    }

    let planned = if crop && width > 0 && height > 0 {
        (width.min(source.0), height.min(source.1))
    } else {
        let ratio = fit_ratio(
            source,
            (width > 0).then_some(width),
            (height > 0).then_some(height),
        );
        if ratio >= 1.0 {
            return None;
        }
        scale(source, ratio)
    };

    if planned == source { None } else { Some(planned) }
}

/// Apply a percentage reduction to a base quality, rounding to nearest.
///
/// `percent_off` is the reduction in percent of `base` (15 → 85% of base).
pub fn reduce_quality(base: Quality, percent_off: u32) -> u32 {
    let kept = 100u32.saturating_sub(percent_off) as f64 / 100.0;
    (base.value() as f64 * kept).round() as u32
}

/// Clamp a raw quality value to the configured `[min, max]` bounds.
pub fn clamp_quality(value: u32, min: Quality, max: Quality) -> Quality {
    Quality::new(value.clamp(min.value(), max.value().max(min.value())))
}
