//! Codec adapter: decode, resize, recompress and WebP-encode JPEG/PNG files.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Identify** | `image::image_dimensions` |
//! | **Orientation** | `kamadak-exif` |
//! | **Recompress JPEG** | `mozjpeg` |
//! | **Recompress PNG** | `image` + `oxipng` |
//! | **Resize** | Lanczos3 (`resize_exact` / `resize_to_fill`) + `unsharpen` |
//! | **WebP** | `webp` (libwebp) |
//!
//! The module is split into:
//! - **Calculations**: Pure functions for dimension and quality math (unit testable)
//! - **Parameters**: Data structures describing codec operations
//! - **Backend**: [`ImageBackend`] trait + [`RustBackend`]

pub mod backend;
pub mod calculations;
pub mod params;
pub mod rust_backend;

pub use backend::{BackendError, Dimensions, ImageBackend};
pub use params::{
    ChromaSampling, EncodeOptions, JpegColorSpace, JpegOptions, Orientation, PngOptions, Quality,
    Sharpening,
};
pub use rust_backend::RustBackend;
