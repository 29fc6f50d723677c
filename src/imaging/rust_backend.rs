//! Production codec backend.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Decode (JPEG, PNG) | `image` crate |
//! | PNG header inspection | `png::Decoder::read_info` (indexed color type) |
//! | EXIF orientation | `kamadak-exif` |
//! | Resize | `image::imageops` with `Lanczos3` filter |
//! | Encode → JPEG | `mozjpeg` (quality, progressive, chroma sampling, color space) |
//! | Encode → PNG | `image` PNG encoder + `oxipng` (palette reduction) |
//! | Encode → WebP | `webp` (libwebp, lossy with lossless alpha plane) |
//! | Sharpening | `image::imageops::unsharpen` |
//!
//! Every file written by this backend goes through [`write_atomic`]: a
//! `tempfile` in the destination directory, renamed into place on success.

use super::backend::{BackendError, Dimensions, ImageBackend};
use super::calculations::fit_within;
use super::params::{
    CompressParams, EncodeOptions, JpegColorSpace, JpegOptions, Orientation, PngOptions,
    ResizeParams, Sharpening, WebpParams,
};
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat, ImageReader, Rgba, RgbaImage};
use std::io::{Cursor, Write};
use std::path::Path;
use tracing::debug;

/// Codec backend built on `image`, `mozjpeg`, `oxipng` and `webp`.
///
/// See the [module docs](self) for the crate-to-operation mapping.
pub struct RustBackend;

impl RustBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RustBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Load and decode an image from disk, sniffing the format from content.
fn load_image(path: &Path) -> Result<DynamicImage, BackendError> {
    ImageReader::open(path)
        .map_err(BackendError::Io)?
        .with_guessed_format()
        .map_err(BackendError::Io)?
        .decode()
        .map_err(|e| {
            BackendError::ProcessingFailed(format!("Failed to decode {}: {}", path.display(), e))
        })
}

/// EXIF orientation of a file. Missing or unreadable EXIF is `None`.
fn exif_orientation(path: &Path) -> Result<Option<Orientation>, BackendError> {
    let file = std::fs::File::open(path)?;
    let mut reader = std::io::BufReader::new(file);
    let exif = match exif::Reader::new().read_from_container(&mut reader) {
        Ok(exif) => exif,
        Err(_) => return Ok(None),
    };
    Ok(exif
        .get_field(exif::Tag::Orientation, exif::In::PRIMARY)
        .and_then(|field| field.value.get_uint(0))
        .and_then(Orientation::from_exif))
}

/// True when PNG bytes declare an indexed (palette) color type.
fn is_indexed_png(bytes: &[u8]) -> bool {
    png::Decoder::new(Cursor::new(bytes))
        .read_info()
        .map(|reader| reader.info().color_type == png::ColorType::Indexed)
        .unwrap_or(false)
}

/// Promote an image to 8-bit RGBA by compositing it onto a fully
/// transparent canvas, so transparent palette entries stay transparent.
pub(crate) fn promote_to_truecolor(img: &DynamicImage) -> DynamicImage {
    let (w, h) = img.dimensions();
    let mut canvas = RgbaImage::from_pixel(w, h, Rgba([0, 0, 0, 0]));
    image::imageops::overlay(&mut canvas, &img.to_rgba8(), 0, 0);
    DynamicImage::ImageRgba8(canvas)
}

/// Bake an EXIF orientation into the pixels.
pub(crate) fn apply_orientation(img: DynamicImage, orientation: Orientation) -> DynamicImage {
    match orientation {
        Orientation::Normal => img,
        Orientation::FlipHorizontal => img.fliph(),
        Orientation::Rotate180 => img.rotate180(),
        Orientation::FlipVertical => img.flipv(),
        Orientation::Transpose => img.rotate90().fliph(),
        Orientation::Rotate90 => img.rotate90(),
        Orientation::Transverse => img.rotate270().fliph(),
        Orientation::Rotate270 => img.rotate270(),
    }
}

fn sharpen(img: DynamicImage, sharpening: Option<Sharpening>) -> DynamicImage {
    match sharpening {
        Some(s) => DynamicImage::from(image::imageops::unsharpen(&img, s.sigma, s.threshold)),
        None => img,
    }
}

/// Encode to JPEG with mozjpeg.
///
/// mozjpeg reports fatal errors by unwinding, so the whole encode runs under
/// `catch_unwind` and a panic becomes a `ProcessingFailed`.
fn encode_jpeg(img: &DynamicImage, options: &JpegOptions) -> Result<Vec<u8>, BackendError> {
    let options = *options;
    let run = move || -> Result<Vec<u8>, BackendError> {
        let (w, h) = img.dimensions();
        if w == 0 || h == 0 {
            return Err(BackendError::ProcessingFailed(
                "JPEG encode: zero-sized image".into(),
            ));
        }

        let (mut comp, pixels, stride) = match options.color_space {
            JpegColorSpace::Grayscale => {
                let luma = img.to_luma8();
                let comp = mozjpeg::Compress::new(mozjpeg::ColorSpace::JCS_GRAYSCALE);
                (comp, luma.into_raw(), w as usize)
            }
            JpegColorSpace::Ycbcr => {
                let rgb = img.to_rgb8();
                let mut comp = mozjpeg::Compress::new(mozjpeg::ColorSpace::JCS_RGB);
                comp.set_color_space(mozjpeg::ColorSpace::JCS_YCbCr);
                let (cb, cr) = options.sampling.pixel_sizes();
                comp.set_chroma_sampling_pixel_sizes(cb, cr);
                (comp, rgb.into_raw(), w as usize * 3)
            }
        };

        if !options.progressive {
            comp.set_fastest_defaults();
        }
        comp.set_size(w as usize, h as usize);
        comp.set_quality(options.quality.value() as f32);
        if options.progressive {
            comp.set_progressive_mode();
        }
        comp.set_optimize_coding(true);

        let mut output = Vec::with_capacity((w as usize * h as usize / 4).max(4096));
        let mut started = comp
            .start_compress(&mut output)
            .map_err(|e| BackendError::ProcessingFailed(format!("mozjpeg start: {e}")))?;
        for row in pixels.chunks(stride) {
            started
                .write_scanlines(row)
                .map_err(|e| BackendError::ProcessingFailed(format!("mozjpeg scanlines: {e}")))?;
        }
        started
            .finish()
            .map_err(|e| BackendError::ProcessingFailed(format!("mozjpeg finish: {e}")))?;
        Ok(output)
    };

    std::panic::catch_unwind(std::panic::AssertUnwindSafe(run)).unwrap_or_else(|_| {
        Err(BackendError::ProcessingFailed(
            "JPEG encoder panicked".into(),
        ))
    })
}

/// Encode to PNG, then optimize losslessly with oxipng.
fn encode_png(img: &DynamicImage, options: &PngOptions) -> Result<Vec<u8>, BackendError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .map_err(|e| BackendError::ProcessingFailed(format!("PNG encode failed: {e}")))?;

    let mut oxi = oxipng::Options::from_preset(options.level.min(6));
    oxi.palette_reduction = options.palette_reduction;
    oxi.strip = oxipng::StripChunks::Safe;

    oxipng::optimize_from_memory(&buf, &oxi)
        .map_err(|e| BackendError::ProcessingFailed(format!("PNG optimization failed: {e}")))
}

fn encode(img: &DynamicImage, options: &EncodeOptions) -> Result<Vec<u8>, BackendError> {
    match options {
        EncodeOptions::Jpeg(jpeg) => encode_jpeg(img, jpeg),
        EncodeOptions::Png(png) => encode_png(img, png),
    }
}

/// Write bytes next to `path` in a temporary file and rename into place.
///
/// The destination is either fully replaced or left as it was.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), BackendError> {
    let dir = path.parent().ok_or_else(|| {
        BackendError::ProcessingFailed(format!("{} has no parent directory", path.display()))
    })?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file_mut().sync_all()?;
    tmp.persist(path).map_err(|e| BackendError::Io(e.error))?;
    Ok(())
}

impl ImageBackend for RustBackend {
    fn identify(&self, path: &Path) -> Result<Dimensions, BackendError> {
        let (width, height) = image::image_dimensions(path).map_err(|e| {
            BackendError::ProcessingFailed(format!("Failed to read dimensions: {}", e))
        })?;
        Ok(Dimensions { width, height })
    }

    fn read_orientation(&self, path: &Path) -> Result<Option<Orientation>, BackendError> {
        exif_orientation(path)
    }

    fn compress(&self, params: &CompressParams) -> Result<Dimensions, BackendError> {
        let mut img = load_image(&params.source)?;
        // mozjpeg writes no EXIF, so the tag has to end up in the pixels.
        if matches!(params.encode, EncodeOptions::Jpeg(_))
            && let Some(orientation) = exif_orientation(&params.source)?
            && orientation != Orientation::Normal
        {
            debug!(
                source = %params.source.display(),
                ?orientation,
                "baking orientation before recompress"
            );
            img = apply_orientation(img, orientation);
        }
        let (w, h) = img.dimensions();
        let (tw, th) = fit_within((w, h), params.max_width, params.max_height);

        let img = if (tw, th) != (w, h) {
            debug!(from = ?(w, h), to = ?(tw, th), "downscaling before recompress");
            sharpen(
                img.resize_exact(tw, th, FilterType::Lanczos3),
                params.sharpening,
            )
        } else {
            img
        };

        let bytes = encode(&img, &params.encode)?;
        write_atomic(&params.output, &bytes)?;
        debug!(output = %params.output.display(), bytes = bytes.len(), "recompressed");
        Ok(Dimensions::new(tw, th))
    }

    fn resize(&self, params: &ResizeParams) -> Result<Dimensions, BackendError> {
        let mut img = load_image(&params.source)?;
        if let Some(orientation) = params.orientation {
            img = apply_orientation(img, orientation);
        }

        let resized = if params.crop {
            img.resize_to_fill(params.width, params.height, FilterType::Lanczos3)
        } else {
            img.resize_exact(params.width, params.height, FilterType::Lanczos3)
        };
        let resized = sharpen(resized, params.sharpening);

        let bytes = encode(&resized, &params.encode)?;
        write_atomic(&params.output, &bytes)?;
        Ok(Dimensions::new(resized.width(), resized.height()))
    }

    fn encode_webp(&self, params: &WebpParams) -> Result<Vec<u8>, BackendError> {
        let bytes = std::fs::read(&params.source)?;
        let mut img = image::load_from_memory(&bytes).map_err(|e| {
            BackendError::ProcessingFailed(format!(
                "Failed to decode {}: {}",
                params.source.display(),
                e
            ))
        })?;

        if params.promote_palette && is_indexed_png(&bytes) {
            debug!(source = %params.source.display(), "promoting palette PNG to true color");
            img = promote_to_truecolor(&img);
        }

        let mut config = webp::WebPConfig::new()
            .map_err(|_| BackendError::ProcessingFailed("failed to create WebPConfig".into()))?;
        if let Some(quality) = params.quality {
            config.quality = quality.value() as f32;
        }

        let (w, h) = img.dimensions();
        let encoded = if img.color().has_alpha() {
            let rgba = img.to_rgba8();
            webp::Encoder::from_rgba(rgba.as_raw(), w, h).encode_advanced(&config)
        } else {
            let rgb = img.to_rgb8();
            webp::Encoder::from_rgb(rgb.as_raw(), w, h).encode_advanced(&config)
        }
        .map_err(|e| BackendError::ProcessingFailed(format!("WebP encode failed: {e:?}")))?;

        Ok(encoded.to_vec())
    }
}
