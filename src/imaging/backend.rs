//! Codec backend trait and shared types.
//!
//! The [`ImageBackend`] trait defines the five operations the pipeline needs
//! from a codec: identify, orientation lookup, recompress, resize, and WebP
//! encode.
//!
//! The production implementation is
//! [`RustBackend`](super::rust_backend::RustBackend). Tests use the recording
//! [`MockBackend`](tests::MockBackend) so pipeline logic can be exercised
//! without decoding a single pixel.

use super::params::{CompressParams, Orientation, ResizeParams, WebpParams};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Processing failed: {0}")]
    ProcessingFailed(String),
}

/// Result of an identify operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn as_tuple(self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Trait for codec backends.
///
/// Operations that produce files (`compress`, `resize`) must write through a
/// temporary file and rename into place: a failed call leaves the output
/// path untouched. `encode_webp` returns bytes so the caller owns the
/// container contract and the final write.
pub trait ImageBackend {
    /// Get image dimensions without decoding pixels where possible.
    fn identify(&self, path: &Path) -> Result<Dimensions, BackendError>;

    /// Read the EXIF orientation tag. `Ok(None)` when absent or invalid.
    fn read_orientation(&self, path: &Path) -> Result<Option<Orientation>, BackendError>;

    /// Re-encode a primary file in its own format, optionally bounded.
    /// A JPEG source's EXIF orientation is baked into the output pixels.
    /// Returns the dimensions written.
    fn compress(&self, params: &CompressParams) -> Result<Dimensions, BackendError>;

    /// Produce one size variant. Returns the dimensions written.
    fn resize(&self, params: &ResizeParams) -> Result<Dimensions, BackendError>;

    /// Encode a WebP clone and return the raw container bytes.
    fn encode_webp(&self, params: &WebpParams) -> Result<Vec<u8>, BackendError>;
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::imaging::params::{EncodeOptions, JpegOptions, Quality};
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::Mutex;

    /// Mock backend that records operations instead of decoding images.
    ///
    /// File-producing operations write a small placeholder so callers that
    /// check the filesystem (byte sizes, clone presence) behave as in
    /// production. Identify answers come from a per-path table.
    #[derive(Default)]
    pub struct MockBackend {
        pub dimensions: Mutex<HashMap<PathBuf, Dimensions>>,
        pub orientation: Mutex<Option<Orientation>>,
        /// Bytes written by `compress`; defaults to a 4-byte payload.
        pub compress_output: Mutex<Option<Vec<u8>>>,
        /// Bytes returned by `encode_webp`; defaults to a minimal RIFF header.
        pub webp_output: Mutex<Option<Vec<u8>>>,
        pub fail_compress: Mutex<bool>,
        pub fail_resize_for: Mutex<Vec<(u32, u32)>>,
        pub fail_webp: Mutex<bool>,
        pub operations: Mutex<Vec<RecordedOp>>,
    }

    #[derive(Debug, Clone, PartialEq)]
    pub enum RecordedOp {
        Identify(String),
        ReadOrientation(String),
        Compress {
            source: String,
            output: String,
            max_width: Option<u32>,
            quality: Option<u32>,
        },
        Resize {
            source: String,
            output: String,
            width: u32,
            height: u32,
            crop: bool,
            orientation: Option<Orientation>,
        },
        EncodeWebp {
            source: String,
            quality: Option<u32>,
            promote_palette: bool,
        },
    }

    impl MockBackend {
        pub fn new() -> Self {
            Self::default()
        }

        /// Register the dimensions `identify` reports for a path.
        pub fn with_dimensions(self, path: impl Into<PathBuf>, width: u32, height: u32) -> Self {
            self.dimensions
                .lock()
                .unwrap()
                .insert(path.into(), Dimensions::new(width, height));
            self
        }

        pub fn get_operations(&self) -> Vec<RecordedOp> {
            self.operations.lock().unwrap().clone()
        }

        pub fn count(&self, pred: impl Fn(&RecordedOp) -> bool) -> usize {
            self.get_operations().iter().filter(|op| pred(op)).count()
        }

        fn record(&self, op: RecordedOp) {
            self.operations.lock().unwrap().push(op);
        }
    }

    fn lossy_quality(encode: &EncodeOptions) -> Option<u32> {
        match encode {
            EncodeOptions::Jpeg(JpegOptions { quality, .. }) => Some(quality.value()),
            EncodeOptions::Png(_) => None,
        }
    }

    impl ImageBackend for MockBackend {
        fn identify(&self, path: &Path) -> Result<Dimensions, BackendError> {
            self.record(RecordedOp::Identify(path.to_string_lossy().to_string()));
            self.dimensions
                .lock()
                .unwrap()
                .get(path)
                .copied()
                .ok_or_else(|| BackendError::ProcessingFailed("No mock dimensions".to_string()))
        }

        fn read_orientation(&self, path: &Path) -> Result<Option<Orientation>, BackendError> {
            self.record(RecordedOp::ReadOrientation(
                path.to_string_lossy().to_string(),
            ));
            Ok(*self.orientation.lock().unwrap())
        }

        fn compress(&self, params: &CompressParams) -> Result<Dimensions, BackendError> {
            self.record(RecordedOp::Compress {
                source: params.source.to_string_lossy().to_string(),
                output: params.output.to_string_lossy().to_string(),
                max_width: params.max_width,
                quality: lossy_quality(&params.encode),
            });
            if *self.fail_compress.lock().unwrap() {
                return Err(BackendError::ProcessingFailed("mock compress failure".into()));
            }
            let bytes = self
                .compress_output
                .lock()
                .unwrap()
                .clone()
                .unwrap_or_else(|| b"tiny".to_vec());
            std::fs::write(&params.output, bytes)?;
            let dims = self
                .dimensions
                .lock()
                .unwrap()
                .get(&params.source)
                .copied()
                .unwrap_or(Dimensions::new(1, 1));
            Ok(dims)
        }

        fn resize(&self, params: &ResizeParams) -> Result<Dimensions, BackendError> {
            self.record(RecordedOp::Resize {
                source: params.source.to_string_lossy().to_string(),
                output: params.output.to_string_lossy().to_string(),
                width: params.width,
                height: params.height,
                crop: params.crop,
                orientation: params.orientation,
            });
            if self
                .fail_resize_for
                .lock()
                .unwrap()
                .contains(&(params.width, params.height))
            {
                return Err(BackendError::ProcessingFailed("mock resize failure".into()));
            }
            std::fs::write(&params.output, b"size")?;
            Ok(Dimensions::new(params.width, params.height))
        }

        fn encode_webp(&self, params: &WebpParams) -> Result<Vec<u8>, BackendError> {
            self.record(RecordedOp::EncodeWebp {
                source: params.source.to_string_lossy().to_string(),
                quality: params.quality.map(Quality::value),
                promote_palette: params.promote_palette,
            });
            if *self.fail_webp.lock().unwrap() {
                return Err(BackendError::ProcessingFailed("mock webp failure".into()));
            }
            Ok(self
                .webp_output
                .lock()
                .unwrap()
                .clone()
                .unwrap_or_else(|| b"RIFF\x04\x00\x00\x00WEBP".to_vec()))
        }
    }

    #[test]
    fn mock_records_identify() {
        let backend = MockBackend::new().with_dimensions("/test/image.jpg", 800, 600);

        let result = backend.identify(Path::new("/test/image.jpg")).unwrap();
        assert_eq!(result, Dimensions::new(800, 600));

        let ops = backend.get_operations();
        assert_eq!(ops.len(), 1);
        assert!(matches!(&ops[0], RecordedOp::Identify(p) if p == "/test/image.jpg"));
    }

    #[test]
    fn mock_identify_unknown_path_errors() {
        let backend = MockBackend::new();
        assert!(backend.identify(Path::new("/nope.jpg")).is_err());
    }

    #[test]
    fn mock_resize_writes_placeholder() {
        let tmp = tempfile::TempDir::new().unwrap();
        let backend = MockBackend::new();
        let output = tmp.path().join("a-150x150.jpg");

        let dims = backend
            .resize(&ResizeParams {
                source: tmp.path().join("a.jpg"),
                output: output.clone(),
                width: 150,
                height: 150,
                crop: true,
                orientation: None,
                encode: EncodeOptions::Jpeg(JpegOptions::default()),
                sharpening: None,
            })
            .unwrap();

        assert_eq!(dims, Dimensions::new(150, 150));
        assert!(output.exists());
        assert!(matches!(
            &backend.get_operations()[0],
            RecordedOp::Resize {
                width: 150,
                height: 150,
                crop: true,
                ..
            }
        ));
    }

    #[test]
    fn mock_webp_failure_is_reported() {
        let backend = MockBackend::new();
        *backend.fail_webp.lock().unwrap() = true;
        let result = backend.encode_webp(&WebpParams {
            source: "/a.png".into(),
            quality: None,
            promote_palette: true,
        });
        assert!(result.is_err());
        assert_eq!(
            backend.count(|op| matches!(op, RecordedOp::EncodeWebp { .. })),
            1
        );
    }
}
