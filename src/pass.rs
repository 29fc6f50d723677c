//! Per-pass state threaded through classify → dispatch → subsizes.
//!
//! A [`PassContext`] replaces shared mutable plugin state: it carries the
//! record id, the resolved mime type and image state, the re-entrancy
//! [`MetadataGuard`], and the [`TimeBudget`] reset before each codec call.

use crate::imaging::BackendError;
use crate::metadata::{MimeType, RecordId};
use crate::store::StoreError;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Why a pass was aborted. Every variant is recovered by returning the
/// pipeline's input unchanged.
#[derive(Error, Debug)]
pub enum PassError {
    #[error("unsupported mime type: {0}")]
    UnsupportedMimeType(String),
    #[error("metadata is missing file, width or height")]
    IncompleteMetadata,
    #[error("snapshot references a missing file: {}", .0.display())]
    StaleSnapshot(PathBuf),
    #[error("unrecognized suffix {suffix:?} on {file}")]
    UnrecognizedSuffix { file: String, suffix: String },
    #[error("codec failure: {0}")]
    CodecFailure(#[from] BackendError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why the attached file looks the way it does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageState {
    /// Saved by the host's image editor.
    Edited,
    /// Downscaled copy of a big original (`-scaled`).
    Scaled,
    /// Orientation baked in, not yet recompressed (`-rotated`).
    Rotated,
    /// PNG original.
    Lossless,
    /// JPEG original.
    Lossy,
}

impl fmt::Display for ImageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ImageState::Edited => "edited",
            ImageState::Scaled => "scaled",
            ImageState::Rotated => "rotated",
            ImageState::Lossless => "lossless",
            ImageState::Lossy => "lossy",
        })
    }
}

/// "Currently updating metadata" flag.
///
/// Writing metadata can re-trigger the host's hooks; while the flag is held,
/// the pipeline's hooks return immediately. Clones share the flag.
#[derive(Debug, Clone, Default)]
pub struct MetadataGuard(Arc<AtomicBool>);

impl MetadataGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_held(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Hold the flag until the returned value is dropped. Nested holds
    /// restore the outer state on release.
    pub fn hold(&self) -> GuardHold<'_> {
        let previous = self.0.swap(true, Ordering::SeqCst);
        GuardHold {
            guard: self,
            previous,
        }
    }
}

pub struct GuardHold<'a> {
    guard: &'a MetadataGuard,
    previous: bool,
}

impl Drop for GuardHold<'_> {
    fn drop(&mut self) {
        self.guard.0.store(self.previous, Ordering::SeqCst);
    }
}

/// Execution-time budget for one codec operation.
///
/// Reset before every long codec call so one record's work is measured per
/// operation rather than against the whole request.
#[derive(Debug, Clone)]
pub struct TimeBudget {
    limit: Duration,
    started: Instant,
}

impl TimeBudget {
    pub fn new(limit: Duration) -> Self {
        Self {
            limit,
            started: Instant::now(),
        }
    }

    pub fn reset(&mut self) {
        self.started = Instant::now();
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// True once more than the limit has passed since the last reset.
    /// A zero limit never expires.
    pub fn expired(&self) -> bool {
        !self.limit.is_zero() && self.elapsed() > self.limit
    }
}

#[derive(Debug, Clone)]
pub struct PassContext {
    pub id: RecordId,
    pub mime: MimeType,
    pub state: ImageState,
    pub guard: MetadataGuard,
    pub budget: TimeBudget,
}

impl PassContext {
    pub fn new(
        id: RecordId,
        mime: MimeType,
        state: ImageState,
        guard: MetadataGuard,
        time_limit: Duration,
    ) -> Self {
        Self {
            id,
            mime,
            state,
            guard,
            budget: TimeBudget::new(time_limit),
        }
    }
}
