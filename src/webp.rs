//! WebP clone generator.
//!
//! A clone is a WebP encode of a JPEG or PNG file, written next to it as
//! `<name.ext>.webp`. What happens to the clone is decided by a
//! [`WebpPolicy`]; the encode quality is derived from the JPEG quality by a
//! [`QualityOffset`] and clamped to the global bounds.
//!
//! Clones are written through a temp file in the same directory and renamed
//! into place with the source's permission bits already applied, so a failed
//! encode never leaves a truncated clone and a reader never sees a clone with
//! the wrong mode.

use crate::imaging::calculations::{clamp_quality, reduce_quality};
use crate::imaging::params::WebpParams;
use crate::imaging::{BackendError, ImageBackend, Quality};
use crate::metadata::MimeType;
use crate::naming;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// What to do with a file's clone. Integer values are stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum WebpPolicy {
    /// Remove any existing clone and produce nothing.
    Delete = 0,
    /// Regenerate unconditionally.
    Always = 1,
    /// Generate only when no clone exists.
    IfMissing = 2,
    /// Leave clones alone.
    Never = 3,
}

impl TryFrom<u8> for WebpPolicy {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(WebpPolicy::Delete),
            1 => Ok(WebpPolicy::Always),
            2 => Ok(WebpPolicy::IfMissing),
            3 => Ok(WebpPolicy::Never),
            other => Err(format!("webp policy must be 0-3, got {other}")),
        }
    }
}

impl From<WebpPolicy> for u8 {
    fn from(policy: WebpPolicy) -> u8 {
        policy as u8
    }
}

/// WebP quality relative to the JPEG quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum QualityOffset {
    Minus15,
    Minus10,
    Minus5,
    Same,
    /// Bypass: use the WebP encoder's own default.
    EncoderDefault,
}

impl QualityOffset {
    /// Reduction in percent of the JPEG quality; `None` for the bypass.
    pub fn percent_off(self) -> Option<u32> {
        match self {
            QualityOffset::Minus15 => Some(15),
            QualityOffset::Minus10 => Some(10),
            QualityOffset::Minus5 => Some(5),
            QualityOffset::Same => Some(0),
            QualityOffset::EncoderDefault => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            QualityOffset::Minus15 => "-15%",
            QualityOffset::Minus10 => "-10%",
            QualityOffset::Minus5 => "-5%",
            QualityOffset::Same => "0%",
            QualityOffset::EncoderDefault => "default",
        }
    }
}

impl TryFrom<String> for QualityOffset {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.trim() {
            "-15%" => Ok(QualityOffset::Minus15),
            "-10%" => Ok(QualityOffset::Minus10),
            "-5%" => Ok(QualityOffset::Minus5),
            "0%" => Ok(QualityOffset::Same),
            "default" => Ok(QualityOffset::EncoderDefault),
            other => Err(format!(
                "quality offset must be one of -15%, -10%, -5%, 0%, default; got {other:?}"
            )),
        }
    }
}

impl From<QualityOffset> for String {
    fn from(offset: QualityOffset) -> String {
        offset.as_str().to_string()
    }
}

/// Everything the generator needs besides the file and the policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WebpSettings {
    pub offset: QualityOffset,
    pub jpeg_quality: Quality,
    /// `None` uses the encoder default for PNG sources.
    pub png_quality: Option<Quality>,
    pub min_quality: Quality,
    pub max_quality: Quality,
}

impl Default for WebpSettings {
    fn default() -> Self {
        Self {
            offset: QualityOffset::Minus5,
            jpeg_quality: Quality::default(),
            png_quality: None,
            min_quality: Quality::new(50),
            max_quality: Quality::new(95),
        }
    }
}

impl WebpSettings {
    /// Encode quality for a source of the given type; `None` means the
    /// encoder default.
    pub fn quality_for(&self, mime: MimeType) -> Option<Quality> {
        let raw = match mime {
            MimeType::Jpeg => reduce_quality(self.jpeg_quality, self.offset.percent_off()?),
            MimeType::Png => self.png_quality?.value(),
        };
        Some(clamp_quality(raw, self.min_quality, self.max_quality))
    }
}

/// Pad an encoded container to an even length with one NUL byte.
/// Returns whether padding was added.
pub fn pad_to_even(bytes: &mut Vec<u8>) -> bool {
    if bytes.len() % 2 == 1 {
        bytes.push(0);
        true
    } else {
        false
    }
}

/// Remove a file's clone. Returns whether one existed.
pub fn remove_clone(source: &Path) -> std::io::Result<bool> {
    let target = naming::webp_path(source);
    match std::fs::remove_file(&target) {
        Ok(()) => {
            debug!(clone = %target.display(), "removed clone");
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Apply `policy` to the clone of `source`.
///
/// Returns the clone's path when one exists afterwards. An encode failure is
/// an error and leaves any previous clone untouched; callers treat it as
/// "no clone this pass".
pub fn clone_webp(
    backend: &dyn ImageBackend,
    source: &Path,
    mime: MimeType,
    policy: WebpPolicy,
    settings: &WebpSettings,
) -> Result<Option<PathBuf>, BackendError> {
    let target = naming::webp_path(source);
    match policy {
        WebpPolicy::Never => return Ok(None),
        WebpPolicy::Delete => {
            remove_clone(source)?;
            return Ok(None);
        }
        WebpPolicy::IfMissing if target.exists() => {
            debug!(clone = %target.display(), "clone present, skipping");
            return Ok(Some(target));
        }
        WebpPolicy::IfMissing | WebpPolicy::Always => {}
    }

    let quality = settings.quality_for(mime);
    let mut bytes = backend.encode_webp(&WebpParams {
        source: source.to_path_buf(),
        quality,
        promote_palette: mime == MimeType::Png,
    })?;
    if bytes.is_empty() {
        return Err(BackendError::ProcessingFailed(format!(
            "WebP encode of {} produced no data",
            source.display()
        )));
    }
    pad_to_even(&mut bytes);

    let permissions = std::fs::metadata(source)?.permissions();
    let dir = target.parent().ok_or_else(|| {
        BackendError::ProcessingFailed(format!("{} has no parent directory", target.display()))
    })?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(&bytes)?;
    tmp.as_file().set_permissions(permissions)?;
    tmp.persist(&target).map_err(|e| BackendError::Io(e.error))?;

    debug!(
        clone = %target.display(),
        bytes = bytes.len(),
        quality = ?quality.map(Quality::value),
        "wrote clone"
    );
    Ok(Some(target))
}
