//! Attachment metadata model.
//!
//! A record's [`Metadata`] is the host's view of one managed image: the
//! attached file, its dimensions, the optional pre-transform original, and
//! every named size variant. It is persisted by the host as JSON, so every
//! type here derives `Serialize`/`Deserialize` with the host's field names.
//!
//! ## Paths
//!
//! `file` is relative to the library root (`2024/05/photo-scaled.jpg`).
//! `original_image` and every [`SizeEntry::file`] are bare basenames that
//! live in the same directory as `file`.
//!
//! ## Invariant
//!
//! When `original_image` is present, `file` is derived from it by exactly one
//! suffix (`-scaled` or `-rotated`, see [`naming`](crate::naming)). When it is
//! absent, `file` is the original upload.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Host-assigned record identifier.
pub type RecordId = u64;

/// Backup-size key for the full-resolution pre-edit original.
pub const FULL_ORIGINAL_BACKUP: &str = "full-orig";

/// Supported source mime types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MimeType {
    #[serde(rename = "image/jpeg")]
    Jpeg,
    #[serde(rename = "image/png")]
    Png,
}

impl MimeType {
    /// Parse a mime type string. Anything other than JPEG or PNG is `None`.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "image/jpeg" | "image/jpg" | "image/pjpeg" => Some(MimeType::Jpeg),
            "image/png" => Some(MimeType::Png),
            _ => None,
        }
    }

    /// Sniff the mime type from file content.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        match image::guess_format(bytes).ok()? {
            image::ImageFormat::Jpeg => Some(MimeType::Jpeg),
            image::ImageFormat::Png => Some(MimeType::Png),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MimeType::Jpeg => "image/jpeg",
            MimeType::Png => "image/png",
        }
    }
}

impl fmt::Display for MimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One produced size variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeEntry {
    /// Basename, in the same directory as the attached file.
    pub file: String,
    pub width: u32,
    pub height: u32,
}

/// One requested size variant. A 0 axis is unconstrained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SizeRequest {
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    #[serde(default)]
    pub crop: bool,
}

/// Requested sizes by name.
pub type SizeRequests = BTreeMap<String, SizeRequest>;

/// Host-owned backup sizes written by the image editor, by name.
pub type BackupSizes = BTreeMap<String, SizeEntry>;

/// The host's metadata for one record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(default)]
    pub file: String,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_image: Option<String>,
    #[serde(default)]
    pub sizes: BTreeMap<String, SizeEntry>,
    /// Opaque EXIF/IPTC blob carried through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_meta: Option<serde_json::Value>,
}

impl Metadata {
    pub fn new(file: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            file: file.into(),
            width,
            height,
            ..Self::default()
        }
    }

    /// True when nothing has been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.file.is_empty()
    }

    /// True when `file`, `width` and `height` are all present.
    pub fn is_complete(&self) -> bool {
        !self.file.is_empty() && self.width > 0 && self.height > 0
    }

    /// Basename of the attached file.
    pub fn basename(&self) -> &str {
        self.file.rsplit('/').next().unwrap_or(&self.file)
    }

    /// Directory of the attached file, relative to the library root.
    pub fn dir(&self) -> &str {
        self.file.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
    }

    /// Absolute directory holding the attached file and all its siblings.
    pub fn abs_dir(&self, root: &Path) -> PathBuf {
        if self.dir().is_empty() {
            root.to_path_buf()
        } else {
            root.join(self.dir())
        }
    }

    /// Absolute path of the attached file.
    pub fn abs_file(&self, root: &Path) -> PathBuf {
        root.join(&self.file)
    }

    /// Absolute path of the pre-transform original, when one is recorded.
    pub fn abs_original(&self, root: &Path) -> Option<PathBuf> {
        self.original_image
            .as_deref()
            .map(|name| self.abs_dir(root).join(name))
    }

    /// Relative path of a sibling basename (`dir/basename`).
    pub fn sibling(&self, basename: &str) -> String {
        if self.dir().is_empty() {
            basename.to_string()
        } else {
            format!("{}/{}", self.dir(), basename)
        }
    }

    /// Every basename this metadata references: the attached file, the
    /// original, and each size variant.
    pub fn referenced_basenames(&self) -> Vec<String> {
        let mut names = Vec::with_capacity(self.sizes.len() + 2);
        if !self.file.is_empty() {
            names.push(self.basename().to_string());
        }
        if let Some(original) = &self.original_image {
            names.push(original.clone());
        }
        names.extend(self.sizes.values().map(|s| s.file.clone()));
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Metadata {
        let mut meta = Metadata::new("2024/05/photo-scaled.jpg", 2560, 1707);
        meta.original_image = Some("photo.jpg".into());
        meta.sizes.insert(
            "thumbnail".into(),
            SizeEntry {
                file: "photo-150x150.jpg".into(),
                width: 150,
                height: 150,
            },
        );
        meta
    }

    #[test]
    fn mime_parse_accepts_only_jpeg_and_png() {
        assert_eq!(MimeType::parse("image/jpeg"), Some(MimeType::Jpeg));
        assert_eq!(MimeType::parse("IMAGE/PNG"), Some(MimeType::Png));
        assert_eq!(MimeType::parse("image/gif"), None);
        assert_eq!(MimeType::parse("image/webp"), None);
    }

    #[test]
    fn mime_sniff_from_magic_bytes() {
        assert_eq!(
            MimeType::sniff(b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR"),
            Some(MimeType::Png)
        );
        assert_eq!(MimeType::sniff(b"\xFF\xD8\xFF\xE0"), Some(MimeType::Jpeg));
        assert_eq!(MimeType::sniff(b"GIF89a"), None);
    }

    #[test]
    fn mime_serializes_as_host_string() {
        assert_eq!(
            serde_json::to_string(&MimeType::Png).unwrap(),
            "\"image/png\""
        );
    }

    #[test]
    fn paths_split_on_directory() {
        let meta = sample();
        assert_eq!(meta.basename(), "photo-scaled.jpg");
        assert_eq!(meta.dir(), "2024/05");
        assert_eq!(meta.sibling("photo.jpg"), "2024/05/photo.jpg");
        assert_eq!(
            meta.abs_original(Path::new("/media")).unwrap(),
            PathBuf::from("/media/2024/05/photo.jpg")
        );
    }

    #[test]
    fn paths_at_library_root() {
        let meta = Metadata::new("photo.jpg", 10, 10);
        assert_eq!(meta.basename(), "photo.jpg");
        assert_eq!(meta.dir(), "");
        assert_eq!(meta.sibling("a.jpg"), "a.jpg");
        assert_eq!(meta.abs_dir(Path::new("/media")), PathBuf::from("/media"));
    }

    #[test]
    fn completeness() {
        assert!(Metadata::default().is_empty());
        assert!(!Metadata::new("a.jpg", 0, 10).is_complete());
        assert!(Metadata::new("a.jpg", 10, 10).is_complete());
    }

    #[test]
    fn referenced_basenames_cover_file_original_and_sizes() {
        assert_eq!(
            sample().referenced_basenames(),
            vec!["photo-scaled.jpg", "photo.jpg", "photo-150x150.jpg"]
        );
    }

    #[test]
    fn deserialize_tolerates_missing_fields() {
        let meta: Metadata = serde_json::from_str(r#"{"file":"a.png"}"#).unwrap();
        assert_eq!(meta.file, "a.png");
        assert_eq!(meta.width, 0);
        assert!(meta.sizes.is_empty());
        assert!(meta.original_image.is_none());
    }
}
