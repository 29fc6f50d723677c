//! File-name conventions.
//!
//! History is reconstructed from file names, so the grammar here is exact:
//!
//! | Suffix | Meaning | Example |
//! |---|---|---|
//! | `-scaled` | Downscaled big-image copy of the original | `photo-scaled.jpg` |
//! | `-rotated` | EXIF orientation baked into the pixels | `photo-rotated.jpg` |
//! | `-e` + 13 digits | Saved by the host's image editor | `photo-e1700000000000.jpg` |
//! | `-<w>x<h>` | Size variant | `photo-150x150.jpg` |
//!
//! A WebP clone keeps the full source name and appends `.webp`:
//! `photo.jpg` → `photo.jpg.webp`. The extension is appended, never replaced,
//! so `photo.jpg` and `photo.png` get distinct clones.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

const SCALED: &str = "-scaled";
const ROTATED: &str = "-rotated";
const EDIT_MARKER: &str = "-e";
const EDIT_DIGITS: usize = 13;

/// Extension used for derived clones.
pub const WEBP_EXTENSION: &str = "webp";

/// What separates a file's stem from the stem it was derived from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileSuffix {
    /// Stems are identical.
    None,
    Scaled,
    Rotated,
    /// Editor output, carrying the 13-digit millisecond timestamp.
    Edited(u64),
    /// Anything else, carrying the unexplained remainder.
    Unrecognized(String),
}

/// Split a basename into `(stem, extension)`.
///
/// A leading dot is part of the stem (`.hidden` has no extension).
pub fn split_name(name: &str) -> (&str, Option<&str>) {
    match name.rfind('.') {
        Some(0) | None => (name, None),
        Some(pos) => (&name[..pos], Some(&name[pos + 1..])),
    }
}

/// Stem of a basename (everything before the last dot).
pub fn stem(name: &str) -> &str {
    split_name(name).0
}

/// Lowercased extension of a basename.
pub fn extension(name: &str) -> Option<String> {
    split_name(name).1.map(str::to_ascii_lowercase)
}

/// Append an extension: `photo.jpg` + `webp` → `photo.jpg.webp`.
pub fn append_file_name_extension(name: &str, ext: &str) -> String {
    format!("{name}.{ext}")
}

/// Replace the last extension: `photo.jpg.webp` + `jpg` → `photo.jpg.jpg`.
pub fn replace_file_name_extension(name: &str, ext: &str) -> String {
    format!("{}.{}", stem(name), ext)
}

/// Basename of the WebP clone for a source basename.
pub fn webp_name(name: &str) -> String {
    append_file_name_extension(name, WEBP_EXTENSION)
}

/// Path of the WebP clone for a source path.
pub fn webp_path(source: &Path) -> PathBuf {
    let mut name = OsString::from(source.as_os_str());
    name.push(".");
    name.push(WEBP_EXTENSION);
    PathBuf::from(name)
}

/// True when a basename names a derived clone.
pub fn is_webp_clone(name: &str) -> bool {
    extension(name).as_deref() == Some(WEBP_EXTENSION) && split_name(stem(name)).1.is_some()
}

/// `photo.jpg` + `-scaled` → `photo-scaled.jpg`.
pub fn with_stem_suffix(name: &str, suffix: &str) -> String {
    match split_name(name) {
        (stem, Some(ext)) => format!("{stem}{suffix}.{ext}"),
        (stem, None) => format!("{stem}{suffix}"),
    }
}

pub fn scaled_name(name: &str) -> String {
    with_stem_suffix(name, SCALED)
}

pub fn rotated_name(name: &str) -> String {
    with_stem_suffix(name, ROTATED)
}

/// Size variant name: `photo.jpg`, 150x150 → `photo-150x150.jpg`.
pub fn size_file_name(source: &str, width: u32, height: u32) -> String {
    with_stem_suffix(source, &format!("-{width}x{height}"))
}

/// Editor timestamp when `stem` ends with `-e` and exactly 13 digits.
pub fn edit_timestamp(stem: &str) -> Option<u64> {
    let (_, digits) = stem.rsplit_once(EDIT_MARKER)?;
    if digits.len() == EDIT_DIGITS && digits.bytes().all(|b| b.is_ascii_digit()) {
        digits.parse().ok()
    } else {
        None
    }
}

/// True when a basename was written by the host's image editor.
pub fn is_edited_name(name: &str) -> bool {
    edit_timestamp(stem(name)).is_some()
}

/// Classify how `file_stem` was derived from `original_stem`.
///
/// Only a single known suffix counts. `photo-rotated-scaled` against
/// `photo` is [`FileSuffix::Unrecognized`], as is a stem that does not
/// start with the original stem at all.
pub fn suffix_between(file_stem: &str, original_stem: &str) -> FileSuffix {
    let Some(rest) = file_stem.strip_prefix(original_stem) else {
        return FileSuffix::Unrecognized(file_stem.to_string());
    };
    match rest {
        "" => FileSuffix::None,
        SCALED => FileSuffix::Scaled,
        ROTATED => FileSuffix::Rotated,
        _ => match rest.strip_prefix(EDIT_MARKER) {
            Some(digits)
                if digits.len() == EDIT_DIGITS && digits.bytes().all(|b| b.is_ascii_digit()) =>
            {
                digits
                    .parse()
                    .map(FileSuffix::Edited)
                    .unwrap_or_else(|_| FileSuffix::Unrecognized(rest.to_string()))
            }
            _ => FileSuffix::Unrecognized(rest.to_string()),
        },
    }
}

/// True when `candidate` may be the origin of `attached`: same extension and
/// the attached stem is the candidate stem, optionally followed by
/// `-scaled` or `-rotated`.
pub fn is_name_compatible(candidate: &str, attached: &str) -> bool {
    let (cand_stem, cand_ext) = split_name(candidate);
    let (att_stem, att_ext) = split_name(attached);
    let same_ext = match (cand_ext, att_ext) {
        (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
        (None, None) => true,
        _ => false,
    };
    same_ext
        && matches!(
            suffix_between(att_stem, cand_stem),
            FileSuffix::None | FileSuffix::Scaled | FileSuffix::Rotated
        )
}

/// The shortest basename among `known` that is name-compatible with
/// `attached`, falling back to `attached` itself.
///
/// Ties break lexicographically so the result is stable.
pub fn resolve_source_basename<'a>(
    attached: &'a str,
    known: impl IntoIterator<Item = &'a str>,
) -> String {
    known
        .into_iter()
        .chain(std::iter::once(attached))
        .filter(|candidate| is_name_compatible(candidate, attached))
        .min_by(|a, b| a.len().cmp(&b.len()).then_with(|| a.cmp(b)))
        .unwrap_or(attached)
        .to_string()
}
