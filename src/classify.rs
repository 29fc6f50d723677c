//! Image state classifier.
//!
//! Decides *why* the attached file looks the way it does, from weak signals:
//! whether a snapshot exists (regenerate vs. upload), the editor's file-name
//! suffix plus its `full-orig` backup, the `-scaled`/`-rotated` suffix
//! between `file` and `original_image`, and finally the mime type.
//!
//! ```text
//! snapshot? ──yes──► files still on disk? ──no──► StaleSnapshot
//!     │                     │yes
//!     ▼                     ▼
//! edited name + full-orig backup ──────────────► Edited
//!     │no
//!     ▼
//! original_image? ──yes──► -scaled ► Scaled | -rotated ► Rotated | else ► UnrecognizedSuffix
//!     │no
//!     ▼
//! PNG ► Lossless   JPEG ► Lossy
//! ```
//!
//! Classification only writes to the store once it has succeeded: the source
//! basename and the tracked names. A failed classification leaves every
//! persisted value as it was.

use crate::metadata::{Metadata, MimeType, RecordId};
use crate::naming::{self, FileSuffix};
use crate::pass::{ImageState, PassError};
use crate::registry::Registry;
use crate::snapshot;
use crate::store::MetaStore;
use std::path::Path;
use tracing::{debug, info};

/// Result of a successful classification.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub state: ImageState,
    pub mime: MimeType,
    /// Proposed metadata with any history restored from the snapshot.
    pub metadata: Metadata,
    /// Canonical origin basename that size names derive from.
    pub source_basename: String,
    pub is_regenerate: bool,
}

/// Classify one pass for `id`.
///
/// `root` is the library root that metadata paths are relative to.
pub fn classify(
    store: &dyn MetaStore,
    root: &Path,
    id: RecordId,
    proposed: &Metadata,
    mime: &str,
) -> Result<Classification, PassError> {
    let mime = MimeType::parse(mime).ok_or_else(|| PassError::UnsupportedMimeType(mime.into()))?;
    if !proposed.is_complete() {
        return Err(PassError::IncompleteMetadata);
    }

    let snapshot = snapshot::load(store, id)?;
    if let Some(snap) = &snapshot {
        ensure_present(&snap.abs_file(root))?;
        if let Some(original) = snap.abs_original(root) {
            ensure_present(&original)?;
        }
    }

    let mut metadata = proposed.clone();
    let state = match &snapshot {
        Some(snap) if is_edited(store, id, snap)? => {
            restore_identity(&mut metadata, snap);
            ImageState::Edited
        }
        _ => match &metadata.original_image {
            Some(original) => {
                let file_stem = naming::stem(metadata.basename());
                match naming::suffix_between(file_stem, naming::stem(original)) {
                    FileSuffix::Scaled => ImageState::Scaled,
                    FileSuffix::Rotated => ImageState::Rotated,
                    other => {
                        return Err(PassError::UnrecognizedSuffix {
                            file: metadata.basename().to_string(),
                            suffix: describe_suffix(&other),
                        });
                    }
                }
            }
            None => match mime {
                MimeType::Png => ImageState::Lossless,
                MimeType::Jpeg => ImageState::Lossy,
            },
        },
    };

    let registry = Registry::new(store);
    let mut known: Vec<String> = registry.names(id)?.into_iter().collect();
    known.extend(metadata.referenced_basenames());
    let source_basename =
        naming::resolve_source_basename(metadata.basename(), known.iter().map(String::as_str));

    registry.track_all(
        id,
        [Some(metadata.basename()), metadata.original_image.as_deref()]
            .into_iter()
            .flatten(),
    )?;
    registry.set_source_basename(id, &source_basename)?;

    info!(
        id,
        %state,
        %mime,
        file = %metadata.file,
        regenerate = snapshot.is_some(),
        "classified"
    );
    debug!(id, source = %source_basename, "resolved source basename");

    Ok(Classification {
        state,
        mime,
        metadata,
        source_basename,
        is_regenerate: snapshot.is_some(),
    })
}

fn ensure_present(path: &Path) -> Result<(), PassError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(PassError::StaleSnapshot(path.to_path_buf()))
    }
}

/// The snapshot's file carries the editor suffix and the editor left a
/// full-resolution backup.
fn is_edited(store: &dyn MetaStore, id: RecordId, snap: &Metadata) -> Result<bool, PassError> {
    Ok(naming::is_edited_name(snap.basename())
        && snapshot::full_original_backup(store, id)?.is_some())
}

/// Put the pre-regenerate file identity back. Sizes and `image_meta` stay as
/// proposed.
fn restore_identity(metadata: &mut Metadata, snap: &Metadata) {
    metadata.file = snap.file.clone();
    metadata.width = snap.width;
    metadata.height = snap.height;
    metadata.original_image = snap.original_image.clone();
}

fn describe_suffix(suffix: &FileSuffix) -> String {
    match suffix {
        FileSuffix::None => String::new(),
        FileSuffix::Scaled => "-scaled".into(),
        FileSuffix::Rotated => "-rotated".into(),
        FileSuffix::Edited(ts) => format!("-e{ts:013}"),
        FileSuffix::Unrecognized(rest) => rest.clone(),
    }
}
