//! Reference host: a directory-backed media library.
//!
//! Plays the host's part around the [`Pipeline`]: it owns the files and the
//! record store, fires the notifications in the order a content-management
//! host does, and persists what the pipeline hands back.
//!
//! ```text
//! <root>/
//! ├── press.toml               (optional config)
//! ├── .imgpress-store.json     (record store)
//! ├── photo.jpg                (uploaded original)
//! ├── photo-scaled.jpg         (attached file)
//! ├── photo-scaled.jpg.webp    (clone)
//! ├── photo-150x150.jpg        (size)
//! └── photo-150x150.jpg.webp
//! ```

use crate::config::{self, ConfigError, PressConfig};
use crate::imaging::calculations::{fit_within, oriented_dimensions};
use crate::imaging::params::{Orientation, ResizeParams};
use crate::imaging::{BackendError, ImageBackend, RustBackend};
use crate::metadata::{Metadata, MimeType, RecordId};
use crate::naming;
use crate::pipeline::{PassOutcome, Pipeline, SizesOutcome};
use crate::registry::{FileStatus, PurgeReport, Registry, TrackedFiles};
use crate::store::{self, JsonFileStore, MetaStore, StoreError};
use crate::webp::{self, WebpPolicy};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Record store file name, inside the library root.
pub const STORE_FILENAME: &str = ".imgpress-store.json";

#[derive(Error, Debug)]
pub enum LibraryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("codec error: {0}")]
    Backend(#[from] BackendError),
    #[error("no record with id {0}")]
    UnknownRecord(RecordId),
    #[error("{} is not a JPEG or PNG image", .0.display())]
    UnsupportedFile(PathBuf),
}

/// One record as stored.
#[derive(Debug, Clone)]
pub struct RecordView {
    pub id: RecordId,
    pub mime: Option<String>,
    pub metadata: Metadata,
    pub files: TrackedFiles,
}

/// Result of an upload or regenerate.
#[derive(Debug)]
pub struct RecordUpdate {
    pub id: RecordId,
    pub outcome: SizesOutcome,
    /// Files deleted because the new metadata no longer references them.
    pub removed: Vec<PathBuf>,
}

pub struct Library {
    root: PathBuf,
    store: JsonFileStore,
    config: PressConfig,
    backend: Box<dyn ImageBackend>,
}

impl Library {
    /// Open (creating if needed) the library at `root` with the production
    /// backend and `root/press.toml`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, LibraryError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        let config = config::load_config(&root)?;
        Self::with_backend(root, config, Box::new(RustBackend::new()))
    }

    pub fn with_backend(
        root: PathBuf,
        config: PressConfig,
        backend: Box<dyn ImageBackend>,
    ) -> Result<Self, LibraryError> {
        fs::create_dir_all(&root)?;
        let store = JsonFileStore::open(root.join(STORE_FILENAME))?;
        Ok(Self {
            root,
            store,
            config,
            backend,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &PressConfig {
        &self.config
    }

    pub fn store(&self) -> &JsonFileStore {
        &self.store
    }

    fn pipeline(&self) -> Pipeline<'_> {
        Pipeline::new(self.backend.as_ref(), &self.store, &self.config, &self.root)
    }

    /// Copy `source` into the library as a new record and run the pipeline.
    pub fn upload(&self, source: &Path) -> Result<RecordUpdate, LibraryError> {
        let bytes = fs::read(source)?;
        let mime =
            MimeType::sniff(&bytes).ok_or_else(|| LibraryError::UnsupportedFile(source.into()))?;
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| LibraryError::UnsupportedFile(source.into()))?;

        let name = unique_name(&self.root, &name);
        let dest = self.root.join(&name);
        fs::write(&dest, &bytes)?;

        // No record exists until the copy decodes.
        let proposed = match self.prepare_upload(&name, mime) {
            Ok(proposed) => proposed,
            Err(e) => {
                if let Err(cleanup) = fs::remove_file(&dest) {
                    warn!(
                        file = %dest.display(),
                        error = %cleanup,
                        "failed to remove rejected upload"
                    );
                }
                return Err(e);
            }
        };

        let id = self.store.allocate_id()?;
        store::save_mime(&self.store, id, mime)?;
        info!(id, file = %name, %mime, "uploaded");

        let pipeline = self.pipeline();
        pipeline.before_metadata_destroyed(id, &proposed)?;
        let outcome =
            pipeline.on_new_sizes(id, mime.as_str(), &self.config.size_requests(), &proposed);
        store::save_metadata(&self.store, id, &outcome.metadata)?;

        Ok(RecordUpdate {
            id,
            outcome,
            removed: Vec::new(),
        })
    }

    /// The host's upload-time transforms: bake in EXIF orientation (`-rotated`)
    /// and cap big images (`-scaled`). Returns the proposed metadata.
    fn prepare_upload(&self, name: &str, mime: MimeType) -> Result<Metadata, LibraryError> {
        let path = self.root.join(name);
        let dims = self.backend.identify(&path)?;

        let orientation = if self.config.upload.auto_rotate && mime == MimeType::Jpeg {
            self.backend
                .read_orientation(&path)?
                .filter(|o| *o != Orientation::Normal)
        } else {
            None
        };
        let upright = oriented_dimensions(dims.as_tuple(), orientation);

        let (derived, (width, height)) = match self.config.upload.big_image_threshold {
            Some(limit) if upright.0.max(upright.1) > limit => (
                naming::scaled_name(name),
                fit_within(upright, Some(limit), Some(limit)),
            ),
            _ if orientation.is_some() => (naming::rotated_name(name), upright),
            _ => return Ok(Metadata::new(name, dims.width, dims.height)),
        };

        let written = self.backend.resize(&ResizeParams {
            source: path,
            output: self.root.join(&derived),
            width,
            height,
            crop: false,
            orientation,
            encode: self.config.encode_options(mime),
            sharpening: None,
        })?;
        debug!(file = %derived, width = written.width, height = written.height, "upload derivative");

        let mut metadata = Metadata::new(derived, written.width, written.height);
        metadata.original_image = Some(name.to_string());
        Ok(metadata)
    }

    /// Re-run the pipeline on an existing record.
    pub fn regenerate(&self, id: RecordId) -> Result<RecordUpdate, LibraryError> {
        let stored =
            store::load_metadata(&self.store, id)?.ok_or(LibraryError::UnknownRecord(id))?;
        let mime = store::load_mime(&self.store, id)?.unwrap_or_default();

        let proposed = Metadata {
            sizes: Default::default(),
            ..stored.clone()
        };
        let pipeline = self.pipeline();
        pipeline.before_metadata_destroyed(id, &proposed)?;
        let outcome = pipeline.on_new_sizes(id, &mime, &self.config.size_requests(), &proposed);

        let removed = match &outcome.outcome {
            PassOutcome::Completed(_) => {
                store::save_metadata(&self.store, id, &outcome.metadata)?;
                self.remove_unreferenced(id, &outcome.metadata)?
            }
            PassOutcome::Skipped | PassOutcome::Failed(_) => Vec::new(),
        };

        Ok(RecordUpdate {
            id,
            outcome,
            removed,
        })
    }

    /// Delete tracked files the committed metadata left `pending`, firing the
    /// file-deleted cascade for each.
    fn remove_unreferenced(
        &self,
        id: RecordId,
        metadata: &Metadata,
    ) -> Result<Vec<PathBuf>, LibraryError> {
        let registry = Registry::new(&self.store);
        let dir = metadata.abs_dir(&self.root);
        let mut removed = Vec::new();
        for (name, status) in registry.all(id)? {
            if status != FileStatus::Pending {
                continue;
            }
            let path = dir.join(&name);
            if path.is_file() {
                fs::remove_file(&path)?;
                self.pipeline().on_file_deleted(&path)?;
                debug!(id, file = %name, "removed unreferenced file");
                removed.push(path);
            }
            registry.mark(id, &name, FileStatus::Deleted)?;
        }
        Ok(removed)
    }

    /// Delete a record and every file ever produced for it.
    pub fn delete(&self, id: RecordId) -> Result<PurgeReport, LibraryError> {
        if !self.store.record_ids()?.contains(&id) {
            return Err(LibraryError::UnknownRecord(id));
        }
        let report = self.pipeline().on_record_deleted(id)?;
        self.store.delete_record(id)?;
        Ok(report)
    }

    pub fn show(&self, id: RecordId) -> Result<RecordView, LibraryError> {
        let metadata =
            store::load_metadata(&self.store, id)?.ok_or(LibraryError::UnknownRecord(id))?;
        Ok(RecordView {
            id,
            mime: store::load_mime(&self.store, id)?,
            metadata,
            files: Registry::new(&self.store).all(id)?,
        })
    }

    /// Every record, in id order.
    pub fn records(&self) -> Result<Vec<RecordView>, LibraryError> {
        let mut views = Vec::new();
        for id in self.store.record_ids()? {
            if store::load_metadata(&self.store, id)?.is_some() {
                views.push(self.show(id)?);
            }
        }
        Ok(views)
    }

    /// Apply a clone policy to any JPEG or PNG file, outside of a record.
    pub fn clone_file(
        &self,
        path: &Path,
        policy: Option<WebpPolicy>,
    ) -> Result<Option<PathBuf>, LibraryError> {
        let mut header = [0u8; 16];
        let read = {
            use std::io::Read;
            fs::File::open(path)?.read(&mut header)?
        };
        let mime = MimeType::sniff(&header[..read])
            .ok_or_else(|| LibraryError::UnsupportedFile(path.into()))?;
        Ok(webp::clone_webp(
            self.backend.as_ref(),
            path,
            mime,
            policy.unwrap_or(self.config.webp.policy),
            &self.config.webp_settings(),
        )?)
    }
}

/// `name`, or `name` with a `-N` stem suffix when taken in `dir`.
fn unique_name(dir: &Path, name: &str) -> String {
    let taken = |candidate: &str| {
        let path = dir.join(candidate);
        path.exists() || naming::webp_path(&path).exists()
    };
    if !taken(name) {
        return name.to_string();
    }
    let mut n = 1u32;
    loop {
        let candidate = naming::with_stem_suffix(name, &format!("-{n}"));
        if !taken(&candidate) {
            return candidate;
        }
        n += 1;
    }
}
