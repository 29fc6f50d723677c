//! Transformation dispatcher.
//!
//! Runs the per-state transformation on the attached file:
//!
//! | State | Above 2500px | Otherwise |
//! |---|---|---|
//! | `Edited` | clone | clone |
//! | `Scaled` | clone | clone |
//! | `Rotated` | clone | recompress in place, clone |
//! | `Lossless` | clone | clone (sizes are optimized downstream) |
//! | `Lossy` | clone of the original | recompress to `-scaled`, keep it only if smaller, clone |
//!
//! A codec failure aborts the dispatch with [`PassError::CodecFailure`] and
//! leaves the metadata as it was: the backend writes through temp files, and
//! a half-made `-scaled` candidate is removed. A clone failure is logged and
//! never fails the dispatch.

use crate::config::PressConfig;
use crate::imaging::calculations::exceeds_resource_guard;
use crate::imaging::params::CompressParams;
use crate::imaging::ImageBackend;
use crate::metadata::{Metadata, MimeType};
use crate::naming;
use crate::pass::{ImageState, PassContext, PassError};
use crate::registry::Registry;
use crate::store::{self, MetaStore};
use crate::webp;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// What the dispatcher did to the attached file.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchAction {
    /// Nothing to recompress for this state.
    CloneOnly,
    /// Image above the resource guard: recompression skipped on purpose.
    ResourceGuardSkip { width: u32, height: u32 },
    /// Bytes already settled by an earlier pass.
    AlreadyCompressed,
    /// Recompressed in place (`Rotated`).
    CompressedInPlace,
    /// Recompressed to a candidate; `replaced` when it became `file`.
    Compressed { candidate: String, replaced: bool },
}

#[derive(Debug, Clone)]
pub struct DispatchReport {
    pub metadata: Metadata,
    pub action: DispatchAction,
    /// Clone of the attached file, when one exists after this pass.
    pub clone: Option<PathBuf>,
    /// File the size variants are produced from.
    pub thumbnails_source: PathBuf,
}

pub struct Dispatcher<'a> {
    backend: &'a dyn ImageBackend,
    store: &'a dyn MetaStore,
    config: &'a PressConfig,
    root: &'a Path,
}

impl<'a> Dispatcher<'a> {
    pub fn new(
        backend: &'a dyn ImageBackend,
        store: &'a dyn MetaStore,
        config: &'a PressConfig,
        root: &'a Path,
    ) -> Self {
        Self {
            backend,
            store,
            config,
            root,
        }
    }

    pub fn dispatch(
        &self,
        ctx: &mut PassContext,
        metadata: Metadata,
    ) -> Result<DispatchReport, PassError> {
        let (metadata, action) = match ctx.state {
            ImageState::Edited | ImageState::Scaled => (metadata, DispatchAction::CloneOnly),
            state => {
                if exceeds_resource_guard(metadata.width, metadata.height) {
                    info!(
                        id = ctx.id,
                        %state,
                        width = metadata.width,
                        height = metadata.height,
                        "above resource guard, clone only"
                    );
                    let action = DispatchAction::ResourceGuardSkip {
                        width: metadata.width,
                        height: metadata.height,
                    };
                    (metadata, action)
                } else {
                    match state {
                        ImageState::Rotated => self.compress_in_place(ctx, metadata)?,
                        ImageState::Lossy => self.compress_original(ctx, metadata)?,
                        _ => (metadata, DispatchAction::CloneOnly),
                    }
                }
            }
        };

        let file = metadata.abs_file(self.root);
        let clone = self.clone_file(ctx, &file);
        debug!(id = ctx.id, ?action, "dispatched");

        Ok(DispatchReport {
            metadata,
            action,
            clone,
            thumbnails_source: file,
        })
    }

    /// `Rotated`: recompress the attached file over itself.
    fn compress_in_place(
        &self,
        ctx: &mut PassContext,
        mut metadata: Metadata,
    ) -> Result<(Metadata, DispatchAction), PassError> {
        let registry = Registry::new(self.store);
        let basename = metadata.basename().to_string();
        let path = metadata.abs_file(self.root);
        if registry.is_settled(ctx.id, &basename, &path)? {
            return Ok((metadata, DispatchAction::AlreadyCompressed));
        }

        ctx.budget.reset();
        let dims = self.backend.compress(&self.compress_params(ctx.mime, &path, &path))?;
        registry.settle(ctx.id, &basename, &path)?;

        metadata.width = dims.width;
        metadata.height = dims.height;
        self.persist(ctx, &metadata)?;
        info!(id = ctx.id, file = %metadata.file, "recompressed in place");
        Ok((metadata, DispatchAction::CompressedInPlace))
    }

    /// `Lossy`: recompress the original into a `-scaled` candidate and keep
    /// it only when strictly smaller.
    fn compress_original(
        &self,
        ctx: &mut PassContext,
        mut metadata: Metadata,
    ) -> Result<(Metadata, DispatchAction), PassError> {
        let registry = Registry::new(self.store);
        let original_name = metadata.basename().to_string();
        let original = metadata.abs_file(self.root);
        if registry.is_settled(ctx.id, &original_name, &original)? {
            return Ok((metadata, DispatchAction::AlreadyCompressed));
        }

        let candidate_name = naming::scaled_name(&original_name);
        let candidate = metadata.abs_dir(self.root).join(&candidate_name);

        ctx.budget.reset();
        let dims = match self
            .backend
            .compress(&self.compress_params(ctx.mime, &original, &candidate))
        {
            Ok(dims) => dims,
            Err(e) => {
                discard_candidate(&candidate);
                return Err(e.into());
            }
        };

        let original_len = std::fs::metadata(&original)?.len();
        let candidate_len = std::fs::metadata(&candidate)?.len();
        let replaced = candidate_len < original_len;

        if replaced {
            registry.track(ctx.id, &candidate_name)?;
            registry.settle(ctx.id, &candidate_name, &candidate)?;
            metadata.original_image = Some(original_name.clone());
            metadata.file = metadata.sibling(&candidate_name);
            metadata.width = dims.width;
            metadata.height = dims.height;
            info!(
                id = ctx.id,
                original = original_len,
                compressed = candidate_len,
                file = %metadata.file,
                "compressed copy is smaller, attached"
            );
        } else {
            discard_candidate(&candidate);
            info!(
                id = ctx.id,
                original = original_len,
                compressed = candidate_len,
                "compressed copy not smaller, keeping original"
            );
        }
        registry.settle(ctx.id, &original_name, &original)?;
        self.persist(ctx, &metadata)?;

        Ok((
            metadata,
            DispatchAction::Compressed {
                candidate: candidate_name,
                replaced,
            },
        ))
    }

    fn compress_params(&self, mime: MimeType, source: &Path, output: &Path) -> CompressParams {
        CompressParams {
            source: source.to_path_buf(),
            output: output.to_path_buf(),
            max_width: self.config.resize.max_width,
            max_height: self.config.resize.max_height,
            encode: self.config.encode_options(mime),
            sharpening: self.config.sharpening(),
        }
    }

    fn clone_file(&self, ctx: &mut PassContext, file: &Path) -> Option<PathBuf> {
        ctx.budget.reset();
        match webp::clone_webp(
            self.backend,
            file,
            ctx.mime,
            self.config.webp.policy,
            &self.config.webp_settings(),
        ) {
            Ok(clone) => clone,
            Err(e) => {
                warn!(id = ctx.id, file = %file.display(), error = %e, "clone failed");
                None
            }
        }
    }

    fn persist(&self, ctx: &PassContext, metadata: &Metadata) -> Result<(), PassError> {
        let _hold = ctx.guard.hold();
        store::save_metadata(self.store, ctx.id, metadata)?;
        Ok(())
    }
}

fn discard_candidate(path: &Path) {
    if path.exists()
        && let Err(e) = std::fs::remove_file(path)
    {
        warn!(path = %path.display(), error = %e, "could not remove compressed candidate");
    }
}
