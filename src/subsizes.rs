//! Subsize orchestrator.
//!
//! Produces every requested size from the thumbnails source, persisting the
//! metadata after each one so an interrupted pass loses at most the size in
//! flight. Clones for all produced sizes are made at the end.

use crate::config::PressConfig;
use crate::imaging::ImageBackend;
use crate::imaging::calculations::{oriented_dimensions, plan_size};
use crate::imaging::params::{Orientation, ResizeParams};
use crate::metadata::{Metadata, MimeType, SizeEntry, SizeRequests};
use crate::naming;
use crate::pass::{ImageState, PassContext, PassError};
use crate::registry::Registry;
use crate::store::{self, MetaStore};
use crate::webp;
use std::path::Path;
use tracing::{debug, info, warn};

/// Result of one orchestration run.
#[derive(Debug, Clone, PartialEq)]
pub struct SubsizeOutcome {
    pub metadata: Metadata,
    /// Requests that produced nothing: skipped (would not shrink the source),
    /// failed, or cut off by the time budget.
    pub unproduced: SizeRequests,
}

pub struct SubsizeOrchestrator<'a> {
    backend: &'a dyn ImageBackend,
    store: &'a dyn MetaStore,
    config: &'a PressConfig,
    root: &'a Path,
}

impl<'a> SubsizeOrchestrator<'a> {
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

    /// Generate `requested` from `source`, naming files after
    /// `source_basename`.
    pub fn generate_subsizes(
        &self,
        ctx: &mut PassContext,
        source: &Path,
        requested: &SizeRequests,
        mut metadata: Metadata,
        source_basename: &str,
    ) -> Result<SubsizeOutcome, PassError> {
        let orientation = self.orientation(ctx, source);
        let (src_w, src_h) = oriented_dimensions((metadata.width, metadata.height), orientation);
        let registry = Registry::new(self.store);
        let dir = metadata.abs_dir(self.root);
        let encode = self.config.encode_options(ctx.mime);
        let mut unproduced = SizeRequests::new();
        let mut out_of_time = false;

        for (name, request) in requested {
            if out_of_time {
                unproduced.insert(name.clone(), *request);
                continue;
            }
            let Some((width, height)) =
                plan_size((src_w, src_h), request.width, request.height, request.crop)
            else {
                debug!(id = ctx.id, size = %name, "size would not shrink source, skipped");
                unproduced.insert(name.clone(), *request);
                continue;
            };

            let file = naming::size_file_name(source_basename, width, height);
            ctx.budget.reset();
            let result = self.backend.resize(&ResizeParams {
                source: source.to_path_buf(),
                output: dir.join(&file),
                width,
                height,
                crop: request.crop,
                orientation,
                encode,
                sharpening: self.config.sharpening(),
            });

            match result {
                Ok(dims) => {
                    registry.track(ctx.id, &file)?;
                    metadata.sizes.insert(
                        name.clone(),
                        SizeEntry {
                            file,
                            width: dims.width,
                            height: dims.height,
                        },
                    );
                    let _hold = ctx.guard.hold();
                    store::save_metadata(self.store, ctx.id, &metadata)?;
                }
                Err(e) => {
                    warn!(id = ctx.id, size = %name, error = %e, "size generation failed");
                    unproduced.insert(name.clone(), *request);
                }
            }

            if ctx.budget.expired() {
                warn!(
                    id = ctx.id,
                    size = %name,
                    elapsed_ms = ctx.budget.elapsed().as_millis() as u64,
                    "time budget exceeded, remaining sizes deferred"
                );
                out_of_time = true;
            }
        }

        self.clone_sizes(ctx, &dir, &metadata);
        info!(
            id = ctx.id,
            produced = metadata.sizes.len(),
            unproduced = unproduced.len(),
            "sizes generated"
        );
        Ok(SubsizeOutcome {
            metadata,
            unproduced,
        })
    }

    /// Orientation to bake into every size. JPEG only, and never for an
    /// edited source, which the editor already wrote upright.
    fn orientation(&self, ctx: &PassContext, source: &Path) -> Option<Orientation> {
        if ctx.mime != MimeType::Jpeg || ctx.state == ImageState::Edited {
            return None;
        }
        match self.backend.read_orientation(source) {
            Ok(Some(Orientation::Normal)) | Ok(None) => None,
            Ok(other) => other,
            Err(e) => {
                warn!(id = ctx.id, error = %e, "could not read orientation");
                None
            }
        }
    }

    fn clone_sizes(&self, ctx: &mut PassContext, dir: &Path, metadata: &Metadata) {
        let settings = self.config.webp_settings();
        let files: Vec<&str> = {
            let mut files: Vec<&str> = metadata.sizes.values().map(|s| s.file.as_str()).collect();
            files.sort_unstable();
            files.dedup();
            files
        };
        for file in files {
            let path = dir.join(file);
            ctx.budget.reset();
            if let Err(e) =
                webp::clone_webp(self.backend, &path, ctx.mime, self.config.webp.policy, &settings)
            {
                warn!(id = ctx.id, file = %path.display(), error = %e, "size clone failed");
            }
        }
    }
}
