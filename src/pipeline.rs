//! Host-facing hooks.
//!
//! The host drives one record through these notifications:
//!
//! 1. [`Pipeline::before_metadata_destroyed`]: the stored metadata is about to
//!    be cleared. It is frozen as the snapshot.
//! 2. [`Pipeline::on_new_sizes`]: the host wants sizes for the proposed
//!    metadata. Runs classify → dispatch → subsizes and commits the result.
//! 3. [`Pipeline::on_file_deleted`] / [`Pipeline::on_record_deleted`]: cleanup
//!    cascades.
//!
//! Every pass failure is recovered here: the host gets its own input back
//! and the error is logged. While the [`MetadataGuard`] is held (an internal
//! metadata write is in progress) the hooks return immediately.

use crate::classify::classify;
use crate::config::PressConfig;
use crate::dispatch::{DispatchAction, Dispatcher};
use crate::imaging::ImageBackend;
use crate::metadata::{Metadata, RecordId, SizeRequests};
use crate::naming;
use crate::pass::{ImageState, MetadataGuard, PassContext, PassError};
use crate::registry::{PurgeReport, Registry};
use crate::snapshot;
use crate::store::{self, MetaStore, StoreError};
use crate::subsizes::SubsizeOrchestrator;
use crate::webp;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// What one completed pass did.
#[derive(Debug, Clone, PartialEq)]
pub struct PassReport {
    pub state: ImageState,
    pub action: DispatchAction,
    pub clone: Option<PathBuf>,
    pub regenerate: bool,
}

#[derive(Debug)]
pub enum PassOutcome {
    Completed(PassReport),
    /// Re-entrant call while the metadata guard was held.
    Skipped,
    /// The pass was aborted; the host's input is returned unchanged.
    Failed(PassError),
}

/// Answer to the new-sizes notification.
#[derive(Debug)]
pub struct SizesOutcome {
    /// Sizes the host still has to produce. Empty means "all produced".
    pub sizes: SizeRequests,
    /// Metadata the host should persist.
    pub metadata: Metadata,
    pub outcome: PassOutcome,
}

pub struct Pipeline<'a> {
    backend: &'a dyn ImageBackend,
    store: &'a dyn MetaStore,
    config: &'a PressConfig,
    root: &'a Path,
    guard: MetadataGuard,
}

impl<'a> Pipeline<'a> {
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
            guard: MetadataGuard::new(),
        }
    }

    /// The re-entrancy flag shared with every pass this pipeline runs.
    pub fn guard(&self) -> &MetadataGuard {
        &self.guard
    }

    /// Freeze the stored metadata before the host clears it, and track the
    /// names the proposed metadata brings in.
    ///
    /// Returns whether a snapshot was stored (i.e. this is a regenerate).
    pub fn before_metadata_destroyed(
        &self,
        id: RecordId,
        proposed: &Metadata,
    ) -> Result<bool, StoreError> {
        if self.guard.is_held() {
            debug!(id, "metadata update in progress, snapshot skipped");
            return Ok(false);
        }
        let current = store::load_metadata(self.store, id)?.unwrap_or_default();
        let regenerate = snapshot::take(self.store, id, &current)?;

        let registry = Registry::new(self.store);
        let mut names = current.referenced_basenames();
        names.extend(proposed.referenced_basenames());
        registry.track_all(id, names.iter().map(String::as_str))?;

        debug!(id, regenerate, "snapshot taken");
        Ok(regenerate)
    }

    /// Run one full pass for `id` and commit it.
    pub fn on_new_sizes(
        &self,
        id: RecordId,
        mime: &str,
        requested: &SizeRequests,
        proposed: &Metadata,
    ) -> SizesOutcome {
        if self.guard.is_held() {
            debug!(id, "metadata update in progress, pass skipped");
            return SizesOutcome {
                sizes: requested.clone(),
                metadata: proposed.clone(),
                outcome: PassOutcome::Skipped,
            };
        }

        match self.run(id, mime, requested, proposed) {
            Ok((metadata, sizes, report)) => SizesOutcome {
                sizes,
                metadata,
                outcome: PassOutcome::Completed(report),
            },
            Err(e) => {
                warn!(id, file = %proposed.file, error = %e, "pass aborted, input returned unchanged");
                SizesOutcome {
                    sizes: requested.clone(),
                    metadata: proposed.clone(),
                    outcome: PassOutcome::Failed(e),
                }
            }
        }
    }

    fn run(
        &self,
        id: RecordId,
        mime: &str,
        requested: &SizeRequests,
        proposed: &Metadata,
    ) -> Result<(Metadata, SizeRequests, PassReport), PassError> {
        let classification = classify(self.store, self.root, id, proposed, mime)?;
        let mut ctx = PassContext::new(
            id,
            classification.mime,
            classification.state,
            self.guard.clone(),
            self.config.time_limit(),
        );

        let dispatched = Dispatcher::new(self.backend, self.store, self.config, self.root)
            .dispatch(&mut ctx, classification.metadata)?;

        let subsizes = SubsizeOrchestrator::new(self.backend, self.store, self.config, self.root)
            .generate_subsizes(
                &mut ctx,
                &dispatched.thumbnails_source,
                requested,
                dispatched.metadata,
                &classification.source_basename,
            )?;

        self.commit(&ctx, &subsizes.metadata)?;
        info!(
            id,
            state = %ctx.state,
            file = %subsizes.metadata.file,
            sizes = subsizes.metadata.sizes.len(),
            "pass committed"
        );

        Ok((
            subsizes.metadata,
            subsizes.unproduced,
            PassReport {
                state: ctx.state,
                action: dispatched.action,
                clone: dispatched.clone,
                regenerate: classification.is_regenerate,
            },
        ))
    }

    /// Persist the final metadata, settle the registry and drop the snapshot.
    fn commit(&self, ctx: &PassContext, metadata: &Metadata) -> Result<(), PassError> {
        let mut referenced = metadata.referenced_basenames();
        referenced.extend(
            snapshot::backup_sizes(self.store, ctx.id)?
                .into_values()
                .map(|entry| entry.file),
        );
        Registry::new(self.store).reconcile(ctx.id, &referenced)?;

        {
            let _hold = ctx.guard.hold();
            store::save_metadata(self.store, ctx.id, metadata)?;
        }
        snapshot::discard(self.store, ctx.id)?;
        Ok(())
    }

    /// The host removed `path`; remove its clone too.
    pub fn on_file_deleted(&self, path: &Path) -> std::io::Result<bool> {
        if naming::is_webp_clone(&path.to_string_lossy()) {
            return Ok(false);
        }
        let removed = webp::remove_clone(path)?;
        if removed {
            debug!(path = %path.display(), "clone removed with its source");
        }
        Ok(removed)
    }

    /// The host is destroying the record: delete every tracked file.
    pub fn on_record_deleted(&self, id: RecordId) -> Result<PurgeReport, StoreError> {
        let dir = store::load_metadata(self.store, id)?
            .or(snapshot::load(self.store, id)?)
            .map(|meta| meta.abs_dir(self.root))
            .unwrap_or_else(|| self.root.to_path_buf());
        let report = Registry::new(self.store).purge(id, &dir)?;
        snapshot::discard(self.store, id)?;
        info!(id, removed = report.removed.len(), "record purged");
        Ok(report)
    }
}
