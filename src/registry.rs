//! Tracked-file registry and compression ledger.
//!
//! Every basename ever produced for a record is tracked so that deleting the
//! record can delete every file it left behind, including files that were
//! dropped from the metadata by an earlier regenerate.
//!
//! ## Status lifecycle
//!
//! ```text
//! track      → pending
//! reconcile  → kept     (referenced by committed metadata or backup sizes)
//!            → pending  (no longer referenced)
//! purge      → deleted  (file and its WebP clone removed)
//! ```
//!
//! ## Compression ledger
//!
//! Recompressing an already recompressed JPEG loses quality every time, which
//! would also make repeated passes produce different bytes. The ledger maps a
//! basename to the SHA-256 of the bytes this crate last settled on; a file
//! whose current hash matches is never recompressed again.

use crate::metadata::RecordId;
use crate::naming;
use crate::store::{self, MetaStore, StoreError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const TRACKED_KEY: &str = "_imgpress_files";
pub const LEDGER_KEY: &str = "_imgpress_compressed";
pub const SOURCE_KEY: &str = "_imgpress_source";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Pending,
    Kept,
    Deleted,
}

/// Basename → status for one record.
pub type TrackedFiles = BTreeMap<String, FileStatus>;

/// Files removed by [`Registry::purge`].
#[derive(Debug, Default, Clone, PartialEq)]
pub struct PurgeReport {
    pub removed: Vec<PathBuf>,
}

/// SHA-256 hash of a file's contents, returned as a hex string.
pub fn hash_file(path: &Path) -> io::Result<String> {
    let bytes = std::fs::read(path)?;
    let digest = Sha256::digest(&bytes);
    Ok(format!("{:x}", digest))
}

pub struct Registry<'a> {
    store: &'a dyn MetaStore,
}

impl<'a> Registry<'a> {
    pub fn new(store: &'a dyn MetaStore) -> Self {
        Self { store }
    }

    /// All tracked basenames with their status.
    pub fn all(&self, id: RecordId) -> Result<TrackedFiles, StoreError> {
        Ok(store::load(self.store, id, TRACKED_KEY)?.unwrap_or_default())
    }

    /// Tracked basenames, whatever their status.
    pub fn names(&self, id: RecordId) -> Result<BTreeSet<String>, StoreError> {
        Ok(self.all(id)?.into_keys().collect())
    }

    /// Track one basename. A new or previously deleted basename becomes
    /// `pending`; an existing live entry keeps its status.
    pub fn track(&self, id: RecordId, basename: &str) -> Result<(), StoreError> {
        self.track_all(id, [basename])
    }

    pub fn track_all<'n>(
        &self,
        id: RecordId,
        basenames: impl IntoIterator<Item = &'n str>,
    ) -> Result<(), StoreError> {
        let mut files = self.all(id)?;
        let mut changed = false;
        for name in basenames.into_iter().filter(|n| !n.is_empty()) {
            let status = files.entry(name.to_string()).or_insert(FileStatus::Pending);
            if *status == FileStatus::Deleted {
                *status = FileStatus::Pending;
                changed = true;
            } else if *status == FileStatus::Pending {
                changed = true;
            }
        }
        if changed {
            store::save(self.store, id, TRACKED_KEY, &files)?;
        }
        Ok(())
    }

    pub fn mark(&self, id: RecordId, basename: &str, status: FileStatus) -> Result<(), StoreError> {
        let mut files = self.all(id)?;
        files.insert(basename.to_string(), status);
        store::save(self.store, id, TRACKED_KEY, &files)
    }

    /// Mark referenced basenames `kept` (tracking any that were missing) and
    /// every other live basename `pending`.
    pub fn reconcile(&self, id: RecordId, referenced: &[String]) -> Result<(), StoreError> {
        let referenced: BTreeSet<&str> = referenced.iter().map(String::as_str).collect();
        let mut files = self.all(id)?;
        for name in &referenced {
            files.entry((*name).to_string()).or_insert(FileStatus::Kept);
        }
        for (name, status) in files.iter_mut() {
            if *status == FileStatus::Deleted {
                continue;
            }
            *status = if referenced.contains(name.as_str()) {
                FileStatus::Kept
            } else {
                FileStatus::Pending
            };
        }
        store::save(self.store, id, TRACKED_KEY, &files)
    }

    /// Delete every tracked file still present in `dir`, plus its WebP
    /// clone, then drop all of this record's registry keys.
    pub fn purge(&self, id: RecordId, dir: &Path) -> Result<PurgeReport, StoreError> {
        let mut files = self.all(id)?;
        let mut report = PurgeReport::default();
        let names: Vec<String> = files.keys().cloned().collect();

        for name in names {
            let path = dir.join(&name);
            for target in [path.clone(), naming::webp_path(&path)] {
                if target.is_file() {
                    std::fs::remove_file(&target)?;
                    debug!(path = %target.display(), "purged");
                    report.removed.push(target);
                }
            }
            files.insert(name, FileStatus::Deleted);
            store::save(self.store, id, TRACKED_KEY, &files)?;
        }

        for key in [TRACKED_KEY, LEDGER_KEY, SOURCE_KEY] {
            self.store.delete(id, key)?;
        }
        Ok(report)
    }

    // =========================================================================
    // Compression ledger
    // =========================================================================

    fn ledger(&self, id: RecordId) -> Result<BTreeMap<String, String>, StoreError> {
        Ok(store::load(self.store, id, LEDGER_KEY)?.unwrap_or_default())
    }

    /// Hash of the bytes last settled on for `basename`.
    pub fn settled_hash(&self, id: RecordId, basename: &str) -> Result<Option<String>, StoreError> {
        Ok(self.ledger(id)?.remove(basename))
    }

    /// True when `path`'s current bytes are the ones recorded for its basename.
    pub fn is_settled(&self, id: RecordId, basename: &str, path: &Path) -> Result<bool, StoreError> {
        match self.settled_hash(id, basename)? {
            Some(expected) => Ok(hash_file(path)? == expected),
            None => Ok(false),
        }
    }

    /// Record `path`'s current bytes as settled for `basename`.
    pub fn settle(&self, id: RecordId, basename: &str, path: &Path) -> Result<(), StoreError> {
        let hash = hash_file(path)?;
        let mut ledger = self.ledger(id)?;
        ledger.insert(basename.to_string(), hash);
        store::save(self.store, id, LEDGER_KEY, &ledger)
    }

    // =========================================================================
    // Source basename
    // =========================================================================

    pub fn source_basename(&self, id: RecordId) -> Result<Option<String>, StoreError> {
        store::load(self.store, id, SOURCE_KEY)
    }

    pub fn set_source_basename(&self, id: RecordId, basename: &str) -> Result<(), StoreError> {
        store::save(self.store, id, SOURCE_KEY, basename)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn track_is_idempotent_and_pending() {
        let store = MemoryStore::new();
        let registry = Registry::new(&store);
        registry.track(1, "a.jpg").unwrap();
        registry.track(1, "a.jpg").unwrap();
        registry.track(1, "").unwrap();

        let all = registry.all(1).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all["a.jpg"], FileStatus::Pending);
    }

    #[test]
    fn track_keeps_kept_status() {
        let store = MemoryStore::new();
        let registry = Registry::new(&store);
        registry.mark(1, "a.jpg", FileStatus::Kept).unwrap();
        registry.track(1, "a.jpg").unwrap();
        assert_eq!(registry.all(1).unwrap()["a.jpg"], FileStatus::Kept);
    }

    #[test]
    fn track_revives_deleted_entry() {
        let store = MemoryStore::new();
        let registry = Registry::new(&store);
        registry.mark(1, "a.jpg", FileStatus::Deleted).unwrap();
        registry.track(1, "a.jpg").unwrap();
        assert_eq!(registry.all(1).unwrap()["a.jpg"], FileStatus::Pending);
    }

    #[test]
    fn reconcile_splits_kept_and_pending() {
        let store = MemoryStore::new();
        let registry = Registry::new(&store);
        registry
            .track_all(1, ["a.jpg", "a-150x150.jpg", "a-old-300x200.jpg"])
            .unwrap();
        registry.mark(1, "gone.jpg", FileStatus::Deleted).unwrap();

        registry
            .reconcile(
                1,
                &["a.jpg".to_string(), "a-150x150.jpg".to_string(), "b.jpg".to_string()],
            )
            .unwrap();

        let all = registry.all(1).unwrap();
        assert_eq!(all["a.jpg"], FileStatus::Kept);
        assert_eq!(all["a-150x150.jpg"], FileStatus::Kept);
        assert_eq!(all["b.jpg"], FileStatus::Kept);
        assert_eq!(all["a-old-300x200.jpg"], FileStatus::Pending);
        assert_eq!(all["gone.jpg"], FileStatus::Deleted);
    }

    #[test]
    fn purge_removes_files_and_clones() {
        let tmp = TempDir::new().unwrap();
        let store = MemoryStore::new();
        let registry = Registry::new(&store);

        fs::write(tmp.path().join("a.jpg"), "x").unwrap();
        fs::write(tmp.path().join("a.jpg.webp"), "x").unwrap();
        fs::write(tmp.path().join("a-150x150.jpg"), "x").unwrap();
        fs::write(tmp.path().join("unrelated.jpg"), "x").unwrap();
        registry
            .track_all(1, ["a.jpg", "a-150x150.jpg", "never-written.jpg"])
            .unwrap();
        registry.set_source_basename(1, "a.jpg").unwrap();

        let report = registry.purge(1, tmp.path()).unwrap();

        assert_eq!(report.removed.len(), 3);
        assert!(!tmp.path().join("a.jpg").exists());
        assert!(!tmp.path().join("a.jpg.webp").exists());
        assert!(!tmp.path().join("a-150x150.jpg").exists());
        assert!(tmp.path().join("unrelated.jpg").exists());
        assert!(registry.all(1).unwrap().is_empty());
        assert_eq!(registry.source_basename(1).unwrap(), None);
    }

    #[test]
    fn ledger_detects_changed_bytes() {
        let tmp = TempDir::new().unwrap();
        let store = MemoryStore::new();
        let registry = Registry::new(&store);
        let path = tmp.path().join("a.jpg");
        fs::write(&path, "compressed").unwrap();

        assert!(!registry.is_settled(1, "a.jpg", &path).unwrap());
        registry.settle(1, "a.jpg", &path).unwrap();
        assert!(registry.is_settled(1, "a.jpg", &path).unwrap());

        fs::write(&path, "replaced by host").unwrap();
        assert!(!registry.is_settled(1, "a.jpg", &path).unwrap());
    }

    #[test]
    fn hash_file_deterministic() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("f");
        fs::write(&path, "hello").unwrap();
        assert_eq!(hash_file(&path).unwrap(), hash_file(&path).unwrap());
        assert_eq!(hash_file(&path).unwrap().len(), 64);
    }
}
