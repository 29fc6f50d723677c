//! Metadata snapshot store.
//!
//! Before the host clears a record's metadata for a regenerate, the current
//! metadata is frozen under [`SNAPSHOT_KEY`]. Its presence is what tells the
//! classifier "this is a regenerate, not an upload"; its contents let an
//! edited record get its edit back. The snapshot lives for one pass and is
//! discarded once the new metadata is committed.

use crate::metadata::{BackupSizes, FULL_ORIGINAL_BACKUP, Metadata, RecordId, SizeEntry};
use crate::store::{self, MetaStore, StoreError};

pub const SNAPSHOT_KEY: &str = "_imgpress_snapshot";
/// Host key written by the image editor.
pub const BACKUP_SIZES_KEY: &str = "backup_sizes";

/// Freeze `current` as the record's snapshot.
///
/// Empty metadata (a fresh upload) clears any leftover snapshot instead, so
/// an interrupted earlier pass can never make an upload look like a
/// regenerate. Returns whether a snapshot was stored.
pub fn take(store: &dyn MetaStore, id: RecordId, current: &Metadata) -> Result<bool, StoreError> {
    if current.is_empty() {
        store.delete(id, SNAPSHOT_KEY)?;
        Ok(false)
    } else {
        store::save(store, id, SNAPSHOT_KEY, current)?;
        Ok(true)
    }
}

/// The current snapshot, if a non-empty one exists.
pub fn load(store: &dyn MetaStore, id: RecordId) -> Result<Option<Metadata>, StoreError> {
    Ok(store::load::<Metadata, _>(store, id, SNAPSHOT_KEY)?.filter(|m| !m.is_empty()))
}

pub fn discard(store: &dyn MetaStore, id: RecordId) -> Result<(), StoreError> {
    store.delete(id, SNAPSHOT_KEY)
}

/// Backup sizes recorded by the host's editor. Absent means none.
pub fn backup_sizes(store: &dyn MetaStore, id: RecordId) -> Result<BackupSizes, StoreError> {
    Ok(store::load(store, id, BACKUP_SIZES_KEY)?.unwrap_or_default())
}

pub fn save_backup_sizes(
    store: &dyn MetaStore,
    id: RecordId,
    backups: &BackupSizes,
) -> Result<(), StoreError> {
    store::save(store, id, BACKUP_SIZES_KEY, backups)
}

/// The full-resolution pre-edit backup, if the editor left one.
pub fn full_original_backup(
    store: &dyn MetaStore,
    id: RecordId,
) -> Result<Option<SizeEntry>, StoreError> {
    Ok(backup_sizes(store, id)?.remove(FULL_ORIGINAL_BACKUP))
}
