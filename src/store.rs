//! Per-record key/value store.
//!
//! The host persists an opaque JSON value per `(record id, key)`. The
//! pipeline keeps its own bookkeeping there (snapshot, tracked files,
//! compression ledger, source basename) next to the host's keys (metadata,
//! mime type, backup sizes).
//!
//! [`MetaStore`] is the seam; [`MemoryStore`] backs unit tests and
//! [`JsonFileStore`] backs the reference library on disk.
//!
//! ## Storage
//!
//! `JsonFileStore` keeps everything in one JSON document:
//!
//! ```text
//! { "version": 1, "next_id": 3, "records": { "1": { "key": <value>, ... } } }
//! ```
//!
//! The document is rewritten (through a temp file and rename) after every
//! mutation, so a crash loses at most the write in flight.

use crate::metadata::{Metadata, MimeType, RecordId};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

/// Host key: the record's committed [`Metadata`].
pub const METADATA_KEY: &str = "attachment_metadata";
/// Host key: the record's mime type string.
pub const MIME_KEY: &str = "mime_type";

const STORE_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("store {path} has version {found}, expected {expected}")]
    Version {
        path: PathBuf,
        found: u32,
        expected: u32,
    },
    #[error("store lock poisoned")]
    Poisoned,
}

/// Persisted per-record key/value store.
pub trait MetaStore {
    fn get(&self, id: RecordId, key: &str) -> Result<Option<serde_json::Value>, StoreError>;
    fn set(&self, id: RecordId, key: &str, value: serde_json::Value) -> Result<(), StoreError>;
    fn delete(&self, id: RecordId, key: &str) -> Result<(), StoreError>;
    /// Remove every key of a record.
    fn delete_record(&self, id: RecordId) -> Result<(), StoreError>;
}

/// Read and deserialize a key.
pub fn load<T, S>(store: &S, id: RecordId, key: &str) -> Result<Option<T>, StoreError>
where
    T: DeserializeOwned,
    S: MetaStore + ?Sized,
{
    match store.get(id, key)? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

/// Serialize and write a key.
pub fn save<T, S>(store: &S, id: RecordId, key: &str, value: &T) -> Result<(), StoreError>
where
    T: Serialize + ?Sized,
    S: MetaStore + ?Sized,
{
    store.set(id, key, serde_json::to_value(value)?)
}

pub fn load_metadata<S: MetaStore + ?Sized>(
    store: &S,
    id: RecordId,
) -> Result<Option<Metadata>, StoreError> {
    load(store, id, METADATA_KEY)
}

pub fn save_metadata<S: MetaStore + ?Sized>(
    store: &S,
    id: RecordId,
    metadata: &Metadata,
) -> Result<(), StoreError> {
    save(store, id, METADATA_KEY, metadata)
}

/// The record's mime type. Unknown strings come back as `None`.
pub fn load_mime<S: MetaStore + ?Sized>(
    store: &S,
    id: RecordId,
) -> Result<Option<String>, StoreError> {
    load(store, id, MIME_KEY)
}

pub fn save_mime<S: MetaStore + ?Sized>(
    store: &S,
    id: RecordId,
    mime: MimeType,
) -> Result<(), StoreError> {
    save(store, id, MIME_KEY, mime.as_str())
}

type Records = BTreeMap<RecordId, BTreeMap<String, serde_json::Value>>;

/// In-memory store.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<Records>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys currently held for a record, in order.
    pub fn keys(&self, id: RecordId) -> Vec<String> {
        self.records
            .lock()
            .map(|r| r.get(&id).map(|k| k.keys().cloned().collect()).unwrap_or_default())
            .unwrap_or_default()
    }
}

impl MetaStore for MemoryStore {
    fn get(&self, id: RecordId, key: &str) -> Result<Option<serde_json::Value>, StoreError> {
        let records = self.records.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(records.get(&id).and_then(|r| r.get(key)).cloned())
    }

    fn set(&self, id: RecordId, key: &str, value: serde_json::Value) -> Result<(), StoreError> {
        let mut records = self.records.lock().map_err(|_| StoreError::Poisoned)?;
        records.entry(id).or_default().insert(key.to_string(), value);
        Ok(())
    }

    fn delete(&self, id: RecordId, key: &str) -> Result<(), StoreError> {
        let mut records = self.records.lock().map_err(|_| StoreError::Poisoned)?;
        if let Some(record) = records.get_mut(&id) {
            record.remove(key);
            if record.is_empty() {
                records.remove(&id);
            }
        }
        Ok(())
    }

    fn delete_record(&self, id: RecordId) -> Result<(), StoreError> {
        let mut records = self.records.lock().map_err(|_| StoreError::Poisoned)?;
        records.remove(&id);
        Ok(())
    }
}

#[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
struct StoreDocument {
    version: u32,
    next_id: RecordId,
    records: Records,
}

/// Store backed by a single JSON file.
pub struct JsonFileStore {
    path: PathBuf,
    doc: Mutex<StoreDocument>,
}

impl JsonFileStore {
    /// Open a store file, starting empty when it does not exist yet.
    ///
    /// Unlike a cache, store contents are not disposable: a corrupt file or a
    /// version mismatch is an error, never a silent reset.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let doc = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let doc: StoreDocument = serde_json::from_str(&content)?;
            if doc.version != STORE_VERSION {
                return Err(StoreError::Version {
                    path,
                    found: doc.version,
                    expected: STORE_VERSION,
                });
            }
            doc
        } else {
            StoreDocument {
                version: STORE_VERSION,
                next_id: 1,
                records: Records::new(),
            }
        };
        Ok(Self {
            path,
            doc: Mutex::new(doc),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reserve the next record id.
    pub fn allocate_id(&self) -> Result<RecordId, StoreError> {
        let mut doc = self.doc.lock().map_err(|_| StoreError::Poisoned)?;
        let id = doc.next_id.max(1);
        doc.next_id = id + 1;
        write_document(&self.path, &doc)?;
        Ok(id)
    }

    /// Ids of every record holding at least one key.
    pub fn record_ids(&self) -> Result<Vec<RecordId>, StoreError> {
        let doc = self.doc.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(doc.records.keys().copied().collect())
    }

    fn mutate(&self, f: impl FnOnce(&mut Records)) -> Result<(), StoreError> {
        let mut doc = self.doc.lock().map_err(|_| StoreError::Poisoned)?;
        f(&mut doc.records);
        write_document(&self.path, &doc)
    }
}

fn write_document(path: &Path, doc: &StoreDocument) -> Result<(), StoreError> {
    let json = serde_json::to_string_pretty(doc)?;
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(json.as_bytes())?;
    tmp.persist(path).map_err(|e| StoreError::Io(e.error))?;
    Ok(())
}

impl MetaStore for JsonFileStore {
    fn get(&self, id: RecordId, key: &str) -> Result<Option<serde_json::Value>, StoreError> {
        let doc = self.doc.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(doc.records.get(&id).and_then(|r| r.get(key)).cloned())
    }

    fn set(&self, id: RecordId, key: &str, value: serde_json::Value) -> Result<(), StoreError> {
        self.mutate(|records| {
            records.entry(id).or_default().insert(key.to_string(), value);
        })
    }

    fn delete(&self, id: RecordId, key: &str) -> Result<(), StoreError> {
        self.mutate(|records| {
            if let Some(record) = records.get_mut(&id) {
                record.remove(key);
                if record.is_empty() {
                    records.remove(&id);
                }
            }
        })
    }

    fn delete_record(&self, id: RecordId) -> Result<(), StoreError> {
        self.mutate(|records| {
            records.remove(&id);
        })
    }
}
