//! Metadata index: the record-store half of the consistency protocol.
//!
//! The trait keeps the backing engine swappable. [`MemoryIndex`] backs tests
//! and embedders that manage their own persistence; [`JsonIndex`] overlays it
//! with a durable JSON file next to the content, persisted after every
//! mutation with a write-temp-then-rename.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use chrono::Utc;

use crate::entry::FileEntry;
use crate::error::StashError;

/// Paging and filtering for [`MetadataStore::list`].
#[derive(Debug, Clone)]
pub struct ListQuery {
    pub offset: usize,
    pub limit: usize,
    /// Substring match on the key.
    pub filter: Option<String>,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 50,
            filter: None,
        }
    }
}

impl ListQuery {
    pub fn page(offset: usize, limit: usize) -> Self {
        Self {
            offset,
            limit,
            filter: None,
        }
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }
}

/// Trait for metadata record stores.
///
/// Each operation is independent; no cross-record transactions are assumed.
pub trait MetadataStore: Send + Sync {
    fn exists(&self, key: &str) -> Result<bool, StashError> {
        Ok(self.get(key)?.is_some())
    }

    fn get(&self, key: &str) -> Result<Option<FileEntry>, StashError>;

    /// Insert a new record; fails with `DuplicateKey` if the key is taken.
    fn create(&self, entry: FileEntry) -> Result<(), StashError>;

    /// Insert or fully replace a record.
    fn upsert(&self, entry: FileEntry) -> Result<(), StashError>;

    /// Hard delete; the key becomes reusable immediately. `NotFound` if
    /// absent.
    fn delete(&self, key: &str) -> Result<(), StashError>;

    /// Atomically bump `download_count` and stamp `last_access_at`.
    ///
    /// Callers on the read path swallow failures from this; see
    /// [`crate::AccessAccountant`].
    fn increment_access(&self, key: &str) -> Result<(), StashError>;

    /// Records ordered by `created_at` descending, filtered and paged.
    fn list(&self, query: &ListQuery) -> Result<Vec<FileEntry>, StashError>;

    /// Persist pending state, if the backend buffers any.
    fn flush(&self) -> Result<(), StashError> {
        Ok(())
    }
}

/// In-memory index (HashMap behind an RwLock).
#[derive(Debug, Default)]
pub struct MemoryIndex {
    entries: RwLock<HashMap<String, FileEntry>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Vec<FileEntry>) -> Self {
        let map = entries.into_iter().map(|e| (e.key.clone(), e)).collect();
        Self {
            entries: RwLock::new(map),
        }
    }

    /// All records, unordered. Used by the persistent overlay to serialize.
    fn snapshot(&self) -> Vec<FileEntry> {
        let entries = self.entries.read().unwrap();
        entries.values().cloned().collect()
    }
}

impl MetadataStore for MemoryIndex {
    fn exists(&self, key: &str) -> Result<bool, StashError> {
        let entries = self.entries.read().unwrap();
        Ok(entries.contains_key(key))
    }

    fn get(&self, key: &str) -> Result<Option<FileEntry>, StashError> {
        let entries = self.entries.read().unwrap();
        Ok(entries.get(key).cloned())
    }

    fn create(&self, entry: FileEntry) -> Result<(), StashError> {
        let mut entries = self.entries.write().unwrap();
        if entries.contains_key(&entry.key) {
            return Err(StashError::DuplicateKey(entry.key));
        }
        entries.insert(entry.key.clone(), entry);
        Ok(())
    }

    fn upsert(&self, entry: FileEntry) -> Result<(), StashError> {
        let mut entries = self.entries.write().unwrap();
        entries.insert(entry.key.clone(), entry);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StashError> {
        let mut entries = self.entries.write().unwrap();
        match entries.remove(key) {
            Some(_) => Ok(()),
            None => Err(StashError::NotFound(key.to_string())),
        }
    }

    fn increment_access(&self, key: &str) -> Result<(), StashError> {
        let mut entries = self.entries.write().unwrap();
        let entry = entries
            .get_mut(key)
            .ok_or_else(|| StashError::NotFound(key.to_string()))?;
        entry.record_access(Utc::now());
        Ok(())
    }

    fn list(&self, query: &ListQuery) -> Result<Vec<FileEntry>, StashError> {
        let entries = self.entries.read().unwrap();
        let mut rows: Vec<FileEntry> = entries
            .values()
            .filter(|e| {
                query
                    .filter
                    .as_deref()
                    .map_or(true, |needle| e.key.contains(needle))
            })
            .cloned()
            .collect();
        // Newest first; key breaks creation-time ties deterministically.
        rows.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.key.cmp(&b.key))
        });
        Ok(rows
            .into_iter()
            .skip(query.offset)
            .take(query.limit)
            .collect())
    }
}

/// File-backed index: [`MemoryIndex`] plus a JSON file.
///
/// Every mutation is persisted before returning, so a crash loses at most
/// the operation in flight. The save is atomic (temp file, then rename);
/// readers of the file never observe a half-written index. One lock is held
/// across the in-memory mutation and its save, so concurrent mutators never
/// race on the temp file or rename a stale snapshot over a newer one.
#[derive(Debug)]
pub struct JsonIndex {
    path: PathBuf,
    inner: MemoryIndex,
    write_lock: Mutex<()>,
}

impl JsonIndex {
    /// Open the index file, creating an empty index if it does not exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StashError> {
        let path = path.as_ref().to_path_buf();

        let entries = if path.exists() {
            let json = fs::read_to_string(&path)?;
            serde_json::from_str::<Vec<FileEntry>>(&json)
                .map_err(|e| StashError::Corrupt(format!("{}: {e}", path.display())))?
        } else {
            Vec::new()
        };

        Ok(Self {
            path,
            inner: MemoryIndex::from_entries(entries),
            write_lock: Mutex::new(()),
        })
    }

    // Callers must hold `write_lock` for the whole mutate-then-save pair.
    fn save(&self) -> Result<(), StashError> {
        let rows = self.inner.snapshot();
        let json = serde_json::to_string_pretty(&rows)
            .map_err(|e| StashError::Corrupt(e.to_string()))?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Atomic write: temp file in the same directory, then rename
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;

        Ok(())
    }
}

impl MetadataStore for JsonIndex {
    fn exists(&self, key: &str) -> Result<bool, StashError> {
        self.inner.exists(key)
    }

    fn get(&self, key: &str) -> Result<Option<FileEntry>, StashError> {
        self.inner.get(key)
    }

    fn create(&self, entry: FileEntry) -> Result<(), StashError> {
        let _guard = self.write_lock.lock().unwrap();
        self.inner.create(entry)?;
        self.save()
    }

    fn upsert(&self, entry: FileEntry) -> Result<(), StashError> {
        let _guard = self.write_lock.lock().unwrap();
        self.inner.upsert(entry)?;
        self.save()
    }

    fn delete(&self, key: &str) -> Result<(), StashError> {
        let _guard = self.write_lock.lock().unwrap();
        self.inner.delete(key)?;
        self.save()
    }

    fn increment_access(&self, key: &str) -> Result<(), StashError> {
        let _guard = self.write_lock.lock().unwrap();
        self.inner.increment_access(key)?;
        self.save()
    }

    fn list(&self, query: &ListQuery) -> Result<Vec<FileEntry>, StashError> {
        self.inner.list(query)
    }

    fn flush(&self) -> Result<(), StashError> {
        let _guard = self.write_lock.lock().unwrap();
        self.save()
    }
}
