//! Orchestration of content and metadata: the consistency protocol.
//!
//! The two stores share no transaction, so every operation fixes an update
//! order and a compensation rule:
//!
//! - **Put** writes content first; a metadata record never references bytes
//!   that were not durably written. A metadata failure after the content
//!   write leaves orphaned content, which is surfaced, not rolled back — a
//!   compensating content delete would race other writers.
//! - **Delete** removes metadata first; once deletion is requested the key
//!   is never re-exposed, even if content removal then fails. A dangling
//!   content file is acceptable garbage for an out-of-band sweep.
//! - **Get** treats metadata as the authoritative existence check; a missing
//!   content file behind a live record is a [`StashError::Divergence`],
//!   distinct from "never existed".
//!
//! No in-process locking is imposed here. Same-key Put/Put and Put/Delete
//! races resolve through the index's unique-key constraint and the content
//! store's last-writer-wins file writes; concurrent same-key uploads may
//! interleave at the filesystem level, which is accepted and not detected.

use std::io::Read;
use std::sync::{mpsc, Arc};
use std::thread;

use crate::config::StashConfig;
use crate::content::ContentStore;
use crate::entry::FileEntry;
use crate::error::StashError;
use crate::index::{JsonIndex, ListQuery, MetadataStore};
use crate::key::{is_valid_key, KeyGenerator};

/// Outcome of a successful put.
#[derive(Debug, Clone)]
pub struct PutReceipt {
    pub key: String,
    pub size: u64,
}

/// A successful get: the metadata record plus an opened content handle.
///
/// The handle is already open, so on Unix a concurrent delete unlinks the
/// name but this read still completes.
#[derive(Debug)]
pub struct Retrieval {
    pub entry: FileEntry,
    pub file: std::fs::File,
}

enum AccessEvent {
    Record(String),
    Flush(mpsc::Sender<()>),
}

/// Best-effort access accounting, kept off the read path.
///
/// `record_access` hands the bump to a dedicated worker thread and returns
/// immediately; a served download never waits on, or fails because of, the
/// counter. Failures on the worker are logged and swallowed. The thread
/// exits when the last accountant clone is dropped.
#[derive(Clone)]
pub struct AccessAccountant {
    tx: mpsc::Sender<AccessEvent>,
}

impl AccessAccountant {
    pub fn new(index: Arc<dyn MetadataStore>) -> Self {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            for event in rx {
                match event {
                    AccessEvent::Record(key) => {
                        if let Err(err) = index.increment_access(&key) {
                            tracing::warn!(key = %key, error = %err, "failed to record access");
                        }
                    }
                    AccessEvent::Flush(ack) => {
                        let _ = ack.send(());
                    }
                }
            }
        });
        Self { tx }
    }

    pub fn record_access(&self, key: &str) {
        if self.tx.send(AccessEvent::Record(key.to_string())).is_err() {
            tracing::warn!(key, "access recorder is gone");
        }
    }

    /// Block until every access recorded so far has been applied.
    pub fn flush(&self) {
        let (ack_tx, ack_rx) = mpsc::channel();
        if self.tx.send(AccessEvent::Flush(ack_tx)).is_ok() {
            let _ = ack_rx.recv();
        }
    }
}

/// Sequences content and metadata operations for Put, Get, Delete, List, and
/// index rebuilds.
pub struct FileEntryService {
    content: ContentStore,
    index: Arc<dyn MetadataStore>,
    keys: KeyGenerator,
    accountant: AccessAccountant,
    force_overwrite: bool,
}

impl FileEntryService {
    /// Open a service over the configured root with the JSON-file index.
    pub fn open(config: &StashConfig) -> Result<Self, StashError> {
        let content = ContentStore::open(config.root.clone())?;
        let index: Arc<dyn MetadataStore> = Arc::new(JsonIndex::open(config.index_file())?);
        Ok(Self::with_index(content, index, config))
    }

    /// Compose a service from explicit parts.
    ///
    /// Lets tests and embedders supply their own index backend.
    pub fn with_index(
        content: ContentStore,
        index: Arc<dyn MetadataStore>,
        config: &StashConfig,
    ) -> Self {
        Self {
            content,
            accountant: AccessAccountant::new(index.clone()),
            index,
            keys: KeyGenerator::new(config.key_length),
            force_overwrite: config.force_overwrite,
        }
    }

    pub fn accountant(&self) -> &AccessAccountant {
        &self.accountant
    }

    /// Store `reader` under the provided key, or a generated one.
    pub fn put(
        &self,
        provided_key: Option<&str>,
        reader: &mut dyn Read,
    ) -> Result<PutReceipt, StashError> {
        let key = self.keys.generate(provided_key);

        if !self.force_overwrite && self.index.exists(&key)? {
            return Err(StashError::AlreadyExists(key));
        }

        // Content first: a record must never reference unwritten bytes.
        let size = self.content.write(&key, reader)?;

        let entry = FileEntry::new(key.clone(), size);
        match self.index.create(entry.clone()) {
            Ok(()) => {}
            Err(StashError::DuplicateKey(_)) if self.force_overwrite => {
                self.index.upsert(entry)?;
            }
            // Content is on disk but the record is not: the documented
            // inconsistency window, propagated rather than masked.
            Err(err) => return Err(err),
        }

        Ok(PutReceipt { key, size })
    }

    /// Fetch the entry and an opened content handle for `key`.
    pub fn get(&self, key: &str) -> Result<Retrieval, StashError> {
        let entry = self
            .index
            .get(key)?
            .ok_or_else(|| StashError::NotFound(key.to_string()))?;

        let file = self
            .content
            .open_file(key)?
            .ok_or_else(|| StashError::Divergence(key.to_string()))?;

        self.accountant.record_access(key);

        Ok(Retrieval { entry, file })
    }

    /// Delete the entry and its content. `NotFound` for absent keys, never a
    /// no-op success.
    pub fn delete(&self, key: &str) -> Result<(), StashError> {
        if !self.index.exists(key)? {
            return Err(StashError::NotFound(key.to_string()));
        }

        // Metadata first: the key disappears from the index even if content
        // removal fails below, and is never resurrected.
        self.index.delete(key)?;
        match self.content.remove(key) {
            Ok(()) => Ok(()),
            // The authoritative record is gone; a file that was already
            // missing is the same outcome, not a failure.
            Err(StashError::NotFound(_)) => {
                tracing::warn!(key, "content already missing during delete");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Paginated metadata listing. No content verification; Get owns
    /// divergence detection.
    pub fn list(&self, query: &ListQuery) -> Result<Vec<FileEntry>, StashError> {
        self.index.list(query)
    }

    /// Reconcile the record for `key` from the file already on disk.
    ///
    /// The one path where metadata is derived from content, for manually
    /// placed files. An existing record keeps its creation time and access
    /// stats; size and name are refreshed from disk.
    pub fn rebuild_index(&self, key: &str) -> Result<FileEntry, StashError> {
        if !is_valid_key(key) {
            return Err(StashError::InvalidKey(key.to_string()));
        }

        let size = self.content.size(key)?;
        let entry = match self.index.get(key)? {
            Some(mut existing) => {
                existing.size = size;
                existing.original_name = key.to_string();
                existing
            }
            None => FileEntry::new(key, size),
        };
        self.index.upsert(entry.clone())?;
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Read as _;
    use tempfile::TempDir;

    fn open_service(force: bool) -> (TempDir, FileEntryService) {
        let dir = TempDir::new().unwrap();
        let mut config = StashConfig::with_root(dir.path());
        config.force_overwrite = force;
        let service = FileEntryService::open(&config).unwrap();
        (dir, service)
    }

    fn read_all(mut retrieval: Retrieval) -> Vec<u8> {
        let mut data = Vec::new();
        retrieval.file.read_to_end(&mut data).unwrap();
        data
    }

    #[test]
    fn test_put_then_get_roundtrip() {
        let (_dir, service) = open_service(true);

        let receipt = service.put(Some("abc12"), &mut &b"payload"[..]).unwrap();
        assert_eq!(receipt.key, "abc12");
        assert_eq!(receipt.size, 7);

        let retrieval = service.get("abc12").unwrap();
        assert_eq!(retrieval.entry.size, 7);
        assert_eq!(read_all(retrieval), b"payload");
    }

    #[test]
    fn test_put_generates_key_when_none_provided() {
        let (_dir, service) = open_service(true);

        let receipt = service.put(None, &mut &b"x"[..]).unwrap();
        assert_eq!(receipt.key.len(), 5);
        assert!(is_valid_key(&receipt.key));

        let retrieval = service.get(&receipt.key).unwrap();
        assert_eq!(read_all(retrieval), b"x");
    }

    #[test]
    fn test_put_invalid_provided_key_gets_random_key() {
        let (_dir, service) = open_service(true);

        let receipt = service.put(Some(".sneaky"), &mut &b"x"[..]).unwrap();
        assert_ne!(receipt.key, ".sneaky");
        assert!(is_valid_key(&receipt.key));
    }

    #[test]
    fn test_delete_then_get_and_delete_are_not_found() {
        let (_dir, service) = open_service(true);

        service.put(Some("abc12"), &mut &b"bytes"[..]).unwrap();
        service.delete("abc12").unwrap();

        assert!(matches!(
            service.get("abc12"),
            Err(StashError::NotFound(_))
        ));
        assert!(matches!(
            service.delete("abc12"),
            Err(StashError::NotFound(_))
        ));
    }

    #[test]
    fn test_forbid_overwrite_keeps_original_content() {
        let (_dir, service) = open_service(false);

        service.put(Some("abc12"), &mut &b"first"[..]).unwrap();
        let result = service.put(Some("abc12"), &mut &b"second"[..]);
        assert!(matches!(result, Err(StashError::AlreadyExists(_))));

        let retrieval = service.get("abc12").unwrap();
        assert_eq!(retrieval.entry.size, 5);
        assert_eq!(read_all(retrieval), b"first");
    }

    #[test]
    fn test_force_overwrite_replaces_content_and_size() {
        let (_dir, service) = open_service(true);

        service.put(Some("abc12"), &mut &b"first"[..]).unwrap();
        service.put(Some("abc12"), &mut &b"the second one"[..]).unwrap();

        let retrieval = service.get("abc12").unwrap();
        assert_eq!(retrieval.entry.size, 14);
        assert_eq!(read_all(retrieval), b"the second one");
    }

    #[test]
    fn test_repeated_gets_increment_download_count() {
        let (_dir, service) = open_service(true);
        service.put(Some("abc12"), &mut &b"bytes"[..]).unwrap();

        let mut last_seen = None;
        for expected in 1..=3u64 {
            let _ = service.get("abc12").unwrap();
            service.accountant().flush();
            let entry = service
                .list(&ListQuery::default())
                .unwrap()
                .into_iter()
                .find(|e| e.key == "abc12")
                .unwrap();
            assert_eq!(entry.download_count, expected);
            let at = entry.last_access_at.unwrap();
            if let Some(prev) = last_seen {
                assert!(at >= prev);
            }
            last_seen = Some(at);
        }
    }

    #[test]
    fn test_list_pages_of_fifty() {
        let (_dir, service) = open_service(true);
        for i in 0..60 {
            let key = format!("key{i:02}");
            service.put(Some(&key), &mut &b"x"[..]).unwrap();
        }

        let first = service.list(&ListQuery::page(0, 50)).unwrap();
        let second = service.list(&ListQuery::page(50, 50)).unwrap();
        assert_eq!(first.len(), 50);
        assert_eq!(second.len(), 10);

        // newest first within the page
        for pair in first.windows(2) {
            assert!(pair[0].created_at >= pair[1].created_at);
        }

        // no overlap, nothing lost
        let mut all: Vec<String> = first
            .iter()
            .chain(&second)
            .map(|e| e.key.clone())
            .collect();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 60);
    }

    #[test]
    fn test_missing_content_is_divergence_not_not_found() {
        let (dir, service) = open_service(true);
        service.put(Some("abc12"), &mut &b"bytes"[..]).unwrap();

        // mutate out-of-band
        fs::remove_file(dir.path().join("abc12")).unwrap();

        assert!(matches!(
            service.get("abc12"),
            Err(StashError::Divergence(_))
        ));
    }

    #[test]
    fn test_rebuild_index_for_manually_placed_file() {
        let (dir, service) = open_service(true);

        fs::write(dir.path().join("manual"), b"dropped in by hand").unwrap();
        let entry = service.rebuild_index("manual").unwrap();
        assert_eq!(entry.size, 18);

        let retrieval = service.get("manual").unwrap();
        assert_eq!(read_all(retrieval), b"dropped in by hand");
    }

    #[test]
    fn test_rebuild_index_refreshes_size_but_keeps_history() {
        let (dir, service) = open_service(true);
        service.put(Some("abc12"), &mut &b"v1"[..]).unwrap();
        let _ = service.get("abc12").unwrap();
        service.accountant().flush();
        let before = service.get("abc12").unwrap().entry;
        service.accountant().flush();

        // grow the file behind the index's back
        fs::write(dir.path().join("abc12"), b"a much longer body").unwrap();

        let rebuilt = service.rebuild_index("abc12").unwrap();
        assert_eq!(rebuilt.size, 18);
        assert_eq!(rebuilt.created_at, before.created_at);
        assert!(rebuilt.download_count >= before.download_count);
    }

    #[test]
    fn test_rebuild_index_rejects_reserved_key() {
        let (_dir, service) = open_service(true);
        assert!(matches!(
            service.rebuild_index(".index.json"),
            Err(StashError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_entries_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let config = StashConfig::with_root(dir.path());

        {
            let service = FileEntryService::open(&config).unwrap();
            service.put(Some("abc12"), &mut &b"durable"[..]).unwrap();
        }

        let service = FileEntryService::open(&config).unwrap();
        let retrieval = service.get("abc12").unwrap();
        assert_eq!(read_all(retrieval), b"durable");
    }

    #[test]
    fn test_failed_put_leaves_no_metadata() {
        let (_dir, service) = open_service(true);

        struct FailingReader;
        impl Read for FailingReader {
            fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
                Err(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "client went away",
                ))
            }
        }

        let result = service.put(Some("abc12"), &mut FailingReader);
        assert!(matches!(result, Err(StashError::Io(_))));
        assert!(matches!(
            service.get("abc12"),
            Err(StashError::NotFound(_))
        ));
    }

    #[test]
    fn test_accountant_swallows_missing_key() {
        let (_dir, service) = open_service(true);
        // must not panic or error, on either side of the channel
        service.accountant().record_access("ghost");
        service.accountant().flush();
    }

    #[test]
    fn test_delete_succeeds_when_content_already_missing() {
        let (dir, service) = open_service(true);
        service.put(Some("abc12"), &mut &b"bytes"[..]).unwrap();

        // content vanishes out-of-band; the record is still authoritative
        fs::remove_file(dir.path().join("abc12")).unwrap();

        service.delete("abc12").unwrap();
        assert!(matches!(
            service.get("abc12"),
            Err(StashError::NotFound(_))
        ));
    }
}
