//! The persistent metadata record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata for one stored file.
///
/// `size` is recorded at write time and never re-verified; a content file
/// mutated out-of-band will drift from it until the index is rebuilt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntry {
    /// Unique identifier, also the file name under the content root.
    pub key: String,

    /// Display name. Always equal to `key` today; no rename exists.
    pub original_name: String,

    /// Byte length at the moment the record was committed.
    pub size: u64,

    pub created_at: DateTime<Utc>,

    /// Stamped on successful reads, best-effort.
    pub last_access_at: Option<DateTime<Utc>>,

    /// Monotonically non-decreasing download counter, best-effort.
    pub download_count: u64,
}

impl FileEntry {
    pub fn new(key: impl Into<String>, size: u64) -> Self {
        let key = key.into();
        Self {
            original_name: key.clone(),
            key,
            size,
            created_at: Utc::now(),
            last_access_at: None,
            download_count: 0,
        }
    }

    /// Bump the download counter and stamp the access time.
    pub fn record_access(&mut self, at: DateTime<Utc>) {
        self.download_count += 1;
        self.last_access_at = Some(at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_entry_defaults() {
        let entry = FileEntry::new("abc12", 42);
        assert_eq!(entry.key, "abc12");
        assert_eq!(entry.original_name, "abc12");
        assert_eq!(entry.size, 42);
        assert_eq!(entry.download_count, 0);
        assert!(entry.last_access_at.is_none());
    }

    #[test]
    fn test_record_access() {
        let mut entry = FileEntry::new("abc12", 1);
        let t1 = Utc::now();
        entry.record_access(t1);
        assert_eq!(entry.download_count, 1);
        assert_eq!(entry.last_access_at, Some(t1));

        let t2 = Utc::now();
        entry.record_access(t2);
        assert_eq!(entry.download_count, 2);
        assert_eq!(entry.last_access_at, Some(t2));
    }

    #[test]
    fn test_serde_roundtrip() {
        let entry = FileEntry::new("abc12", 7);
        let json = serde_json::to_string(&entry).unwrap();
        let restored: FileEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(entry.key, restored.key);
        assert_eq!(entry.size, restored.size);
        assert_eq!(entry.created_at, restored.created_at);
    }
}
