//! Key-addressed file storage with a consistent metadata index.
//!
//! Clients store a byte stream under a short key and fetch it back by key.
//! Content lives as one file per key under a configured root directory;
//! metadata (identity, size, access stats) lives in a record store addressed
//! by the same key. The two stores fail independently and share no
//! transaction, so [`FileEntryService`] fixes the update order and the
//! compensation rule for every operation; the `service` module documents the
//! protocol.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use stash::{FileEntryService, StashConfig};
//!
//! let config = StashConfig::with_root("/var/lib/stash");
//! let service = FileEntryService::open(&config).unwrap();
//!
//! // Store bytes under an explicit key
//! let receipt = service.put(Some("notes"), &mut &b"hello"[..]).unwrap();
//! println!("stored {} bytes as {}", receipt.size, receipt.key);
//!
//! // Or let the store pick a short random key
//! let receipt = service.put(None, &mut &b"anonymous"[..]).unwrap();
//! println!("stored as {}", receipt.key);
//! ```
//!
//! # Layout
//!
//! ```text
//! {root}/
//! ├── .index.json   # metadata records (reserved prefix keeps keys away)
//! ├── abc12         # content file, named by its key
//! └── notes
//! ```

pub mod config;
pub mod content;
pub mod entry;
pub mod error;
pub mod index;
pub mod key;
pub mod service;

// Re-exports for convenience
pub use config::StashConfig;
pub use content::ContentStore;
pub use entry::FileEntry;
pub use error::StashError;
pub use index::{JsonIndex, ListQuery, MemoryIndex, MetadataStore};
pub use key::{is_valid_key, KeyGenerator, RESERVED_PREFIX};
pub use service::{AccessAccountant, FileEntryService, PutReceipt, Retrieval};
