//! Error taxonomy for store and service operations.
//!
//! Every failure a caller can act on gets its own variant; the transport
//! layer maps them to status codes without string matching.

use std::io;

use thiserror::Error;

/// Errors surfaced by the content store, the metadata index, and the
/// orchestration service.
#[derive(Debug, Error)]
pub enum StashError {
    /// The key is empty, starts with the reserved prefix, or contains a
    /// path separator.
    #[error("invalid key {0:?}")]
    InvalidKey(String),

    /// Put on an existing key while overwrite is forbidden.
    #[error("key {0:?} already exists")]
    AlreadyExists(String),

    /// No entry for the key.
    #[error("no such entry {0:?}")]
    NotFound(String),

    /// The index's unique-key constraint was violated on create.
    #[error("duplicate key {0:?} in index")]
    DuplicateKey(String),

    /// The index file could not be parsed or serialized.
    #[error("index corrupt: {0}")]
    Corrupt(String),

    /// Metadata and content disagree on existence for this key. Distinct
    /// from `NotFound`: the entry is known, its bytes are gone.
    #[error("metadata exists but content is missing for key {0:?}")]
    Divergence(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}
