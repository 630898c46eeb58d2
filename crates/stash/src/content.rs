//! Filesystem-backed content storage.
//!
//! One file per key directly under the root. Writes are create-or-truncate
//! with cleanup on failure; a crash mid-write can still leave a truncated
//! file, which the metadata-first read path then reports as divergence
//! rather than hiding.
//!
//! Layout:
//! ```text
//! {root}/
//! ├── .index.json   # metadata index, unreachable through client keys
//! ├── abc12         # content files, named by key
//! └── notes
//! ```

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use crate::error::StashError;
use crate::key::is_valid_key;

/// Byte storage addressed by key.
#[derive(Debug, Clone)]
pub struct ContentStore {
    root: PathBuf,
}

impl ContentStore {
    /// Open a store rooted at `root`, creating the directory if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StashError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve the content path for `key`.
    ///
    /// Validated here as well as at the service boundary, so internal
    /// artifacts under the reserved prefix can never be addressed even by
    /// misuse inside the crate.
    fn file_path(&self, key: &str) -> Result<PathBuf, StashError> {
        if !is_valid_key(key) {
            return Err(StashError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(key))
    }

    /// Write `reader` to the file addressed by `key`, creating or
    /// truncating. Returns the number of bytes written.
    ///
    /// On failure the partial artifact is removed; cleanup-on-failure, not
    /// true atomicity.
    pub fn write(&self, key: &str, reader: &mut dyn Read) -> Result<u64, StashError> {
        let path = self.file_path(key)?;
        let mut file = File::create(&path)?;
        match io::copy(reader, &mut file) {
            Ok(size) => Ok(size),
            Err(err) => {
                drop(file);
                if let Err(cleanup) = fs::remove_file(&path) {
                    tracing::warn!(key, error = %cleanup, "failed to remove partial write");
                }
                Err(err.into())
            }
        }
    }

    /// Open the content file for reading, or `None` if it does not exist.
    ///
    /// The handle is opened here, so on Unix a concurrent unlink does not
    /// abort an in-flight read; the open handle keeps the inode alive.
    pub fn open_file(&self, key: &str) -> Result<Option<File>, StashError> {
        let path = self.file_path(key)?;
        match File::open(&path) {
            Ok(file) => Ok(Some(file)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    pub fn exists(&self, key: &str) -> bool {
        self.file_path(key).map(|p| p.is_file()).unwrap_or(false)
    }

    /// Remove the content file. `NotFound` if it does not exist.
    pub fn remove(&self, key: &str) -> Result<(), StashError> {
        let path = self.file_path(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                Err(StashError::NotFound(key.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Byte length of the content file, for out-of-band index rebuilds.
    pub fn size(&self, key: &str) -> Result<u64, StashError> {
        let path = self.file_path(key)?;
        match fs::metadata(&path) {
            Ok(meta) if meta.is_file() => Ok(meta.len()),
            Ok(_) => Err(StashError::NotFound(key.to_string())),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                Err(StashError::NotFound(key.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }
}
