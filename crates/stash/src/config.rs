//! Store configuration with environment and file-based loading.
//!
//! Environment variables:
//! - `STASH_ROOT`: content root directory
//! - `STASH_FORCE_OVERWRITE`: set to "false" or "0" to forbid Put on
//!   existing keys
//!
//! Default root: `~/.stash/files`

use std::env;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::StashError;
use crate::key::DEFAULT_KEY_LENGTH;

/// File name of the metadata index inside the content root.
///
/// Starts with the reserved prefix, so no client key can ever address it.
pub const INDEX_FILE_NAME: &str = ".index.json";

/// Configuration for a stash root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StashConfig {
    /// Directory holding one content file per key plus the index file.
    pub root: PathBuf,

    /// When true (the default), Put on an existing key replaces both content
    /// and metadata. When false, it fails with `AlreadyExists` before any
    /// content is touched.
    #[serde(default = "default_true")]
    pub force_overwrite: bool,

    /// Length of generated keys.
    #[serde(default = "default_key_length")]
    pub key_length: usize,
}

fn default_true() -> bool {
    true
}

fn default_key_length() -> usize {
    DEFAULT_KEY_LENGTH
}

/// Get the default content root (~/.stash/files).
fn default_root() -> PathBuf {
    directories::BaseDirs::new()
        .map(|dirs| dirs.home_dir().join(".stash").join("files"))
        .unwrap_or_else(|| PathBuf::from(".stash/files"))
}

impl Default for StashConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            force_overwrite: true,
            key_length: DEFAULT_KEY_LENGTH,
        }
    }
}

impl StashConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults.
    pub fn from_env() -> Result<Self, StashError> {
        let root = env::var("STASH_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_root());

        let force_overwrite = env::var("STASH_FORCE_OVERWRITE")
            .map(|v| !(v.to_lowercase() == "false" || v == "0"))
            .unwrap_or(true);

        Ok(Self {
            root,
            force_overwrite,
            key_length: DEFAULT_KEY_LENGTH,
        })
    }

    /// Load configuration from a TOML file, falling back to environment.
    ///
    /// The file should contain a `[stash]` section:
    /// ```toml
    /// [stash]
    /// root = "/var/lib/stash"
    /// force_overwrite = true
    /// key_length = 5
    /// ```
    pub fn from_file(path: &Path) -> Result<Self, StashError> {
        let contents = std::fs::read_to_string(path)?;

        let table: toml::Table = contents
            .parse()
            .map_err(|e: toml::de::Error| {
                StashError::Corrupt(format!("{}: {e}", path.display()))
            })?;

        if let Some(section) = table.get("stash") {
            section
                .clone()
                .try_into()
                .map_err(|e: toml::de::Error| {
                    StashError::Corrupt(format!("bad [stash] section: {e}"))
                })
        } else {
            // No [stash] section, fall back to env
            Self::from_env()
        }
    }

    /// Create a config with a specific root and default policy.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            force_overwrite: true,
            key_length: DEFAULT_KEY_LENGTH,
        }
    }

    /// Path of the metadata index file inside the root.
    pub fn index_file(&self) -> PathBuf {
        self.root.join(INDEX_FILE_NAME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = StashConfig::default();
        assert!(config.root.to_string_lossy().contains(".stash"));
        assert!(config.force_overwrite);
        assert_eq!(config.key_length, DEFAULT_KEY_LENGTH);
    }

    #[test]
    fn test_with_root() {
        let config = StashConfig::with_root("/custom/path");
        assert_eq!(config.root, PathBuf::from("/custom/path"));
        assert!(config.force_overwrite);
    }

    #[test]
    fn test_index_file_is_reserved() {
        let config = StashConfig::with_root("/tank/stash");
        assert_eq!(config.index_file(), PathBuf::from("/tank/stash/.index.json"));
        assert!(!crate::key::is_valid_key(INDEX_FILE_NAME));
    }

    #[test]
    fn test_from_file_with_section() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("stash.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "[stash]\nroot = \"/tank/files\"\nforce_overwrite = false"
        )
        .unwrap();

        let config = StashConfig::from_file(&path).unwrap();
        assert_eq!(config.root, PathBuf::from("/tank/files"));
        assert!(!config.force_overwrite);
        // omitted field takes the serde default
        assert_eq!(config.key_length, DEFAULT_KEY_LENGTH);
    }

    #[test]
    fn test_from_file_bad_toml() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("stash.toml");
        std::fs::write(&path, "not [valid toml").unwrap();

        let result = StashConfig::from_file(&path);
        assert!(matches!(result, Err(StashError::Corrupt(_))));
    }

    #[test]
    fn test_serde_roundtrip() {
        let config = StashConfig {
            root: PathBuf::from("/custom/files"),
            force_overwrite: false,
            key_length: 8,
        };
        let json = serde_json::to_string(&config).unwrap();
        let restored: StashConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config.root, restored.root);
        assert_eq!(config.force_overwrite, restored.force_overwrite);
        assert_eq!(config.key_length, restored.key_length);
    }
}
