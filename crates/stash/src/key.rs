//! Key generation and validation.
//!
//! A key is both the metadata primary key and the file name under the
//! content root. The reserved prefix `.` protects internal artifacts (the
//! index file lives at `.index.json`), and path separators are rejected
//! because the key is used verbatim as a relative path.

use rand::Rng;

/// Leading character that client-supplied keys may not use.
pub const RESERVED_PREFIX: char = '.';

/// Default length of generated keys.
pub const DEFAULT_KEY_LENGTH: usize = 5;

const KEY_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Whether `key` may be used as a client-visible key.
pub fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && !key.starts_with(RESERVED_PREFIX)
        && !key.contains('/')
        && !key.contains('\\')
}

/// Resolves client-provided keys, minting short random tokens when needed.
#[derive(Debug, Clone)]
pub struct KeyGenerator {
    length: usize,
}

impl KeyGenerator {
    pub fn new(length: usize) -> Self {
        Self { length }
    }

    /// Resolve a provided key.
    ///
    /// A non-empty valid key is returned unchanged; anything else yields a
    /// fresh random token. There is no uniqueness check against existing
    /// keys: a collision falls out as an overwrite or `AlreadyExists`
    /// depending on the configured policy.
    pub fn generate(&self, provided: Option<&str>) -> String {
        match provided {
            Some(key) if is_valid_key(key) => key.to_string(),
            _ => self.random_key(),
        }
    }

    fn random_key(&self) -> String {
        let mut rng = rand::thread_rng();
        (0..self.length)
            .map(|_| KEY_ALPHABET[rng.gen_range(0..KEY_ALPHABET.len())] as char)
            .collect()
    }
}

impl Default for KeyGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_KEY_LENGTH)
    }
}
