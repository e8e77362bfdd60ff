//! Cache key derivation.
//!
//! A key is the MD5 digest of the raw request URI (path plus query string),
//! rendered as 32 lowercase hex characters. Its first two characters name the
//! shard directory, giving 256 shards under the cache root.

use std::fmt;
use std::path::{Path, PathBuf};

const KEY_LEN: usize = 32;
const SHARD_LEN: usize = 2;

/// Extension of every cache entry file.
pub const ENTRY_EXTENSION: &str = "html";

/// Identity of a cached page.
///
/// Only ever holds 32 lowercase hex characters, so paths built from it cannot
/// escape the cache root whatever the request URI contained.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive the key for a raw request URI. The URI is hashed verbatim.
    pub fn from_uri(uri: &str) -> Self {
        Self(format!("{:x}", md5::compute(uri.as_bytes())))
    }

    /// Accept an already-derived key, rejecting anything that is not 32 lowercase hex characters.
    pub fn parse(value: &str) -> Option<Self> {
        let valid = value.len() == KEY_LEN
            && value
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        valid.then(|| Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Shard directory name: the first two hex characters.
    pub fn shard(&self) -> &str {
        &self.0[..SHARD_LEN]
    }

    /// `<root>/<shard>`
    pub fn shard_dir(&self, root: &Path) -> PathBuf {
        root.join(self.shard())
    }

    /// `<root>/<shard>/<key>.html`
    pub fn entry_path(&self, root: &Path) -> PathBuf {
        self.shard_dir(root)
            .join(format!("{}.{ENTRY_EXTENSION}", self.0))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
