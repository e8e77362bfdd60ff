//! Filesystem-backed page store.
//!
//! Layout: `<root>/<first two hex chars of key>/<key>.html`. Freshness comes
//! from the entry's modification time; the trailing marker comment is
//! informational only and is served back as part of the cached bytes.

use std::{
    fs,
    io::{self, ErrorKind, Write},
    path::{Path, PathBuf},
    sync::Arc,
    time::SystemTime,
};

use bytes::Bytes;
use tempfile::NamedTempFile;
use thiserror::Error;
use time::{OffsetDateTime, format_description::BorrowedFormatItem, macros::format_description};
use tracing::{debug, warn};

use super::keys::CacheKey;
use super::policy::is_fresh;

const TARGET: &str = "tphtml_cache::cache::store";

/// Prefix of the marker comment appended to every stored page.
pub const MARKER_PREFIX: &str = "<!--TpHtmlCache ";
const MARKER_SUFFIX: &str = "-->";
const MARKER_TIME_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour repr:12]:[minute]:[second]");

#[cfg(unix)]
const SHARD_DIR_MODE: u32 = 0o770;
#[cfg(unix)]
const ENTRY_FILE_MODE: u32 = 0o660;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to create shard directory `{}`: {source}", .path.display())]
    CreateShard {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write cache entry in `{}`: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to move cache entry into place at `{}`: {source}", .path.display())]
    Persist {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Why a lookup did not produce a servable page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissReason {
    /// No entry file exists for the key.
    Absent,
    /// The entry exists but its TTL has elapsed. It stays on disk until overwritten.
    Stale,
    /// The entry could not be read; treated as absent.
    Unreadable,
}

/// Result of a store lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheResult {
    /// Fresh entry, returned verbatim including its marker comment.
    Hit(Bytes),
    Miss(MissReason),
}

impl CacheResult {
    pub fn is_hit(&self) -> bool {
        matches!(self, CacheResult::Hit(_))
    }
}

/// Sharded on-disk store rooted at a single directory.
///
/// Cloning is cheap; every clone addresses the same tree.
#[derive(Debug, Clone)]
pub struct DiskStore {
    root: Arc<PathBuf>,
}

impl DiskStore {
    /// Address a store at `root`. Nothing is created until the first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Arc::new(root.into()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn entry_path(&self, key: &CacheKey) -> PathBuf {
        key.entry_path(&self.root)
    }

    /// Look up `key` against the system clock.
    pub fn lookup(&self, key: &CacheKey, ttl_seconds: u64) -> CacheResult {
        self.lookup_at(key, ttl_seconds, SystemTime::now())
    }

    /// Look up `key`, judging freshness as of `now`.
    ///
    /// Never fails: an entry that cannot be inspected or read is a miss.
    pub fn lookup_at(&self, key: &CacheKey, ttl_seconds: u64, now: SystemTime) -> CacheResult {
        let path = self.entry_path(key);

        let modified = match fs::metadata(&path).and_then(|meta| meta.modified()) {
            Ok(modified) => modified,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return CacheResult::Miss(MissReason::Absent);
            }
            Err(err) => {
                warn!(
                    target: TARGET,
                    op = "lookup",
                    result = "metadata_error",
                    cache_key = %key,
                    path = %path.display(),
                    error = %err,
                    "Failed to inspect cache entry; treating as miss"
                );
                return CacheResult::Miss(MissReason::Unreadable);
            }
        };

        if !is_fresh(modified, now, ttl_seconds) {
            debug!(target: TARGET, op = "lookup", result = "stale", cache_key = %key);
            return CacheResult::Miss(MissReason::Stale);
        }

        match fs::read(&path) {
            Ok(body) => CacheResult::Hit(Bytes::from(body)),
            Err(err) if err.kind() == ErrorKind::NotFound => CacheResult::Miss(MissReason::Absent),
            Err(err) => {
                warn!(
                    target: TARGET,
                    op = "lookup",
                    result = "read_error",
                    cache_key = %key,
                    path = %path.display(),
                    error = %err,
                    "Failed to read cache entry; treating as miss"
                );
                CacheResult::Miss(MissReason::Unreadable)
            }
        }
    }

    /// Persist `body` under `key`, stamping the marker with the current time.
    pub fn store(&self, key: &CacheKey, body: &[u8]) -> Result<PathBuf, StoreError> {
        self.store_at(key, body, OffsetDateTime::now_utc())
    }

    /// Persist `body` under `key` with a marker stamped `written_at`.
    ///
    /// The page is written to a temporary file in the shard directory and
    /// renamed over the entry, so readers see either the previous page or the
    /// new one in full. Concurrent writers race; the last rename wins.
    pub fn store_at(
        &self,
        key: &CacheKey,
        body: &[u8],
        written_at: OffsetDateTime,
    ) -> Result<PathBuf, StoreError> {
        let shard_dir = key.shard_dir(&self.root);
        ensure_shard_dir(&shard_dir).map_err(|source| StoreError::CreateShard {
            path: shard_dir.clone(),
            source,
        })?;

        let entry_path = self.entry_path(key);
        let marker = marker_comment(written_at);

        let write_err = |source| StoreError::Write {
            path: shard_dir.clone(),
            source,
        };
        let mut file = tempfile::Builder::new()
            .prefix(".")
            .suffix(".tmp")
            .tempfile_in(&shard_dir)
            .map_err(write_err)?;
        write_entry(&mut file, body, &marker).map_err(write_err)?;

        file.persist(&entry_path)
            .map_err(|err| StoreError::Persist {
                path: entry_path.clone(),
                source: err.error,
            })?;

        debug!(
            target: TARGET,
            op = "store",
            result = "written",
            cache_key = %key,
            bytes = body.len() + marker.len(),
        );
        Ok(entry_path)
    }

    /// Whether new entries can currently be created under the root.
    pub fn is_writable(&self) -> bool {
        tempfile::tempfile_in(self.root.as_path()).is_ok()
    }
}

fn ensure_shard_dir(path: &Path) -> io::Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(SHARD_DIR_MODE);
    }
    builder.create(path)
}

fn write_entry(file: &mut NamedTempFile, body: &[u8], marker: &str) -> io::Result<()> {
    file.write_all(body)?;
    file.write_all(marker.as_bytes())?;
    file.flush()?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.as_file()
            .set_permissions(fs::Permissions::from_mode(ENTRY_FILE_MODE))?;
    }
    Ok(())
}

/// `<!--TpHtmlCache YYYY-MM-DD hh:mm:ss-->` with a 12-hour clock.
pub fn marker_comment(written_at: OffsetDateTime) -> String {
    let stamp = written_at
        .format(MARKER_TIME_FORMAT)
        .unwrap_or_else(|_| written_at.unix_timestamp().to_string());
    format!("{MARKER_PREFIX}{stamp}{MARKER_SUFFIX}")
}
