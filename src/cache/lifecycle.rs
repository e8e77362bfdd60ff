//! Cache root setup and teardown.
//!
//! Administrative operations: unlike per-request cache errors, failures here
//! propagate to the caller.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::info;
use walkdir::WalkDir;

/// Placeholder written at the root so the directory is never listed.
pub const SENTINEL_FILE: &str = "index.html";
pub const SENTINEL_BODY: &str = "Error 403";

#[cfg(unix)]
const ROOT_DIR_MODE: u32 = 0o775;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("cache directory `{}` could not be prepared: {source}", .path.display())]
    Setup {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cache directory `{}` could not be removed: {source}", .path.display())]
    Teardown {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl LifecycleError {
    fn setup(path: &Path, source: io::Error) -> Self {
        Self::Setup {
            path: path.to_path_buf(),
            source,
        }
    }

    fn teardown(path: &Path, source: io::Error) -> Self {
        Self::Teardown {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Create the cache root (or fix its mode when it exists) and write the sentinel.
pub fn initialize(root: &Path) -> Result<(), LifecycleError> {
    fs::create_dir_all(root).map_err(|err| LifecycleError::setup(root, err))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(root, fs::Permissions::from_mode(ROOT_DIR_MODE))
            .map_err(|err| LifecycleError::setup(root, err))?;
    }

    let sentinel = root.join(SENTINEL_FILE);
    fs::write(&sentinel, SENTINEL_BODY).map_err(|err| LifecycleError::setup(&sentinel, err))?;

    info!(
        target: "tphtml_cache::cache::lifecycle",
        op = "initialize",
        root = %root.display(),
        "Cache directory ready"
    );
    Ok(())
}

/// Remove the cache root and everything below it.
///
/// Entries are removed children-first; the first failure aborts the walk and
/// names the offending path. A root that does not exist is already torn down.
pub fn teardown(root: &Path) -> Result<(), LifecycleError> {
    if !root.exists() {
        return Ok(());
    }

    let mut removed_files = 0usize;
    for entry in WalkDir::new(root).contents_first(true) {
        let entry = entry.map_err(|err| {
            let path = err.path().unwrap_or(root).to_path_buf();
            LifecycleError::teardown(&path, io::Error::other(err))
        })?;
        let path = entry.path();
        if entry.file_type().is_dir() {
            fs::remove_dir(path).map_err(|err| LifecycleError::teardown(path, err))?;
        } else {
            fs::remove_file(path).map_err(|err| LifecycleError::teardown(path, err))?;
            removed_files += 1;
        }
    }

    info!(
        target: "tphtml_cache::cache::lifecycle",
        op = "teardown",
        root = %root.display(),
        removed_files,
        "Cache directory removed"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::cache::{CacheKey, DiskStore};

    #[test]
    fn initialize_writes_sentinel() {
        let dir = TempDir::new().expect("temp dir");
        let root = dir.path().join("cache");

        initialize(&root).expect("initialized");

        let sentinel = fs::read_to_string(root.join(SENTINEL_FILE)).expect("sentinel");
        assert_eq!(sentinel, "Error 403");
    }

    #[test]
    fn initialize_is_repeatable() {
        let dir = TempDir::new().expect("temp dir");
        let root = dir.path().join("cache");

        initialize(&root).expect("first");
        initialize(&root).expect("second");
        assert!(root.join(SENTINEL_FILE).is_file());
    }

    #[cfg(unix)]
    #[test]
    fn initialize_sets_group_writable_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().expect("temp dir");
        let root = dir.path().join("cache");
        initialize(&root).expect("initialized");

        let mode = fs::metadata(&root).expect("metadata").permissions().mode();
        assert_eq!(mode & 0o777, 0o775);
    }

    #[test]
    fn initialize_fails_loudly_when_root_is_a_file() {
        let dir = TempDir::new().expect("temp dir");
        let root = dir.path().join("cache");
        fs::write(&root, b"occupied").expect("write file");

        let err = initialize(&root).expect_err("setup must fail");
        assert!(matches!(err, LifecycleError::Setup { .. }));
    }

    #[test]
    fn teardown_removes_sharded_tree() {
        let dir = TempDir::new().expect("temp dir");
        let root = dir.path().join("cache");
        initialize(&root).expect("initialized");

        let store = DiskStore::new(&root);
        for uri in ["/archives/1.html", "/archives/2.html", "/archives/3.html"] {
            store.store(&CacheKey::from_uri(uri), b"page").expect("stored");
        }

        teardown(&root).expect("teardown");
        assert!(!root.exists());
    }

    #[test]
    fn teardown_of_missing_root_is_ok() {
        let dir = TempDir::new().expect("temp dir");
        teardown(&dir.path().join("never-created")).expect("nothing to remove");
    }
}
