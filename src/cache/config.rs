//! Cache configuration.
//!
//! A `CacheConfig` is a plain value: every request takes a snapshot from its
//! [`ConfigSource`] and hands it to the policy and the store explicitly.

use std::sync::RwLock;

use super::lock::{rw_read, rw_write};

/// Lifetime reported by `effective_ttl` when `cache_time` is absent.
pub const DEFAULT_TTL_SECS: u64 = 86_400;

const SOURCE: &str = "cache::config";

/// Path allow-list and expiry for the page cache.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CacheConfig {
    /// Substrings a request path must contain to be cached, in configured order.
    /// Empty means the cache has not been configured.
    pub allowed_prefixes: Vec<String>,
    /// Entry lifetime in seconds. `None` and `Some(0)` both disable caching.
    pub ttl_seconds: Option<u64>,
}

impl CacheConfig {
    pub fn new(allowed_prefixes: Vec<String>, ttl_seconds: Option<u64>) -> Self {
        Self {
            allowed_prefixes,
            ttl_seconds,
        }
    }

    /// Build a config from the operator-facing form: a comma separated allow-list.
    ///
    /// Both `,` and the full-width `，` separate entries. Segments are trimmed
    /// and blanks dropped, so `""` yields an unconfigured cache.
    pub fn from_allow_path(allow_path: &str, ttl_seconds: Option<u64>) -> Self {
        Self::new(split_allow_path(allow_path), ttl_seconds)
    }

    /// True once an allow-list has been supplied.
    pub fn is_configured(&self) -> bool {
        !self.allowed_prefixes.is_empty()
    }
}

pub(crate) fn split_allow_path(allow_path: &str) -> Vec<String> {
    allow_path
        .split([',', '，'])
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect()
}

/// Supplies the configuration in force for the current request.
pub trait ConfigSource: Send + Sync {
    fn current(&self) -> CacheConfig;
}

impl ConfigSource for CacheConfig {
    fn current(&self) -> CacheConfig {
        self.clone()
    }
}

/// Runtime-replaceable configuration shared across request workers.
#[derive(Debug, Default)]
pub struct SharedCacheConfig {
    inner: RwLock<CacheConfig>,
}

impl SharedCacheConfig {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            inner: RwLock::new(config),
        }
    }

    /// Install a new configuration; requests already in flight keep their snapshot.
    pub fn replace(&self, config: CacheConfig) {
        *rw_write(&self.inner, SOURCE, "replace") = config;
    }
}

impl ConfigSource for SharedCacheConfig {
    fn current(&self) -> CacheConfig {
        rw_read(&self.inner, SOURCE, "current").clone()
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{AssertUnwindSafe, catch_unwind};

    use super::*;

    #[test]
    fn default_is_unconfigured() {
        let config = CacheConfig::default();
        assert!(!config.is_configured());
        assert_eq!(config.ttl_seconds, None);
    }

    #[test]
    fn allow_path_accepts_both_comma_forms() {
        let config = CacheConfig::from_allow_path("/archives/，/category/, /tag/", Some(60));
        assert_eq!(
            config.allowed_prefixes,
            vec!["/archives/", "/category/", "/tag/"]
        );
    }

    #[test]
    fn blank_allow_path_is_unconfigured() {
        assert!(!CacheConfig::from_allow_path("", None).is_configured());
        assert!(!CacheConfig::from_allow_path(" , ，", None).is_configured());
    }

    #[test]
    fn shared_config_replace_is_visible_to_next_snapshot() {
        let shared = SharedCacheConfig::new(CacheConfig::default());
        let before = shared.current();

        shared.replace(CacheConfig::from_allow_path("/archives/", Some(10)));

        assert!(!before.is_configured());
        assert_eq!(shared.current().allowed_prefixes, vec!["/archives/"]);
    }

    #[test]
    fn shared_config_recovers_from_poisoned_lock() {
        let shared = SharedCacheConfig::new(CacheConfig::default());

        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _guard = shared.inner.write().expect("config lock should be acquired");
            panic!("poison config lock");
        }));

        shared.replace(CacheConfig::from_allow_path("/a/", None));
        assert!(shared.current().is_configured());
    }
}
