//! Cacheability and freshness policy.
//!
//! Pure functions over a [`CacheConfig`] snapshot. The engine consults them
//! before generation (may we serve from disk?) and after it (may we store?).

use std::time::{Duration, SystemTime};

use super::config::{CacheConfig, DEFAULT_TTL_SECS};

/// Why a request skips the cache entirely: no read, no write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bypass {
    /// Logged-in callers always get freshly generated pages.
    Authenticated,
    /// No allow-list has been configured yet.
    NotConfigured,
    /// `cache_time` is zero or unset.
    Disabled,
    /// The path matches none of the allow-list entries.
    PathNotAllowed,
}

impl Bypass {
    pub fn as_str(self) -> &'static str {
        match self {
            Bypass::Authenticated => "authenticated",
            Bypass::NotConfigured => "not_configured",
            Bypass::Disabled => "disabled",
            Bypass::PathNotAllowed => "path_not_allowed",
        }
    }
}

/// Outcome of evaluating a request against the policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Bypass(Bypass),
    /// Consult the store, and on a miss capture and persist the generated page.
    Cache { ttl_seconds: u64 },
}

/// True iff `path` contains at least one allow-list entry as a substring.
///
/// An empty allow-list means the cache is unconfigured and nothing is cacheable.
pub fn is_cacheable(path: &str, config: &CacheConfig) -> bool {
    config
        .allowed_prefixes
        .iter()
        .any(|allowed| path.contains(allowed.as_str()))
}

/// Authenticated callers never read from or write to the store.
pub fn should_bypass_for_caller(is_authenticated: bool) -> bool {
    is_authenticated
}

/// Configured TTL, [`DEFAULT_TTL_SECS`] when unset.
///
/// This is the lifetime an entry would get; whether caching runs at all is
/// decided by [`evaluate`], which treats an unset TTL as disabled.
pub fn effective_ttl(config: &CacheConfig) -> u64 {
    config.ttl_seconds.unwrap_or(DEFAULT_TTL_SECS)
}

/// An entry last written at `last_written_at` is fresh iff `now - last_written_at < ttl`.
///
/// A modification time ahead of `now` (clock skew) counts as just written.
pub fn is_fresh(last_written_at: SystemTime, now: SystemTime, ttl_seconds: u64) -> bool {
    let age = now
        .duration_since(last_written_at)
        .unwrap_or(Duration::ZERO);
    age < Duration::from_secs(ttl_seconds)
}

/// Full pre-generation decision for one request.
///
/// The same decision gates the post-generation store, so a request that
/// bypasses the read also bypasses the write.
pub fn evaluate(path: &str, config: &CacheConfig, is_authenticated: bool) -> Decision {
    if should_bypass_for_caller(is_authenticated) {
        return Decision::Bypass(Bypass::Authenticated);
    }
    if !config.is_configured() {
        return Decision::Bypass(Bypass::NotConfigured);
    }
    let ttl_seconds = match config.ttl_seconds {
        None | Some(0) => return Decision::Bypass(Bypass::Disabled),
        Some(ttl_seconds) => ttl_seconds,
    };
    if !is_cacheable(path, config) {
        return Decision::Bypass(Bypass::PathNotAllowed);
    }
    Decision::Cache { ttl_seconds }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn archives(ttl: Option<u64>) -> CacheConfig {
        CacheConfig::new(vec!["/archives/".to_string()], ttl)
    }

    #[test]
    fn empty_allow_list_is_never_cacheable() {
        let config = CacheConfig::default();
        assert!(!is_cacheable("/archives/1.html", &config));
        assert!(!is_cacheable("", &config));
    }

    #[test]
    fn match_is_substring_not_prefix() {
        let config = archives(None);
        assert!(is_cacheable("/archives/1.html", &config));
        assert!(is_cacheable("/blog/archives/1.html", &config));
        assert!(!is_cacheable("/about/", &config));
        assert!(!is_cacheable("/archives", &config));
    }

    #[test]
    fn any_entry_matches_regardless_of_order() {
        let forward = CacheConfig::new(vec!["/a/".into(), "/b/".into()], None);
        let reverse = CacheConfig::new(vec!["/b/".into(), "/a/".into()], None);
        for path in ["/a/x", "/b/y", "/c/z"] {
            assert_eq!(is_cacheable(path, &forward), is_cacheable(path, &reverse));
        }
    }

    #[test]
    fn ttl_defaults_to_one_day() {
        assert_eq!(effective_ttl(&archives(None)), 86_400);
        assert_eq!(effective_ttl(&archives(Some(30))), 30);
        assert_eq!(effective_ttl(&archives(Some(0))), 0);
    }

    #[test]
    fn freshness_boundary() {
        let written = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000);
        let ttl = 60;
        assert!(is_fresh(written, written + Duration::from_secs(ttl - 1), ttl));
        assert!(!is_fresh(written, written + Duration::from_secs(ttl), ttl));
        assert!(!is_fresh(written, written + Duration::from_secs(ttl + 1), ttl));
    }

    #[test]
    fn future_mtime_counts_as_fresh() {
        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000);
        assert!(is_fresh(now + Duration::from_secs(5), now, 1));
    }

    #[test]
    fn authenticated_caller_bypasses_before_anything_else() {
        assert_eq!(
            evaluate("/archives/1.html", &archives(None), true),
            Decision::Bypass(Bypass::Authenticated)
        );
        assert_eq!(
            evaluate("/archives/1.html", &CacheConfig::default(), true),
            Decision::Bypass(Bypass::Authenticated)
        );
    }

    #[test]
    fn evaluate_reports_each_bypass_reason() {
        assert_eq!(
            evaluate("/archives/1.html", &CacheConfig::default(), false),
            Decision::Bypass(Bypass::NotConfigured)
        );
        assert_eq!(
            evaluate("/archives/1.html", &archives(Some(0)), false),
            Decision::Bypass(Bypass::Disabled)
        );
        assert_eq!(
            evaluate("/about/", &archives(Some(86_400)), false),
            Decision::Bypass(Bypass::PathNotAllowed)
        );
        assert_eq!(
            evaluate("/archives/1.html", &archives(Some(86_400)), false),
            Decision::Cache {
                ttl_seconds: 86_400
            }
        );
    }

    #[test]
    fn unset_ttl_disables_caching() {
        assert_eq!(
            evaluate("/archives/1.html", &archives(None), false),
            Decision::Bypass(Bypass::Disabled)
        );
        assert_eq!(effective_ttl(&archives(None)), DEFAULT_TTL_SECS);
    }
}
