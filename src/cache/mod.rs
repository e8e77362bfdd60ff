//! Page cache.
//!
//! Rendered pages for anonymous visitors are persisted on disk, keyed by the
//! MD5 of the request URI, and replayed until their modification time is
//! older than the configured TTL.
//!
//! - [`policy`] decides whether a request may use the cache at all.
//! - [`DiskStore`] maps keys to files under `<root>/<xx>/<key>.html`.
//! - [`PageCache`] runs the lookup / capture / store sequence for one request.
//! - [`page_cache_layer`] applies it to an axum router.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! root = "cache"
//! allow_path = "/archives/,/category/"
//! cache_time = 86400
//! ```

mod advisory;
mod auth;
mod config;
mod engine;
mod keys;
pub mod lifecycle;
mod lock;
mod middleware;
pub mod policy;
mod store;

pub use advisory::Advisory;
pub use auth::{Anonymous, CallerAuth, SessionCookieAuth};
pub use config::{CacheConfig, ConfigSource, DEFAULT_TTL_SECS, SharedCacheConfig};
pub use engine::{CaptureTicket, Generated, PageCache, Prepared, ServeSource, Served};
pub use keys::{CacheKey, ENTRY_EXTENSION};
pub use lifecycle::LifecycleError;
pub use middleware::{CACHE_STATUS_HEADER, CacheState, DEFAULT_MAX_BODY_BYTES, page_cache_layer};
pub use policy::{Bypass, Decision, effective_ttl, is_cacheable, should_bypass_for_caller};
pub use store::{CacheResult, DiskStore, MARKER_PREFIX, MissReason, StoreError, marker_comment};

pub(crate) use engine::{
    METRIC_BYPASS_TOTAL, METRIC_HIT_TOTAL, METRIC_LOOKUP_MS, METRIC_MISS_TOTAL,
    METRIC_STALE_TOTAL, METRIC_STORE_ERROR_TOTAL, METRIC_STORE_TOTAL,
};
