//! Per-request capture and replay.
//!
//! ```text
//! START -> authenticated / not cacheable -> BYPASS (generate; no read, no write)
//! START -> cacheable, anonymous -> LOOKUP -> Hit  -> serve cached bytes, skip generation
//!                                         -> Miss -> CAPTURE generated output -> STORE
//! ```
//!
//! [`PageCache::prepare`] and [`PageCache::finish`] are the before/after
//! generation hook points; [`PageCache::serve`] wires them around a generator.

use std::{future::Future, time::Instant};

use bytes::Bytes;
use metrics::{counter, histogram};
use tracing::{debug, warn};

use super::{
    advisory::Advisory,
    config::CacheConfig,
    keys::CacheKey,
    policy::{self, Bypass, Decision},
    store::{CacheResult, DiskStore, MissReason},
};

const TARGET: &str = "tphtml_cache::cache::engine";

pub(crate) const METRIC_HIT_TOTAL: &str = "tphtml_cache_hit_total";
pub(crate) const METRIC_MISS_TOTAL: &str = "tphtml_cache_miss_total";
pub(crate) const METRIC_STALE_TOTAL: &str = "tphtml_cache_stale_total";
pub(crate) const METRIC_BYPASS_TOTAL: &str = "tphtml_cache_bypass_total";
pub(crate) const METRIC_STORE_TOTAL: &str = "tphtml_cache_store_total";
pub(crate) const METRIC_STORE_ERROR_TOTAL: &str = "tphtml_cache_store_error_total";
pub(crate) const METRIC_LOOKUP_MS: &str = "tphtml_cache_lookup_ms";

/// Output of one generation run.
#[derive(Debug, Clone)]
pub struct Generated {
    pub body: Bytes,
    /// Whether generation completed in a state worth persisting.
    pub cacheable: bool,
}

impl Generated {
    pub fn complete(body: impl Into<Bytes>) -> Self {
        Self {
            body: body.into(),
            cacheable: true,
        }
    }

    /// Output that must be delivered but never stored (error pages, partial renders).
    pub fn uncacheable(body: impl Into<Bytes>) -> Self {
        Self {
            body: body.into(),
            cacheable: false,
        }
    }
}

/// Pending write for a request that missed.
#[derive(Debug, Clone)]
pub struct CaptureTicket {
    key: CacheKey,
    miss: MissReason,
}

impl CaptureTicket {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn miss(&self) -> MissReason {
        self.miss
    }
}

/// Result of the before-generation hook.
#[derive(Debug, Clone)]
pub enum Prepared {
    Bypass(Bypass),
    Hit(Bytes),
    Capture(CaptureTicket),
}

/// Where a served body came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServeSource {
    Cache,
    Bypassed(Bypass),
    Generated { stored: bool },
}

#[derive(Debug, Clone)]
pub struct Served {
    pub body: Bytes,
    pub source: ServeSource,
}

/// Decision engine bound to one on-disk store.
#[derive(Debug, Clone)]
pub struct PageCache {
    store: DiskStore,
}

impl PageCache {
    pub fn new(store: DiskStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &DiskStore {
        &self.store
    }

    /// Before-generation hook: bypass, serve from disk, or arm a capture.
    pub async fn prepare(&self, uri: &str, config: &CacheConfig, authenticated: bool) -> Prepared {
        let ttl_seconds = match policy::evaluate(uri, config, authenticated) {
            Decision::Bypass(reason) => {
                counter!(METRIC_BYPASS_TOTAL, "reason" => reason.as_str()).increment(1);
                debug!(target: TARGET, op = "prepare", result = "bypass", reason = reason.as_str(), uri);
                return Prepared::Bypass(reason);
            }
            Decision::Cache { ttl_seconds } => ttl_seconds,
        };

        let key = CacheKey::from_uri(uri);
        let started_at = Instant::now();
        let store = self.store.clone();
        let lookup_key = key.clone();
        let result = tokio::task::spawn_blocking(move || store.lookup(&lookup_key, ttl_seconds))
            .await
            .unwrap_or_else(|err| {
                warn!(
                    target: TARGET,
                    op = "prepare",
                    result = "lookup_join_error",
                    cache_key = %key,
                    error = %err,
                    "Cache lookup task failed; treating as miss"
                );
                CacheResult::Miss(MissReason::Unreadable)
            });
        histogram!(METRIC_LOOKUP_MS).record(started_at.elapsed().as_secs_f64() * 1000.0);

        match result {
            CacheResult::Hit(body) => {
                counter!(METRIC_HIT_TOTAL).increment(1);
                debug!(target: TARGET, op = "prepare", result = "hit", cache_key = %key, uri);
                Prepared::Hit(body)
            }
            CacheResult::Miss(miss) => {
                if miss == MissReason::Stale {
                    counter!(METRIC_STALE_TOTAL).increment(1);
                }
                counter!(METRIC_MISS_TOTAL).increment(1);
                debug!(target: TARGET, op = "prepare", result = "miss", ?miss, cache_key = %key, uri);
                Prepared::Capture(CaptureTicket { key, miss })
            }
        }
    }

    /// After-generation hook: persist a completed capture.
    ///
    /// Returns whether the page was written. Failures are logged and absorbed.
    pub async fn finish(&self, ticket: CaptureTicket, generated: &Generated) -> bool {
        if !generated.cacheable {
            debug!(target: TARGET, op = "finish", result = "skipped", cache_key = %ticket.key);
            return false;
        }

        let store = self.store.clone();
        let body = generated.body.clone();
        let key = ticket.key;
        let write_key = key.clone();
        let outcome = tokio::task::spawn_blocking(move || store.store(&write_key, &body)).await;

        match outcome {
            Ok(Ok(_)) => {
                counter!(METRIC_STORE_TOTAL).increment(1);
                true
            }
            Ok(Err(err)) => {
                counter!(METRIC_STORE_ERROR_TOTAL).increment(1);
                warn!(
                    target: TARGET,
                    op = "finish",
                    result = "store_error",
                    cache_key = %key,
                    error = %err,
                    "Failed to persist cache entry; serving generated page uncached"
                );
                false
            }
            Err(err) => {
                counter!(METRIC_STORE_ERROR_TOTAL).increment(1);
                warn!(
                    target: TARGET,
                    op = "finish",
                    result = "store_join_error",
                    cache_key = %key,
                    error = %err,
                    "Cache store task failed"
                );
                false
            }
        }
    }

    /// Run `generate` under the cache: replay a fresh entry, or capture and store its output.
    ///
    /// Generation errors propagate untouched and nothing is written for them.
    pub async fn serve<F, Fut, E>(
        &self,
        uri: &str,
        config: &CacheConfig,
        authenticated: bool,
        generate: F,
    ) -> Result<Served, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Generated, E>>,
    {
        match self.prepare(uri, config, authenticated).await {
            Prepared::Hit(body) => Ok(Served {
                body,
                source: ServeSource::Cache,
            }),
            Prepared::Bypass(reason) => {
                let generated = generate().await?;
                Ok(Served {
                    body: generated.body,
                    source: ServeSource::Bypassed(reason),
                })
            }
            Prepared::Capture(ticket) => {
                let generated = generate().await?;
                let stored = self.finish(ticket, &generated).await;
                Ok(Served {
                    body: generated.body,
                    source: ServeSource::Generated { stored },
                })
            }
        }
    }

    /// Notices owed to an authenticated viewer about the cache's own state.
    ///
    /// Probes the filesystem; call off the async executor.
    pub fn advisories(
        &self,
        config: &CacheConfig,
        authenticated: bool,
        settings_url: Option<&str>,
    ) -> Vec<Advisory> {
        if !authenticated {
            return Vec::new();
        }
        let mut advisories = Vec::new();
        if !self.store.is_writable() {
            advisories.push(Advisory::StoreUnwritable);
        }
        if !config.is_configured() {
            advisories.push(Advisory::NotConfigured {
                settings_url: settings_url.map(str::to_string),
            });
        }
        advisories
    }
}
