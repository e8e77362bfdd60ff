use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::{
    cache::{
        METRIC_BYPASS_TOTAL, METRIC_HIT_TOTAL, METRIC_LOOKUP_MS, METRIC_MISS_TOTAL,
        METRIC_STALE_TOTAL, METRIC_STORE_ERROR_TOTAL, METRIC_STORE_TOTAL,
    },
    config::{LogFormat, LoggingSettings},
};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            METRIC_HIT_TOTAL,
            Unit::Count,
            "Total number of requests served from a fresh cache entry."
        );
        describe_counter!(
            METRIC_MISS_TOTAL,
            Unit::Count,
            "Total number of cacheable requests that had to be generated."
        );
        describe_counter!(
            METRIC_STALE_TOTAL,
            Unit::Count,
            "Total number of misses caused by an expired entry."
        );
        describe_counter!(
            METRIC_BYPASS_TOTAL,
            Unit::Count,
            "Total number of requests that skipped the cache, labelled by reason."
        );
        describe_counter!(
            METRIC_STORE_TOTAL,
            Unit::Count,
            "Total number of pages written to the cache."
        );
        describe_counter!(
            METRIC_STORE_ERROR_TOTAL,
            Unit::Count,
            "Total number of failed cache writes."
        );
        describe_histogram!(
            METRIC_LOOKUP_MS,
            Unit::Milliseconds,
            "Cache lookup latency in milliseconds."
        );
    });
}
