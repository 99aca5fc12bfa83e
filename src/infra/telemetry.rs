use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

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

/// Register metric descriptions with the installed recorder. Runs once.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "contentgate_cache_hit_total",
            Unit::Count,
            "Total number of reads served from the response cache."
        );
        describe_counter!(
            "contentgate_cache_miss_total",
            Unit::Count,
            "Total number of reads that computed and stored a payload."
        );
        describe_counter!(
            "contentgate_cache_bypass_total",
            Unit::Count,
            "Total number of reads that skipped the cache because caching was off."
        );
        describe_counter!(
            "contentgate_cache_evict_total",
            Unit::Count,
            "Total number of cache entries evicted due to capacity."
        );
        describe_counter!(
            "contentgate_cache_invalidated_total",
            Unit::Count,
            "Total number of cache entries removed by invalidation."
        );
        describe_gauge!(
            "contentgate_cache_entries",
            Unit::Count,
            "Current number of stored cache entries."
        );
        describe_histogram!(
            "contentgate_cache_compute_ms",
            Unit::Milliseconds,
            "Latency of cache fills in milliseconds."
        );
        describe_histogram!(
            "contentgate_cache_invalidate_ms",
            Unit::Milliseconds,
            "Latency of applying one invalidation event in milliseconds."
        );
        describe_counter!(
            "contentgate_rate_limit_allowed_total",
            Unit::Count,
            "Total number of comment writes admitted by the limiter."
        );
        describe_counter!(
            "contentgate_rate_limit_rejected_total",
            Unit::Count,
            "Total number of comment writes rejected, labelled by gate."
        );
    });
}
