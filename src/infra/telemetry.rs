use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::cache::metric_names::*;
use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;
use super::http::{METRIC_ADMISSION_REJECTED, METRIC_RESPONSES};

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
            METRIC_LOCAL_HIT,
            Unit::Count,
            "Local tier lookups answered with a fresh page."
        );
        describe_counter!(
            METRIC_LOCAL_STALE,
            Unit::Count,
            "Local tier lookups answered with a stale page."
        );
        describe_counter!(
            METRIC_LOCAL_MISS,
            Unit::Count,
            "Local tier lookups that found nothing servable."
        );
        describe_counter!(
            METRIC_LOCAL_EVICT,
            Unit::Count,
            "Local tier evictions due to capacity."
        );
        describe_counter!(
            METRIC_REMOTE_HIT,
            Unit::Count,
            "Remote store lookups that produced a page."
        );
        describe_counter!(
            METRIC_REMOTE_MISS,
            Unit::Count,
            "Remote store lookups for absent keys."
        );
        describe_counter!(
            METRIC_REMOTE_ERROR,
            Unit::Count,
            "Remote store lookups that failed or returned undecodable values."
        );
        describe_counter!(
            METRIC_ORIGIN_FETCH,
            Unit::Count,
            "Requests forwarded to the origin."
        );
        describe_counter!(
            METRIC_ORIGIN_ERROR,
            Unit::Count,
            "Origin requests that failed."
        );
        describe_histogram!(
            METRIC_ORIGIN_MS,
            Unit::Milliseconds,
            "Origin fetch latency in milliseconds."
        );
        describe_counter!(
            METRIC_REFRESH_SPAWNED,
            Unit::Count,
            "Background refreshes started for stale pages."
        );
        describe_counter!(
            METRIC_REFRESH_SKIPPED,
            Unit::Count,
            "Stale hits that found a refresh already running."
        );
        describe_counter!(
            METRIC_REFRESH_FAILED,
            Unit::Count,
            "Background refreshes that did not replace the stale page."
        );
        describe_counter!(
            METRIC_ADMISSION_REJECTED,
            Unit::Count,
            "Requests rejected by admission control."
        );
        describe_counter!(
            METRIC_RESPONSES,
            Unit::Count,
            "Proxied responses by cache status."
        );
    });
}
