//! Tracing subscriber and metric descriptions.

use std::io;
use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Where log lines go. Client commands keep stdout for their JSON output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutput {
    Stdout,
    Stderr,
}

/// Install the global subscriber: env filter seeded from `logging.level`,
/// span-error capture, and a compact or JSON formatter.
pub fn init(logging: &LoggingSettings, output: LogOutput) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match (logging.format, output) {
        (LogFormat::Json, LogOutput::Stdout) => json_layer().boxed(),
        (LogFormat::Json, LogOutput::Stderr) => json_layer().with_writer(io::stderr).boxed(),
        (LogFormat::Compact, LogOutput::Stdout) => {
            fmt::layer().compact().with_target(true).boxed()
        }
        (LogFormat::Compact, LogOutput::Stderr) => fmt::layer()
            .compact()
            .with_target(false)
            .with_writer(io::stderr)
            .boxed(),
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

fn json_layer<S>() -> fmt::Layer<S, fmt::format::JsonFields, fmt::format::Format<fmt::format::Json>>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_target(true)
}

/// Registers metric descriptions with the installed recorder, once per process.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "pictura_cache_hit_total",
            Unit::Count,
            "Total number of query-store lookups that found a value."
        );
        describe_counter!(
            "pictura_cache_miss_total",
            Unit::Count,
            "Total number of query-store lookups that found nothing usable."
        );
        describe_counter!(
            "pictura_cache_evict_total",
            Unit::Count,
            "Total number of query-store evictions due to capacity."
        );
        describe_counter!(
            "pictura_listing_overlay_merged_total",
            Unit::Count,
            "Total number of recent uploads folded into a first listing page."
        );
        describe_counter!(
            "pictura_mutation_rollback_total",
            Unit::Count,
            "Total number of optimistic listing edits rolled back after a failed mutation."
        );
        describe_counter!(
            "pictura_compression_variant_failed_total",
            Unit::Count,
            "Total number of WebP or AVIF encodes that failed and were dropped."
        );
        describe_histogram!(
            "pictura_compression_ms",
            Unit::Milliseconds,
            "Compression pipeline latency in milliseconds."
        );
    });
}
