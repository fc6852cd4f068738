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

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MetricKind {
    Counter,
    Gauge,
    Histogram,
}

struct MetricSpec {
    name: &'static str,
    kind: MetricKind,
    unit: Unit,
    help: &'static str,
}

const fn counter_spec(name: &'static str, help: &'static str) -> MetricSpec {
    MetricSpec {
        name,
        kind: MetricKind::Counter,
        unit: Unit::Count,
        help,
    }
}

/// Every metric the crate records. Labels are noted in the help text.
const METRICS: &[MetricSpec] = &[
    counter_spec("fanfeed_cache_hit_total", "Newsfeed list cache hits."),
    counter_spec("fanfeed_cache_miss_total", "Newsfeed list cache misses."),
    counter_spec(
        "fanfeed_cache_push_total",
        "Entries pushed into cached lists, by result (applied, cold).",
    ),
    counter_spec(
        "fanfeed_cache_error_total",
        "Cache backend failures, by op.",
    ),
    counter_spec(
        "fanfeed_feed_store_fallback_total",
        "Feed pages read from the newsfeed store, by reason.",
    ),
    counter_spec(
        "fanfeed_fanout_recipients_total",
        "Newsfeed recipients scheduled for fan-out.",
    ),
    counter_spec(
        "fanfeed_fanout_batches_total",
        "Fan-out batches dispatched, by mode (inline, queued).",
    ),
    MetricSpec {
        name: "fanfeed_fanout_batch_ms",
        kind: MetricKind::Histogram,
        unit: Unit::Milliseconds,
        help: "Time to persist and push one fan-out batch.",
    },
    MetricSpec {
        name: "fanfeed_event_queue_len",
        kind: MetricKind::Gauge,
        unit: Unit::Count,
        help: "Feed events waiting for the consumer.",
    },
    MetricSpec {
        name: "fanfeed_event_consume_ms",
        kind: MetricKind::Histogram,
        unit: Unit::Milliseconds,
        help: "Time to consume one drained batch of feed events.",
    },
];

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        for spec in METRICS {
            match spec.kind {
                MetricKind::Counter => describe_counter!(spec.name, spec.unit, spec.help),
                MetricKind::Gauge => describe_gauge!(spec.name, spec.unit, spec.help),
                MetricKind::Histogram => describe_histogram!(spec.name, spec.unit, spec.help),
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn metric_names_are_unique_and_prefixed() {
        let names: HashSet<_> = METRICS.iter().map(|spec| spec.name).collect();
        assert_eq!(names.len(), METRICS.len());
        assert!(names.iter().all(|name| name.starts_with("fanfeed_")));
    }

    #[test]
    fn units_follow_metric_suffixes() {
        for spec in METRICS {
            if spec.name.ends_with("_total") {
                assert_eq!(spec.kind, MetricKind::Counter, "{}", spec.name);
            }
            if spec.name.ends_with("_ms") {
                assert_eq!(spec.unit, Unit::Milliseconds, "{}", spec.name);
                assert_eq!(spec.kind, MetricKind::Histogram, "{}", spec.name);
            }
        }
    }
}
