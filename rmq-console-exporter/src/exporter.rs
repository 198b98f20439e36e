//! Queue metric scraping and Prometheus text rendering.

use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use rmq_console_collector::{
    LABEL_COMMAND_EXECUTED, LABEL_ENTITY, LABEL_STATE, METRIC_COMMAND_RUNTIME, MetricSet,
    MetricsSource, SingleFlightGuard,
};
use tracing::{debug, error, warn};

const QUEUE_LABELS: &[&str] = &[LABEL_ENTITY, LABEL_STATE];
const STATUS_LABELS: &[&str] = &[LABEL_COMMAND_EXECUTED];

/// A metric the exporter knows how to expose.
#[derive(Debug)]
pub struct MetricDescriptor {
    pub name: &'static str,
    pub help: &'static str,
    pub labels: &'static [&'static str],
}

/// Every exported metric, in output order. Anything else is ignored.
pub const DESCRIPTORS: &[MetricDescriptor] = &[
    MetricDescriptor {
        name: "messages_ready",
        help: "Number of messages ready to be delivered to clients.",
        labels: QUEUE_LABELS,
    },
    MetricDescriptor {
        name: "message_bytes_ready",
        help: "Like message_bytes but counting only those messages ready to be delivered to clients.",
        labels: QUEUE_LABELS,
    },
    MetricDescriptor {
        name: "messages_unacknowledged",
        help: "Number of messages delivered to clients but not yet acknowledged.",
        labels: QUEUE_LABELS,
    },
    MetricDescriptor {
        name: "message_bytes_unacknowledged",
        help: "Like message_bytes but counting only those messages delivered to clients but not yet acknowledged.",
        labels: QUEUE_LABELS,
    },
    MetricDescriptor {
        name: "memory",
        help: "Bytes of memory allocated by the runtime for the queue, including stack, heap and internal structures.",
        labels: QUEUE_LABELS,
    },
    MetricDescriptor {
        name: "consumers",
        help: "Number of consumers.",
        labels: QUEUE_LABELS,
    },
    MetricDescriptor {
        name: "consumer_utilisation",
        help: "Fraction of the time (between 0.0 and 1.0) that the queue is able to immediately deliver messages to consumers. This can be less than 1.0 if consumers are limited by network congestion or prefetch count.",
        labels: QUEUE_LABELS,
    },
    MetricDescriptor {
        name: "head_message_timestamp",
        help: "Timestamp of the first message in the queue, if any.",
        labels: QUEUE_LABELS,
    },
    MetricDescriptor {
        name: METRIC_COMMAND_RUNTIME,
        help: "Runtime of the rabbitmqctl command in seconds.",
        labels: STATUS_LABELS,
    },
];

/// Label values of one series, in descriptor label order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SeriesKey {
    labels: Vec<(&'static str, String)>,
}

impl SeriesKey {
    /// Build the key of `descriptor` from a metric's labels; absent labels are empty.
    fn new(descriptor: &MetricDescriptor, set: &MetricSet) -> Self {
        let labels = descriptor
            .labels
            .iter()
            .map(|name| {
                let value = set
                    .get(descriptor.name)
                    .and_then(|m| m.label(name))
                    .unwrap_or_default();
                (*name, value.to_string())
            })
            .collect();
        Self { labels }
    }

    /// Format labels as Prometheus label string.
    pub fn format_labels(&self) -> String {
        if self.labels.is_empty() {
            return String::new();
        }

        let parts: Vec<String> = self
            .labels
            .iter()
            .map(|(k, v)| format!("{}=\"{}\"", k, escape_label_value(v)))
            .collect();

        format!("{{{}}}", parts.join(","))
    }
}

/// Outcome of one scrape.
#[derive(Debug)]
pub enum Scrape {
    /// Another scrape was running; nothing was collected.
    Skipped,
    /// Every source was run; failed sources contributed nothing.
    Collected {
        metric_sets: Vec<MetricSet>,
        failures: usize,
    },
}

impl Scrape {
    pub fn metric_sets(&self) -> &[MetricSet] {
        match self {
            Self::Skipped => &[],
            Self::Collected { metric_sets, .. } => metric_sets,
        }
    }
}

/// Exporter statistics.
#[derive(Debug, Clone, Default)]
pub struct ExporterStats {
    /// Scrapes that ran their sources.
    pub scrapes: u64,
    /// Scrapes refused because one was already running.
    pub skipped_scrapes: u64,
    /// Source collections that succeeded.
    pub collections_succeeded: u64,
    /// Source collections that failed.
    pub collections_failed: u64,
    /// Duration of the last completed scrape.
    pub last_scrape_secs: f64,
}

/// Runs metric sources on demand and renders their output for Prometheus.
pub struct QueueExporter {
    sources: Vec<Arc<dyn MetricsSource>>,
    prefix: String,
    guard: Arc<SingleFlightGuard>,
    stats: RwLock<ExporterStats>,
}

/// Thread-safe exporter handle.
pub type SharedExporter = Arc<QueueExporter>;

impl QueueExporter {
    /// Create an exporter over `sources`, sharing `guard` with any other user.
    pub fn new(
        sources: Vec<Arc<dyn MetricsSource>>,
        prefix: impl Into<String>,
        guard: Arc<SingleFlightGuard>,
    ) -> Self {
        Self {
            sources,
            prefix: prefix.into(),
            guard,
            stats: RwLock::new(ExporterStats::default()),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Get exporter statistics.
    pub fn stats(&self) -> ExporterStats {
        self.stats.read().clone()
    }

    /// Run every source once, unless a scrape is already in flight.
    pub async fn scrape(&self) -> Scrape {
        let Some(_permit) = self.guard.try_enter() else {
            warn!("Collection already in progress, skipping scrape");
            self.stats.write().skipped_scrapes += 1;
            return Scrape::Skipped;
        };

        let started = Instant::now();
        let mut metric_sets = Vec::new();
        let mut succeeded = 0u64;
        let mut failures = 0usize;

        for source in &self.sources {
            match source.collect().await {
                Ok(sets) => {
                    debug!(source = source.name(), metric_sets = sets.len(), "Source collected");
                    metric_sets.extend(sets);
                    succeeded += 1;
                }
                Err(e) => {
                    error!(source = source.name(), error = %e, "Metrics collection has failed");
                    failures += 1;
                }
            }
        }

        let mut stats = self.stats.write();
        stats.scrapes += 1;
        stats.collections_succeeded += succeeded;
        stats.collections_failed += failures as u64;
        stats.last_scrape_secs = started.elapsed().as_secs_f64();

        Scrape::Collected {
            metric_sets,
            failures,
        }
    }

    /// Render metric sets and exporter statistics in Prometheus text format.
    pub fn render(&self, metric_sets: &[MetricSet]) -> String {
        let mut output = String::new();

        for descriptor in DESCRIPTORS {
            let mut series: BTreeMap<SeriesKey, f64> = BTreeMap::new();
            for set in metric_sets {
                if let Some(value) = set.value(descriptor.name) {
                    // later sets overwrite duplicate series
                    series.insert(SeriesKey::new(descriptor, set), value);
                }
            }

            if series.is_empty() {
                continue;
            }

            let name = format!("{}{}", self.prefix, descriptor.name);
            writeln!(output, "# HELP {} {}", name, descriptor.help).ok();
            writeln!(output, "# TYPE {} gauge", name).ok();
            for (key, value) in &series {
                writeln!(output, "{}{} {}", name, key.format_labels(), format_value(*value)).ok();
            }
        }

        self.render_stats(&mut output);
        output
    }

    fn render_stats(&self, output: &mut String) {
        let stats = self.stats();
        let counters = [
            ("scrapes_total", "Scrapes that ran the collectors.", stats.scrapes),
            (
                "skipped_scrapes_total",
                "Scrapes skipped because a collection was already running.",
                stats.skipped_scrapes,
            ),
            (
                "collection_failures_total",
                "Collections that failed and contributed no metrics.",
                stats.collections_failed,
            ),
        ];

        for (suffix, help, value) in counters {
            let name = format!("{}exporter_{}", self.prefix, suffix);
            writeln!(output, "# HELP {} {}", name, help).ok();
            writeln!(output, "# TYPE {} counter", name).ok();
            writeln!(output, "{} {}", name, value).ok();
        }

        let name = format!("{}exporter_last_scrape_duration_seconds", self.prefix);
        writeln!(output, "# HELP {} Duration of the last completed scrape.", name).ok();
        writeln!(output, "# TYPE {} gauge", name).ok();
        writeln!(output, "{} {}", name, format_value(stats.last_scrape_secs)).ok();
    }
}

/// Escape a label value for Prometheus format.
fn escape_label_value(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '"' => result.push_str("\\\""),
            '\n' => result.push_str("\\n"),
            _ => result.push(c),
        }
    }
    result
}

/// Format a float value for Prometheus.
fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value.is_sign_positive() {
            "+Inf".to_string()
        } else {
            "-Inf".to_string()
        }
    } else if value.fract() == 0.0 {
        format!("{:.0}", value)
    } else {
        format!("{}", value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rmq_console_collector::{CollectError, CommandStatus, queue_labels};
    use std::time::Duration;

    fn queue_set(entity: &str, state: &str, memory: f64) -> MetricSet {
        let labels = queue_labels(entity, state);
        let mut builder = MetricSet::builder();
        builder
            .metric("memory", memory, labels.clone())
            .metric("consumers", 1.0, labels);
        builder.build()
    }

    fn exporter(sources: Vec<Arc<dyn MetricsSource>>) -> QueueExporter {
        QueueExporter::new(sources, "rmq_", Arc::new(SingleFlightGuard::new()))
    }

    struct Fixed(Vec<MetricSet>);

    #[async_trait]
    impl MetricsSource for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn collect(&self) -> Result<Vec<MetricSet>, CollectError> {
            Ok(self.0.clone())
        }
    }

    struct Broken;

    #[async_trait]
    impl MetricsSource for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        async fn collect(&self) -> Result<Vec<MetricSet>, CollectError> {
            Err(CollectError::Timeout {
                command: "rabbitmqctl".to_string(),
                arguments: vec!["list_queues".to_string()],
                timeout: Duration::from_millis(10),
            })
        }
    }

    #[test]
    fn test_render_queue_metrics() {
        let output = exporter(Vec::new()).render(&[queue_set("orders.dev", "running", 34764.0)]);

        assert!(output.contains("# HELP rmq_memory Bytes of memory allocated"));
        assert!(output.contains("# TYPE rmq_memory gauge"));
        assert!(output.contains("rmq_memory{entity=\"orders.dev\",state=\"running\"} 34764\n"));
        assert!(output.contains("rmq_consumers{entity=\"orders.dev\",state=\"running\"} 1\n"));
        // absent metrics get no header
        assert!(!output.contains("rmq_messages_ready"));
    }

    #[test]
    fn test_render_status_metric() {
        let status = CommandStatus {
            command_executed: "rabbitmqctl list_queues name".to_string(),
            command_runtime: 1.25,
        };
        let output = exporter(Vec::new()).render(&[status.to_metric_set()]);

        assert!(output.contains("# TYPE rmq_command_runtime gauge"));
        assert!(output.contains(
            "rmq_command_runtime{command_executed=\"rabbitmqctl list_queues name\"} 1.25\n"
        ));
    }

    #[test]
    fn test_render_ignores_unknown_metrics() {
        let mut builder = MetricSet::builder();
        builder.metric("durable", 1.0, queue_labels("q", "running"));
        let output = exporter(Vec::new()).render(&[builder.build()]);

        assert!(!output.contains("durable"));
    }

    #[test]
    fn test_render_missing_label_is_empty() {
        let mut builder = MetricSet::builder();
        builder.metric("memory", 5.0, Arc::new(Default::default()));
        let output = exporter(Vec::new()).render(&[builder.build()]);

        assert!(output.contains("rmq_memory{entity=\"\",state=\"\"} 5\n"));
    }

    #[test]
    fn test_render_duplicate_series_last_wins() {
        let output = exporter(Vec::new()).render(&[
            queue_set("q", "running", 1.0),
            queue_set("q", "running", 2.0),
        ]);

        assert!(output.contains("rmq_memory{entity=\"q\",state=\"running\"} 2\n"));
        assert_eq!(output.matches("rmq_memory{").count(), 1);
    }

    #[test]
    fn test_render_escapes_labels() {
        let output = exporter(Vec::new()).render(&[queue_set("we\"ird\\q", "running", 1.0)]);
        assert!(output.contains(r#"entity="we\"ird\\q""#));
    }

    #[test]
    fn test_render_prefix_verbatim() {
        let exporter = QueueExporter::new(Vec::new(), "rabbit", Arc::new(SingleFlightGuard::new()));
        let output = exporter.render(&[queue_set("q", "running", 1.0)]);

        assert!(output.contains("rabbitmemory{"));
        assert!(output.contains("rabbitexporter_scrapes_total 0"));
    }

    #[tokio::test]
    async fn test_scrape_collects_all_sources() {
        let exporter = exporter(vec![
            Arc::new(Fixed(vec![queue_set("a", "running", 1.0)])),
            Arc::new(Fixed(vec![queue_set("b", "idle", 2.0)])),
        ]);

        let scrape = exporter.scrape().await;

        assert_eq!(scrape.metric_sets().len(), 2);
        assert!(matches!(scrape, Scrape::Collected { failures: 0, .. }));
        assert_eq!(exporter.stats().scrapes, 1);
        assert_eq!(exporter.stats().collections_succeeded, 2);
    }

    #[tokio::test]
    async fn test_scrape_failing_source_does_not_block_others() {
        let exporter = exporter(vec![
            Arc::new(Broken),
            Arc::new(Fixed(vec![queue_set("a", "running", 1.0)])),
        ]);

        let scrape = exporter.scrape().await;

        assert!(matches!(scrape, Scrape::Collected { failures: 1, .. }));
        assert_eq!(scrape.metric_sets().len(), 1);

        let output = exporter.render(scrape.metric_sets());
        assert!(output.contains("rmq_exporter_collection_failures_total 1\n"));
    }

    #[tokio::test]
    async fn test_scrape_skipped_while_guard_held() {
        let guard = Arc::new(SingleFlightGuard::new());
        let exporter = QueueExporter::new(
            vec![Arc::new(Fixed(vec![queue_set("a", "running", 1.0)]))],
            "rmq_",
            guard.clone(),
        );

        let permit = guard.try_enter().unwrap();
        let scrape = exporter.scrape().await;
        assert!(matches!(scrape, Scrape::Skipped));
        assert!(scrape.metric_sets().is_empty());
        assert_eq!(exporter.stats().skipped_scrapes, 1);

        permit.exit();
        assert!(matches!(exporter.scrape().await, Scrape::Collected { .. }));
        assert!(!guard.is_running());
    }

    #[test]
    fn test_escape_label_value() {
        assert_eq!(escape_label_value("simple"), "simple");
        assert_eq!(escape_label_value("with\"quote"), "with\\\"quote");
        assert_eq!(escape_label_value("with\\backslash"), "with\\\\backslash");
        assert_eq!(escape_label_value("with\nnewline"), "with\\nnewline");
    }

    #[test]
    fn test_format_value() {
        assert_eq!(format_value(42.0), "42");
        assert_eq!(format_value(0.5), "0.5");
        assert_eq!(format_value(f64::NAN), "NaN");
        assert_eq!(format_value(f64::INFINITY), "+Inf");
        assert_eq!(format_value(f64::NEG_INFINITY), "-Inf");
    }
}
