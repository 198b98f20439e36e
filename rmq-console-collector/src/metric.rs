//! Metric containers produced by the parsers.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Label carrying the queue name.
pub const LABEL_ENTITY: &str = "entity";
/// Label carrying the queue state.
pub const LABEL_STATE: &str = "state";
/// Label carrying the exact command line of a status record.
pub const LABEL_COMMAND_EXECUTED: &str = "command_executed";

/// Metric name of the synthesized status record.
pub const METRIC_COMMAND_RUNTIME: &str = "command_runtime";

/// Label pairs attached to a metric.
pub type Labels = BTreeMap<String, String>;

/// A single metric value with its labels.
///
/// Labels are shared between every metric parsed from the same record and can not
/// be changed once attached.
#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    value: f64,
    labels: Arc<Labels>,
}

impl Metric {
    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn labels(&self) -> &Labels {
        &self.labels
    }

    /// Look up a single label value.
    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels.get(name).map(String::as_str)
    }
}

/// Metrics parsed from one output record, keyed by metric name.
///
/// A `MetricSet` is read-only once built; use [`MetricSetBuilder`] to create one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricSet {
    metrics: BTreeMap<String, Metric>,
}

impl MetricSet {
    pub fn builder() -> MetricSetBuilder {
        MetricSetBuilder::default()
    }

    pub fn get(&self, name: &str) -> Option<&Metric> {
        self.metrics.get(name)
    }

    /// Value of the named metric, if present.
    pub fn value(&self, name: &str) -> Option<f64> {
        self.get(name).map(Metric::value)
    }

    /// Labels of the named metric, if present.
    pub fn labels(&self, name: &str) -> Option<&Labels> {
        self.get(name).map(Metric::labels)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.metrics.contains_key(name)
    }

    /// Iterate over `(name, metric)` pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Metric)> {
        self.metrics.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}

/// Builder for [`MetricSet`].
#[derive(Debug, Default)]
pub struct MetricSetBuilder {
    metrics: BTreeMap<String, Metric>,
}

impl MetricSetBuilder {
    /// Add a metric. A later metric with the same name replaces the earlier one.
    pub fn metric(&mut self, name: impl Into<String>, value: f64, labels: Arc<Labels>) -> &mut Self {
        self.metrics.insert(name.into(), Metric { value, labels });
        self
    }

    pub fn build(self) -> MetricSet {
        MetricSet {
            metrics: self.metrics,
        }
    }
}

/// Build the `{entity, state}` label set shared by all queue metrics.
pub fn queue_labels(entity: &str, state: &str) -> Arc<Labels> {
    let mut labels = Labels::new();
    labels.insert(LABEL_ENTITY.to_string(), entity.to_string());
    labels.insert(LABEL_STATE.to_string(), state.to_string());
    Arc::new(labels)
}

/// Execution summary of the administrative command.
///
/// Synthesized by the executor after a clean exit and delivered as the final
/// output record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandStatus {
    /// The executable followed by its arguments, separated by single spaces.
    pub command_executed: String,
    /// Wall-clock runtime in seconds.
    pub command_runtime: f64,
}

impl CommandStatus {
    /// Turn the status into its single `command_runtime` metric.
    pub fn to_metric_set(&self) -> MetricSet {
        let mut labels = Labels::new();
        labels.insert(
            LABEL_COMMAND_EXECUTED.to_string(),
            self.command_executed.clone(),
        );

        let mut builder = MetricSet::builder();
        builder.metric(METRIC_COMMAND_RUNTIME, self.command_runtime, Arc::new(labels));
        builder.build()
    }
}
