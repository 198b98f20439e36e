//! Parsers turning `rabbitmqctl list_queues` output into [`MetricSet`]s.
//!
//! Two variants exist, selected by configuration through [`ParserKind`]:
//!
//! - [`TabularQueueParser`] reads the default tab-separated table.
//! - [`JsonQueueParser`] reads the `--formatter json` array, one object per line.
//!
//! Both declare the command and arguments they expect to be fed with.

mod json;
mod tabular;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::ParseError;
use crate::executor::OutputRecord;
use crate::filter::Filter;
use crate::metric::MetricSet;

pub use json::JsonQueueParser;
pub use tabular::TabularQueueParser;

/// Executable invoked when none is configured.
pub const DEFAULT_COMMAND: &str = "rabbitmqctl";

/// Queue metrics requested from `rabbitmqctl`, in column order.
///
/// Every name here is also the metric name it is exported under.
pub const QUEUE_METRICS: [&str; 8] = [
    "messages_ready",
    "message_bytes_ready",
    "messages_unacknowledged",
    "message_bytes_unacknowledged",
    "memory",
    "consumers",
    "consumer_utilisation",
    "head_message_timestamp",
];

/// Identity columns preceding the metrics.
pub(crate) const QUEUE_KEYS: [&str; 2] = ["name", "state"];

/// The `name state <metrics...>` column list passed to `list_queues`.
pub(crate) fn queue_columns() -> impl Iterator<Item = String> {
    QUEUE_KEYS
        .iter()
        .chain(QUEUE_METRICS.iter())
        .map(|c| c.to_string())
}

/// A parser for one record of command output.
pub trait LineParser: fmt::Debug + Send + Sync {
    /// The executable to run.
    fn command(&self) -> &str;

    /// The argument vector to run it with.
    fn arguments(&self) -> &[String];

    /// Parse one output line.
    ///
    /// Returns `Ok(None)` when the line describes a queue the filter rejects.
    fn parse(&self, line: &str, filter: &Filter) -> Result<Option<MetricSet>, ParseError>;

    /// Turn the synthesized status record into metrics.
    fn parse_status(&self, status: &crate::metric::CommandStatus) -> MetricSet {
        status.to_metric_set()
    }

    /// Dispatch an output record to [`LineParser::parse`] or
    /// [`LineParser::parse_status`].
    fn parse_record(
        &self,
        record: &OutputRecord,
        filter: &Filter,
    ) -> Result<Option<MetricSet>, ParseError> {
        match record {
            OutputRecord::Line(line) => self.parse(line, filter),
            OutputRecord::Status(status) => Ok(Some(self.parse_status(status))),
        }
    }
}

/// Which parser variant to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParserKind {
    #[default]
    Json,
    Tabular,
}

impl ParserKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Tabular => "tabular",
        }
    }

    /// Build the parser for this variant, running `command`.
    pub fn build(self, command: impl Into<String>) -> Arc<dyn LineParser> {
        match self {
            Self::Json => Arc::new(JsonQueueParser::with_command(command)),
            Self::Tabular => Arc::new(TabularQueueParser::with_command(command)),
        }
    }
}

impl fmt::Display for ParserKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ParserKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "tabular" => Ok(Self::Tabular),
            other => Err(format!(
                "unknown queue parser '{}', expected 'json' or 'tabular'",
                other
            )),
        }
    }
}
