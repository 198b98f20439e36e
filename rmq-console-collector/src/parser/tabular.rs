//! Parser for the default `list_queues` table.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{ParseError, ParseFailure};
use crate::filter::Filter;
use crate::metric::{MetricSet, queue_labels};
use crate::parser::{DEFAULT_COMMAND, LineParser, QUEUE_METRICS, queue_columns};

// Columns are split by one tab or a run of spaces. A single tab keeps blank
// columns in place: rabbitmqctl leaves consumer_utilisation and
// head_message_timestamp empty for idle queues. The two trailing fields are
// taken as whole tokens and converted afterwards.
static QUEUE_ROW_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"^(?P<name>[^\t]*[^\t ])",
        r"(?:\t| +)(?P<state>[[:alpha:]]+)",
        r"(?:\t| +)(?P<messages_ready>[[:digit:]]+)",
        r"(?:\t| +)(?P<message_bytes_ready>[[:digit:]]+)",
        r"(?:\t| +)(?P<messages_unacknowledged>[[:digit:]]+)",
        r"(?:\t| +)(?P<message_bytes_unacknowledged>[[:digit:]]+)",
        r"(?:\t| +)(?P<memory>[[:digit:]]+)",
        r"(?:\t| +)(?P<consumers>[[:digit:]]+)",
        r"(?:(?:\t| +)(?P<consumer_utilisation>[^\t ]*))?",
        r"(?:(?:\t| +)(?P<head_message_timestamp>[^\t ]*))?$",
    ))
    .unwrap()
});

/// Parses `rabbitmqctl list_queues name state ...` tabular output.
///
/// Lines that do not look like a queue row (banners, the header line) are
/// reported as skippable errors.
#[derive(Debug, Clone)]
pub struct TabularQueueParser {
    command: String,
    arguments: Vec<String>,
}

impl TabularQueueParser {
    pub fn new() -> Self {
        Self::with_command(DEFAULT_COMMAND)
    }

    pub fn with_command(command: impl Into<String>) -> Self {
        let arguments = std::iter::once("list_queues".to_string())
            .chain(queue_columns())
            .collect();

        Self {
            command: command.into(),
            arguments,
        }
    }
}

impl Default for TabularQueueParser {
    fn default() -> Self {
        Self::new()
    }
}

impl LineParser for TabularQueueParser {
    fn command(&self) -> &str {
        &self.command
    }

    fn arguments(&self) -> &[String] {
        &self.arguments
    }

    fn parse(&self, line: &str, filter: &Filter) -> Result<Option<MetricSet>, ParseError> {
        let caps = QUEUE_ROW_REGEX
            .captures(line.trim_end())
            .ok_or_else(|| ParseError::skip(ParseFailure::SchemaMismatch))?;

        let (queue, state) = (&caps["name"], &caps["state"]);
        if !filter.accepts(queue) {
            return Ok(None);
        }

        let labels = queue_labels(queue, state);
        let mut builder = MetricSet::builder();
        for name in QUEUE_METRICS {
            let Some(value) = caps.name(name).and_then(|m| m.as_str().parse::<f64>().ok())
            else {
                continue;
            };
            builder.metric(name, value, labels.clone());
        }

        Ok(Some(builder.build()))
    }
}
