//! Parser for `rabbitmqctl list_queues --formatter json` output.
//!
//! The formatter streams a JSON array with one object per line:
//!
//! ```text
//! [
//! {"name":"q1","state":"running","messages_ready":0,...}
//! ,{"name":"q2","state":"running","messages_ready":3,...}
//! ]
//! ```
//!
//! Each line is decoded on its own after stripping the array separators.

use serde_json::{Map, Value};

use crate::error::{ParseError, ParseFailure};
use crate::filter::Filter;
use crate::metric::{CommandStatus, LABEL_COMMAND_EXECUTED, METRIC_COMMAND_RUNTIME, MetricSet, queue_labels};
use crate::parser::{DEFAULT_COMMAND, LineParser, QUEUE_KEYS, queue_columns};

/// Parses one JSON object per line into queue or status metrics.
#[derive(Debug, Clone)]
pub struct JsonQueueParser {
    command: String,
    arguments: Vec<String>,
}

impl JsonQueueParser {
    pub fn new() -> Self {
        Self::with_command(DEFAULT_COMMAND)
    }

    pub fn with_command(command: impl Into<String>) -> Self {
        let arguments = ["list_queues", "--formatter", "json"]
            .into_iter()
            .map(str::to_string)
            .chain(queue_columns())
            .collect();

        Self {
            command: command.into(),
            arguments,
        }
    }

    fn parse_queue(
        &self,
        record: &Map<String, Value>,
        filter: &Filter,
    ) -> Result<Option<MetricSet>, ParseError> {
        let (Some(queue), Some(state)) = (
            record.get("name").and_then(Value::as_str),
            record.get("state").and_then(Value::as_str),
        ) else {
            return Err(ParseError::skip(ParseFailure::UnknownRecord));
        };

        if !filter.accepts(queue) {
            return Ok(None);
        }

        let labels = queue_labels(queue, state);
        let mut builder = MetricSet::builder();
        for (name, value) in record {
            if QUEUE_KEYS.contains(&name.as_str()) {
                continue;
            }
            // blank fields come through as "", which is not a number
            if let Some(value) = value.as_f64() {
                builder.metric(name.as_str(), value, labels.clone());
            }
        }

        Ok(Some(builder.build()))
    }
}

impl Default for JsonQueueParser {
    fn default() -> Self {
        Self::new()
    }
}

fn is_queue_record(record: &Map<String, Value>) -> bool {
    record.contains_key("name") && record.contains_key("state")
}

fn is_status_record(record: &Map<String, Value>) -> bool {
    record.contains_key(METRIC_COMMAND_RUNTIME) && record.contains_key(LABEL_COMMAND_EXECUTED)
}

/// Strip surrounding whitespace and at most one separator comma on each side.
fn strip_separators(line: &str) -> &str {
    let line = line.trim();
    let line = line.strip_prefix(',').unwrap_or(line);
    line.strip_suffix(',').unwrap_or(line)
}

impl LineParser for JsonQueueParser {
    fn command(&self) -> &str {
        &self.command
    }

    fn arguments(&self) -> &[String] {
        &self.arguments
    }

    fn parse(&self, line: &str, filter: &Filter) -> Result<Option<MetricSet>, ParseError> {
        let record: Map<String, Value> =
            serde_json::from_str(strip_separators(line)).map_err(ParseError::skip)?;

        if is_queue_record(&record) {
            return self.parse_queue(&record, filter);
        }

        if is_status_record(&record) {
            let status: CommandStatus = serde_json::from_value(Value::Object(record))
                .map_err(|_| ParseError::skip(ParseFailure::UnknownRecord))?;
            return Ok(Some(self.parse_status(&status)));
        }

        Err(ParseError::skip(ParseFailure::UnknownRecord))
    }
}
