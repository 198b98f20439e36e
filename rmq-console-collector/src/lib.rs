//! Queue metric collection from `rabbitmqctl` output.
//!
//! This crate runs the RabbitMQ administrative command, streams its output and
//! parses it into typed metrics:
//!
//! - [`metric`] - `MetricSet`, the result of parsing one output record
//! - [`filter`] - Queue name rules and the hot-swappable `FilterHandle`
//! - [`parser`] - Tabular and JSON `LineParser` variants
//! - [`executor`] - Process execution with streamed, cancellable output
//! - [`collector`] - One collection cycle: producer, consumer, deadline
//! - [`guard`] - Single-flight guard against overlapping collections
//! - [`error`] - Error types
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use rmq_console_collector::{Collector, Filter, FilterHandle, ParserKind};
//!
//! let collector = Collector::new(
//!     ParserKind::Json.build("rabbitmqctl"),
//!     FilterHandle::new(Filter::new(&[r"^.*\.dev$"])?),
//!     Duration::from_secs(600),
//!     100_000,
//! );
//! let metric_sets = collector.collect().await?;
//! ```

pub mod collector;
pub mod error;
pub mod executor;
pub mod filter;
pub mod guard;
pub mod metric;
pub mod parser;

// Re-export commonly used types at the crate root
pub use collector::{Collector, MetricsSource};
pub use error::{CollectError, ExecutionError, FilterError, ParseError, ParseErrorKind, ParseFailure};
pub use executor::{
    Executor, ExecutorFactory, OutputReceiver, OutputRecord, ProcessExecutor,
    ProcessExecutorFactory,
};
pub use filter::{Filter, FilterHandle};
pub use guard::{FlightPermit, SingleFlightGuard};
pub use metric::{
    CommandStatus, LABEL_COMMAND_EXECUTED, LABEL_ENTITY, LABEL_STATE, Labels,
    METRIC_COMMAND_RUNTIME, Metric, MetricSet, MetricSetBuilder, queue_labels,
};
pub use parser::{
    DEFAULT_COMMAND, JsonQueueParser, LineParser, ParserKind, QUEUE_METRICS, TabularQueueParser,
};
pub use tokio_util::sync::CancellationToken;
