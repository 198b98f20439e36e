//! Collection of queue metrics from one command run.
//!
//! Every [`Collector::collect`] call runs two tasks under a shared cancellation
//! token:
//!
//! ```text
//! ┌──────────────────┐  OutputRecord  ┌──────────────────┐
//! │ producer         │───────────────>│ consumer         │──> Vec<MetricSet>
//! │ (Executor)       │   (bounded)    │ (LineParser)     │
//! └──────────────────┘                └──────────────────┘
//! ```
//!
//! Either task failing cancels the other, and the deadline cancels both. The
//! result is all or nothing: the full metric list of a clean run, or one error.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{CollectError, ExecutionError, ParseError};
use crate::executor::{Executor, ExecutorFactory, OutputReceiver, OutputRecord, ProcessExecutorFactory};
use crate::filter::FilterHandle;
use crate::metric::MetricSet;
use crate::parser::LineParser;

/// Anything that can produce a batch of metric sets on demand.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Run one collection.
    async fn collect(&self) -> Result<Vec<MetricSet>, CollectError>;
}

/// Runs the parser's command and turns its output into metric sets.
#[derive(Debug, Clone)]
pub struct Collector {
    parser: Arc<dyn LineParser>,
    filter: FilterHandle,
    executors: Arc<dyn ExecutorFactory>,
    timeout: Duration,
    output_buffer: usize,
    shutdown: CancellationToken,
}

/// How the consumer task ended.
enum Consumed {
    Finished(Vec<MetricSet>),
    Aborted(ParseError),
    Cancelled,
}

impl Collector {
    /// Create a collector spawning real processes.
    pub fn new(
        parser: Arc<dyn LineParser>,
        filter: FilterHandle,
        timeout: Duration,
        output_buffer: usize,
    ) -> Self {
        Self {
            parser,
            filter,
            executors: Arc::new(ProcessExecutorFactory),
            timeout,
            output_buffer,
            shutdown: CancellationToken::new(),
        }
    }

    /// Abort in-flight and future collections once `shutdown` is cancelled.
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Replace the executor factory.
    pub fn with_executor_factory(mut self, executors: impl ExecutorFactory + 'static) -> Self {
        self.executors = Arc::new(executors);
        self
    }

    pub fn parser(&self) -> &Arc<dyn LineParser> {
        &self.parser
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn output_buffer(&self) -> usize {
        self.output_buffer
    }

    /// Run one collection under the collector's own shutdown token.
    pub async fn collect(&self) -> Result<Vec<MetricSet>, CollectError> {
        self.collect_until(&self.shutdown).await
    }

    /// Run one collection, giving up early if `shutdown` is cancelled.
    pub async fn collect_until(
        &self,
        shutdown: &CancellationToken,
    ) -> Result<Vec<MetricSet>, CollectError> {
        let command = self.parser.command().to_string();
        let arguments = self.parser.arguments().to_vec();
        let command_line = format!("{} {}", command, arguments.join(" "));
        if shutdown.is_cancelled() {
            debug!(command = %command_line, "Shutting down, collection not started");
            return Err(CollectError::Cancelled { command_line });
        }

        let (executor, output) = self
            .executors
            .create(&command, &arguments, self.output_buffer);

        let cancel = shutdown.child_token();
        // Kills the process if this future is dropped mid-collection.
        let _abandon = cancel.clone().drop_guard();

        info!(command = %command_line, "Starting collection of queue metrics");
        let started = Instant::now();

        let producer = tokio::spawn(produce(executor, cancel.clone()));
        let consumer = tokio::spawn(consume(
            self.parser.clone(),
            self.filter.clone(),
            output,
            cancel.clone(),
        ));

        let mut joined = Box::pin(async move { tokio::join!(producer, consumer) });
        let (produced, consumed) = match tokio::time::timeout(self.timeout, &mut joined).await {
            Ok(results) => results,
            Err(_) => {
                cancel.cancel();
                // wait for the process to be reaped before reporting
                let _ = joined.await;
                warn!(
                    command = %command_line,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Collection timed out"
                );
                return Err(CollectError::Timeout {
                    command,
                    arguments,
                    timeout: self.timeout,
                });
            }
        };

        let metrics = settle(produced?, consumed?, command_line.clone())?;

        info!(
            command = %command_line,
            metric_sets = metrics.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Collection finished"
        );
        Ok(metrics)
    }
}

#[async_trait]
impl MetricsSource for Collector {
    fn name(&self) -> &str {
        self.parser.command()
    }

    async fn collect(&self) -> Result<Vec<MetricSet>, CollectError> {
        Collector::collect(self).await
    }
}

/// Producer task: run the executor, cancelling the consumer on failure.
async fn produce(
    executor: Box<dyn Executor>,
    cancel: CancellationToken,
) -> Result<(), ExecutionError> {
    debug!("Starting command executor");
    let result = executor.execute(cancel.clone()).await;

    if let Err(e) = &result
        && !e.is_cancelled()
    {
        error!(error = %e, "Error while executing command");
        cancel.cancel();
    }

    debug!("Command executor stopped");
    result
}

/// Consumer task: parse records until the channel closes or the token fires.
async fn consume(
    parser: Arc<dyn LineParser>,
    filter: FilterHandle,
    mut output: OutputReceiver,
    cancel: CancellationToken,
) -> Consumed {
    debug!("Starting line listener");
    let mut metrics = Vec::new();
    let mut skipped = 0usize;

    loop {
        let record = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Line listener cancelled");
                return Consumed::Cancelled;
            }
            record = output.recv() => record,
        };

        let Some(record) = record else {
            debug!(metric_sets = metrics.len(), skipped, "Command output finished");
            return Consumed::Finished(metrics);
        };

        match parser.parse_record(&record, &filter.snapshot()) {
            Ok(Some(set)) => metrics.push(set),
            Ok(None) => {}
            Err(e) if e.is_skip() => {
                skipped += 1;
                if let OutputRecord::Line(line) = &record {
                    debug!(line = %line, error = %e, "Skipping line");
                }
            }
            Err(e) => {
                error!(error = %e, "Parser aborted the collection");
                cancel.cancel();
                return Consumed::Aborted(e);
            }
        }
    }
}

/// Combine both task outcomes into the collection result.
///
/// An aborting parse error or a genuine producer failure wins over the
/// cancellation it caused in the sibling task.
fn settle(
    produced: Result<(), ExecutionError>,
    consumed: Consumed,
    command_line: String,
) -> Result<Vec<MetricSet>, CollectError> {
    match (produced, consumed) {
        (_, Consumed::Aborted(e)) => Err(e.into()),
        (Err(e), _) if !e.is_cancelled() => Err(e.into()),
        (Ok(()), Consumed::Finished(metrics)) => Ok(metrics),
        _ => Err(CollectError::Cancelled { command_line }),
    }
}
