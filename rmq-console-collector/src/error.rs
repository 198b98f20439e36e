//! Error types for the collection pipeline.

use std::process::ExitStatus;
use std::time::Duration;

use thiserror::Error;

/// How a failed parse affects the collection it happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// The record is noise; skip it and keep collecting.
    Skip,
    /// The whole batch is unusable; abort the collection.
    Abort,
}

/// Why a single record could not be turned into metrics.
#[derive(Debug, Error)]
pub enum ParseFailure {
    #[error("line does not match the tabular queue schema")]
    SchemaMismatch,

    #[error("malformed JSON record: {0}")]
    MalformedJson(#[from] serde_json::Error),

    #[error("unknown JSON record: neither a queue nor a status record")]
    UnknownRecord,

    #[error("{0}")]
    Other(String),
}

/// A classified parse error.
///
/// The [`ParseErrorKind`] travels alongside the failure so the collector never has
/// to inspect concrete error types to decide whether to keep going.
#[derive(Debug, Error)]
#[error("{failure}")]
pub struct ParseError {
    kind: ParseErrorKind,
    #[source]
    failure: ParseFailure,
}

impl ParseError {
    /// Create an error that only skips the offending record.
    pub fn skip(failure: impl Into<ParseFailure>) -> Self {
        Self {
            kind: ParseErrorKind::Skip,
            failure: failure.into(),
        }
    }

    /// Create an error that aborts the whole collection.
    pub fn abort(failure: impl Into<ParseFailure>) -> Self {
        Self {
            kind: ParseErrorKind::Abort,
            failure: failure.into(),
        }
    }

    pub fn kind(&self) -> ParseErrorKind {
        self.kind
    }

    pub fn is_skip(&self) -> bool {
        self.kind == ParseErrorKind::Skip
    }

    pub fn failure(&self) -> &ParseFailure {
        &self.failure
    }
}

/// Errors raised while running the administrative command.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("failed to start `{command_line}`: {source}")]
    Spawn {
        command_line: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command_line}` wrote to stderr: {message}")]
    Stderr {
        command_line: String,
        message: String,
    },

    #[error("failed to read output of `{command_line}`: {source}")]
    Read {
        command_line: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed waiting for `{command_line}`: {source}")]
    Wait {
        command_line: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command_line}` exited with {status}")]
    Exit {
        command_line: String,
        status: ExitStatus,
    },

    #[error("execution of `{command_line}` was cancelled")]
    Cancelled { command_line: String },

    #[error("output of `{command_line}` has no consumer left")]
    ConsumerGone { command_line: String },
}

impl ExecutionError {
    /// Whether this error is only the echo of a cancellation requested elsewhere.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// The single error a failed collection reports.
#[derive(Debug, Error)]
pub enum CollectError {
    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error("parser aborted the collection: {0}")]
    Parse(#[from] ParseError),

    #[error("executor timeout after {timeout:?} while running [{command} {arguments:?}]")]
    Timeout {
        command: String,
        arguments: Vec<String>,
        timeout: Duration,
    },

    #[error("collection of `{command_line}` was cancelled")]
    Cancelled { command_line: String },

    #[error("collection task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Errors raised while compiling filter rules.
#[derive(Debug, Error)]
#[error("invalid filter rule '{pattern}': {source}")]
pub struct FilterError {
    pub pattern: String,
    #[source]
    pub source: regex::Error,
}
