//! Execution of the administrative command with streamed output.
//!
//! An executor runs one command exactly once and pushes every stdout line onto a
//! bounded channel. After a clean exit it appends a synthesized
//! [`CommandStatus`] record. Dropping the sender when `execute` returns closes the
//! channel, which is the only end-of-stream signal a consumer gets.

use std::fmt;
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::ExecutionError;
use crate::metric::CommandStatus;

/// One item of command output.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputRecord {
    /// A line written to stdout, without its line terminator.
    Line(String),
    /// The execution summary, always the last record of a clean run.
    Status(CommandStatus),
}

/// Receiving end of an executor's output channel.
pub type OutputReceiver = mpsc::Receiver<OutputRecord>;

/// Runs a command once, feeding its output channel.
#[async_trait]
pub trait Executor: Send {
    /// Run to completion or until `cancel` fires.
    ///
    /// The output channel is closed when this returns, whatever the outcome.
    async fn execute(self: Box<Self>, cancel: CancellationToken) -> Result<(), ExecutionError>;
}

/// Creates a fresh executor and its output channel for every collection.
pub trait ExecutorFactory: fmt::Debug + Send + Sync {
    fn create(
        &self,
        command: &str,
        arguments: &[String],
        output_buffer: usize,
    ) -> (Box<dyn Executor>, OutputReceiver);
}

/// Factory for [`ProcessExecutor`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessExecutorFactory;

impl ExecutorFactory for ProcessExecutorFactory {
    fn create(
        &self,
        command: &str,
        arguments: &[String],
        output_buffer: usize,
    ) -> (Box<dyn Executor>, OutputReceiver) {
        let (executor, output) = ProcessExecutor::new(command, arguments.to_vec(), output_buffer);
        (Box::new(executor), output)
    }
}

/// Runs an external process without a shell.
///
/// Any stderr output is fatal. Cancellation kills the process and reaps it before
/// returning. On unix the process leads its own group and the whole group is
/// killed, so wrapper scripts cannot leave a forked child behind.
pub struct ProcessExecutor {
    command: String,
    arguments: Vec<String>,
    output: mpsc::Sender<OutputRecord>,
}

impl fmt::Debug for ProcessExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessExecutor")
            .field("command", &self.command)
            .field("arguments", &self.arguments)
            .field("output_capacity", &self.output.max_capacity())
            .finish()
    }
}

impl ProcessExecutor {
    /// Create an executor whose channel buffers up to `output_buffer` records.
    pub fn new(
        command: impl Into<String>,
        arguments: Vec<String>,
        output_buffer: usize,
    ) -> (Self, OutputReceiver) {
        let (output, receiver) = mpsc::channel(output_buffer.max(1));
        let executor = Self {
            command: command.into(),
            arguments,
            output,
        };
        (executor, receiver)
    }

    /// The executable and its arguments joined by single spaces.
    pub fn command_line(&self) -> String {
        std::iter::once(self.command.as_str())
            .chain(self.arguments.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Run the process to completion.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), ExecutionError> {
        let command_line = self.command_line();
        let started = Instant::now();

        let mut command = Command::new(&self.command);
        command
            .args(&self.arguments)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // own process group, so termination reaches forked helpers too
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command
            .spawn()
            .map_err(|source| ExecutionError::Spawn {
                command_line: command_line.clone(),
                source,
            })?;

        debug!(command = %command_line, pid = ?child.id(), "Command started");

        if let Err(e) = self.stream(&mut child, &command_line, &cancel).await {
            terminate(&mut child, &command_line).await;
            return Err(e);
        }

        let status = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                terminate(&mut child, &command_line).await;
                return Err(ExecutionError::Cancelled { command_line });
            }
            status = child.wait() => status.map_err(|source| ExecutionError::Wait {
                command_line: command_line.clone(),
                source,
            })?,
        };

        if !status.success() {
            return Err(ExecutionError::Exit {
                command_line,
                status,
            });
        }

        let runtime = started.elapsed();
        debug!(
            command = %command_line,
            elapsed_ms = runtime.as_millis() as u64,
            "Command finished"
        );

        let status = CommandStatus {
            command_executed: command_line.clone(),
            command_runtime: runtime.as_secs_f64(),
        };
        self.send(OutputRecord::Status(status), &command_line, &cancel)
            .await
    }

    /// Forward stdout lines until both stdout and stderr are closed.
    async fn stream(
        &self,
        child: &mut Child,
        command_line: &str,
        cancel: &CancellationToken,
    ) -> Result<(), ExecutionError> {
        let read_error = |source| ExecutionError::Read {
            command_line: command_line.to_string(),
            source,
        };

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            return Err(read_error(std::io::Error::other("output pipes not captured")));
        };

        let mut stdout = BufReader::new(stdout).lines();
        let mut stderr = BufReader::new(stderr).lines();
        let (mut stdout_open, mut stderr_open) = (true, true);
        let mut lines = 0usize;

        while stdout_open || stderr_open {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(ExecutionError::Cancelled {
                        command_line: command_line.to_string(),
                    });
                }
                line = stderr.next_line(), if stderr_open => match line.map_err(read_error)? {
                    Some(message) => {
                        return Err(ExecutionError::Stderr {
                            command_line: command_line.to_string(),
                            message,
                        });
                    }
                    None => stderr_open = false,
                },
                line = stdout.next_line(), if stdout_open => match line.map_err(read_error)? {
                    Some(line) => {
                        trace!(line = %line, "Command output");
                        self.send(OutputRecord::Line(line), command_line, cancel).await?;
                        lines += 1;
                    }
                    None => stdout_open = false,
                },
            }
        }

        debug!(command = %command_line, lines, "Command output drained");
        Ok(())
    }

    /// Push a record, giving up if cancelled while the channel is full.
    async fn send(
        &self,
        record: OutputRecord,
        command_line: &str,
        cancel: &CancellationToken,
    ) -> Result<(), ExecutionError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ExecutionError::Cancelled {
                command_line: command_line.to_string(),
            }),
            sent = self.output.send(record) => sent.map_err(|_| ExecutionError::ConsumerGone {
                command_line: command_line.to_string(),
            }),
        }
    }
}

#[async_trait]
impl Executor for ProcessExecutor {
    async fn execute(self: Box<Self>, cancel: CancellationToken) -> Result<(), ExecutionError> {
        (*self).run(cancel).await
    }
}

/// Kill the child and reap it.
async fn terminate(child: &mut Child, command_line: &str) {
    kill_group(child, command_line);
    if let Err(e) = child.start_kill() {
        // already exited
        debug!(command = %command_line, error = %e, "Kill skipped");
    }
    match child.wait().await {
        Ok(status) => debug!(command = %command_line, %status, "Command terminated"),
        Err(e) => warn!(command = %command_line, error = %e, "Failed to reap terminated command"),
    }
}

/// Send SIGKILL to the child's process group.
#[cfg(unix)]
fn kill_group(child: &Child, command_line: &str) {
    // no id once the child has been reaped
    let Some(pid) = child.id().and_then(|id| libc::pid_t::try_from(id).ok()) else {
        return;
    };

    // SAFETY: kill(2) has no memory-safety preconditions; a negative pid
    // addresses the group the child leads.
    if unsafe { libc::kill(-pid, libc::SIGKILL) } != 0 {
        let e = std::io::Error::last_os_error();
        debug!(command = %command_line, pgid = pid, error = %e, "Group kill skipped");
    }
}

#[cfg(not(unix))]
fn kill_group(_child: &Child, _command_line: &str) {}
