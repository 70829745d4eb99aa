//! Worker subprocess spawning.

use crate::error::{ArticleError, Result};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tracing::Instrument;

/// How a worker process is launched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    /// Program to execute.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<String>,
    /// Extra environment variables.
    pub env: Vec<(String, String)>,
    /// How long `stop()` waits after SIGTERM before sending SIGKILL.
    pub stop_timeout: Duration,
}

impl Default for WorkerCommand {
    fn default() -> Self {
        Self::new("node").arg("ProcessArticle.js")
    }
}

impl WorkerCommand {
    /// Create a command for `program` with no arguments.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            stop_timeout: Duration::from_secs(5),
        }
    }

    /// Append an argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set an environment variable for the worker.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Set the graceful stop window.
    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// Parse a whitespace separated command line (`node ProcessArticle.js`).
    pub fn parse(command_line: &str) -> Option<Self> {
        let mut parts = command_line.split_whitespace();
        let program = parts.next()?;
        Some(Self::new(program).args(parts))
    }
}

/// Spawn a worker subprocess with piped stdio.
///
/// stdin/stdout carry the protocol. stderr is drained into the log by a
/// background task so the worker never blocks on a full stderr pipe.
///
/// Must be called from within a Tokio runtime.
pub fn spawn_worker(command: &WorkerCommand, worker_id: usize) -> Result<Child> {
    let mut cmd = Command::new(&command.program);
    cmd.args(&command.args)
        .envs(command.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|source| ArticleError::Spawn {
        program: command.program.clone(),
        source,
    })?;

    if let Some(stderr) = child.stderr.take() {
        let pid = child.id().unwrap_or_default();
        let span = tracing::debug_span!("worker_stderr", worker_id, pid);
        tokio::spawn(drain_stderr(stderr).instrument(span));
    }

    Ok(child)
}

async fn drain_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::debug!(target: "article_pool::worker::stderr", "{}", line);
    }
}
