//! Handle to one worker subprocess.
//!
//! Wraps a child process with its line channels and runs a single
//! request/response exchange at a time.

use super::ipc::{LineReader, LineWriter};
use super::protocol::{Document, ExtractRequest, parse_response};
use super::signals::{TerminationReason, analyze_exit_status};
use super::spawn::{WorkerCommand, spawn_worker};
use crate::error::{ArticleError, Result};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::io;
use std::process::ExitStatus;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tracing::{debug, instrument, warn};

/// Lifecycle of a worker handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Unstarted,
    Running,
    Stopped,
    /// An exchange failed; the process may still be alive and must be stopped.
    Failed,
}

/// Pid of a child that has not been reaped yet.
///
/// Shared with the pool so a checked-out worker can be signalled from
/// outside its handle. The pid is cleared under the same lock that reaps the
/// child, so a signal sent through here never reaches a recycled pid.
#[derive(Debug, Clone, Default)]
pub(crate) struct LivePid(Arc<Mutex<Option<u32>>>);

impl LivePid {
    fn lock(&self) -> MutexGuard<'_, Option<u32>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set(&self, pid: Option<u32>) {
        *self.lock() = pid;
    }

    fn clear(&self) {
        self.set(None);
    }

    pub(crate) fn get(&self) -> Option<u32> {
        *self.lock()
    }

    /// Send `sig` if the process is still ours. Returns whether it was sent.
    pub(crate) fn signal(&self, sig: Signal) -> bool {
        let guard = self.lock();
        match *guard {
            Some(pid) => signal::kill(Pid::from_raw(pid as i32), sig).is_ok(),
            None => false,
        }
    }

    fn try_reap(&self, child: &mut Child) -> io::Result<Option<ExitStatus>> {
        let mut guard = self.lock();
        let status = child.try_wait()?;
        if status.is_some() {
            *guard = None;
        }
        Ok(status)
    }
}

struct Process {
    child: Child,
    pid: Option<u32>,
    writer: LineWriter<ChildStdin>,
    reader: LineReader<ChildStdout>,
}

/// Owns one worker process and its stdin/stdout.
///
/// The handle itself does not guard against concurrent use; exclusivity
/// comes from the pool's checkout.
pub struct WorkerHandle {
    id: usize,
    generation: usize,
    command: WorkerCommand,
    state: WorkerState,
    process: Option<Process>,
    live: LivePid,
    exchanges: usize,
}

impl WorkerHandle {
    /// Create an unstarted handle.
    ///
    /// `generation` is the number of restarts the owning slot had gone
    /// through when this handle was created.
    pub fn new(id: usize, generation: usize, command: WorkerCommand) -> Self {
        Self {
            id,
            generation,
            command,
            state: WorkerState::Unstarted,
            process: None,
            live: LivePid::default(),
            exchanges: 0,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn generation(&self) -> usize {
        self.generation
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Number of successful exchanges.
    pub fn exchanges(&self) -> usize {
        self.exchanges
    }

    /// Process ID, while a process is attached.
    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().and_then(|p| p.pid)
    }

    pub(crate) fn live_pid(&self) -> LivePid {
        self.live.clone()
    }

    /// Spawn the worker process. No-op if already running.
    pub fn start(&mut self) -> Result<()> {
        if self.state == WorkerState::Running {
            return Ok(());
        }

        let mut child = spawn_worker(&self.command, self.id)?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::other("worker stdin not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("worker stdout not captured"))?;
        let pid = child.id();

        debug!(
            worker_id = self.id,
            pid = pid.unwrap_or_default(),
            generation = self.generation,
            program = %self.command.program,
            "Worker started"
        );

        self.live.set(pid);
        self.process = Some(Process {
            child,
            pid,
            writer: LineWriter::new(stdin),
            reader: LineReader::new(stdout),
        });
        self.state = WorkerState::Running;
        Ok(())
    }

    /// Check whether the process is still alive (non-blocking).
    ///
    /// A process found dead marks the handle `Failed`.
    pub fn is_running(&mut self) -> bool {
        if self.state != WorkerState::Running {
            return false;
        }
        let Some(process) = self.process.as_mut() else {
            return false;
        };
        match self.live.try_reap(&mut process.child) {
            Ok(None) => true,
            Ok(Some(status)) => {
                debug!(
                    worker_id = self.id,
                    reason = %analyze_exit_status(status),
                    "Idle worker exited"
                );
                self.state = WorkerState::Failed;
                false
            }
            Err(_) => {
                self.state = WorkerState::Failed;
                false
            }
        }
    }

    /// Send one request and wait for its response line.
    ///
    /// Any error leaves the handle `Failed`: a late line for this request
    /// could otherwise be read as the answer to the next one.
    #[instrument(level = "debug", skip(self, request), fields(worker_id = self.id, url = %request.url))]
    pub async fn exchange(
        &mut self,
        request: &ExtractRequest,
        deadline: Duration,
    ) -> Result<Document> {
        if self.state != WorkerState::Running {
            return Err(ArticleError::NotRunning { worker_id: self.id });
        }
        let line = request.to_line()?;
        let worker_id = self.id;
        let process = self
            .process
            .as_mut()
            .ok_or(ArticleError::NotRunning { worker_id })?;

        let start = Instant::now();
        let outcome = tokio::time::timeout(deadline, round_trip(process, &line, worker_id))
            .await
            .unwrap_or(Err(ArticleError::Timeout {
                worker_id,
                timeout: deadline,
            }));

        match outcome {
            Ok(document) => {
                self.exchanges += 1;
                debug!(
                    worker_id,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    keys = document.len(),
                    "Worker responded"
                );
                Ok(document)
            }
            Err(e) => {
                self.state = WorkerState::Failed;
                let reason = match self.live.try_reap(&mut process.child) {
                    Ok(Some(status)) => analyze_exit_status(status),
                    Ok(None) => TerminationReason::StillAlive,
                    Err(_) => TerminationReason::Unknown,
                };
                warn!(
                    worker_id,
                    error = %e,
                    process = %reason,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Worker exchange failed"
                );
                Err(e)
            }
        }
    }

    /// Terminate the process: close stdin, SIGTERM, then SIGKILL once
    /// `stop_timeout` has passed.
    ///
    /// Idempotent; a handle that never started stays `Unstarted`.
    pub async fn stop(&mut self) -> Result<()> {
        let Some(process) = self.process.take() else {
            if self.state != WorkerState::Unstarted {
                self.state = WorkerState::Stopped;
            }
            return Ok(());
        };
        self.state = WorkerState::Stopped;
        // From here on only this call may signal or reap the child
        self.live.clear();

        let Process {
            mut child,
            pid,
            writer,
            reader,
        } = process;
        drop(writer);
        drop(reader);

        if let Ok(Some(status)) = child.try_wait() {
            debug!(
                worker_id = self.id,
                reason = %analyze_exit_status(status),
                "Worker already exited"
            );
            return Ok(());
        }

        if let Some(pid) = pid {
            // ESRCH just means it exited in the meantime
            let _ = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
        }

        match tokio::time::timeout(self.command.stop_timeout, child.wait()).await {
            Ok(Ok(status)) => {
                debug!(
                    worker_id = self.id,
                    reason = %analyze_exit_status(status),
                    "Worker stopped"
                );
                Ok(())
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_) => {
                warn!(
                    worker_id = self.id,
                    timeout_ms = self.command.stop_timeout.as_millis() as u64,
                    "Worker ignored SIGTERM, killing"
                );
                child.kill().await?;
                Ok(())
            }
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        // kill_on_drop reaps the child in the background
        self.live.clear();
    }
}

impl std::fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("id", &self.id)
            .field("generation", &self.generation)
            .field("state", &self.state)
            .field("pid", &self.pid())
            .field("exchanges", &self.exchanges)
            .finish()
    }
}

async fn round_trip(process: &mut Process, line: &str, worker_id: usize) -> Result<Document> {
    process.writer.write_line(line).await?;
    match process.reader.read_line().await? {
        Some(response) => parse_response(response)
            .map_err(|message| ArticleError::InvalidResponse { worker_id, message }),
        None => Err(ArticleError::EmptyResponse { worker_id }),
    }
}
