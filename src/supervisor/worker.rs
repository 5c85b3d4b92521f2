//! Worker process abstraction
//!
//! The supervisor never touches `tokio::process` directly: spawning goes
//! through [`WorkerSpawner`] and a running process is a [`WorkerProc`].
//! Output bytes and exits surface asynchronously as [`WorkerEvent`]s on a
//! channel, which is how `last_activity` gets updated — any output counts
//! as activity regardless of whether it represents real progress.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::WorkerError;

/// One worker group's assignment
#[derive(Debug, Clone)]
pub struct GroupSpec {
    /// Logical group name; stable across restarts
    pub name: String,
    /// Partition file the worker consumes
    pub partition_file: PathBuf,
}

/// Asynchronous signals from a running worker
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    /// The worker wrote bytes to stdout or stderr
    Output { group: String },
    /// The worker exited
    Exited { group: String, code: Option<i32> },
}

/// How to terminate a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminateMode {
    /// SIGTERM: let the worker checkpoint and exit
    Graceful,
    /// SIGKILL: immediate
    Force,
}

/// A running worker process
pub trait WorkerProc: Send + Sync {
    /// OS process id
    fn pid(&self) -> u32;

    /// Send the termination signal for the given mode.
    ///
    /// Errors are deliberately not surfaced: signalling an already-dead
    /// process is the common case during recovery.
    fn terminate(&self, mode: TerminateMode);
}

/// Factory for worker processes
pub trait WorkerSpawner: Send + Sync {
    /// Spawn a worker for the group, wiring its output to the log sink at
    /// `log_path` and its lifecycle onto `events`.
    fn spawn(
        &self,
        group: &GroupSpec,
        log_path: &Path,
        events: mpsc::UnboundedSender<WorkerEvent>,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn WorkerProc>, WorkerError>> + Send + '_>>;
}

// =============================================================================
// Production implementation on tokio::process
// =============================================================================

/// Spawns real OS processes from a configured command line
pub struct ProcessSpawner {
    command: Vec<String>,
}

impl ProcessSpawner {
    /// `command` is the program plus fixed arguments; the partition file
    /// path is appended per spawn.
    #[must_use]
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

struct ProcessWorker {
    pid: u32,
}

impl WorkerProc for ProcessWorker {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn terminate(&self, mode: TerminateMode) {
        let signal = match mode {
            TerminateMode::Graceful => libc::SIGTERM,
            TerminateMode::Force => libc::SIGKILL,
        };
        // SAFETY: kill with a valid signal number; failure (ESRCH for a
        // process that already exited) is expected and ignored.
        let rc = unsafe { libc::kill(self.pid as libc::pid_t, signal) };
        if rc != 0 {
            debug!("Signal {signal} to pid {} had no effect (already gone?)", self.pid);
        }
    }
}

/// Pump one output stream into the log sink, reporting activity per line
async fn pump_stream<R>(
    stream: R,
    group: String,
    log_path: PathBuf,
    events: mpsc::UnboundedSender<WorkerEvent>,
) where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut log = match tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .await
    {
        Ok(file) => file,
        Err(e) => {
            warn!("Cannot open log sink {}: {}", log_path.display(), e);
            return;
        }
    };

    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let _ = events.send(WorkerEvent::Output {
                    group: group.clone(),
                });
                if let Err(e) = log.write_all(line.as_bytes()).await {
                    warn!("Log write failed for group {group}: {e}");
                    return;
                }
                let _ = log.write_all(b"\n").await;
            }
            Ok(None) => return,
            Err(e) => {
                debug!("Output stream for group {group} ended: {e}");
                return;
            }
        }
    }
}

impl WorkerSpawner for ProcessSpawner {
    fn spawn(
        &self,
        group: &GroupSpec,
        log_path: &Path,
        events: mpsc::UnboundedSender<WorkerEvent>,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn WorkerProc>, WorkerError>> + Send + '_>> {
        let group = group.clone();
        let log_path = log_path.to_path_buf();
        Box::pin(async move {
            let (program, args) = self
                .command
                .split_first()
                .ok_or_else(|| WorkerError::SpawnFailed {
                    group: group.name.clone(),
                    reason: "empty worker command".to_string(),
                })?;

            let mut child = tokio::process::Command::new(program)
                .args(args)
                .arg(&group.partition_file)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .spawn()
                .map_err(|e| WorkerError::SpawnFailed {
                    group: group.name.clone(),
                    reason: e.to_string(),
                })?;

            let pid = child.id().ok_or_else(|| WorkerError::SpawnFailed {
                group: group.name.clone(),
                reason: "child exited before pid could be read".to_string(),
            })?;

            if let Some(stdout) = child.stdout.take() {
                tokio::spawn(pump_stream(
                    stdout,
                    group.name.clone(),
                    log_path.clone(),
                    events.clone(),
                ));
            }
            if let Some(stderr) = child.stderr.take() {
                tokio::spawn(pump_stream(
                    stderr,
                    group.name.clone(),
                    log_path.clone(),
                    events.clone(),
                ));
            }

            // Exit is captured asynchronously; the liveness loop decides
            // what to do with it on its next pass.
            let exit_group = group.name.clone();
            tokio::spawn(async move {
                match child.wait().await {
                    Ok(status) => {
                        let _ = events.send(WorkerEvent::Exited {
                            group: exit_group,
                            code: status.code(),
                        });
                    }
                    Err(e) => {
                        warn!("Wait failed for group {exit_group}: {e}");
                        let _ = events.send(WorkerEvent::Exited {
                            group: exit_group,
                            code: None,
                        });
                    }
                }
            });

            debug!("Spawned worker for group {} with pid {pid}", group.name);
            Ok(Box::new(ProcessWorker { pid }) as Box<dyn WorkerProc>)
        })
    }
}
