//! Terminal handles for agent-initiated command execution
//!
//! The agent can ask the bridge to run shell commands through the
//! `terminal/*` methods. Each command gets an opaque handle id and a
//! background collector that captures combined stdout/stderr and the exit
//! code, bounded by a hard timeout. Creation responds immediately; the
//! collector never blocks the dispatcher.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, timeout};
use uuid::Uuid;

use crate::types::{BridgeError, Result};

/// How often the collector polls the child for exit
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// How long `terminal/output` waits for a still-running command before
/// reporting its current state
const OUTPUT_WAIT_GRACE: Duration = Duration::from_millis(200);

/// Snapshot returned for `terminal/output`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalOutput {
    /// Combined stdout/stderr captured so far
    pub output: String,
    /// Exit code, once the command finished (None while running or on kill)
    pub exit_code: Option<i32>,
    /// Whether the command is still running
    pub is_running: bool,
}

/// State of one terminal command
#[derive(Debug)]
struct TerminalHandle {
    /// Present while the command runs; dropped once the collector finishes
    child: Option<Arc<Mutex<Child>>>,
    /// Combined output buffer, shared with the capture tasks
    output: Arc<Mutex<String>>,
    exit_code: Option<i32>,
    running: bool,
    timed_out: bool,
    /// Flips to true when the collector finalizes the handle
    done_rx: watch::Receiver<bool>,
}

/// Registry of terminal commands started on behalf of the agent
#[derive(Debug)]
pub struct TerminalManager {
    terminals: DashMap<String, TerminalHandle>,
    hard_timeout: Duration,
}

impl TerminalManager {
    /// Create a registry; `hard_timeout` bounds every command's lifetime
    pub fn new(hard_timeout: Duration) -> Self {
        Self {
            terminals: DashMap::new(),
            hard_timeout,
        }
    }

    /// Spawn a command and return its opaque handle id immediately
    pub async fn create(
        self: &Arc<Self>,
        command: &str,
        args: &[String],
        cwd: Option<&str>,
    ) -> Result<String> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| BridgeError::internal(format!("failed to spawn '{command}': {e}")))?;

        let output = Arc::new(Mutex::new(String::new()));
        let stdout_task = child.stdout.take().map(|s| capture_stream(s, Arc::clone(&output)));
        let stderr_task = child.stderr.take().map(|s| capture_stream(s, Arc::clone(&output)));

        let id = format!("term-{}", Uuid::new_v4().simple());
        let child = Arc::new(Mutex::new(child));
        let (done_tx, done_rx) = watch::channel(false);

        self.terminals.insert(
            id.clone(),
            TerminalHandle {
                child: Some(Arc::clone(&child)),
                output: Arc::clone(&output),
                exit_code: None,
                running: true,
                timed_out: false,
                done_rx,
            },
        );

        tracing::info!(terminal_id = %id, command, "terminal command started");

        let manager = Arc::clone(self);
        let collector_id = id.clone();
        tokio::spawn(async move {
            manager
                .collect(collector_id, child, output, stdout_task, stderr_task, done_tx)
                .await;
        });

        Ok(id)
    }

    /// Current output and status of a terminal
    ///
    /// If the command is still running, waits briefly for completion, then
    /// reports whatever state it is in. Unknown handles are an error.
    pub async fn output(&self, id: &str) -> Result<TerminalOutput> {
        let done_rx = {
            let entry = self
                .terminals
                .get(id)
                .ok_or_else(|| BridgeError::unknown_terminal(id))?;
            entry.running.then(|| entry.done_rx.clone())
        };

        if let Some(mut rx) = done_rx {
            // Bounded wait; a long-running command just reports isRunning.
            drop(timeout(OUTPUT_WAIT_GRACE, rx.wait_for(|done| *done)).await);
        }

        // Snapshot the fields, then read the buffer without holding the
        // map entry across an await.
        let (output, exit_code, running) = {
            let entry = self
                .terminals
                .get(id)
                .ok_or_else(|| BridgeError::unknown_terminal(id))?;
            (Arc::clone(&entry.output), entry.exit_code, entry.running)
        };
        let text = output.lock().await.clone();

        Ok(TerminalOutput {
            output: text,
            exit_code,
            is_running: running,
        })
    }

    /// Force-kill a running command; the handle stays queryable
    pub async fn kill(&self, id: &str) -> Result<()> {
        let child = {
            let entry = self
                .terminals
                .get(id)
                .ok_or_else(|| BridgeError::unknown_terminal(id))?;
            entry.child.as_ref().map(Arc::clone)
        };

        if let Some(child) = child {
            if let Err(e) = child.lock().await.start_kill() {
                tracing::debug!(terminal_id = %id, error = %e, "kill on finished terminal");
            }
        }
        Ok(())
    }

    /// Remove a handle, killing the command if it is still running
    ///
    /// Always succeeds, including for unknown handles: release is
    /// idempotent.
    pub async fn release(&self, id: &str) {
        let Some((_, handle)) = self.terminals.remove(id) else {
            tracing::debug!(terminal_id = %id, "release of unknown terminal (idempotent)");
            return;
        };

        if let Some(child) = handle.child {
            if let Err(e) = child.lock().await.start_kill() {
                tracing::debug!(terminal_id = %id, error = %e, "kill during release");
            }
        }
        tracing::info!(terminal_id = %id, "terminal released");
    }

    /// Number of tracked handles
    pub fn count(&self) -> usize {
        self.terminals.len()
    }

    /// Wait for exit (bounded by the hard timeout), then finalize the handle
    async fn collect(
        &self,
        id: String,
        child: Arc<Mutex<Child>>,
        output: Arc<Mutex<String>>,
        stdout_task: Option<JoinHandle<()>>,
        stderr_task: Option<JoinHandle<()>>,
        done_tx: watch::Sender<bool>,
    ) {
        let deadline = Instant::now() + self.hard_timeout;
        let mut status = None;

        loop {
            match child.lock().await.try_wait() {
                Ok(Some(s)) => {
                    status = Some(s);
                    break;
                }
                Ok(None) if Instant::now() < deadline => sleep(EXIT_POLL_INTERVAL).await,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(terminal_id = %id, error = %e, "terminal wait failed");
                    break;
                }
            }
        }

        let timed_out = status.is_none();
        if timed_out {
            let mut guard = child.lock().await;
            if let Err(e) = guard.start_kill() {
                tracing::debug!(terminal_id = %id, error = %e, "kill after timeout");
            }
            // Reap so the pid is not leaked.
            drop(guard.wait().await);
        }

        // Pipes are closed now; let the capture tasks drain.
        if let Some(task) = stdout_task {
            drop(task.await);
        }
        if let Some(task) = stderr_task {
            drop(task.await);
        }

        if timed_out {
            output.lock().await.push_str(&format!(
                "\n[command timed out after {}s and was killed]",
                self.hard_timeout.as_secs()
            ));
        }

        let exit_code = status.as_ref().and_then(std::process::ExitStatus::code);
        if let Some(mut entry) = self.terminals.get_mut(&id) {
            entry.running = false;
            entry.exit_code = exit_code;
            entry.timed_out = timed_out;
            entry.child = None;
        }
        drop(done_tx.send(true));

        tracing::info!(terminal_id = %id, ?exit_code, timed_out, "terminal command finished");
    }
}

/// Append everything readable from `stream` into the shared buffer
fn capture_stream(
    mut stream: impl AsyncRead + Unpin + Send + 'static,
    buffer: Arc<Mutex<String>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut chunk = [0u8; 4096];
        loop {
            match stream.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    buffer
                        .lock()
                        .await
                        .push_str(&String::from_utf8_lossy(&chunk[..n]));
                }
            }
        }
    })
}
