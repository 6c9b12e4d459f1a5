//! Agent process supervisor
//!
//! Owns the child process lifetime: spawn with piped stdio, exit detection,
//! and a two-phase stop (terminate signal, bounded wait, force kill). The
//! agent may be mid-write when we shut it down, so an abrupt kill is the
//! last resort, not the first.
//!
//! Restart is modeled as stop-then-start with a fresh bridge instance so
//! stale pending calls and session state cannot leak across replacements;
//! that sequencing is the caller's responsibility.

use std::io;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::types::{BridgeConfig, BridgeError, Result};

/// Pipes taken from a freshly spawned agent
///
/// stdin goes to the outbound writer, stdout to the reader loop, stderr to
/// the diagnostic relay.
#[derive(Debug)]
pub struct AgentPipes {
    /// Agent's stdin (our request channel)
    pub stdin: ChildStdin,
    /// Agent's stdout (the protocol stream)
    pub stdout: ChildStdout,
    /// Agent's stderr (unstructured diagnostics)
    pub stderr: ChildStderr,
}

/// Supervisor for one agent child process
#[derive(Debug)]
pub struct AgentProcess {
    child: Child,
    alive: Arc<AtomicBool>,
    grace: std::time::Duration,
}

impl AgentProcess {
    /// Spawn the agent with separate pipes for stdin/stdout/stderr
    ///
    /// A missing executable maps to `AgentNotFound`, distinguished from
    /// other spawn failures so the operator gets an actionable message.
    pub fn spawn(config: &BridgeConfig) -> Result<(Self, AgentPipes)> {
        let mut command = Command::new(&config.agent_path);
        command
            .args(&config.agent_args)
            .current_dir(&config.cwd)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => BridgeError::AgentNotFound(config.agent_path.clone()),
            _ => BridgeError::Spawn(e.to_string()),
        })?;

        let pipes = AgentPipes {
            stdin: child
                .stdin
                .take()
                .ok_or_else(|| BridgeError::Spawn("agent stdin not captured".to_string()))?,
            stdout: child
                .stdout
                .take()
                .ok_or_else(|| BridgeError::Spawn("agent stdout not captured".to_string()))?,
            stderr: child
                .stderr
                .take()
                .ok_or_else(|| BridgeError::Spawn("agent stderr not captured".to_string()))?,
        };

        tracing::info!(
            path = %config.agent_path,
            args = ?config.agent_args,
            pid = child.id().unwrap_or(0),
            "agent process spawned"
        );

        Ok((
            Self {
                child,
                alive: Arc::new(AtomicBool::new(true)),
                grace: config.stop_grace,
            },
            pipes,
        ))
    }

    /// Shared liveness flag; cleared by the reader loop on EOF and by `stop()`
    pub fn alive_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.alive)
    }

    /// Whether the process is still considered running
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Process id, if the process has one
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Stop the agent: terminate signal, bounded wait, then force kill
    ///
    /// Callers close the agent's stdin first (see `Outbound::close`) so the
    /// agent sees EOF and can finish any partial write before the signal
    /// lands.
    pub async fn stop(&mut self) -> Result<()> {
        self.alive.store(false, Ordering::SeqCst);

        if let Ok(Some(status)) = self.child.try_wait() {
            tracing::info!(%status, "agent already exited");
            return Ok(());
        }

        self.terminate_gracefully();

        match timeout(self.grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                tracing::info!(%status, "agent exited after terminate signal");
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "wait for agent failed, force-killing");
                self.child.kill().await?;
            }
            Err(_) => {
                tracing::warn!(grace = ?self.grace, "agent ignored terminate signal, force-killing");
                self.child.kill().await?;
            }
        }
        Ok(())
    }

    #[cfg(unix)]
    fn terminate_gracefully(&self) {
        if let Some(pid) = self.child.id() {
            // SAFETY: plain kill(2) on a pid we own; no memory involved.
            let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
            if rc != 0 {
                tracing::debug!(pid, "SIGTERM failed: {}", io::Error::last_os_error());
            }
        }
    }

    #[cfg(not(unix))]
    fn terminate_gracefully(&self) {
        // No graceful signal available; stdin EOF is the only soft cue and
        // the bounded wait below still applies before the hard kill.
    }
}

/// Relay the agent's stderr to the logging sink, line by line
///
/// stderr is an unstructured diagnostic stream; it is never parsed for
/// control signals.
pub fn relay_stderr(stderr: ChildStderr) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => tracing::debug!(target: "acp_bridge::agent_stderr", "{line}"),
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!(error = %e, "agent stderr closed with error");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config_for(path: &str, args: &[&str]) -> BridgeConfig {
        BridgeConfig::new()
            .with_agent_path(path)
            .with_agent_args(args.iter().map(|s| s.to_string()).collect())
    }

    #[tokio::test]
    async fn test_spawn_missing_executable_is_agent_not_found() {
        let config = config_for("/definitely/not/a/real/agent", &[]);
        let err = AgentProcess::spawn(&config).unwrap_err();
        assert!(matches!(err, BridgeError::AgentNotFound(_)));
    }

    #[tokio::test]
    async fn test_spawn_and_stop_short_lived_process() {
        let config = config_for("sh", &["-c", "exit 0"]);
        let (mut process, pipes) = AgentProcess::spawn(&config).unwrap();
        assert!(process.is_alive());

        drop(pipes);
        process.stop().await.unwrap();
        assert!(!process.is_alive());
    }

    #[tokio::test]
    async fn test_stop_terminates_long_running_process_within_grace() {
        let mut config = config_for("sh", &["-c", "sleep 30"]);
        config.stop_grace = Duration::from_secs(2);

        let (mut process, pipes) = AgentProcess::spawn(&config).unwrap();
        drop(pipes);

        let started = std::time::Instant::now();
        process.stop().await.unwrap();
        // SIGTERM should end it well before the force-kill path's ceiling.
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stop_force_kills_a_term_ignoring_process() {
        let mut config = config_for("sh", &["-c", "trap '' TERM; sleep 30"]);
        config.stop_grace = Duration::from_millis(300);

        let (mut process, pipes) = AgentProcess::spawn(&config).unwrap();
        drop(pipes);

        // Give the shell a moment to install the trap.
        tokio::time::sleep(Duration::from_millis(100)).await;
        process.stop().await.unwrap();
        assert!(!process.is_alive());
    }
}
