//! Session façade
//!
//! `AcpBridge` is one bridge instance: it owns the agent process, the
//! pending-call table, the prompt accumulators and the terminal registry,
//! and exposes the public operation surface (initialize, prompt, status,
//! stop). Replacing the agent (model or config switch) means stopping this
//! instance and starting a fresh one; nothing is restarted in place, so
//! stale pending calls and session state cannot leak across replacements.

mod dispatcher;
mod prompt;
mod reader;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::timeout;

pub use dispatcher::ServerDispatcher;
pub use prompt::PromptBuffers;

use crate::process::{AgentProcess, relay_stderr};
use crate::rpc::{Outbound, PendingCalls};
use crate::terminal::TerminalManager;
use crate::types::{
    BridgeConfig, BridgeError, BridgeStatus, PROTOCOL_VERSION, PromptReply, Result, SessionInfo,
};

/// How long `stop()` waits for the reader loop before aborting it
const READER_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Handshake state captured from the `initialize` response
#[derive(Debug, Default)]
struct Negotiated {
    protocol_version: Option<u64>,
    agent_info: Value,
    capabilities: Value,
}

/// One bridge instance: one agent process, one session
#[derive(Debug)]
pub struct AcpBridge {
    config: BridgeConfig,
    process: Mutex<AgentProcess>,
    outbound: Arc<Outbound>,
    pending: Arc<PendingCalls>,
    prompts: Arc<PromptBuffers>,
    terminals: Arc<TerminalManager>,
    negotiated: RwLock<Negotiated>,
    session: RwLock<Option<SessionInfo>>,
    alive: Arc<AtomicBool>,
    reader: StdMutex<Option<JoinHandle<()>>>,
    stderr_relay: StdMutex<Option<JoinHandle<()>>>,
    /// Serializes prompt turns: at most one outstanding prompt per session
    prompt_gate: Mutex<()>,
}

impl AcpBridge {
    /// Spawn the agent and wire up the reader loop and dispatcher
    ///
    /// Must be called within a Tokio runtime. The session handshake is a
    /// separate step; see [`AcpBridge::initialize`].
    pub fn start(config: BridgeConfig) -> Result<Self> {
        let (process, pipes) = AgentProcess::spawn(&config)?;
        let alive = process.alive_flag();

        let pending = Arc::new(PendingCalls::new());
        let prompts = Arc::new(PromptBuffers::new());
        let terminals = Arc::new(TerminalManager::new(config.terminal_timeout));
        let outbound = Arc::new(Outbound::new(pipes.stdin, Arc::clone(&pending)));

        let dispatcher = Arc::new(ServerDispatcher::new(
            Arc::clone(&outbound),
            Arc::clone(&terminals),
        ));
        let reader = tokio::spawn(reader::run(
            pipes.stdout,
            reader::ReaderContext {
                pending: Arc::clone(&pending),
                prompts: Arc::clone(&prompts),
                dispatcher,
                alive: Arc::clone(&alive),
            },
        ));
        let stderr_relay = relay_stderr(pipes.stderr);

        Ok(Self {
            config,
            process: Mutex::new(process),
            outbound,
            pending,
            prompts,
            terminals,
            negotiated: RwLock::new(Negotiated::default()),
            session: RwLock::new(None),
            alive,
            reader: StdMutex::new(Some(reader)),
            stderr_relay: StdMutex::new(Some(stderr_relay)),
            prompt_gate: Mutex::new(()),
        })
    }

    /// Run the `initialize` handshake and create the session
    ///
    /// A failed handshake is logged but does not abort startup; the bridge
    /// reports itself unhealthy through [`AcpBridge::status`] instead.
    pub async fn initialize(&self) {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "clientCapabilities": {},
            "clientInfo": {
                "name": "acp-bridge",
                "title": "ACP Bridge",
                "version": env!("CARGO_PKG_VERSION"),
            },
        });
        match self.call("initialize", params, self.config.handshake_timeout).await {
            Ok(result) => {
                let mut negotiated = self.negotiated.write().await;
                negotiated.protocol_version = result["protocolVersion"].as_u64();
                negotiated.agent_info = result["agentInfo"].clone();
                negotiated.capabilities = result["agentCapabilities"].clone();
                tracing::info!(
                    agent = negotiated.agent_info["name"].as_str().unwrap_or("unknown"),
                    version = negotiated.agent_info["version"].as_str().unwrap_or("?"),
                    protocol = ?negotiated.protocol_version,
                    "connected to agent"
                );
            }
            Err(e) => {
                tracing::warn!(error = %e, "initialize handshake failed");
            }
        }

        let params = json!({
            "cwd": self.config.cwd.display().to_string(),
            "mcpServers": [],
        });
        match self.call("session/new", params, self.config.handshake_timeout).await {
            Ok(result) => match result["sessionId"].as_str() {
                Some(session_id) => {
                    let negotiated = self.negotiated.read().await;
                    let info = SessionInfo {
                        session_id: session_id.to_string(),
                        cwd: self.config.cwd.clone(),
                        protocol_version: negotiated.protocol_version,
                        agent_info: negotiated.agent_info.clone(),
                        capabilities: negotiated.capabilities.clone(),
                    };
                    drop(negotiated);
                    tracing::info!(session_id, "session created");
                    *self.session.write().await = Some(info);
                }
                None => {
                    tracing::warn!(result = %result, "session/new returned no sessionId");
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "session/new failed");
            }
        }
    }

    /// Send one prompt turn and block until the reply or the configured timeout
    pub async fn prompt(&self, text: &str) -> Result<PromptReply> {
        self.prompt_with_timeout(text, self.config.prompt_timeout).await
    }

    /// Send one prompt turn with an explicit timeout
    ///
    /// The reply text is the accumulated stream of `agent_message_chunk`
    /// updates; the RPC result only contributes the stop reason. On timeout
    /// the caller's wait is cancelled but the underlying turn may still be
    /// running: the accumulator entry is intentionally left in place until
    /// the agent answers or the bridge is replaced, so treat a timeout as
    /// inconclusive rather than failed.
    pub async fn prompt_with_timeout(&self, text: &str, wait: Duration) -> Result<PromptReply> {
        let _turn = self.prompt_gate.lock().await;

        let session_id = self
            .session
            .read()
            .await
            .as_ref()
            .map(|s| s.session_id.clone())
            .ok_or(BridgeError::NoActiveSession)?;

        // The accumulator must exist before the request hits the wire:
        // chunks can start streaming before the send returns.
        let prompt_id = self.pending.reserve_id();
        self.prompts.begin(prompt_id);

        let params = json!({
            "sessionId": session_id,
            "prompt": [{"type": "text", "text": text}],
        });
        match self.call("session/prompt", params, wait).await {
            Ok(result) => {
                let text = self.prompts.take(prompt_id).unwrap_or_default();
                let stop_reason = result["stopReason"].as_str().unwrap_or("end_turn").to_string();
                tracing::info!(prompt_id, stop_reason, chars = text.len(), "prompt completed");
                Ok(PromptReply { text, stop_reason })
            }
            Err(e @ BridgeError::Timeout(_)) => {
                tracing::warn!(prompt_id, "prompt timed out; turn may still be running");
                Err(e)
            }
            Err(e) => {
                drop(self.prompts.take(prompt_id));
                Err(e)
            }
        }
    }

    /// Health snapshot for the front end's status query
    pub async fn status(&self) -> BridgeStatus {
        BridgeStatus {
            alive: self.alive.load(Ordering::SeqCst),
            session_id: self
                .session
                .read()
                .await
                .as_ref()
                .map(|s| s.session_id.clone()),
            agent_info: self.negotiated.read().await.agent_info.clone(),
        }
    }

    /// Whether the agent process is still running
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// The negotiated session, if the handshake succeeded
    pub async fn session(&self) -> Option<SessionInfo> {
        self.session.read().await.clone()
    }

    /// Terminal registry (exposed for status/diagnostics)
    pub fn terminals(&self) -> &Arc<TerminalManager> {
        &self.terminals
    }

    /// Stop the bridge: close stdin, stop the process, reap the workers
    ///
    /// Every still-pending caller is released with `ProcessExited` by the
    /// reader loop when the stream closes. The reader is joined with a
    /// bounded timeout and aborted if it overruns, so no task leaks across
    /// a replace cycle.
    pub async fn stop(&self) -> Result<()> {
        self.outbound.close().await;
        self.process.lock().await.stop().await?;

        let reader = take_handle(&self.reader);
        if let Some(mut handle) = reader {
            if timeout(READER_JOIN_TIMEOUT, &mut handle).await.is_err() {
                tracing::warn!("reader loop did not finish in time, aborting");
                handle.abort();
            }
        }
        if let Some(handle) = take_handle(&self.stderr_relay) {
            handle.abort();
        }

        // Belt and braces: the reader normally does this on EOF.
        self.pending.fail_all();
        tracing::info!("bridge stopped");
        Ok(())
    }

    /// Issue a request and wait for its response, bounded by `wait`
    async fn call(&self, method: &str, params: Value, wait: Duration) -> Result<Value> {
        let rx = self.outbound.request(method, params).await?;
        match timeout(wait, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_closed)) => Err(BridgeError::ProcessExited),
            Err(_elapsed) => Err(BridgeError::Timeout(wait.as_millis() as u64)),
        }
    }
}

fn take_handle(slot: &StdMutex<Option<JoinHandle<()>>>) -> Option<JoinHandle<()>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner).take()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    /// A scripted stand-in for a real ACP agent: answers the handshake and
    /// streams a canned reply for every prompt.
    const FAKE_AGENT: &str = r#"
while IFS= read -r line; do
  rid=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9]*\).*/\1/p')
  case "$line" in
    *'"method":"initialize"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":1,"agentInfo":{"name":"fake-agent","version":"0.0.1"},"agentCapabilities":{}}}\n' "$rid" ;;
    *'"method":"session/new"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"sessionId":"sess-fake"}}\n' "$rid" ;;
    *'"method":"session/prompt"'*)
      printf '{"jsonrpc":"2.0","method":"session/update","params":{"sessionId":"sess-fake","update":{"sessionUpdate":"agent_message_chunk","content":{"type":"text","text":"Hel"}}}}\n'
      printf '{"jsonrpc":"2.0","method":"session/update","params":{"sessionId":"sess-fake","update":{"sessionUpdate":"agent_message_chunk","content":{"type":"text","text":"lo, world"}}}}\n'
      printf '{"jsonrpc":"2.0","id":%s,"result":{"stopReason":"end_turn"}}\n' "$rid" ;;
  esac
done
"#;

    /// Like FAKE_AGENT but never answers prompts (handshake only).
    const SILENT_AGENT: &str = r#"
while IFS= read -r line; do
  rid=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9]*\).*/\1/p')
  case "$line" in
    *'"method":"initialize"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":1,"agentInfo":{"name":"silent"},"agentCapabilities":{}}}\n' "$rid" ;;
    *'"method":"session/new"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"sessionId":"sess-silent"}}\n' "$rid" ;;
  esac
done
"#;

    fn scripted_bridge(script: &str) -> (AcpBridge, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path: PathBuf = dir.path().join("agent.sh");
        std::fs::write(&path, script).unwrap();

        let config = BridgeConfig::new()
            .with_agent_path("sh")
            .with_agent_args(vec![path.display().to_string()]);
        (AcpBridge::start(config).unwrap(), dir)
    }

    #[tokio::test]
    async fn test_handshake_records_session_and_agent_info() {
        let (bridge, _dir) = scripted_bridge(FAKE_AGENT);
        bridge.initialize().await;

        let status = bridge.status().await;
        assert!(status.alive);
        assert_eq!(status.session_id.as_deref(), Some("sess-fake"));
        assert_eq!(status.agent_info["name"], json!("fake-agent"));

        let session = bridge.session().await.unwrap();
        assert_eq!(session.protocol_version, Some(1));

        bridge.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_prompt_assembles_streamed_chunks() {
        let (bridge, _dir) = scripted_bridge(FAKE_AGENT);
        bridge.initialize().await;

        let reply = bridge.prompt("say hello").await.unwrap();
        assert_eq!(reply.text, "Hello, world");
        assert_eq!(reply.stop_reason, "end_turn");

        // Sequential turns reuse the same session.
        let reply = bridge.prompt("again").await.unwrap();
        assert_eq!(reply.text, "Hello, world");

        bridge.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_prompt_without_session_is_rejected() {
        let (bridge, _dir) = scripted_bridge(SILENT_AGENT);
        // No initialize: no session.
        let err = bridge.prompt("hello?").await.unwrap_err();
        assert!(matches!(err, BridgeError::NoActiveSession));

        bridge.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_prompt_timeout_is_caller_local() {
        let (bridge, _dir) = scripted_bridge(SILENT_AGENT);
        bridge.initialize().await;

        let err = bridge
            .prompt_with_timeout("anyone there?", Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Timeout(_)));

        // The accumulator entry survives a timeout: the turn is
        // inconclusive, not failed.
        assert_eq!(bridge.prompts.open_count(), 1);
        // The bridge itself is still healthy.
        assert!(bridge.is_alive());

        bridge.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_releases_pending_callers_and_reaps_the_reader() {
        let (bridge, _dir) = scripted_bridge(SILENT_AGENT);
        bridge.initialize().await;

        let rx = bridge
            .outbound
            .request("session/prompt", json!({"sessionId": "sess-silent"}))
            .await
            .unwrap();

        bridge.stop().await.unwrap();

        assert!(matches!(rx.await.unwrap(), Err(BridgeError::ProcessExited)));
        assert!(bridge.pending.is_empty());
        assert!(!bridge.is_alive());
    }
}
