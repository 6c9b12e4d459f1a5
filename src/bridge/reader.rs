//! Reader loop
//!
//! The single background task that drains the agent's stdout. Each line is
//! decoded and routed: responses complete pending calls, `session/update`
//! notifications feed the prompt buffers, and server-initiated requests are
//! handed to the dispatcher on their own task so a slow handler never
//! stalls the drain.
//!
//! Exactly one reader loop runs per live process; a fresh process gets a
//! fresh loop. On end-of-stream the loop marks the process dead and fails
//! every pending call, so no caller blocks forever after the child dies.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

use super::dispatcher::ServerDispatcher;
use super::prompt::PromptBuffers;
use crate::rpc::{self, Message, PendingCalls};
use crate::types::BridgeError;

/// Shared state the reader loop routes into
#[derive(Debug)]
pub(crate) struct ReaderContext {
    pub pending: Arc<PendingCalls>,
    pub prompts: Arc<PromptBuffers>,
    pub dispatcher: Arc<ServerDispatcher>,
    pub alive: Arc<AtomicBool>,
}

/// Drain the agent's stdout until end-of-stream
pub(crate) async fn run<R>(stdout: R, cx: ReaderContext)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stdout).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                tracing::info!("agent stdout closed");
                break;
            }
            Err(e) => {
                // Read failure is equivalent to stream closure; it is
                // contained here, never propagated.
                tracing::warn!(error = %e, "agent stdout read failed");
                break;
            }
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match rpc::decode(line) {
            Ok(message) => route(message, &cx),
            Err(e) => {
                // Protocol noise, not stream failure: log and keep reading.
                tracing::warn!(error = %e, line = truncate(line, 200), "skipping malformed line");
            }
        }
    }

    cx.alive.store(false, Ordering::SeqCst);
    cx.pending.fail_all();
}

fn route(message: Message, cx: &ReaderContext) {
    match message {
        Message::Response { id, result, error } => {
            let Some(id) = id.as_u64() else {
                tracing::warn!(%id, "response with non-numeric id");
                return;
            };
            let reply = match error {
                Some(error) => Err(BridgeError::Rpc(error)),
                None => Ok(result.unwrap_or(Value::Null)),
            };
            cx.pending.complete(id, reply);
        }
        Message::Notification { method, params } => {
            if method == "session/update" {
                cx.prompts.apply_update(&params);
            } else {
                tracing::debug!(method, "ignoring notification");
            }
        }
        Message::Request { id, method, params } => {
            // Handled off the reader task; the dispatcher owns the
            // obligation to respond exactly once.
            let dispatcher = Arc::clone(&cx.dispatcher);
            tokio::spawn(async move {
                dispatcher.handle(id, &method, params).await;
            });
        }
    }
}

fn truncate(line: &str, max: usize) -> &str {
    match line.char_indices().nth(max) {
        Some((idx, _)) => &line[..idx],
        None => line,
    }
}
