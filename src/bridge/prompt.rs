//! Prompt accumulators
//!
//! The authoritative content of a prompt turn is the streamed
//! `agent_message_chunk` updates, not the terminal RPC result. This module
//! owns the per-prompt text buffers: the reader loop appends (single
//! producer), the façade consumes after its own wait completes (single
//! consumer). There is at most one active prompt per session; the active
//! slot says which buffer incoming chunks belong to.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde_json::Value;

/// No active prompt; real ids start at 1
const NO_ACTIVE_PROMPT: u64 = 0;

/// Per-prompt text buffers plus the active-prompt marker
#[derive(Debug, Default)]
pub struct PromptBuffers {
    chunks: DashMap<u64, String>,
    active: AtomicU64,
}

impl PromptBuffers {
    /// Create an empty accumulator map
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a buffer for a prompt and mark it active
    pub fn begin(&self, prompt_id: u64) {
        self.chunks.insert(prompt_id, String::new());
        self.active.store(prompt_id, Ordering::SeqCst);
    }

    /// Consume a prompt's buffer
    ///
    /// Clears the active marker if it still points at this prompt. Returns
    /// None if the buffer was already consumed or never opened.
    pub fn take(&self, prompt_id: u64) -> Option<String> {
        drop(self.active.compare_exchange(
            prompt_id,
            NO_ACTIVE_PROMPT,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ));
        self.chunks.remove(&prompt_id).map(|(_, text)| text)
    }

    /// Route one `session/update` notification
    ///
    /// Text chunks append to the active prompt's buffer in arrival order;
    /// plan and tool-call updates are diagnostics only.
    pub fn apply_update(&self, params: &Value) {
        let update = &params["update"];
        match update["sessionUpdate"].as_str().unwrap_or_default() {
            "agent_message_chunk" => {
                let content = &update["content"];
                if content["type"].as_str() == Some("text") {
                    if let Some(text) = content["text"].as_str() {
                        self.append(text);
                    }
                }
            }
            "plan" => {
                if let Some(entries) = update["entries"].as_array() {
                    let summary: Vec<&str> = entries
                        .iter()
                        .filter_map(|e| e["content"].as_str())
                        .take(5)
                        .collect();
                    tracing::info!(plan = ?summary, "agent plan update");
                }
            }
            "tool_call" | "tool_call_update" => {
                tracing::info!(
                    title = update["title"].as_str().unwrap_or_default(),
                    status = update["status"].as_str().unwrap_or_default(),
                    "agent tool update"
                );
            }
            other => {
                tracing::debug!(kind = other, "unhandled session update");
            }
        }
    }

    fn append(&self, text: &str) {
        let prompt_id = self.active.load(Ordering::SeqCst);
        if prompt_id == NO_ACTIVE_PROMPT {
            tracing::debug!("text chunk with no active prompt, dropping");
            return;
        }
        match self.chunks.get_mut(&prompt_id) {
            Some(mut buffer) => buffer.push_str(text),
            None => tracing::debug!(prompt_id, "text chunk for consumed prompt, dropping"),
        }
    }

    /// Number of open buffers (timed-out prompts keep theirs until replaced)
    pub fn open_count(&self) -> usize {
        self.chunks.len()
    }
}
