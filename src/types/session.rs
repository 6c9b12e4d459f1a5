//! Session state and façade result types

use std::path::PathBuf;

use serde::Serialize;
use serde_json::Value;

/// One negotiated working context with the agent
///
/// Created by a successful `session/new` call and bound to one agent process.
/// Replacing the process replaces the whole bridge, and with it this state.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    /// Session id returned by the agent
    pub session_id: String,
    /// Working directory the session was created with
    pub cwd: PathBuf,
    /// Protocol version negotiated during `initialize`
    pub protocol_version: Option<u64>,
    /// Agent identity as reported by `initialize` (`agentInfo`)
    pub agent_info: Value,
    /// Agent capability advertisement (`agentCapabilities`)
    pub capabilities: Value,
}

/// Result of one prompt turn
///
/// The text is assembled from streamed `session/update` chunks; the RPC
/// result itself only contributes the stop reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptReply {
    /// Accumulated response text
    pub text: String,
    /// Stop reason reported by the agent (`end_turn` when absent)
    pub stop_reason: String,
}

/// Health snapshot reported to the front end
#[derive(Debug, Clone, Serialize)]
pub struct BridgeStatus {
    /// Whether the agent process is still running
    pub alive: bool,
    /// Session id, if a session was negotiated
    pub session_id: Option<String>,
    /// Agent identity from the initialize handshake
    pub agent_info: Value,
}
