//! ACP Bridge
//!
//! A bridge between a line-oriented front end and an ACP (Agent Client
//! Protocol) agent running as a child process. The agent speaks
//! line-delimited JSON-RPC 2.0 over stdin/stdout; the bridge multiplexes
//! concurrent outbound requests over the child's stdin, pairs responses
//! back to their callers, assembles streamed message chunks into prompt
//! replies, and answers the agent's own requests (permissions, terminals).
//!
//! ## Quick Start
//!
//! ```no_run
//! use acp_bridge::{AcpBridge, BridgeConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let bridge = AcpBridge::start(BridgeConfig::from_env())?;
//!     bridge.initialize().await;
//!
//!     let reply = bridge.prompt("hello").await?;
//!     println!("{}", reply.text);
//!
//!     bridge.stop().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Environment Variables
//!
//! - `ACP_AGENT_PATH`: agent executable (default: `copilot`)
//! - `ACP_AGENT_ARGS`: agent arguments, whitespace separated
//!   (default: `--acp --stdio`)
//! - `ACP_PROMPT_TIMEOUT_SECS`: prompt timeout in seconds (default: 180)

pub mod bridge;
pub mod cli;
pub mod logging;
pub mod process;
pub mod rpc;
pub mod terminal;
pub mod types;

pub use bridge::AcpBridge;
pub use cli::Cli;
pub use terminal::{TerminalManager, TerminalOutput};
pub use types::{
    BridgeConfig, BridgeError, BridgeStatus, PROTOCOL_VERSION, PromptReply, Result, SessionInfo,
};
