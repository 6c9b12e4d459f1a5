//! Shared types: configuration, errors, session state

mod config;
mod error;
mod session;

pub use config::{BridgeConfig, PROTOCOL_VERSION};
pub use error::{BridgeError, ErrorCode, Result};
pub use session::{BridgeStatus, PromptReply, SessionInfo};
