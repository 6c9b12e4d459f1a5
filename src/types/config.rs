//! Bridge configuration
//!
//! Spawn settings for the agent process plus the timeouts that bound every
//! blocking operation in the bridge. Values come from defaults, environment
//! variables, and CLI flags, in that order (later sources win).

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// ACP protocol major version the bridge advertises during `initialize`
pub const PROTOCOL_VERSION: u64 = 1;

/// Bridge configuration
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Path to the agent executable
    /// Environment variable: `ACP_AGENT_PATH`
    pub agent_path: String,

    /// Arguments passed to the agent
    /// Environment variable: `ACP_AGENT_ARGS` (whitespace separated)
    pub agent_args: Vec<String>,

    /// Working directory for the agent process and the session
    pub cwd: PathBuf,

    /// Extra environment variables for the agent process
    pub env: HashMap<String, String>,

    /// Timeout for one prompt turn
    /// Environment variable: `ACP_PROMPT_TIMEOUT_SECS`
    pub prompt_timeout: Duration,

    /// Timeout for the initialize / session-new handshake
    pub handshake_timeout: Duration,

    /// Hard ceiling on a terminal command started by the agent
    pub terminal_timeout: Duration,

    /// Grace period between the terminate signal and force-kill on stop
    pub stop_grace: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            agent_path: "copilot".to_string(),
            agent_args: vec!["--acp".to_string(), "--stdio".to_string()],
            cwd: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            env: HashMap::new(),
            prompt_timeout: Duration::from_secs(180),
            handshake_timeout: Duration::from_secs(30),
            terminal_timeout: Duration::from_secs(120),
            stop_grace: Duration::from_secs(5),
        }
    }
}

impl BridgeConfig {
    /// Create a configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration, applying environment variable overrides
    ///
    /// Reads the following environment variables:
    /// - `ACP_AGENT_PATH`: agent executable path
    /// - `ACP_AGENT_ARGS`: agent arguments, whitespace separated
    /// - `ACP_PROMPT_TIMEOUT_SECS`: prompt timeout in seconds
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("ACP_AGENT_PATH") {
            if !path.is_empty() {
                config.agent_path = path;
            }
        }

        if let Ok(args) = std::env::var("ACP_AGENT_ARGS") {
            if !args.trim().is_empty() {
                config.agent_args = args.split_whitespace().map(str::to_string).collect();
            }
        }

        if let Some(secs) = std::env::var("ACP_PROMPT_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
        {
            config.prompt_timeout = Duration::from_secs(secs);
        }

        config
    }

    /// Set the agent executable path
    pub fn with_agent_path(mut self, path: impl Into<String>) -> Self {
        self.agent_path = path.into();
        self
    }

    /// Set the agent arguments
    pub fn with_agent_args(mut self, args: Vec<String>) -> Self {
        self.agent_args = args;
        self
    }

    /// Set the working directory
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = cwd.into();
        self
    }

    /// Add an environment variable for the agent process
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set the prompt timeout
    pub fn with_prompt_timeout(mut self, timeout: Duration) -> Self {
        self.prompt_timeout = timeout;
        self
    }
}
