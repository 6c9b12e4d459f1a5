//! Command-line interface definitions
//!
//! Provides CLI argument parsing using clap for the ACP bridge binary.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::types::BridgeConfig;

/// ACP Bridge - drive a line-delimited ACP agent from the command line
#[derive(Parser, Debug, Clone)]
#[command(name = "acp-bridge")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to the agent executable
    #[arg(long, value_name = "PATH", env = "ACP_AGENT_PATH")]
    pub agent_path: Option<String>,

    /// Argument passed to the agent (repeatable, in order)
    #[arg(long = "agent-arg", value_name = "ARG")]
    pub agent_args: Vec<String>,

    /// Working directory for the agent process and the session
    #[arg(long, value_name = "DIR")]
    pub cwd: Option<PathBuf>,

    /// Prompt timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub prompt_timeout: Option<u64>,

    /// Enable diagnostic mode (auto-log to temp file)
    #[arg(short, long)]
    pub diagnostic: bool,

    /// Log directory (implies diagnostic mode)
    #[arg(short = 'l', long, value_name = "DIR")]
    pub log_dir: Option<PathBuf>,

    /// Log file name (implies diagnostic mode)
    #[arg(short = 'f', long, value_name = "FILE")]
    pub log_file: Option<String>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    /// Note: RUST_LOG env var takes priority over this flag
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (only errors)
    /// Note: RUST_LOG env var takes priority over this flag
    #[arg(short, long)]
    pub quiet: bool,
}

#[allow(clippy::derivable_impls)]
impl Default for Cli {
    fn default() -> Self {
        Self {
            agent_path: None,
            agent_args: Vec::new(),
            cwd: None,
            prompt_timeout: None,
            diagnostic: false,
            log_dir: None,
            log_file: None,
            verbose: 0,
            quiet: false,
        }
    }
}

impl Cli {
    /// Check if diagnostic mode is enabled (output to file)
    ///
    /// Returns true if `--diagnostic` is set, or if `--log-dir` or `--log-file` is specified.
    pub fn is_diagnostic(&self) -> bool {
        self.diagnostic || self.log_dir.is_some() || self.log_file.is_some()
    }

    /// Get the log level based on CLI arguments
    ///
    /// - `--quiet`: ERROR
    /// - default: INFO
    /// - `-v`: DEBUG
    /// - `-vv` or more: TRACE
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else {
            match self.verbose {
                0 => tracing::Level::INFO,
                1 => tracing::Level::DEBUG,
                _ => tracing::Level::TRACE,
            }
        }
    }

    /// Get the log file path for diagnostic mode
    ///
    /// Uses the specified log directory and file name, or defaults to:
    /// - Directory: system temp directory
    /// - File: `acp-bridge-{timestamp}.log`
    pub fn log_path(&self) -> PathBuf {
        let dir = self.log_dir.clone().unwrap_or_else(std::env::temp_dir);

        let filename = self.log_file.clone().unwrap_or_else(|| {
            let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
            format!("acp-bridge-{timestamp}.log")
        });

        dir.join(filename)
    }

    /// Build the bridge configuration: env defaults overlaid with CLI flags
    pub fn to_config(&self) -> BridgeConfig {
        let mut config = BridgeConfig::from_env();

        if let Some(path) = &self.agent_path {
            config.agent_path = path.clone();
        }
        if !self.agent_args.is_empty() {
            config.agent_args = self.agent_args.clone();
        }
        if let Some(cwd) = &self.cwd {
            config.cwd = cwd.clone();
        }
        if let Some(secs) = self.prompt_timeout {
            config.prompt_timeout = Duration::from_secs(secs);
        }
        config
    }
}
