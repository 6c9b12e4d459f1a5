//! ACP Bridge binary
//!
//! Run with: cargo run
//!
//! For help: cargo run -- --help

use acp_bridge::{AcpBridge, BridgeError, Cli, logging};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(&cli)?;

    let bridge = AcpBridge::start(cli.to_config())?;
    bridge.initialize().await;

    let status = bridge.status().await;
    if status.session_id.is_none() {
        eprintln!("warning: no session established; prompts will be rejected");
    }

    // Line-oriented driver: each stdin line is one prompt turn. Log output
    // goes to stderr, so stdout carries only the agent's replies.
    let result = tokio::select! {
        result = drive(&bridge) => result,
        _ = signal::ctrl_c() => {
            eprintln!("Received SIGINT, shutting down...");
            Ok(())
        }
        _ = async {
            #[cfg(unix)]
            {
                let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
                    .expect("Failed to register SIGTERM handler");
                sigterm.recv().await
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await
            }
        } => {
            eprintln!("Received SIGTERM, shutting down...");
            Ok(())
        }
    };

    bridge.stop().await?;

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
    Ok(())
}

/// Read prompts from stdin until EOF, printing each reply to stdout
async fn drive(bridge: &AcpBridge) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let prompt = line.trim();
        if prompt.is_empty() {
            continue;
        }

        match bridge.prompt(prompt).await {
            Ok(reply) => {
                println!("{}", reply.text);
                if reply.stop_reason != "end_turn" {
                    eprintln!("(stopped: {})", reply.stop_reason);
                }
            }
            Err(BridgeError::Timeout(ms)) => {
                eprintln!("(no reply within {ms} ms; the turn may still be running)");
            }
            Err(e @ BridgeError::ProcessExited) => {
                eprintln!("Error: {e}");
                break;
            }
            Err(e) => {
                eprintln!("Error: {e}");
            }
        }
    }
    Ok(())
}
