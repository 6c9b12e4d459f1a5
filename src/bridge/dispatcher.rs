//! Server-request dispatcher
//!
//! Handles RPC calls initiated by the agent: permission prompts, terminal
//! command execution, filesystem access. Every inbound request gets exactly
//! one correlated response; an unanswered request would stall the agent's
//! own request queue.
//!
//! Policy: the bridge is headless, so permission requests are always
//! granted, and it exposes no filesystem, so `fs/*` methods are declined.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Value, json};

use crate::rpc::{Outbound, RpcError};
use crate::terminal::TerminalManager;

/// `terminal/create` parameters
#[derive(Debug, Deserialize)]
struct CreateTerminalParams {
    command: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    cwd: Option<String>,
}

/// Parameters for the terminal methods that address an existing handle
#[derive(Debug, Deserialize)]
struct TerminalIdParams {
    #[serde(rename = "terminalId")]
    terminal_id: String,
}

/// Dispatcher for agent-initiated requests
#[derive(Debug)]
pub struct ServerDispatcher {
    outbound: Arc<Outbound>,
    terminals: Arc<TerminalManager>,
}

impl ServerDispatcher {
    /// Create a dispatcher writing responses through `outbound`
    pub fn new(outbound: Arc<Outbound>, terminals: Arc<TerminalManager>) -> Self {
        Self {
            outbound,
            terminals,
        }
    }

    /// Handle one server-initiated request and write its response
    pub async fn handle(&self, id: Value, method: &str, params: Value) {
        tracing::debug!(method, "server-initiated request");

        let outcome = match method {
            "session/request_permission" => self.grant_permission(&params),
            m if m.starts_with("fs/") => {
                tracing::info!(method = m, "declining filesystem request");
                Err(RpcError::method_not_found("Method not supported by bridge"))
            }
            "terminal/create" => self.terminal_create(params).await,
            "terminal/output" => self.terminal_output(params).await,
            "terminal/kill" => self.terminal_kill(params).await,
            "terminal/release" => self.terminal_release(params).await,
            other => {
                tracing::warn!(method = other, "unknown server request");
                Err(RpcError::method_not_found("Not implemented"))
            }
        };

        let write_result = match outcome {
            Ok(result) => self.outbound.respond(id, result).await,
            Err(error) => self.outbound.respond_err(id, error).await,
        };
        if let Err(e) = write_result {
            // The reader loop notices the dead pipe through EOF; here we
            // can only log.
            tracing::warn!(method, error = %e, "failed to write response to agent");
        }
    }

    fn grant_permission(&self, params: &Value) -> Result<Value, RpcError> {
        tracing::info!(request = %params, "permission requested, auto-granting");
        Ok(json!({"outcome": {"outcome": "granted"}}))
    }

    async fn terminal_create(&self, params: Value) -> Result<Value, RpcError> {
        let params: CreateTerminalParams = parse(params)?;
        let id = self
            .terminals
            .create(&params.command, &params.args, params.cwd.as_deref())
            .await
            .map_err(|e| RpcError::internal(e.to_string()))?;
        Ok(json!({"terminalId": id}))
    }

    async fn terminal_output(&self, params: Value) -> Result<Value, RpcError> {
        let params: TerminalIdParams = parse(params)?;
        let out = self
            .terminals
            .output(&params.terminal_id)
            .await
            .map_err(|e| e.to_rpc_error())?;
        Ok(json!({
            "output": out.output,
            "exitCode": out.exit_code,
            "isRunning": out.is_running,
        }))
    }

    async fn terminal_kill(&self, params: Value) -> Result<Value, RpcError> {
        let params: TerminalIdParams = parse(params)?;
        self.terminals
            .kill(&params.terminal_id)
            .await
            .map_err(|e| e.to_rpc_error())?;
        Ok(json!({}))
    }

    async fn terminal_release(&self, params: Value) -> Result<Value, RpcError> {
        let params: TerminalIdParams = parse(params)?;
        // Idempotent: unknown handles still acknowledge.
        self.terminals.release(&params.terminal_id).await;
        Ok(json!({}))
    }
}

fn parse<T: serde::de::DeserializeOwned>(params: Value) -> Result<T, RpcError> {
    serde_json::from_value(params).map_err(|e| RpcError::invalid_params(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::PendingCalls;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, BufReader, DuplexStream, Lines};

    fn dispatcher() -> (ServerDispatcher, Lines<BufReader<DuplexStream>>) {
        let (write_side, read_side) = tokio::io::duplex(8192);
        let pending = Arc::new(PendingCalls::new());
        let outbound = Arc::new(Outbound::new(write_side, pending));
        let terminals = Arc::new(TerminalManager::new(Duration::from_secs(10)));
        (
            ServerDispatcher::new(outbound, terminals),
            BufReader::new(read_side).lines(),
        )
    }

    async fn next_response(lines: &mut Lines<BufReader<DuplexStream>>) -> Value {
        let line = lines.next_line().await.unwrap().unwrap();
        serde_json::from_str(&line).unwrap()
    }

    #[tokio::test]
    async fn test_permission_requests_are_auto_granted() {
        let (dispatcher, mut lines) = dispatcher();
        dispatcher
            .handle(
                json!(11),
                "session/request_permission",
                json!({"toolCall": {"title": "Bash"}}),
            )
            .await;

        let v = next_response(&mut lines).await;
        assert_eq!(v["id"], json!(11));
        assert_eq!(v["result"]["outcome"]["outcome"], json!("granted"));
    }

    #[tokio::test]
    async fn test_fs_methods_are_declined() {
        let (dispatcher, mut lines) = dispatcher();
        dispatcher
            .handle(json!(5), "fs/read_text_file", json!({"path": "/etc/passwd"}))
            .await;

        let v = next_response(&mut lines).await;
        assert_eq!(v["id"], json!(5));
        assert_eq!(v["error"]["code"], json!(-32601));
        assert!(v.get("result").is_none());
    }

    #[tokio::test]
    async fn test_unknown_methods_get_not_implemented() {
        let (dispatcher, mut lines) = dispatcher();
        dispatcher.handle(json!("x-1"), "session/mystery", json!({})).await;

        let v = next_response(&mut lines).await;
        assert_eq!(v["id"], json!("x-1"));
        assert_eq!(v["error"]["code"], json!(-32601));
    }

    #[tokio::test]
    async fn test_terminal_lifecycle_over_the_wire() {
        let (dispatcher, mut lines) = dispatcher();

        dispatcher
            .handle(
                json!(1),
                "terminal/create",
                json!({"command": "sh", "args": ["-c", "echo wired"]}),
            )
            .await;
        let v = next_response(&mut lines).await;
        let terminal_id = v["result"]["terminalId"].as_str().unwrap().to_string();
        assert!(terminal_id.starts_with("term-"));

        // Poll output until the command finishes.
        let mut finished = None;
        for _ in 0..100 {
            dispatcher
                .handle(json!(2), "terminal/output", json!({"terminalId": terminal_id}))
                .await;
            let v = next_response(&mut lines).await;
            if v["result"]["isRunning"] == json!(false) {
                finished = Some(v);
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        let v = finished.expect("command never finished");
        assert!(v["result"]["output"].as_str().unwrap().contains("wired"));
        assert_eq!(v["result"]["exitCode"], json!(0));

        dispatcher
            .handle(json!(3), "terminal/release", json!({"terminalId": terminal_id}))
            .await;
        let v = next_response(&mut lines).await;
        assert_eq!(v["result"], json!({}));
    }

    #[tokio::test]
    async fn test_release_unknown_terminal_still_acknowledges() {
        let (dispatcher, mut lines) = dispatcher();
        dispatcher
            .handle(json!(9), "terminal/release", json!({"terminalId": "term-ghost"}))
            .await;

        let v = next_response(&mut lines).await;
        assert_eq!(v["id"], json!(9));
        assert_eq!(v["result"], json!({}));
        assert!(v.get("error").is_none());
    }

    #[tokio::test]
    async fn test_output_for_unknown_terminal_is_an_error() {
        let (dispatcher, mut lines) = dispatcher();
        dispatcher
            .handle(json!(4), "terminal/output", json!({"terminalId": "term-ghost"}))
            .await;

        let v = next_response(&mut lines).await;
        assert_eq!(v["error"]["code"], json!(-32001));
    }

    #[tokio::test]
    async fn test_bad_terminal_params_are_invalid_params() {
        let (dispatcher, mut lines) = dispatcher();
        dispatcher.handle(json!(6), "terminal/create", json!({})).await;

        let v = next_response(&mut lines).await;
        assert_eq!(v["error"]["code"], json!(-32602));
    }
}
