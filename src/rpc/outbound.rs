//! Outbound writer over the agent's stdin
//!
//! All protocol writes funnel through one `Outbound` so lines never
//! interleave. A write failure surfaces as a `Pipe` error to the specific
//! caller; it never crashes the bridge.

use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, oneshot};

use super::codec::{self, Message, RpcError};
use super::pending::{CallReply, PendingCalls};
use crate::types::{BridgeError, Result};

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Serialized writer for the agent's stdin
pub struct Outbound {
    /// `None` after `close()`: stdin has been dropped to signal EOF
    writer: Mutex<Option<BoxedWriter>>,
    pending: Arc<PendingCalls>,
}

impl std::fmt::Debug for Outbound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Outbound").finish_non_exhaustive()
    }
}

impl Outbound {
    /// Create a writer over the agent's stdin
    pub fn new(writer: impl AsyncWrite + Send + Unpin + 'static, pending: Arc<PendingCalls>) -> Self {
        Self {
            writer: Mutex::new(Some(Box::new(writer))),
            pending,
        }
    }

    /// Send a request and return the receiver its response will arrive on
    ///
    /// The registration happens before the write so a fast response cannot
    /// race past its waiter. On a write failure the registration is
    /// discarded and the error returned to this caller alone.
    pub async fn request(&self, method: &str, params: Value) -> Result<oneshot::Receiver<CallReply>> {
        let (id, rx) = self.pending.register();
        let line = codec::encode(&Message::request(id, method, params));

        tracing::debug!(id, method, "sending request");
        if let Err(e) = self.write_line(&line).await {
            self.pending.discard(id);
            return Err(e);
        }
        Ok(rx)
    }

    /// Send a success response for a server-initiated request
    pub async fn respond(&self, id: Value, result: Value) -> Result<()> {
        self.write_line(&codec::encode(&Message::ok(id, result))).await
    }

    /// Send an error response for a server-initiated request
    pub async fn respond_err(&self, id: Value, error: RpcError) -> Result<()> {
        self.write_line(&codec::encode(&Message::err(id, error))).await
    }

    /// Send a notification (no response expected)
    pub async fn notify(&self, method: &str, params: Value) -> Result<()> {
        self.write_line(&codec::encode(&Message::notification(method, params)))
            .await
    }

    /// Close the agent's stdin, signalling EOF
    ///
    /// Later writes fail with a `Pipe` error. First phase of the two-phase
    /// shutdown; the supervisor handles terminate/kill.
    pub async fn close(&self) {
        if self.writer.lock().await.take().is_some() {
            tracing::debug!("agent stdin closed");
        }
    }

    async fn write_line(&self, line: &str) -> Result<()> {
        let mut guard = self.writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            return Err(BridgeError::pipe("agent stdin closed"));
        };

        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| BridgeError::pipe(e.to_string()))?;
        writer
            .flush()
            .await
            .map_err(|e| BridgeError::pipe(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncBufReadExt, BufReader};

    fn outbound_pair() -> (Outbound, Arc<PendingCalls>, tokio::io::DuplexStream) {
        let (write_side, read_side) = tokio::io::duplex(4096);
        let pending = Arc::new(PendingCalls::new());
        (Outbound::new(write_side, pending.clone()), pending, read_side)
    }

    #[tokio::test]
    async fn test_request_writes_correlated_line_and_registers() {
        let (outbound, pending, read_side) = outbound_pair();
        let mut lines = BufReader::new(read_side).lines();

        let _rx = outbound
            .request("session/prompt", json!({"text": "hi"}))
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);

        let line = lines.next_line().await.unwrap().unwrap();
        let v: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(v["method"], json!("session/prompt"));
        assert_eq!(v["id"], json!(1));
        assert_eq!(v["jsonrpc"], json!("2.0"));
    }

    #[tokio::test]
    async fn test_respond_echoes_server_request_id() {
        let (outbound, _pending, read_side) = outbound_pair();
        let mut lines = BufReader::new(read_side).lines();

        outbound
            .respond(json!("srv-9"), json!({"outcome": {"outcome": "granted"}}))
            .await
            .unwrap();

        let line = lines.next_line().await.unwrap().unwrap();
        let v: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(v["id"], json!("srv-9"));
        assert_eq!(v["result"]["outcome"]["outcome"], json!("granted"));
    }

    #[tokio::test]
    async fn test_write_after_close_is_a_pipe_error() {
        let (outbound, pending, _read_side) = outbound_pair();
        outbound.close().await;

        let err = outbound.request("initialize", json!({})).await.unwrap_err();
        assert!(matches!(err, BridgeError::Pipe(_)));
        // Failed writes leave nothing behind in the table.
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn test_write_to_dead_peer_discards_registration() {
        let (outbound, pending, read_side) = outbound_pair();
        drop(read_side);

        let err = outbound.request("initialize", json!({})).await.unwrap_err();
        assert!(matches!(err, BridgeError::Pipe(_)));
        assert!(pending.is_empty());
    }
}
