//! Pending-call table
//!
//! Tracks in-flight outbound requests by correlation id so the reader loop
//! can hand each response to the caller that issued it. The id counter and
//! the table share one mutex: id generation and registration are a single
//! critical section, and an id is never reused.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use serde_json::Value;
use tokio::sync::oneshot;

use crate::types::BridgeError;

/// Outcome delivered to a waiting caller
pub type CallReply = std::result::Result<Value, BridgeError>;

/// One in-flight request
#[derive(Debug)]
struct PendingCall {
    /// Completion slot; consumed on first completion
    sender: oneshot::Sender<CallReply>,
    /// When the request was registered
    created_at: Instant,
}

#[derive(Debug, Default)]
struct PendingInner {
    next_id: u64,
    calls: HashMap<u64, PendingCall>,
}

/// Table of in-flight outbound requests
#[derive(Debug, Default)]
pub struct PendingCalls {
    inner: Mutex<PendingInner>,
}

impl PendingCalls {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> MutexGuard<'_, PendingInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocate the next correlation id without registering a waiter
    ///
    /// Used for prompt accumulator ids, which share the id space with
    /// requests but never appear on the wire.
    pub fn reserve_id(&self) -> u64 {
        let mut inner = self.inner();
        inner.next_id += 1;
        inner.next_id
    }

    /// Allocate an id and register a waiter for it, atomically
    pub fn register(&self) -> (u64, oneshot::Receiver<CallReply>) {
        let (tx, rx) = oneshot::channel();
        let mut inner = self.inner();
        inner.next_id += 1;
        let id = inner.next_id;
        inner.calls.insert(
            id,
            PendingCall {
                sender: tx,
                created_at: Instant::now(),
            },
        );
        (id, rx)
    }

    /// Complete a pending call, releasing its waiter
    ///
    /// A late or duplicate response (id absent) is logged and ignored.
    pub fn complete(&self, id: u64, reply: CallReply) {
        let call = self.inner().calls.remove(&id);
        match call {
            Some(call) => {
                let waited = call.created_at.elapsed();
                if call.sender.send(reply).is_err() {
                    // Caller gave up (timeout) before the response arrived.
                    tracing::debug!(id, ?waited, "response arrived after caller stopped waiting");
                } else {
                    tracing::trace!(id, ?waited, "completed pending call");
                }
            }
            None => {
                tracing::warn!(id, "response for unknown or already-completed call");
            }
        }
    }

    /// Drop a registration after a failed write
    pub fn discard(&self, id: u64) {
        self.inner().calls.remove(&id);
    }

    /// Release every still-pending waiter with a synthetic process-exited error
    ///
    /// Called when the agent's output stream closes; guarantees no caller
    /// blocks forever after the child dies. The table is empty afterwards.
    pub fn fail_all(&self) {
        let calls = std::mem::take(&mut self.inner().calls);
        let count = calls.len();
        for (id, call) in calls {
            if call.sender.send(Err(BridgeError::ProcessExited)).is_err() {
                tracing::debug!(id, "caller already gone during fail_all");
            }
        }
        if count > 0 {
            tracing::info!(count, "failed all pending calls: agent process exited");
        }
    }

    /// Number of calls currently in flight
    pub fn len(&self) -> usize {
        self.inner().calls.len()
    }

    /// Whether no calls are in flight
    pub fn is_empty(&self) -> bool {
        self.inner().calls.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ids_are_monotonic_and_unique() {
        let table = PendingCalls::new();
        let (a, _rx_a) = table.register();
        let reserved = table.reserve_id();
        let (b, _rx_b) = table.register();

        assert!(a < reserved);
        assert!(reserved < b);
        // Reserved ids are not registered.
        assert_eq!(table.len(), 2);
    }

    #[tokio::test]
    async fn test_responses_pair_with_their_callers_in_any_order() {
        let table = PendingCalls::new();
        let (id1, rx1) = table.register();
        let (id2, rx2) = table.register();
        let (id3, rx3) = table.register();

        // Complete in shuffled order.
        table.complete(id2, Ok(json!({"n": 2})));
        table.complete(id3, Ok(json!({"n": 3})));
        table.complete(id1, Ok(json!({"n": 1})));

        assert_eq!(rx1.await.unwrap().unwrap()["n"], json!(1));
        assert_eq!(rx2.await.unwrap().unwrap()["n"], json!(2));
        assert_eq!(rx3.await.unwrap().unwrap()["n"], json!(3));
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_complete_unknown_id_is_a_no_op() {
        let table = PendingCalls::new();
        let (id, rx) = table.register();

        table.complete(id + 100, Ok(json!("stray")));
        assert_eq!(table.len(), 1);

        table.complete(id, Ok(json!("real")));
        assert_eq!(rx.await.unwrap().unwrap(), json!("real"));

        // Duplicate completion after removal: still a no-op.
        table.complete(id, Ok(json!("dup")));
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_fail_all_releases_every_waiter() {
        let table = PendingCalls::new();
        let mut receivers = Vec::new();
        for _ in 0..5 {
            let (_, rx) = table.register();
            receivers.push(rx);
        }

        table.fail_all();

        for rx in receivers {
            let reply = rx.await.unwrap();
            assert!(matches!(reply, Err(BridgeError::ProcessExited)));
        }
        assert!(table.is_empty());
    }

    #[test]
    fn test_discard_removes_registration() {
        let table = PendingCalls::new();
        let (id, _rx) = table.register();
        table.discard(id);
        assert!(table.is_empty());
    }
}
