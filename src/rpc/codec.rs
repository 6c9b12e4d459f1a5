//! Newline-delimited JSON-RPC 2.0 wire codec
//!
//! The agent protocol is one JSON-RPC message per line over the child's
//! stdin/stdout. Decoding is tolerant: a line that fails to decode is
//! reported as `MalformedMessage` so the reader loop can log and skip it;
//! it never terminates the stream.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::types::{BridgeError, Result};

/// JSON-RPC error object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    /// Error code
    pub code: i64,
    /// Human-readable message
    pub message: String,
    /// Optional structured payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    /// Create a new error object
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Method-not-found error (-32601)
    pub fn method_not_found(message: impl Into<String>) -> Self {
        Self::new(-32601, message)
    }

    /// Invalid-params error (-32602)
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(-32602, message)
    }

    /// Internal error (-32603)
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(-32603, message)
    }
}

/// One JSON-RPC message
///
/// A Request and a Notification are distinguished solely by the presence of
/// `id`; a Response carries exactly one of `result` / `error`.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// A call that expects a correlated response
    Request {
        /// Correlation id; ours are numeric, the agent's may be any JSON value
        id: Value,
        /// Method name
        method: String,
        /// Parameters (Null when absent)
        params: Value,
    },
    /// A correlated reply to a request
    Response {
        /// Correlation id of the request being answered
        id: Value,
        /// Success payload
        result: Option<Value>,
        /// Failure payload
        error: Option<RpcError>,
    },
    /// A fire-and-forget message; no response expected
    Notification {
        /// Method name
        method: String,
        /// Parameters (Null when absent)
        params: Value,
    },
}

impl Message {
    /// Build a request
    pub fn request(id: u64, method: impl Into<String>, params: Value) -> Self {
        Message::Request {
            id: json!(id),
            method: method.into(),
            params,
        }
    }

    /// Build a success response
    pub fn ok(id: Value, result: Value) -> Self {
        Message::Response {
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Build an error response
    pub fn err(id: Value, error: RpcError) -> Self {
        Message::Response {
            id,
            result: None,
            error: Some(error),
        }
    }

    /// Build a notification
    pub fn notification(method: impl Into<String>, params: Value) -> Self {
        Message::Notification {
            method: method.into(),
            params,
        }
    }
}

/// Encode a message as a single line with a trailing newline
pub fn encode(msg: &Message) -> String {
    let value = match msg {
        Message::Request { id, method, params } => json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        }),
        Message::Response {
            id,
            result: Some(result),
            ..
        } => json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": result,
        }),
        Message::Response { id, error, .. } => json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": error,
        }),
        Message::Notification { method, params } => json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
        }),
    };

    let mut line = value.to_string();
    line.push('\n');
    line
}

/// Decode one line into a message
///
/// Fails with `MalformedMessage` on invalid JSON or on a structure matching
/// none of the three message shapes.
pub fn decode(line: &str) -> Result<Message> {
    let value: Value = serde_json::from_str(line)
        .map_err(|e| BridgeError::malformed(format!("invalid JSON: {e}")))?;

    let Some(obj) = value.as_object() else {
        return Err(BridgeError::malformed("not a JSON object"));
    };

    // Requests and notifications carry a method name.
    if let Some(method) = obj.get("method") {
        let Some(method) = method.as_str() else {
            return Err(BridgeError::malformed("method is not a string"));
        };
        let params = obj.get("params").cloned().unwrap_or(Value::Null);

        return Ok(match obj.get("id") {
            Some(id) => Message::Request {
                id: id.clone(),
                method: method.to_string(),
                params,
            },
            None => Message::Notification {
                method: method.to_string(),
                params,
            },
        });
    }

    // Responses carry an id and exactly one of result / error.
    if let Some(id) = obj.get("id") {
        let result = obj.get("result").cloned();
        let error = obj
            .get("error")
            .cloned()
            .map(serde_json::from_value::<RpcError>)
            .transpose()
            .map_err(|e| BridgeError::malformed(format!("invalid error object: {e}")))?;

        if result.is_some() == error.is_some() {
            return Err(BridgeError::malformed(
                "response must carry exactly one of result/error",
            ));
        }

        return Ok(Message::Response {
            id: id.clone(),
            result,
            error,
        });
    }

    Err(BridgeError::malformed("matches no JSON-RPC message shape"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_encode_request() {
        let msg = Message::request(7, "session/prompt", json!({"text": "hi"}));
        let line = encode(&msg);

        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);

        let v: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(v["jsonrpc"], json!("2.0"));
        assert_eq!(v["id"], json!(7));
        assert_eq!(v["method"], json!("session/prompt"));
        assert_eq!(v["params"]["text"], json!("hi"));
    }

    #[test]
    fn test_encode_response_has_one_payload_field() {
        let ok = encode(&Message::ok(json!(3), json!({"done": true})));
        let v: Value = serde_json::from_str(&ok).unwrap();
        assert!(v.get("result").is_some());
        assert!(v.get("error").is_none());

        let err = encode(&Message::err(json!("req-1"), RpcError::method_not_found("nope")));
        let v: Value = serde_json::from_str(&err).unwrap();
        assert!(v.get("result").is_none());
        assert_eq!(v["error"]["code"], json!(-32601));
        // Server-request ids are echoed back verbatim, strings included.
        assert_eq!(v["id"], json!("req-1"));
    }

    #[test]
    fn test_decode_request_vs_notification() {
        let req = decode(r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#).unwrap();
        assert!(matches!(req, Message::Request { .. }));

        let note = decode(r#"{"jsonrpc":"2.0","method":"session/update","params":{}}"#).unwrap();
        assert!(matches!(note, Message::Notification { .. }));
    }

    #[test]
    fn test_decode_response() {
        let msg = decode(r#"{"jsonrpc":"2.0","id":5,"result":{"sessionId":"s"}}"#).unwrap();
        match msg {
            Message::Response { id, result, error } => {
                assert_eq!(id, json!(5));
                assert_eq!(result.unwrap()["sessionId"], json!("s"));
                assert!(error.is_none());
            }
            other => panic!("expected response, got {other:?}"),
        }

        let msg =
            decode(r#"{"jsonrpc":"2.0","id":5,"error":{"code":-32603,"message":"boom"}}"#).unwrap();
        match msg {
            Message::Response { error, result, .. } => {
                assert!(result.is_none());
                assert_eq!(error.unwrap(), RpcError::internal("boom"));
            }
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_missing_params_defaults_to_null() {
        let msg = decode(r#"{"jsonrpc":"2.0","method":"session/update"}"#).unwrap();
        match msg {
            Message::Notification { params, .. } => assert_eq!(params, Value::Null),
            other => panic!("expected notification, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_rejects_invalid_json() {
        assert!(matches!(
            decode("not json at all"),
            Err(BridgeError::MalformedMessage(_))
        ));
    }

    #[test]
    fn test_decode_rejects_wrong_shapes() {
        // Valid JSON, but none of the three shapes.
        assert!(decode(r#"{"jsonrpc":"2.0","foo":"bar"}"#).is_err());
        assert!(decode(r#"[1,2,3]"#).is_err());
        assert!(decode(r#""just a string""#).is_err());
        // Both result and error present.
        assert!(decode(r#"{"id":1,"result":{},"error":{"code":1,"message":"x"}}"#).is_err());
        // Neither result nor error.
        assert!(decode(r#"{"id":1}"#).is_err());
        // Non-string method.
        assert!(decode(r#"{"id":1,"method":42}"#).is_err());
    }

    #[test]
    fn test_round_trip_preserves_string_ids() {
        let msg = Message::ok(json!("abc-123"), json!({}));
        let decoded = decode(&encode(&msg)).unwrap();
        assert_eq!(decoded, msg);
    }
}
