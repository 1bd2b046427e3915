//! JSON-RPC 2.0 envelope types
//!
//! Every frame exchanged with an agent is one of three shapes. They are told
//! apart structurally: requests carry `id` and `method`, responses carry `id`
//! only, notifications carry `method` only.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-RPC protocol version string
pub const JSONRPC_VERSION: &str = "2.0";

/// `Method not found`
pub const METHOD_NOT_FOUND: i64 = -32601;

/// `Invalid params`
pub const INVALID_PARAMS: i64 = -32602;

/// `Internal error`
pub const INTERNAL_ERROR: i64 = -32603;

fn jsonrpc_version() -> String {
    JSONRPC_VERSION.to_string()
}

/// JSON-RPC message id
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageId {
    /// Numeric id (used for every request this crate sends)
    Number(i64),
    /// String id (some agents use these)
    String(String),
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => f.write_str(s),
        }
    }
}

/// Request expecting a response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Always `"2.0"`
    #[serde(default = "jsonrpc_version")]
    pub jsonrpc: String,
    /// Correlation id
    pub id: MessageId,
    /// Method name
    pub method: String,
    /// Parameters
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

/// Response to a request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Always `"2.0"`
    #[serde(default = "jsonrpc_version")]
    pub jsonrpc: String,
    /// Id of the request being answered
    pub id: MessageId,
    /// Result on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error on failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

/// Notification, no response expected
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    /// Always `"2.0"`
    #[serde(default = "jsonrpc_version")]
    pub jsonrpc: String,
    /// Method name
    pub method: String,
    /// Parameters
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

/// JSON-RPC error object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    /// Error code
    pub code: i64,
    /// Error message
    pub message: String,
    /// Extra data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    /// `Method not found` error for `method`
    #[must_use]
    pub fn method_not_found(method: &str) -> Self {
        Self {
            code: METHOD_NOT_FOUND,
            message: "Method not found".to_string(),
            data: Some(Value::String(method.to_string())),
        }
    }

    /// `Invalid params` error
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self {
            code: INVALID_PARAMS,
            message: message.into(),
            data: None,
        }
    }
}

/// Any JSON-RPC frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcMessage {
    /// Request (has `id` and `method`)
    Request(JsonRpcRequest),
    /// Response (has `id`, no `method`)
    Response(JsonRpcResponse),
    /// Notification (has `method`, no `id`)
    Notification(JsonRpcNotification),
}

impl JsonRpcMessage {
    /// Build a request
    pub fn request(id: MessageId, method: impl Into<String>, params: Value) -> Self {
        Self::Request(JsonRpcRequest {
            jsonrpc: jsonrpc_version(),
            id,
            method: method.into(),
            params,
        })
    }

    /// Build a notification
    pub fn notification(method: impl Into<String>, params: Value) -> Self {
        Self::Notification(JsonRpcNotification {
            jsonrpc: jsonrpc_version(),
            method: method.into(),
            params,
        })
    }

    /// Build a success response
    #[must_use]
    pub fn result(id: MessageId, result: Value) -> Self {
        Self::Response(JsonRpcResponse {
            jsonrpc: jsonrpc_version(),
            id,
            result: Some(result),
            error: None,
        })
    }

    /// Build an error response
    #[must_use]
    pub fn error(id: MessageId, error: RpcError) -> Self {
        Self::Response(JsonRpcResponse {
            jsonrpc: jsonrpc_version(),
            id,
            result: None,
            error: Some(error),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn distinguishes_frame_shapes() {
        let request: JsonRpcMessage = serde_json::from_value(json!({
            "jsonrpc": "2.0", "id": 7, "method": "session/request_permission", "params": {}
        }))
        .unwrap();
        assert!(matches!(request, JsonRpcMessage::Request(ref r) if r.id == MessageId::Number(7)));

        let response: JsonRpcMessage = serde_json::from_value(json!({
            "jsonrpc": "2.0", "id": "abc", "result": {"stopReason": "end_turn"}
        }))
        .unwrap();
        assert!(matches!(response, JsonRpcMessage::Response(_)));

        let notification: JsonRpcMessage = serde_json::from_value(json!({
            "jsonrpc": "2.0", "method": "session/update", "params": {"sessionId": "s"}
        }))
        .unwrap();
        assert!(matches!(notification, JsonRpcMessage::Notification(_)));
    }

    #[test]
    fn null_result_still_parses_as_response() {
        let response: JsonRpcMessage =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":3,"result":null}"#).unwrap();
        match response {
            JsonRpcMessage::Response(r) => {
                assert_eq!(r.id, MessageId::Number(3));
                assert!(r.error.is_none());
            }
            other => panic!("expected response, got {other:?}"),
        }
    }
}
