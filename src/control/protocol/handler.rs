//! Protocol handler for request/response correlation

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::{AgentError, Result};

use super::capabilities::ClientCapabilities;
use super::messages::{JsonRpcMessage, JsonRpcResponse, MessageId};
use super::methods::{Implementation, InitializeRequest, InitializeResponse, PROTOCOL_VERSION};

/// Pending request awaiting response
struct PendingRequest {
    /// Method, for diagnostics
    method: String,
    /// Response channel
    response_tx: oneshot::Sender<Result<Value>>,
}

/// Protocol handler for managing JSON-RPC communication with one agent
///
/// Owns the id counter and the table of requests awaiting a response. The
/// table is a synchronous map. It is never locked across an `.await`.
pub struct ProtocolHandler {
    /// Request ID counter
    next_request_id: AtomicI64,
    /// Pending requests awaiting responses
    pending_requests: Mutex<HashMap<MessageId, PendingRequest>>,
    /// Initialized flag
    initialized: AtomicBool,
}

impl ProtocolHandler {
    /// Create a new protocol handler
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_request_id: AtomicI64::new(1),
            pending_requests: Mutex::new(HashMap::new()),
            initialized: AtomicBool::new(false),
        }
    }

    /// Check if the handshake completed
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Generate next request ID
    #[must_use]
    pub fn next_id(&self) -> MessageId {
        MessageId::Number(self.next_request_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Number of requests still waiting for a response
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending_requests.lock().len()
    }

    /// Create initialization request
    #[must_use]
    pub fn create_init_request(
        &self,
        capabilities: ClientCapabilities,
        client_info: Option<Implementation>,
    ) -> InitializeRequest {
        InitializeRequest {
            protocol_version: PROTOCOL_VERSION,
            client_capabilities: capabilities,
            client_info,
        }
    }

    /// Handle initialization response
    ///
    /// # Errors
    /// Returns error if the agent picked a protocol version newer than ours
    pub fn handle_init_response(&self, response: &InitializeResponse) -> Result<()> {
        if response.protocol_version == 0 || response.protocol_version > PROTOCOL_VERSION {
            return Err(AgentError::handshake(format!(
                "Unsupported protocol version: {} (client supports {PROTOCOL_VERSION})",
                response.protocol_version
            )));
        }

        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Create a request and register a slot for its response
    ///
    /// # Errors
    /// Returns error if `params` cannot be serialized
    pub fn create_request(
        &self,
        method: &str,
        params: &impl Serialize,
    ) -> Result<(JsonRpcMessage, oneshot::Receiver<Result<Value>>)> {
        let params = serde_json::to_value(params)?;
        let id = self.next_id();
        let (response_tx, response_rx) = oneshot::channel();

        self.pending_requests.lock().insert(
            id.clone(),
            PendingRequest {
                method: method.to_string(),
                response_tx,
            },
        );

        Ok((JsonRpcMessage::request(id, method, params), response_rx))
    }

    /// Create a notification
    ///
    /// # Errors
    /// Returns error if `params` cannot be serialized
    pub fn create_notification(
        &self,
        method: &str,
        params: &impl Serialize,
    ) -> Result<JsonRpcMessage> {
        Ok(JsonRpcMessage::notification(
            method,
            serde_json::to_value(params)?,
        ))
    }

    /// Forget a registered request whose frame never went out
    pub fn abandon(&self, id: &MessageId) {
        self.pending_requests.lock().remove(id);
    }

    /// Route a response to the request waiting for it
    ///
    /// Returns `false` if no request with that id is pending.
    pub fn handle_response(&self, response: JsonRpcResponse) -> bool {
        let Some(pending) = self.pending_requests.lock().remove(&response.id) else {
            log::warn!("Response for unknown request id {}", response.id);
            return false;
        };

        let outcome = match response.error {
            Some(error) => {
                log::debug!(
                    "Request {} ({}) failed: {} {}",
                    response.id,
                    pending.method,
                    error.code,
                    error.message
                );
                Err(AgentError::rpc(error.code, error.message, error.data))
            }
            None => Ok(response.result.unwrap_or(Value::Null)),
        };

        // The caller may have stopped waiting
        let _ = pending.response_tx.send(outcome);
        true
    }

    /// Fail every pending request, returning how many there were
    pub fn fail_all(&self, reason: &str) -> usize {
        let drained: Vec<PendingRequest> = self
            .pending_requests
            .lock()
            .drain()
            .map(|(_, pending)| pending)
            .collect();

        let count = drained.len();
        for pending in drained {
            log::debug!("Failing pending {} request: {reason}", pending.method);
            let _ = pending
                .response_tx
                .send(Err(AgentError::connection_closed(reason)));
        }
        count
    }

    /// Serialize a message to one newline-terminated frame
    ///
    /// # Errors
    /// Returns error if JSON serialization fails
    pub fn serialize_message(&self, message: &JsonRpcMessage) -> Result<String> {
        serde_json::to_string(message)
            .map(|s| format!("{s}\n"))
            .map_err(|e| AgentError::json_encode(format!("Failed to serialize message: {e}")))
    }

    /// Interpret a decoded frame as a JSON-RPC message
    ///
    /// # Errors
    /// Returns error if the value is not a request, response or notification
    pub fn parse_message(&self, value: Value) -> Result<JsonRpcMessage> {
        serde_json::from_value(value.clone()).map_err(|e| {
            AgentError::message_parse(format!("Not a JSON-RPC message: {e}"), Some(value))
        })
    }
}

impl Default for ProtocolHandler {
    fn default() -> Self {
        Self::new()
    }
}
