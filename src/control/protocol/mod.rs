//! JSON-RPC protocol implementation for agent communication
//!
//! This module provides the protocol handler and message types used to talk
//! to agents over newline-framed JSON-RPC 2.0.
//!
//! # Overview
//!
//! The protocol layer covers:
//! - Request/response correlation by message id
//! - Handshake (`initialize`) and version negotiation
//! - Capability flags exchanged during the handshake
//! - Typed payloads for every session method
//!
//! # Example
//!
//! ```rust
//! use kodegen_acp_bridge::control::{ClientCapabilities, JsonRpcMessage, ProtocolHandler, method};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let handler = ProtocolHandler::new();
//! let init = handler.create_init_request(ClientCapabilities::empty(), None);
//! let (request, _response_rx) = handler.create_request(method::INITIALIZE, &init)?;
//!
//! let frame = handler.serialize_message(&request)?;
//! assert!(frame.ends_with('\n'));
//! assert_eq!(handler.pending_count(), 1);
//! # Ok(())
//! # }
//! ```

mod capabilities;
mod handler;
mod messages;
mod methods;

// Re-export public types
pub use capabilities::{AgentCapabilities, ClientCapabilities};
pub use handler::ProtocolHandler;
pub use messages::{
    INTERNAL_ERROR, INVALID_PARAMS, JSONRPC_VERSION, JsonRpcMessage, JsonRpcNotification,
    JsonRpcRequest, JsonRpcResponse, METHOD_NOT_FOUND, MessageId, RpcError,
};
pub use methods::{
    CancelNotification, Implementation, InitializeRequest, InitializeResponse,
    LoadSessionRequest, LoadSessionResponse, NewSessionRequest, NewSessionResponse,
    PROTOCOL_VERSION, PromptRequest, PromptResponse, SessionMode, SessionModeState,
    SetSessionModeRequest, method,
};
