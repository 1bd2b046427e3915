//! Method names and payloads of the agent client protocol

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::events::Usage;
use crate::types::identifiers::SessionId;
use crate::types::updates::ContentBlock;

use super::capabilities::{AgentCapabilities, ClientCapabilities};

/// Protocol version this client speaks
pub const PROTOCOL_VERSION: u16 = 1;

/// Method names
pub mod method {
    /// Handshake
    pub const INITIALIZE: &str = "initialize";
    /// Create a session
    pub const SESSION_NEW: &str = "session/new";
    /// Resume a session
    pub const SESSION_LOAD: &str = "session/load";
    /// Run a turn
    pub const SESSION_PROMPT: &str = "session/prompt";
    /// Switch mode
    pub const SESSION_SET_MODE: &str = "session/set_mode";
    /// Cancel the running turn (notification)
    pub const SESSION_CANCEL: &str = "session/cancel";
    /// Streaming updates (agent notification)
    pub const SESSION_UPDATE: &str = "session/update";
    /// Permission prompt (agent request)
    pub const SESSION_REQUEST_PERMISSION: &str = "session/request_permission";
}

/// Name and version of either side
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Implementation {
    /// Name
    pub name: String,
    /// Version
    pub version: String,
}

/// `initialize` params
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeRequest {
    /// Latest version the client supports
    pub protocol_version: u16,
    /// What the client serves back to the agent
    pub client_capabilities: ClientCapabilities,
    /// Client identity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_info: Option<Implementation>,
}

/// `initialize` result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResponse {
    /// Version chosen by the agent
    pub protocol_version: u16,
    /// What the agent supports
    #[serde(default)]
    pub agent_capabilities: AgentCapabilities,
    /// Authentication methods, kept opaque
    #[serde(default)]
    pub auth_methods: Vec<Value>,
    /// Agent identity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_info: Option<Implementation>,
}

/// `session/new` params
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSessionRequest {
    /// Absolute working directory
    pub cwd: PathBuf,
    /// MCP servers to attach (always empty here)
    #[serde(default)]
    pub mcp_servers: Vec<Value>,
}

/// `session/new` result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSessionResponse {
    /// Id assigned by the agent
    pub session_id: SessionId,
    /// Declared modes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modes: Option<SessionModeState>,
}

/// `session/load` params
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadSessionRequest {
    /// Session to resume
    pub session_id: SessionId,
    /// Absolute working directory
    pub cwd: PathBuf,
    /// MCP servers to attach (always empty here)
    #[serde(default)]
    pub mcp_servers: Vec<Value>,
}

/// `session/load` result
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadSessionResponse {
    /// Declared modes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modes: Option<SessionModeState>,
}

/// Modes declared for a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionModeState {
    /// Mode the session starts in
    pub current_mode_id: String,
    /// Every mode the session can switch to
    #[serde(default)]
    pub available_modes: Vec<SessionMode>,
}

/// One declared mode
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMode {
    /// Mode id
    pub id: String,
    /// Display name
    pub name: String,
    /// Description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// `session/prompt` params
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptRequest {
    /// Target session
    pub session_id: SessionId,
    /// Prompt content
    pub prompt: Vec<ContentBlock>,
}

/// `session/prompt` result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptResponse {
    /// Why the turn ended
    pub stop_reason: String,
    /// Token usage, when the agent reports it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// `session/set_mode` params
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetSessionModeRequest {
    /// Target session
    pub session_id: SessionId,
    /// Mode to switch to
    pub mode_id: String,
}

/// `session/cancel` params
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelNotification {
    /// Session whose turn to cancel
    pub session_id: SessionId,
}
