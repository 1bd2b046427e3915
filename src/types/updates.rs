//! Payloads of the `session/update` notification
//!
//! Agents stream everything that happens inside a turn through this one
//! notification, tagged by `sessionUpdate`. Tags this crate does not know
//! deserialize to [`SessionUpdate::Unknown`] so they can be logged and dropped.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::identifiers::{SessionId, ToolCallId};

/// `session/update` notification params
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionNotification {
    /// Session the update belongs to
    pub session_id: SessionId,
    /// The update itself
    pub update: SessionUpdate,
}

/// Tagged union of session updates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "sessionUpdate", rename_all = "snake_case")]
pub enum SessionUpdate {
    /// Echo of user input (replayed on `session/load`)
    UserMessageChunk(ContentChunk),
    /// Assistant text delta
    AgentMessageChunk(ContentChunk),
    /// Assistant "thought" delta
    AgentThoughtChunk(ContentChunk),
    /// First report of a tool call
    ToolCall(ToolCallFields),
    /// Follow-up report for a known tool call
    ToolCallUpdate(ToolCallFields),
    /// Full replacement of the agent's plan
    Plan(PlanUpdate),
    /// Slash commands the agent offers
    AvailableCommandsUpdate(AvailableCommands),
    /// The agent switched the session's mode
    CurrentModeUpdate(CurrentModeUpdate),
    /// Any tag not listed above
    #[serde(other)]
    Unknown,
}

impl SessionUpdate {
    /// Wire tag of this update, for logging
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UserMessageChunk(_) => "user_message_chunk",
            Self::AgentMessageChunk(_) => "agent_message_chunk",
            Self::AgentThoughtChunk(_) => "agent_thought_chunk",
            Self::ToolCall(_) => "tool_call",
            Self::ToolCallUpdate(_) => "tool_call_update",
            Self::Plan(_) => "plan",
            Self::AvailableCommandsUpdate(_) => "available_commands_update",
            Self::CurrentModeUpdate(_) => "current_mode_update",
            Self::Unknown => "unknown",
        }
    }
}

// ============================================================================
// Content
// ============================================================================

/// Wrapper around one content block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentChunk {
    /// Content of the chunk
    pub content: ContentBlock,
}

impl ContentChunk {
    /// Text chunk
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: ContentBlock::Text { text: text.into() },
        }
    }
}

/// Content block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain text
    Text {
        /// The text
        text: String,
    },
    /// Link to a resource the agent referenced
    ResourceLink {
        /// Resource URI
        uri: String,
        /// Optional display name
        #[serde(default)]
        name: Option<String>,
    },
    /// Images, audio and embedded resources
    #[serde(other)]
    Other,
}

// ============================================================================
// Tool calls
// ============================================================================

/// Tool call status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    /// Not started yet
    Pending,
    /// Running
    InProgress,
    /// Finished successfully
    Completed,
    /// Finished with an error
    Failed,
}

impl ToolCallStatus {
    /// Completed or failed
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Wire name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// File location touched by a tool call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallLocation {
    /// Path of the file
    pub path: String,
    /// Optional line number
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

/// Fields shared by `tool_call` and `tool_call_update`
///
/// Every field except the id is optional on updates. Only fields that are
/// present carry news.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallFields {
    /// Tool call id
    pub tool_call_id: ToolCallId,
    /// Human readable title
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Tool category (read, edit, execute, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Current status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ToolCallStatus>,
    /// Raw tool input
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_input: Option<Value>,
    /// Raw tool output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_output: Option<Value>,
    /// Files the call touches
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locations: Option<Vec<ToolCallLocation>>,
    /// Produced content (diffs, terminal output, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Vec<Value>>,
}

impl ToolCallFields {
    /// Fields with only the id set
    pub fn new(tool_call_id: impl Into<ToolCallId>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            title: None,
            kind: None,
            status: None,
            raw_input: None,
            raw_output: None,
            locations: None,
            content: None,
        }
    }

    /// Set the title
    #[must_use]
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Set the status
    #[must_use]
    pub fn status(mut self, status: ToolCallStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Set the raw input
    #[must_use]
    pub fn raw_input(mut self, raw_input: impl Into<Value>) -> Self {
        self.raw_input = Some(raw_input.into());
        self
    }

    /// Add a location
    #[must_use]
    pub fn location(mut self, path: impl Into<String>) -> Self {
        self.locations.get_or_insert_with(Vec::new).push(ToolCallLocation {
            path: path.into(),
            line: None,
        });
        self
    }
}

// ============================================================================
// Plans, commands and modes
// ============================================================================

/// Plan replacement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanUpdate {
    /// Entries as sent by the agent
    #[serde(default)]
    pub entries: Vec<RawPlanEntry>,
}

/// Plan entry as sent by the agent, before normalization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawPlanEntry {
    /// Entry text
    #[serde(default)]
    pub content: String,
    /// `high`, `medium` or `low`
    #[serde(default)]
    pub priority: Option<String>,
    /// `pending`, `in_progress` or `completed`
    #[serde(default)]
    pub status: Option<String>,
}

/// Available command list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailableCommands {
    /// Commands, kept opaque
    #[serde(default)]
    pub available_commands: Vec<Value>,
}

/// Mode switch performed by the agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentModeUpdate {
    /// New mode id
    pub current_mode_id: String,
}
