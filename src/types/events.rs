//! Normalized stream events and message blocks
//!
//! These are what consumers of the bridge see. Protocol notifications are
//! mapped into them by [`crate::mapper::ContentMapper`].

use serde::{Deserialize, Serialize, Serializer};

use super::identifiers::{RequestId, SessionId, ToolCallId};
use super::permissions::PermissionOption;
use super::updates::ToolCallStatus;

// ============================================================================
// Stream events
// ============================================================================

/// One event of a turn's stream
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Assistant text delta
    Text {
        /// Text delta
        text: String,
    },
    /// Reasoning delta or status line
    Reasoning {
        /// Reasoning text
        text: String,
    },
    /// A tool call started
    ToolCallStart {
        /// Tool call id
        id: ToolCallId,
        /// Display name
        name: String,
    },
    /// New argument text for a tool call
    ToolCallChunk {
        /// Tool call id
        id: ToolCallId,
        /// Only the newly appended text
        delta: String,
    },
    /// A tool call reached a terminal status
    ToolCallEnd {
        /// Tool call id
        id: ToolCallId,
        /// Final argument string
        arguments: String,
    },
    /// The agent is waiting for a permission decision
    PermissionRequested(PermissionPrompt),
    /// Token usage reported for the turn
    Usage(Usage),
    /// The turn finished
    Stop {
        /// Why it finished
        reason: StopReason,
    },
    /// The turn failed
    Error {
        /// Human readable message
        message: String,
    },
}

impl StreamEvent {
    /// Text event
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Reasoning event
    pub fn reasoning(text: impl Into<String>) -> Self {
        Self::Reasoning { text: text.into() }
    }

    /// Error event
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Whether this is one of the three tool call lifecycle events
    #[must_use]
    pub fn is_tool_call(&self) -> bool {
        matches!(
            self,
            Self::ToolCallStart { .. } | Self::ToolCallChunk { .. } | Self::ToolCallEnd { .. }
        )
    }
}

/// Metadata a UI needs to render a permission prompt
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionPrompt {
    /// Id to pass back to `resolve_permission_request`
    pub request_id: RequestId,
    /// Session asking
    pub session_id: SessionId,
    /// Tool call the request is about
    pub tool_call_id: ToolCallId,
    /// Title of the tool call
    pub title: String,
    /// Tool category, if given
    pub kind: Option<String>,
    /// Options offered by the agent
    pub options: Vec<PermissionOption>,
}

/// Token usage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    /// Prompt tokens
    #[serde(default)]
    pub input_tokens: u64,
    /// Completion tokens
    #[serde(default)]
    pub output_tokens: u64,
}

impl Usage {
    /// Sum of input and output tokens
    #[must_use]
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Why a turn stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// The agent finished its turn
    Complete,
    /// Token limit reached
    MaxTokens,
    /// Too many model requests in one turn
    MaxTurnRequests,
    /// The agent refused
    Refusal,
    /// The client cancelled
    Cancelled,
    /// Reason this crate does not know
    Other(String),
}

impl StopReason {
    /// Map a wire `stopReason`
    #[must_use]
    pub fn from_wire(reason: &str) -> Self {
        match reason {
            "end_turn" => Self::Complete,
            "max_tokens" => Self::MaxTokens,
            "max_turn_requests" => Self::MaxTurnRequests,
            "refusal" => Self::Refusal,
            "cancelled" => Self::Cancelled,
            other => Self::Other(other.to_string()),
        }
    }

    /// Normalized name
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Complete => "complete",
            Self::MaxTokens => "max_tokens",
            Self::MaxTurnRequests => "max_turn_requests",
            Self::Refusal => "refusal",
            Self::Cancelled => "cancelled",
            Self::Other(other) => other,
        }
    }
}

impl Serialize for StopReason {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

// ============================================================================
// Message blocks
// ============================================================================

/// Plan entry priority
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanPriority {
    /// High
    High,
    /// Medium
    #[default]
    Medium,
    /// Low
    Low,
}

/// Plan entry status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    /// Not started
    #[default]
    Pending,
    /// Being worked on
    InProgress,
    /// Done
    Completed,
}

/// Normalized plan entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanEntry {
    /// Entry text
    pub content: String,
    /// Priority
    pub priority: PlanPriority,
    /// Status
    pub status: PlanStatus,
}

/// Block persisted as part of the assistant message
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageBlock {
    /// Assistant text
    Text {
        /// Text
        text: String,
    },
    /// Reasoning text
    Reasoning {
        /// Text
        text: String,
    },
    /// Snapshot of a tool call
    ToolCall {
        /// Tool call id
        id: ToolCallId,
        /// Display name
        name: String,
        /// Last known status
        status: ToolCallStatus,
        /// Final arguments, set once the call ended
        arguments: Option<String>,
    },
    /// The agent's current plan
    Plan {
        /// Entries
        entries: Vec<PlanEntry>,
    },
}
