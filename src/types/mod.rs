//! Type definitions for the ACP bridge
//!
//! This module contains the type definitions used throughout the crate,
//! organized into logical submodules:
//!
//! - [`identifiers`] - Type-safe ID wrappers (`AgentId`, `SessionId`, `ConversationId`, ...)
//! - [`agent`] - Agent launch configuration
//! - [`options`] - Bridge options and builder
//! - [`updates`] - `session/update` notification payloads
//! - [`permissions`] - Permission options, outcomes and option selection
//! - [`events`] - Normalized stream events and message blocks

pub mod agent;
pub mod events;
pub mod identifiers;
pub mod options;
pub mod permissions;
pub mod updates;

// Re-export commonly used types
pub use agent::AgentConfig;
pub use events::{
    MessageBlock, PermissionPrompt, PlanEntry, PlanPriority, PlanStatus, StopReason, StreamEvent,
    Usage,
};
pub use identifiers::{AgentId, ConversationId, RequestId, SessionId, ToolCallId};
pub use options::{BridgeOptions, BridgeOptionsBuilder};
pub use permissions::{
    PermissionOption, PermissionOptionKind, PermissionOutcome, RequestPermissionParams,
    RequestPermissionResponse, select_option,
};
pub use updates::{
    ContentBlock, ContentChunk, SessionNotification, SessionUpdate, ToolCallFields,
    ToolCallLocation, ToolCallStatus,
};
