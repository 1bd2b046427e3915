//! Translation of `session/update` notifications into stream events
//!
//! Text and thought chunks map one to one. Tool calls are stateful: each
//! `(session, tool call id)` pair produces exactly one start event, chunk
//! events carrying only new argument text, and one end event, after which its
//! state is dropped. Anything the mapper does not understand is logged and
//! ignored.
//!
//! # Example
//!
//! ```
//! use kodegen_acp_bridge::mapper::ContentMapper;
//! use kodegen_acp_bridge::types::{
//!     ContentChunk, SessionId, SessionNotification, SessionUpdate, StreamEvent,
//! };
//!
//! let mut mapper = ContentMapper::new();
//! let mapped = mapper.map(&SessionNotification {
//!     session_id: SessionId::new("s1"),
//!     update: SessionUpdate::AgentMessageChunk(ContentChunk::text("hello")),
//! });
//! assert_eq!(mapped.events, vec![StreamEvent::text("hello")]);
//! ```

mod tool_calls;

use std::collections::HashMap;

use crate::types::events::{MessageBlock, PlanEntry, PlanPriority, PlanStatus, StreamEvent};
use crate::types::identifiers::{SessionId, ToolCallId};
use crate::types::updates::{
    ContentBlock, ContentChunk, PlanUpdate, RawPlanEntry, SessionNotification, SessionUpdate,
    ToolCallFields, ToolCallStatus,
};

use tool_calls::{ToolCallState, argument_text, display_name, finalize_arguments};

/// Result of mapping one notification
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MappedUpdate {
    /// Events for the live stream, in order
    pub events: Vec<StreamEvent>,
    /// Blocks for the persisted assistant message
    pub blocks: Vec<MessageBlock>,
    /// The session's plan, when this notification replaced it
    pub plan_entries: Option<Vec<PlanEntry>>,
    /// New mode id, when the agent switched modes
    pub current_mode_id: Option<String>,
}

impl MappedUpdate {
    /// Whether the notification produced nothing
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
            && self.blocks.is_empty()
            && self.plan_entries.is_none()
            && self.current_mode_id.is_none()
    }
}

/// Stateful notification mapper
#[derive(Debug, Default)]
pub struct ContentMapper {
    tool_calls: HashMap<(SessionId, ToolCallId), ToolCallState>,
    plans: HashMap<SessionId, Vec<PlanEntry>>,
}

impl ContentMapper {
    /// Mapper with no tool calls in progress
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Map one notification
    pub fn map(&mut self, notification: &SessionNotification) -> MappedUpdate {
        let session_id = &notification.session_id;
        let mut out = MappedUpdate::default();

        match &notification.update {
            SessionUpdate::AgentMessageChunk(chunk) => {
                if let Some(text) = chunk_text(chunk, session_id, "message") {
                    out.events.push(StreamEvent::text(text));
                    out.blocks.push(MessageBlock::Text {
                        text: text.to_string(),
                    });
                }
            }
            SessionUpdate::AgentThoughtChunk(chunk) => {
                if let Some(text) = chunk_text(chunk, session_id, "thought") {
                    out.events.push(StreamEvent::reasoning(text));
                    out.blocks.push(MessageBlock::Reasoning {
                        text: text.to_string(),
                    });
                }
            }
            SessionUpdate::ToolCall(fields) | SessionUpdate::ToolCallUpdate(fields) => {
                self.map_tool_call(session_id, fields, &mut out);
            }
            SessionUpdate::Plan(plan) => {
                let entries = normalize_plan(plan);
                self.plans.insert(session_id.clone(), entries.clone());
                out.blocks.push(MessageBlock::Plan {
                    entries: entries.clone(),
                });
                out.plan_entries = Some(entries);
            }
            SessionUpdate::CurrentModeUpdate(update) => {
                let line = format!("Mode: `{}`", update.current_mode_id);
                out.events.push(StreamEvent::reasoning(line.clone()));
                out.blocks.push(MessageBlock::Reasoning { text: line });
                out.current_mode_id = Some(update.current_mode_id.clone());
            }
            SessionUpdate::UserMessageChunk(_) => {
                log::trace!("[{session_id}] ignoring echoed user message chunk");
            }
            SessionUpdate::AvailableCommandsUpdate(commands) => {
                log::debug!(
                    "[{session_id}] agent advertises {} commands",
                    commands.available_commands.len()
                );
            }
            SessionUpdate::Unknown => {
                log::debug!("[{session_id}] ignoring unrecognized session update");
            }
        }

        out
    }

    /// Plan most recently received for a session
    #[must_use]
    pub fn current_plan(&self, session_id: &SessionId) -> Option<&[PlanEntry]> {
        self.plans.get(session_id).map(Vec::as_slice)
    }

    /// Tool calls of a session that have not ended yet
    #[must_use]
    pub fn active_tool_calls(&self, session_id: &SessionId) -> usize {
        self.tool_calls
            .keys()
            .filter(|(session, _)| session == session_id)
            .count()
    }

    /// Forget every piece of state kept for a session
    pub fn clear_session(&mut self, session_id: &SessionId) {
        self.tool_calls.retain(|(session, _), _| session != session_id);
        self.plans.remove(session_id);
    }

    fn map_tool_call(&mut self, session_id: &SessionId, fields: &ToolCallFields, out: &mut MappedUpdate) {
        let id = fields.tool_call_id.clone();
        let key = (session_id.clone(), id.clone());
        let state = self
            .tool_calls
            .entry(key.clone())
            .or_insert_with(|| ToolCallState::new(display_name(fields)));

        if !state.started {
            state.started = true;
            out.events.push(StreamEvent::ToolCallStart {
                id: id.clone(),
                name: state.name.clone(),
            });
        }

        let status = fields
            .status
            .or(state.status)
            .unwrap_or(ToolCallStatus::Pending);
        if state.status != Some(status) {
            state.status = Some(status);
            out.events.push(StreamEvent::reasoning(format!(
                "Tool call — `{}` — `{}`",
                state.name,
                status.as_str()
            )));
            if !status.is_terminal() {
                out.blocks.push(MessageBlock::ToolCall {
                    id: id.clone(),
                    name: state.name.clone(),
                    status,
                    arguments: None,
                });
            }
        }

        if let Some(text) = argument_text(fields, &state.name)
            && let Some(delta) = state.absorb(text)
        {
            out.events.push(StreamEvent::ToolCallChunk {
                id: id.clone(),
                delta,
            });
        }

        if status.is_terminal()
            && let Some(state) = self.tool_calls.remove(&key)
        {
            let arguments = finalize_arguments(&state.arguments, id.as_str());
            out.events.push(StreamEvent::ToolCallEnd {
                id: id.clone(),
                arguments: arguments.clone(),
            });
            out.blocks.push(MessageBlock::ToolCall {
                id,
                name: state.name,
                status,
                arguments: Some(arguments),
            });
        }
    }
}

fn chunk_text<'a>(chunk: &'a ContentChunk, session_id: &SessionId, what: &str) -> Option<&'a str> {
    match &chunk.content {
        ContentBlock::Text { text } if !text.is_empty() => Some(text),
        ContentBlock::Text { .. } => None,
        ContentBlock::ResourceLink { uri, .. } => {
            log::debug!("[{session_id}] ignoring resource link {uri} in {what} chunk");
            None
        }
        ContentBlock::Other => {
            log::debug!("[{session_id}] ignoring non-text {what} chunk");
            None
        }
    }
}

fn normalize_plan(plan: &PlanUpdate) -> Vec<PlanEntry> {
    plan.entries.iter().filter_map(normalize_entry).collect()
}

fn normalize_entry(entry: &RawPlanEntry) -> Option<PlanEntry> {
    let content = entry.content.trim();
    if content.is_empty() {
        return None;
    }

    let priority = match entry.priority.as_deref().map(str::to_ascii_lowercase).as_deref() {
        Some("high") => PlanPriority::High,
        Some("low") => PlanPriority::Low,
        _ => PlanPriority::Medium,
    };
    let status = match entry.status.as_deref().map(str::to_ascii_lowercase).as_deref() {
        Some("in_progress" | "in-progress") => PlanStatus::InProgress,
        Some("completed" | "done") => PlanStatus::Completed,
        _ => PlanStatus::Pending,
    };

    Some(PlanEntry {
        content: content.to_string(),
        priority,
        status,
    })
}
