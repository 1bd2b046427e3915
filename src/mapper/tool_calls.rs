//! Tool call accumulation
//!
//! Arguments arrive in pieces across `tool_call` and `tool_call_update`
//! notifications. A string `rawInput` is a fragment appended as-is. A
//! structured `rawInput`, location list or title is a snapshot of the whole
//! argument text; only the part not yet emitted goes out as a chunk.

use serde_json::Value;

use crate::types::updates::{ToolCallFields, ToolCallStatus};

/// Longest excerpt of unparseable arguments included in a log line
const LOG_EXCERPT: usize = 120;

/// Argument text carried by one notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ArgumentText {
    /// Appended to what came before
    Fragment(String),
    /// Replaces what came before
    Snapshot(String),
}

/// Per-call state, purged once the call reaches a terminal status
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ToolCallState {
    pub(crate) name: String,
    pub(crate) arguments: String,
    pub(crate) status: Option<ToolCallStatus>,
    pub(crate) started: bool,
}

impl ToolCallState {
    pub(crate) fn new(name: String) -> Self {
        Self {
            name,
            arguments: String::new(),
            status: None,
            started: false,
        }
    }

    /// Fold new argument text in, returning the increment to emit
    pub(crate) fn absorb(&mut self, text: ArgumentText) -> Option<String> {
        match text {
            ArgumentText::Fragment(fragment) => {
                if fragment.is_empty() {
                    return None;
                }
                self.arguments.push_str(&fragment);
                Some(fragment)
            }
            ArgumentText::Snapshot(snapshot) => {
                if snapshot.is_empty() || snapshot == self.arguments {
                    return None;
                }
                if let Some(suffix) = snapshot.strip_prefix(self.arguments.as_str()) {
                    let delta = suffix.to_string();
                    self.arguments = snapshot;
                    return Some(delta);
                }
                log::debug!(
                    "Tool call {} restated its arguments, replacing buffer",
                    self.name
                );
                self.arguments = snapshot.clone();
                Some(snapshot)
            }
        }
    }
}

/// Name shown for a tool call on first sight
pub(crate) fn display_name(fields: &ToolCallFields) -> String {
    fields
        .title
        .as_deref()
        .or(fields.kind.as_deref())
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .unwrap_or("tool")
        .to_string()
}

/// Argument text carried by `fields`
///
/// Raw input wins over locations, which win over the title. The title only
/// counts when it says something beyond the display name.
pub(crate) fn argument_text(fields: &ToolCallFields, display_name: &str) -> Option<ArgumentText> {
    if let Some(raw) = &fields.raw_input {
        match raw {
            Value::Null => {}
            Value::String(fragment) => return Some(ArgumentText::Fragment(fragment.clone())),
            Value::Object(map) if map.is_empty() => {}
            Value::Array(items) if items.is_empty() => {}
            structured => return Some(ArgumentText::Snapshot(structured.to_string())),
        }
    }

    if let Some(locations) = fields.locations.as_ref().filter(|l| !l.is_empty()) {
        let paths: Vec<&str> = locations.iter().map(|l| l.path.as_str()).collect();
        return Some(ArgumentText::Snapshot(
            serde_json::json!({ "locations": paths }).to_string(),
        ));
    }

    fields
        .title
        .as_deref()
        .map(str::trim)
        .filter(|title| !title.is_empty() && *title != display_name)
        .map(|title| ArgumentText::Snapshot(title.to_string()))
}

/// Final argument string for the end event
///
/// JSON-looking text that fails to parse is kept as-is with a warning.
/// Nothing at all becomes `{}`.
pub(crate) fn finalize_arguments(buffer: &str, tool_call: &str) -> String {
    let trimmed = buffer.trim();
    if trimmed.is_empty() {
        return "{}".to_string();
    }

    let looks_like_json = trimmed.starts_with('{') || trimmed.starts_with('[');
    if looks_like_json && let Err(e) = serde_json::from_str::<Value>(trimmed) {
        log::warn!(
            "Tool call {tool_call} ended with unparseable arguments ({e}): {}",
            excerpt(trimmed)
        );
    }

    buffer.to_string()
}

fn excerpt(text: &str) -> String {
    match text.char_indices().nth(LOG_EXCERPT) {
        Some((end, _)) => format!("{}...", &text[..end]),
        None => text.to_string(),
    }
}
