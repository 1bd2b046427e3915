//! Model-provider facade over agent sessions
//!
//! A provider turns one chat request into a stream of [`StreamEvent`]s. The
//! [`AgentProvider`] implementation runs each request as a prompt turn on the
//! conversation's agent session.
//!
//! # Module Structure
//!
//! - `agent` - Turn driver wiring sessions, mapper and permission prompts
//! - `permissions` - Correlation of permission prompts with decisions
//! - `queue` - Push-to-pull event queue feeding a turn's stream

mod agent;
mod permissions;
mod queue;

use std::path::PathBuf;
use std::pin::Pin;

use futures::{Stream, StreamExt};

use crate::error::{AgentError, Result};
use crate::types::agent::AgentConfig;
use crate::types::events::{StopReason, StreamEvent, Usage};
use crate::types::identifiers::{ConversationId, ToolCallId};

pub use agent::{AgentProvider, BlockSink};
pub use permissions::PermissionBroker;
pub use queue::EventQueue;

/// Stream of one turn's events
pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

/// One chat turn
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// Conversation the turn belongs to
    pub conversation_id: ConversationId,
    /// Agent to run the turn on
    pub agent: AgentConfig,
    /// User prompt text
    pub prompt: String,
    /// Working directory, falling back to the configured default
    pub workdir: Option<PathBuf>,
}

impl ChatRequest {
    /// Request with no explicit workdir
    pub fn new(
        conversation_id: impl Into<ConversationId>,
        agent: AgentConfig,
        prompt: impl Into<String>,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            agent,
            prompt: prompt.into(),
            workdir: None,
        }
    }

    /// Set the working directory
    #[must_use]
    pub fn workdir(mut self, workdir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(workdir.into());
        self
    }
}

/// Tool call as seen in a collected response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCallRecord {
    /// Tool call id
    pub id: ToolCallId,
    /// Display name
    pub name: String,
    /// Final arguments, empty if the call never ended
    pub arguments: String,
}

/// Everything a turn produced, gathered into one value
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletedResponse {
    /// Concatenated assistant text
    pub text: String,
    /// Concatenated reasoning text and status lines
    pub reasoning: String,
    /// Tool calls in start order
    pub tool_calls: Vec<ToolCallRecord>,
    /// Reported token usage
    pub usage: Option<Usage>,
    /// Why the turn stopped
    pub stop_reason: Option<StopReason>,
}

/// Source of streamed chat turns
pub trait ModelProvider: Send + Sync {
    /// Start a turn and stream its events
    fn stream(&self, request: ChatRequest) -> EventStream;

    /// Run a turn to completion
    ///
    /// # Errors
    /// Returns [`AgentError::Turn`] carrying the first error event
    fn complete(
        &self,
        request: ChatRequest,
    ) -> impl std::future::Future<Output = Result<CompletedResponse>> + Send {
        collect_response(self.stream(request))
    }
}

/// Drain `stream` into a [`CompletedResponse`]
///
/// The stream is always read to its end, so the turn is not cancelled by
/// an early drop.
///
/// # Errors
/// Returns [`AgentError::Turn`] if the stream carried an error event
pub async fn collect_response(mut stream: EventStream) -> Result<CompletedResponse> {
    let mut response = CompletedResponse::default();
    let mut failure: Option<String> = None;

    while let Some(event) = stream.next().await {
        match event {
            StreamEvent::Text { text } => response.text.push_str(&text),
            StreamEvent::Reasoning { text } => {
                if !response.reasoning.is_empty() && !response.reasoning.ends_with('\n') {
                    response.reasoning.push('\n');
                }
                response.reasoning.push_str(&text);
            }
            StreamEvent::ToolCallStart { id, name } => {
                response.tool_calls.push(ToolCallRecord {
                    id,
                    name,
                    arguments: String::new(),
                });
            }
            StreamEvent::ToolCallChunk { .. } => {}
            StreamEvent::ToolCallEnd { id, arguments } => {
                if let Some(call) = response.tool_calls.iter_mut().rev().find(|c| c.id == id) {
                    call.arguments = arguments;
                }
            }
            StreamEvent::PermissionRequested(prompt) => {
                log::debug!(
                    "Permission request {} pending while collecting response",
                    prompt.request_id
                );
            }
            StreamEvent::Usage(usage) => response.usage = Some(usage),
            StreamEvent::Stop { reason } => response.stop_reason = Some(reason),
            StreamEvent::Error { message } => {
                if failure.is_none() {
                    failure = Some(message);
                }
            }
        }
    }

    match failure {
        Some(message) => Err(AgentError::turn(message)),
        None => Ok(response),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream_of(events: Vec<StreamEvent>) -> EventStream {
        Box::pin(futures::stream::iter(events))
    }

    #[tokio::test]
    async fn collects_text_tools_and_stop() {
        let response = collect_response(stream_of(vec![
            StreamEvent::text("hel"),
            StreamEvent::reasoning("Tool call — `read` — `pending`"),
            StreamEvent::ToolCallStart {
                id: ToolCallId::new("t1"),
                name: "read".into(),
            },
            StreamEvent::ToolCallEnd {
                id: ToolCallId::new("t1"),
                arguments: "{}".into(),
            },
            StreamEvent::text("lo"),
            StreamEvent::Stop {
                reason: StopReason::Complete,
            },
        ]))
        .await
        .unwrap();

        assert_eq!(response.text, "hello");
        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.tool_calls[0].arguments, "{}");
        assert_eq!(response.stop_reason, Some(StopReason::Complete));
    }

    #[tokio::test]
    async fn first_error_wins() {
        let err = collect_response(stream_of(vec![
            StreamEvent::text("partial"),
            StreamEvent::error("agent exited"),
            StreamEvent::error("later"),
        ]))
        .await
        .unwrap_err();

        assert!(matches!(err, AgentError::Turn(ref m) if m == "agent exited"));
    }
}
