//! # ACP Agent Bridge
//!
//! Runs coding agents that speak the Agent Client Protocol (JSON-RPC 2.0 over
//! newline-delimited stdio) as subprocesses, and exposes their turns as
//! streams of normalized chat events.
//!
//! ## Quick Start
//!
//! ```no_run
//! use futures::StreamExt;
//! use kodegen_acp_bridge::{
//!     AgentConfig, AgentProvider, BridgeOptions, ChatRequest, ModelProvider, ProcessManager,
//!     SessionManager, StreamEvent,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let processes = ProcessManager::new(BridgeOptions::default());
//!     let provider = AgentProvider::new(SessionManager::new(processes));
//!
//!     let agent = AgentConfig::new("claude", "claude-code-acp");
//!     let mut stream = provider.stream(ChatRequest::new("conv-1", agent, "What is 2 + 2?"));
//!
//!     while let Some(event) = stream.next().await {
//!         match event {
//!             StreamEvent::Text { text } => print!("{text}"),
//!             StreamEvent::PermissionRequested(prompt) => {
//!                 provider.resolve_permission_request(&prompt.request_id, true)?;
//!             }
//!             StreamEvent::Error { message } => eprintln!("error: {message}"),
//!             _ => {}
//!         }
//!     }
//!
//!     provider.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Layers
//!
//! ### 1. Processes with [`ProcessManager`]
//!
//! One subprocess per configured agent, started on first use. Concurrent
//! callers share a single startup, and the process is only handed out after
//! the `initialize` handshake succeeded. When it exits, every session routed
//! to it is closed.
//!
//! ### 2. Sessions with [`SessionManager`]
//!
//! One protocol session per conversation. A session is reused across turns
//! while the conversation targets the same agent and working directory.
//! Agents that support it resume persisted sessions with `session/load`.
//!
//! ```no_run
//! # use kodegen_acp_bridge::{BridgeOptions, JsonFileSessionStore, ProcessManager, SessionManager, AllowedWorkspaces};
//! # use std::sync::Arc;
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let options = BridgeOptions::builder()
//!     .default_workdir("/srv/project")
//!     .handshake_timeout(std::time::Duration::from_secs(30))
//!     .build();
//!
//! let store = JsonFileSessionStore::open("/var/lib/bridge/sessions.json").await?;
//! let sessions = SessionManager::with_collaborators(
//!     ProcessManager::new(options),
//!     Arc::new(store),
//!     Arc::new(AllowedWorkspaces::new()),
//! );
//! # Ok(())
//! # }
//! ```
//!
//! ### 3. Events with [`ContentMapper`](mapper::ContentMapper)
//!
//! `session/update` notifications become [`StreamEvent`]s: text and thought
//! chunks one to one, tool calls as start, chunk and end events plus a
//! status line, plans and mode switches as message blocks.
//!
//! ### 4. Turns with [`AgentProvider`]
//!
//! Implements [`ModelProvider`]. Permission requests from the agent surface
//! as [`StreamEvent::PermissionRequested`] and are answered with
//! [`AgentProvider::resolve_permission_request`].
//!
//! ## Error Handling
//!
//! Fallible operations return [`Result`] with [`AgentError`]. Failures
//! during a turn are reported in-band as a single [`StreamEvent::Error`]
//! followed by the end of the stream.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod control;
pub mod error;
pub mod manager;
pub mod mapper;
pub mod provider;
pub mod transport;
pub mod types;

// Re-export main types
pub use client::{AgentConnection, Launcher, SubprocessLauncher};
pub use error::{AgentError, Result};
pub use manager::{
    AllowedWorkspaces, InMemorySessionStore, JsonFileSessionStore, ProcessHandle,
    ProcessManager, SessionHooks, SessionManager, SessionMetadata, SessionRecord, SessionStatus,
    SessionStore, WorkspaceRegistry,
};
pub use provider::{
    AgentProvider, BlockSink, ChatRequest, CompletedResponse, EventStream, ModelProvider,
    collect_response,
};
pub use transport::{SubprocessTransport, Transport};

pub use types::{
    AgentConfig, AgentId, BridgeOptions, ConversationId, MessageBlock, PermissionOutcome,
    PermissionPrompt, RequestId, SessionId, StopReason, StreamEvent, ToolCallId, Usage,
};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
