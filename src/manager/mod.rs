//! Agent process and session management
//!
//! Provides `ProcessManager` for keeping one initialized process per agent
//! and `SessionManager` for mapping conversations onto agent sessions.
//!
//! # Module Structure
//!
//! - `process_manager` - Single-flight process registry and exit cleanup
//! - `handle` - Handle to one initialized agent process
//! - `session_manager` - Conversation to session mapping, reuse and teardown
//! - `store` - Session metadata persistence
//! - `workspace` - Workspace directory registration

mod handle;
mod process_manager;
mod session_manager;
mod store;
mod workspace;

pub use handle::ProcessHandle;
pub use process_manager::{ConversationBinding, ProcessManager};
pub use session_manager::{SessionHooks, SessionManager, SessionRecord};
pub use store::{
    InMemorySessionStore, JsonFileSessionStore, SessionMetadata, SessionStatus, SessionStore,
};
pub use workspace::{AllowedWorkspaces, WorkspaceRegistry};
