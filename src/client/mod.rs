//! Connection to one running agent
//!
//! An [`AgentConnection`] owns a [`Transport`](crate::Transport) through two
//! background tasks and exposes typed protocol calls on top of it.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    AgentConnection                       │
//! │                                                          │
//! │  ┌──────────────────┐        ┌──────────────────┐       │
//! │  │   Reader Task    │        │   Writer Task    │       │
//! │  │                  │        │                  │       │
//! │  │ • responses →    │        │ • owns transport │       │
//! │  │   pending slots  │        │ • one frame at a │       │
//! │  │ • updates →      │        │   time, in order │       │
//! │  │   SessionRouter  │        │ • closes on      │       │
//! │  │ • permission     │        │   request        │       │
//! │  │   requests →     │        │                  │       │
//! │  │   resolvers      │        │                  │       │
//! │  └────────┬─────────┘        └────────┬─────────┘       │
//! │           │                           │                  │
//! │           │      ┌──────────────┐     │                  │
//! │           └─────→│  Transport   │←────┘                  │
//! │                  └──────────────┘                        │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! The reader task never blocks on a caller: permission requests are answered
//! from spawned tasks, and listeners are plain callbacks. When the agent's
//! output ends, every pending request fails with
//! [`AgentError::ConnectionClosed`] and the close callback fires once.

mod client_impl;
mod launcher;
mod router;
mod tasks;

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use crate::control::ProtocolHandler;
use crate::error::Result;
use crate::transport::LaunchSpec;
use crate::types::identifiers::AgentId;

pub use launcher::{Launcher, SubprocessLauncher};
pub use router::{Detach, NotificationHandler, PermissionResolver, SessionEvent, SessionRouter};

/// Callback fired once when a connection's inbound stream ends
pub type CloseCallback = Box<dyn FnOnce(String) + Send>;

/// Everything a [`Launcher`] needs to start one agent
pub struct LaunchContext {
    /// Agent being launched
    pub agent_id: AgentId,
    /// Resolved executable, arguments and environment
    pub spec: LaunchSpec,
    /// Maximum inbound frame length
    pub max_frame_size: usize,
    /// Grace period before a closing agent is killed
    pub close_grace: Duration,
    pub(crate) router: Arc<SessionRouter>,
    pub(crate) on_closed: Option<CloseCallback>,
}

impl LaunchContext {
    /// Context with its own router and no close callback
    #[must_use]
    pub fn standalone(agent_id: impl Into<AgentId>, spec: LaunchSpec) -> Self {
        Self {
            agent_id: agent_id.into(),
            spec,
            max_frame_size: crate::types::options::DEFAULT_MAX_FRAME_SIZE,
            close_grace: crate::types::options::DEFAULT_CLOSE_GRACE,
            router: Arc::new(SessionRouter::new()),
            on_closed: None,
        }
    }

    /// Router this connection dispatches into
    #[must_use]
    pub fn router(&self) -> &Arc<SessionRouter> {
        &self.router
    }
}

impl std::fmt::Debug for LaunchContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LaunchContext")
            .field("agent_id", &self.agent_id)
            .field("command", &self.spec.display_command())
            .field("max_frame_size", &self.max_frame_size)
            .field("close_grace", &self.close_grace)
            .field("on_closed", &self.on_closed.is_some())
            .finish()
    }
}

pub(crate) enum WriterCommand {
    Frame(String),
    Close(oneshot::Sender<Result<()>>),
}

pub(crate) struct ConnectionInner {
    pub(crate) agent_id: AgentId,
    pub(crate) pid: Option<u32>,
    pub(crate) protocol: ProtocolHandler,
    pub(crate) outbound: mpsc::UnboundedSender<WriterCommand>,
    pub(crate) alive: AtomicBool,
    pub(crate) last_activity: Mutex<DateTime<Utc>>,
}

/// Live JSON-RPC connection to one agent
///
/// Cheap to clone; clones share the same underlying connection.
#[derive(Clone)]
pub struct AgentConnection {
    inner: Arc<ConnectionInner>,
}

impl std::fmt::Debug for AgentConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentConnection")
            .field("agent_id", &self.inner.agent_id)
            .field("pid", &self.inner.pid)
            .field("alive", &self.is_alive())
            .field("pending", &self.inner.protocol.pending_count())
            .finish()
    }
}
