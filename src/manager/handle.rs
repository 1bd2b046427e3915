//! Handle to one running agent process

use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::client::AgentConnection;
use crate::control::{
    AgentCapabilities, Implementation, InitializeResponse, LoadSessionResponse,
    NewSessionResponse, PromptResponse,
};
use crate::error::Result;
use crate::types::identifiers::{AgentId, SessionId};

/// An initialized agent process
///
/// Handles are created by the [`ProcessManager`](super::ProcessManager) and
/// replaced whenever the process dies or is released. A replaced handle keeps
/// answering [`is_alive`](Self::is_alive) with `false`.
pub struct ProcessHandle {
    agent_id: AgentId,
    generation: u64,
    restart_count: u32,
    started_at: DateTime<Utc>,
    connection: AgentConnection,
    init: InitializeResponse,
    preferred_mode: Mutex<Option<String>>,
}

impl ProcessHandle {
    pub(crate) fn new(
        agent_id: AgentId,
        generation: u64,
        restart_count: u32,
        connection: AgentConnection,
        init: InitializeResponse,
    ) -> Self {
        Self {
            agent_id,
            generation,
            restart_count,
            started_at: Utc::now(),
            connection,
            init,
            preferred_mode: Mutex::new(None),
        }
    }

    /// Agent this process runs
    #[must_use]
    pub fn agent_id(&self) -> &AgentId {
        &self.agent_id
    }

    /// OS process id, if any
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.connection.pid()
    }

    /// How many handles this agent had before this one
    #[must_use]
    pub fn restart_count(&self) -> u32 {
        self.restart_count
    }

    /// Unique id of this process within its manager
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// When the process finished its handshake
    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// When the agent last sent anything
    #[must_use]
    pub fn last_heartbeat(&self) -> DateTime<Utc> {
        self.connection.last_activity()
    }

    /// Whether the process is still connected
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.connection.is_alive()
    }

    /// Capabilities the agent declared during the handshake
    #[must_use]
    pub fn capabilities(&self) -> AgentCapabilities {
        self.init.agent_capabilities
    }

    /// Whether the agent can resume sessions with `session/load`
    #[must_use]
    pub fn supports_load_session(&self) -> bool {
        self.capabilities().contains(AgentCapabilities::LOAD_SESSION)
    }

    /// Identity the agent reported, if any
    #[must_use]
    pub fn agent_info(&self) -> Option<&Implementation> {
        self.init.agent_info.as_ref()
    }

    /// Protocol version negotiated during the handshake
    #[must_use]
    pub fn protocol_version(&self) -> u16 {
        self.init.protocol_version
    }

    /// Mode most recently chosen on any session of this agent
    #[must_use]
    pub fn preferred_mode(&self) -> Option<String> {
        self.preferred_mode.lock().clone()
    }

    /// Remember a mode to re-apply on sessions created later
    pub fn remember_mode(&self, mode_id: impl Into<String>) {
        *self.preferred_mode.lock() = Some(mode_id.into());
    }

    pub(crate) async fn new_session(&self, cwd: &Path) -> Result<NewSessionResponse> {
        self.connection.new_session(cwd).await
    }

    pub(crate) async fn load_session(
        &self,
        session_id: &SessionId,
        cwd: &Path,
    ) -> Result<LoadSessionResponse> {
        self.connection.load_session(session_id, cwd).await
    }

    pub(crate) async fn prompt(&self, session_id: &SessionId, text: &str) -> Result<PromptResponse> {
        self.connection.prompt(session_id, text).await
    }

    pub(crate) async fn set_mode(&self, session_id: &SessionId, mode_id: &str) -> Result<()> {
        self.connection.set_mode(session_id, mode_id).await
    }

    pub(crate) fn cancel(&self, session_id: &SessionId) -> Result<()> {
        self.connection.cancel(session_id)
    }

    pub(crate) async fn close(&self) -> Result<()> {
        self.connection.close().await
    }
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("agent_id", &self.agent_id)
            .field("pid", &self.pid())
            .field("generation", &self.generation)
            .field("restart_count", &self.restart_count)
            .field("alive", &self.is_alive())
            .field("capabilities", &self.capabilities())
            .finish()
    }
}
