//! One agent session per conversation
//!
//! A conversation keeps its session across turns as long as it targets the
//! same agent and working directory. Each turn re-attaches its own hooks so
//! streaming output reaches the consumer that is currently waiting for it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;

use crate::client::{Detach, NotificationHandler, PermissionResolver, SessionEvent};
use crate::control::{PromptResponse, SessionMode, SessionModeState};
use crate::error::{AgentError, Result};
use crate::types::agent::AgentConfig;
use crate::types::identifiers::{AgentId, ConversationId, SessionId};
use crate::types::permissions::{PermissionOutcome, RequestPermissionParams};

use super::handle::ProcessHandle;
use super::process_manager::ProcessManager;
use super::store::{InMemorySessionStore, SessionMetadata, SessionStatus, SessionStore};
use super::workspace::{AllowedWorkspaces, WorkspaceRegistry};

/// Bound on retries when a conversation keeps switching agent or workdir
/// while its session is being created
const MAX_CREATE_ATTEMPTS: usize = 3;

type SessionResult = std::result::Result<Arc<SessionRecord>, Arc<AgentError>>;
type SessionFuture = Shared<BoxFuture<'static, SessionResult>>;

// ============================================================================
// HOOKS
// ============================================================================

/// Callbacks one turn registers on its session
#[derive(Clone)]
pub struct SessionHooks {
    /// Receives the session's updates and its close event
    pub on_notification: NotificationHandler,
    /// Answers the session's permission requests
    pub on_permission: PermissionResolver,
}

impl SessionHooks {
    /// Build hooks from two closures
    pub fn new<N, P>(on_notification: N, on_permission: P) -> Self
    where
        N: Fn(SessionEvent) + Send + Sync + 'static,
        P: Fn(RequestPermissionParams) -> BoxFuture<'static, PermissionOutcome>
            + Send
            + Sync
            + 'static,
    {
        Self {
            on_notification: Arc::new(on_notification),
            on_permission: Arc::new(on_permission),
        }
    }
}

impl std::fmt::Debug for SessionHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHooks").finish_non_exhaustive()
    }
}

// ============================================================================
// SESSION RECORD
// ============================================================================

/// A live protocol session serving one conversation
pub struct SessionRecord {
    conversation_id: ConversationId,
    agent_id: AgentId,
    session_id: SessionId,
    workdir: PathBuf,
    handle: Arc<ProcessHandle>,
    modes: Vec<SessionMode>,
    current_mode: Mutex<Option<String>>,
    hooks: Mutex<Vec<Detach>>,
    created_at: DateTime<Utc>,
    resumed: bool,
}

impl SessionRecord {
    /// Conversation this session serves
    #[must_use]
    pub fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }

    /// Agent running the session
    #[must_use]
    pub fn agent_id(&self) -> &AgentId {
        &self.agent_id
    }

    /// Session id assigned by the agent
    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Resolved working directory
    #[must_use]
    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Modes the agent declared for this session
    #[must_use]
    pub fn modes(&self) -> &[SessionMode] {
        &self.modes
    }

    /// Mode the session is currently in, if known
    #[must_use]
    pub fn current_mode(&self) -> Option<String> {
        self.current_mode.lock().clone()
    }

    /// Whether the session was resumed with `session/load`
    #[must_use]
    pub fn resumed(&self) -> bool {
        self.resumed
    }

    /// When the session was opened
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Process running the session
    #[must_use]
    pub fn handle(&self) -> &Arc<ProcessHandle> {
        &self.handle
    }

    /// Whether the owning process is still running
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.handle.is_alive()
    }

    /// Send a text prompt and wait for the turn to end
    ///
    /// # Errors
    /// Returns error if the agent rejects the prompt or exits mid-turn
    pub async fn prompt(&self, text: &str) -> Result<PromptResponse> {
        self.handle.prompt(&self.session_id, text).await
    }

    /// Ask the agent to stop the running turn
    ///
    /// # Errors
    /// Returns error if the agent is gone
    pub fn cancel(&self) -> Result<()> {
        self.handle.cancel(&self.session_id)
    }

    fn matches(&self, agent_id: &AgentId, workdir: &Path) -> bool {
        &self.agent_id == agent_id && self.workdir == workdir
    }

    fn declares_mode(&self, mode_id: &str) -> bool {
        self.modes.iter().any(|mode| mode.id == mode_id)
    }

    fn set_current_mode(&self, mode_id: &str) {
        *self.current_mode.lock() = Some(mode_id.to_string());
    }

    fn replace_hooks(&self, hooks: Vec<Detach>) {
        let previous = std::mem::replace(&mut *self.hooks.lock(), hooks);
        for detach in previous {
            detach.detach();
        }
    }

    fn detach_hooks(&self) {
        self.replace_hooks(Vec::new());
    }
}

impl std::fmt::Debug for SessionRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRecord")
            .field("conversation_id", &self.conversation_id)
            .field("agent_id", &self.agent_id)
            .field("session_id", &self.session_id)
            .field("workdir", &self.workdir)
            .field("current_mode", &self.current_mode())
            .field("resumed", &self.resumed)
            .finish()
    }
}

// ============================================================================
// SESSION MANAGER
// ============================================================================

struct PendingSession {
    ticket: u64,
    agent_id: AgentId,
    future: SessionFuture,
}

#[derive(Default)]
struct SessionState {
    sessions: HashMap<ConversationId, Arc<SessionRecord>>,
    in_flight: HashMap<ConversationId, PendingSession>,
    next_ticket: u64,
}

struct SessionManagerInner {
    processes: ProcessManager,
    store: Arc<dyn SessionStore>,
    workspace: Arc<dyn WorkspaceRegistry>,
    state: Mutex<SessionState>,
}

struct OpenedSession {
    session_id: SessionId,
    modes: Option<SessionModeState>,
    resumed: bool,
}

enum Step {
    Reuse(Arc<SessionRecord>),
    Await(SessionFuture),
}

/// Registry of sessions keyed by conversation
///
/// Cheap to clone; clones share the same registry.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<SessionManagerInner>,
}

impl SessionManager {
    /// Manager with an in-memory store and workspace allow-list
    #[must_use]
    pub fn new(processes: ProcessManager) -> Self {
        Self::with_collaborators(
            processes,
            Arc::new(InMemorySessionStore::new()),
            Arc::new(AllowedWorkspaces::new()),
        )
    }

    /// Manager with explicit persistence and workspace collaborators
    #[must_use]
    pub fn with_collaborators(
        processes: ProcessManager,
        store: Arc<dyn SessionStore>,
        workspace: Arc<dyn WorkspaceRegistry>,
    ) -> Self {
        Self {
            inner: Arc::new(SessionManagerInner {
                processes,
                store,
                workspace,
                state: Mutex::new(SessionState::default()),
            }),
        }
    }

    /// Process manager sessions are opened on
    #[must_use]
    pub fn processes(&self) -> &ProcessManager {
        &self.inner.processes
    }

    /// Session metadata store
    #[must_use]
    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.inner.store
    }

    /// Session of a conversation, if one is registered
    #[must_use]
    pub fn session(&self, conversation_id: &ConversationId) -> Option<Arc<SessionRecord>> {
        self.inner.state.lock().sessions.get(conversation_id).cloned()
    }

    /// Conversations with a registered session
    #[must_use]
    pub fn active_conversations(&self) -> Vec<ConversationId> {
        let mut conversations: Vec<ConversationId> =
            self.inner.state.lock().sessions.keys().cloned().collect();
        conversations.sort();
        conversations
    }

    /// Session for `conversation_id`, reusing or replacing the current one
    ///
    /// An existing session is reused when it runs on the same agent and
    /// workdir and its process is alive; its previous hooks are detached and
    /// `hooks` attached. Otherwise the old session is torn down and a new one
    /// opened. Concurrent calls for one conversation share one creation.
    ///
    /// # Errors
    /// Returns error if the agent cannot be started or refuses to open a
    /// session.
    pub async fn get_or_create_session(
        &self,
        conversation_id: &ConversationId,
        config: &AgentConfig,
        hooks: SessionHooks,
        workdir: Option<&Path>,
    ) -> Result<Arc<SessionRecord>> {
        let workdir = self.resolve_workdir(workdir).await?;

        for _ in 0..MAX_CREATE_ATTEMPTS {
            let step = {
                let mut state = self.inner.state.lock();
                if let Some(pending) = state.in_flight.get(conversation_id) {
                    Step::Await(pending.future.clone())
                } else {
                    let reusable = state
                        .sessions
                        .get(conversation_id)
                        .map(|record| record.matches(&config.id, &workdir) && record.is_alive());

                    match reusable {
                        Some(true) => match state.sessions.get(conversation_id) {
                            Some(record) => Step::Reuse(Arc::clone(record)),
                            None => continue,
                        },
                        _ => {
                            let stale = state.sessions.remove(conversation_id);
                            state.next_ticket += 1;
                            let ticket = state.next_ticket;
                            let future = SessionManagerInner::create(
                                Arc::clone(&self.inner),
                                conversation_id.clone(),
                                config.clone(),
                                workdir.clone(),
                                stale,
                                ticket,
                            )
                            .boxed()
                            .shared();
                            state.in_flight.insert(
                                conversation_id.clone(),
                                PendingSession {
                                    ticket,
                                    agent_id: config.id.clone(),
                                    future: future.clone(),
                                },
                            );
                            Step::Await(future)
                        }
                    }
                }
            };

            let record = match step {
                Step::Reuse(record) => {
                    log::debug!(
                        "[{conversation_id}] reusing session {}",
                        record.session_id()
                    );
                    record
                }
                Step::Await(future) => future.await.map_err(AgentError::from_shared)?,
            };

            if record.matches(&config.id, &workdir) {
                self.inner.attach_hooks(&record, &hooks);
                return Ok(record);
            }

            log::debug!("[{conversation_id}] session changed target while waiting, retrying");
        }

        Err(AgentError::connection(format!(
            "session for conversation {conversation_id} kept changing agent or workdir"
        )))
    }

    /// Tear down the session of one conversation
    ///
    /// Returns `true` if a session or a pending creation existed. Persisted
    /// metadata is cleared either way.
    pub async fn clear_session(&self, conversation_id: &ConversationId) -> bool {
        let (record, pending) = {
            let mut state = self.inner.state.lock();
            (
                state.sessions.remove(conversation_id),
                state.in_flight.remove(conversation_id).is_some(),
            )
        };

        match &record {
            Some(record) => {
                self.inner
                    .teardown(record, "session cleared", Teardown::Forget)
                    .await;
            }
            None => {
                self.inner.processes.unbind_conversation(conversation_id);
                self.inner.forget_metadata(conversation_id).await;
            }
        }

        record.is_some() || pending
    }

    /// Tear down every session running on `agent_id`
    pub async fn clear_sessions_by_agent(&self, agent_id: &AgentId) -> usize {
        let conversations: Vec<ConversationId> = {
            let state = self.inner.state.lock();
            state
                .sessions
                .iter()
                .filter(|(_, record)| record.agent_id() == agent_id)
                .map(|(conversation_id, _)| conversation_id.clone())
                .chain(
                    state
                        .in_flight
                        .iter()
                        .filter(|(_, pending)| &pending.agent_id == agent_id)
                        .map(|(conversation_id, _)| conversation_id.clone()),
                )
                .collect()
        };

        let mut cleared = 0;
        for conversation_id in &conversations {
            if self.clear_session(conversation_id).await {
                cleared += 1;
            }
        }
        cleared
    }

    /// Tear down every session
    pub async fn clear_all_sessions(&self) -> usize {
        let conversations: Vec<ConversationId> = {
            let state = self.inner.state.lock();
            state
                .sessions
                .keys()
                .chain(state.in_flight.keys())
                .cloned()
                .collect()
        };

        let mut cleared = 0;
        for conversation_id in &conversations {
            if self.clear_session(conversation_id).await {
                cleared += 1;
            }
        }
        cleared
    }

    /// Release agents and their sessions so they restart with fresh config
    ///
    /// `None` refreshes every agent that has a process or a session.
    pub async fn refresh_agents(&self, agent_ids: Option<&[AgentId]>) {
        let targets: Vec<AgentId> = match agent_ids {
            Some(ids) => ids.to_vec(),
            None => {
                let mut ids = self.inner.processes.active_agents();
                ids.extend(
                    self.inner
                        .state
                        .lock()
                        .sessions
                        .values()
                        .map(|record| record.agent_id().clone()),
                );
                ids.sort();
                ids.dedup();
                ids
            }
        };

        for agent_id in &targets {
            let cleared = self.clear_sessions_by_agent(agent_id).await;
            if let Err(e) = self.inner.processes.release(agent_id).await {
                log::warn!("[{agent_id}] release during refresh failed: {e}");
            }
            log::info!("[{agent_id}] refreshed ({cleared} sessions cleared)");
        }

        self.inner.processes.invalidate_environment();
    }

    /// Remember a mode the agent switched a conversation into
    ///
    /// The mode also becomes the agent's preferred mode for sessions opened
    /// later.
    pub fn record_mode(&self, conversation_id: &ConversationId, mode_id: &str) {
        if let Some(record) = self.session(conversation_id) {
            record.set_current_mode(mode_id);
            record.handle().remember_mode(mode_id);
        }
    }

    /// Switch a conversation's session into `mode_id`
    ///
    /// # Errors
    /// Returns [`AgentError::SessionNotFound`] if the conversation has no
    /// session, or the agent's error if it refuses the switch.
    pub async fn set_mode(&self, conversation_id: &ConversationId, mode_id: &str) -> Result<()> {
        let record = self
            .session(conversation_id)
            .ok_or_else(|| AgentError::session_not_found(conversation_id.as_str()))?;
        record
            .handle()
            .set_mode(record.session_id(), mode_id)
            .await?;
        self.record_mode(conversation_id, mode_id);
        Ok(())
    }

    /// Persist the outcome of a conversation's last turn, best-effort
    pub async fn update_status(&self, conversation_id: &ConversationId, status: SessionStatus) {
        if let Err(e) = self.inner.store.update_status(conversation_id, status).await {
            log::warn!("[{conversation_id}] failed to persist status {status:?}: {e}");
        }
    }

    async fn resolve_workdir(&self, workdir: Option<&Path>) -> Result<PathBuf> {
        let dir = match workdir
            .map(Path::to_path_buf)
            .or_else(|| self.inner.processes.options().default_workdir.clone())
        {
            Some(dir) => dir,
            None => std::env::current_dir()?,
        };
        let dir = if dir.is_absolute() {
            dir
        } else {
            std::env::current_dir()?.join(dir)
        };

        Ok(tokio::fs::canonicalize(&dir).await.unwrap_or(dir))
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("SessionManager")
            .field("sessions", &state.sessions.len())
            .field("in_flight", &state.in_flight.len())
            .finish()
    }
}

// ============================================================================
// CREATION AND TEARDOWN
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Teardown {
    /// Cancel the session and delete its persisted metadata
    Forget,
    /// The process is gone; keep metadata so the session can be resumed
    Resume,
}

impl SessionManagerInner {
    async fn create(
        inner: Arc<Self>,
        conversation_id: ConversationId,
        config: AgentConfig,
        workdir: PathBuf,
        stale: Option<Arc<SessionRecord>>,
        ticket: u64,
    ) -> SessionResult {
        if let Some(stale) = stale {
            let mode = if stale.matches(&config.id, &workdir) {
                Teardown::Resume
            } else {
                Teardown::Forget
            };
            log::info!(
                "[{conversation_id}] replacing session {} ({})",
                stale.session_id(),
                if mode == Teardown::Resume {
                    "process exited"
                } else {
                    "agent or workdir changed"
                }
            );
            inner.teardown(&stale, "session replaced", mode).await;
        }

        let record = match inner.open_session(&conversation_id, &config, &workdir).await {
            Ok(record) => record,
            Err(e) => {
                inner.finish_in_flight(&conversation_id, ticket);
                log::error!("[{conversation_id}] failed to open session on {}: {e}", config.id);
                return Err(Arc::new(e));
            }
        };

        let registered = {
            let mut state = inner.state.lock();
            let current = state
                .in_flight
                .get(&conversation_id)
                .is_some_and(|pending| pending.ticket == ticket);
            if current {
                state.in_flight.remove(&conversation_id);
                state
                    .sessions
                    .insert(conversation_id.clone(), Arc::clone(&record));
            }
            current
        };

        if registered {
            Ok(record)
        } else {
            inner
                .teardown(&record, "session cleared during creation", Teardown::Forget)
                .await;
            Err(Arc::new(AgentError::session_not_found(
                conversation_id.as_str(),
            )))
        }
    }

    fn finish_in_flight(&self, conversation_id: &ConversationId, ticket: u64) {
        let mut state = self.state.lock();
        if state
            .in_flight
            .get(conversation_id)
            .is_some_and(|pending| pending.ticket == ticket)
        {
            state.in_flight.remove(conversation_id);
        }
    }

    async fn open_session(
        &self,
        conversation_id: &ConversationId,
        config: &AgentConfig,
        workdir: &Path,
    ) -> Result<Arc<SessionRecord>> {
        let handle = self.processes.get_connection(config).await?;
        self.processes
            .bind_conversation(&config.id, conversation_id, workdir);

        let opened = match self
            .negotiate(&handle, conversation_id, config, workdir)
            .await
        {
            Ok(opened) => opened,
            Err(e) => {
                self.processes.unbind_conversation(conversation_id);
                return Err(e);
            }
        };

        let (current_mode, modes) = match opened.modes {
            Some(state) => (Some(state.current_mode_id), state.available_modes),
            None => (None, Vec::new()),
        };

        let record = Arc::new(SessionRecord {
            conversation_id: conversation_id.clone(),
            agent_id: config.id.clone(),
            session_id: opened.session_id,
            workdir: workdir.to_path_buf(),
            handle,
            modes,
            current_mode: Mutex::new(current_mode),
            hooks: Mutex::new(Vec::new()),
            created_at: Utc::now(),
            resumed: opened.resumed,
        });

        self.apply_preferred_mode(&record).await;

        let metadata = SessionMetadata::new(
            conversation_id.clone(),
            config.id.clone(),
            record.session_id().clone(),
            workdir,
        );
        if let Err(e) = self.store.save(metadata).await {
            log::warn!("[{conversation_id}] failed to persist session metadata: {e}");
        }
        if let Err(e) = self.workspace.register(workdir) {
            log::warn!(
                "[{conversation_id}] failed to register workspace {}: {e}",
                workdir.display()
            );
        }

        log::info!(
            "[{conversation_id}] session {} {} on {} in {}",
            record.session_id(),
            if record.resumed() { "resumed" } else { "opened" },
            config.id,
            workdir.display()
        );

        Ok(record)
    }

    async fn negotiate(
        &self,
        handle: &ProcessHandle,
        conversation_id: &ConversationId,
        config: &AgentConfig,
        workdir: &Path,
    ) -> Result<OpenedSession> {
        if handle.supports_load_session()
            && let Some(stored) = self.stored_metadata(conversation_id).await
            && stored.agent_id == config.id
            && self
                .same_workdir(conversation_id, &stored.workdir, workdir)
                .await
        {
            match handle.load_session(&stored.session_id, workdir).await {
                Ok(response) => {
                    return Ok(OpenedSession {
                        session_id: stored.session_id,
                        modes: response.modes,
                        resumed: true,
                    });
                }
                Err(e) => {
                    log::warn!(
                        "[{conversation_id}] could not resume session {}: {e}, opening a new one",
                        stored.session_id
                    );
                }
            }
        }

        let response = handle.new_session(workdir).await?;
        Ok(OpenedSession {
            session_id: response.session_id,
            modes: response.modes,
            resumed: false,
        })
    }

    async fn stored_metadata(&self, conversation_id: &ConversationId) -> Option<SessionMetadata> {
        match self.store.get(conversation_id).await {
            Ok(metadata) => metadata,
            Err(e) => {
                log::warn!("[{conversation_id}] failed to read session metadata: {e}");
                None
            }
        }
    }

    /// Whether a stored workdir names `workdir`, normalizing the store if it
    /// only differs lexically
    async fn same_workdir(&self, conversation_id: &ConversationId, stored: &Path, workdir: &Path) -> bool {
        if stored == workdir {
            return true;
        }
        match tokio::fs::canonicalize(stored).await {
            Ok(canonical) if canonical == workdir => {
                if let Err(e) = self.store.update_workdir(conversation_id, workdir).await {
                    log::warn!("[{conversation_id}] failed to normalize stored workdir: {e}");
                }
                true
            }
            _ => false,
        }
    }

    /// Re-apply the agent's remembered mode if the new session declares it
    async fn apply_preferred_mode(&self, record: &SessionRecord) {
        let Some(preferred) = record.handle().preferred_mode() else {
            return;
        };
        if record.current_mode().as_deref() == Some(preferred.as_str()) {
            return;
        }
        if !record.declares_mode(&preferred) {
            log::debug!(
                "[{}] session {} does not declare mode {preferred}",
                record.conversation_id(),
                record.session_id()
            );
            return;
        }

        match record
            .handle()
            .set_mode(record.session_id(), &preferred)
            .await
        {
            Ok(()) => record.set_current_mode(&preferred),
            Err(e) => {
                log::warn!(
                    "[{}] could not switch session {} to mode {preferred}, keeping default: {e}",
                    record.conversation_id(),
                    record.session_id()
                );
            }
        }
    }

    fn attach_hooks(&self, record: &SessionRecord, hooks: &SessionHooks) {
        // Old hooks go first so no update is delivered twice
        record.detach_hooks();
        let listener = self.processes.register_session_listener(
            record.agent_id(),
            record.session_id(),
            Arc::clone(&hooks.on_notification),
        );
        let resolver = self.processes.register_permission_resolver(
            record.agent_id(),
            record.session_id(),
            Arc::clone(&hooks.on_permission),
        );
        record.replace_hooks(vec![listener, resolver]);
    }

    /// Every step is best-effort; the registry entry is already gone
    async fn teardown(&self, record: &SessionRecord, reason: &str, mode: Teardown) {
        // Listeners hear about the close before they are dropped
        self.processes
            .clear_session_routes(record.agent_id(), record.session_id(), reason);
        record.detach_hooks();

        if mode == Teardown::Forget
            && record.is_alive()
            && let Err(e) = record.cancel()
        {
            log::debug!(
                "[{}] cancel during teardown failed: {e}",
                record.conversation_id()
            );
        }

        let bound_here = self
            .processes
            .binding(record.conversation_id())
            .is_some_and(|b| &b.agent_id == record.agent_id() && b.workdir == record.workdir());
        if bound_here {
            self.processes.unbind_conversation(record.conversation_id());
        }

        if mode == Teardown::Forget {
            self.forget_metadata(record.conversation_id()).await;
        }
    }

    async fn forget_metadata(&self, conversation_id: &ConversationId) {
        if let Err(e) = self.store.clear(conversation_id).await {
            log::warn!("[{conversation_id}] failed to clear session metadata: {e}");
        }
    }
}
