//! One long-lived process per agent id
//!
//! The `ProcessManager` owns every agent process. Callers ask for a
//! connection by agent config; the first caller spawns and initializes the
//! process, concurrent callers await that same startup, and later callers
//! reuse the live handle. When a process exits, everything bound to it (its
//! handle, session routes, conversation bindings) is dropped in one place.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;

use crate::client::{
    CloseCallback, Detach, LaunchContext, Launcher, NotificationHandler, PermissionResolver,
    SessionRouter, SubprocessLauncher,
};
use crate::control::Implementation;
use crate::error::{AgentError, Result};
use crate::transport::{ShellEnvironment, resolve_launch};
use crate::types::agent::AgentConfig;
use crate::types::identifiers::{AgentId, ConversationId, SessionId};
use crate::types::options::BridgeOptions;

use super::handle::ProcessHandle;

type SpawnResult = std::result::Result<Arc<ProcessHandle>, Arc<AgentError>>;
type SpawnFuture = Shared<BoxFuture<'static, SpawnResult>>;

// ============================================================================
// STATE
// ============================================================================

/// Conversation bound to an agent process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationBinding {
    /// Agent serving the conversation
    pub agent_id: AgentId,
    /// Working directory of the conversation's session
    pub workdir: PathBuf,
}

struct InFlight {
    generation: u64,
    future: SpawnFuture,
}

#[derive(Default)]
struct ProcessState {
    handles: HashMap<AgentId, Arc<ProcessHandle>>,
    in_flight: HashMap<AgentId, InFlight>,
    launches: HashMap<AgentId, u32>,
    bindings: HashMap<ConversationId, ConversationBinding>,
}

struct ProcessManagerInner {
    options: BridgeOptions,
    launcher: Arc<dyn Launcher>,
    environment: ShellEnvironment,
    router: Arc<SessionRouter>,
    state: Mutex<ProcessState>,
    next_generation: AtomicU64,
}

// ============================================================================
// PROCESS MANAGER
// ============================================================================

/// Registry of agent processes keyed by agent id
///
/// Cheap to clone; clones share the same registry.
#[derive(Clone)]
pub struct ProcessManager {
    inner: Arc<ProcessManagerInner>,
}

impl ProcessManager {
    /// Manager that launches agents as child processes
    #[must_use]
    pub fn new(options: BridgeOptions) -> Self {
        Self::with_launcher(options, Arc::new(SubprocessLauncher))
    }

    /// Manager with a custom launcher
    #[must_use]
    pub fn with_launcher(options: BridgeOptions, launcher: Arc<dyn Launcher>) -> Self {
        let environment = ShellEnvironment::new(options.login_shell_env);
        Self {
            inner: Arc::new(ProcessManagerInner {
                options,
                launcher,
                environment,
                router: Arc::new(SessionRouter::new()),
                state: Mutex::new(ProcessState::default()),
                next_generation: AtomicU64::new(1),
            }),
        }
    }

    /// Options this manager was created with
    #[must_use]
    pub fn options(&self) -> &BridgeOptions {
        &self.inner.options
    }

    /// Live, initialized handle for `config`, spawning it if needed
    ///
    /// Concurrent calls for the same agent share one startup. A dead handle
    /// is discarded and replaced.
    ///
    /// # Errors
    /// Returns error if the executable cannot be resolved, the process fails
    /// to start, or the handshake fails or times out. Nothing is registered
    /// in that case.
    pub async fn get_connection(&self, config: &AgentConfig) -> Result<Arc<ProcessHandle>> {
        let startup = {
            let mut state = self.inner.state.lock();

            if let Some(handle) = state.handles.get(&config.id) {
                if handle.is_alive() {
                    return Ok(Arc::clone(handle));
                }
                log::info!("[{}] previous process is gone, respawning", config.id);
                state.handles.remove(&config.id);
            }

            if let Some(in_flight) = state.in_flight.get(&config.id) {
                log::debug!("[{}] joining in-flight startup", config.id);
                in_flight.future.clone()
            } else {
                let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
                let future = ProcessManagerInner::start(
                    Arc::clone(&self.inner),
                    config.clone(),
                    generation,
                )
                .boxed()
                .shared();
                state.in_flight.insert(
                    config.id.clone(),
                    InFlight {
                        generation,
                        future: future.clone(),
                    },
                );
                future
            }
        };

        startup.await.map_err(AgentError::from_shared)
    }

    /// Handle for `agent_id`, if one is registered
    #[must_use]
    pub fn handle(&self, agent_id: &AgentId) -> Option<Arc<ProcessHandle>> {
        self.inner.state.lock().handles.get(agent_id).cloned()
    }

    /// Whether `agent_id` has a live process
    #[must_use]
    pub fn is_alive(&self, agent_id: &AgentId) -> bool {
        self.handle(agent_id).is_some_and(|h| h.is_alive())
    }

    /// Agents with a registered process
    #[must_use]
    pub fn active_agents(&self) -> Vec<AgentId> {
        let mut agents: Vec<AgentId> = self.inner.state.lock().handles.keys().cloned().collect();
        agents.sort();
        agents
    }

    /// Terminate the agent's process and forget everything bound to it
    ///
    /// A startup still in flight is abandoned; its process is closed as soon
    /// as it comes up.
    ///
    /// # Errors
    /// Returns error if the process fails to shut down cleanly
    pub async fn release(&self, agent_id: &AgentId) -> Result<()> {
        let handle = {
            let mut state = self.inner.state.lock();
            state.in_flight.remove(agent_id);
            state.bindings.retain(|_, binding| &binding.agent_id != agent_id);
            state.handles.remove(agent_id)
        };

        self.inner.router.clear_agent(agent_id, "agent released");

        match handle {
            Some(handle) => {
                log::info!("[{agent_id}] releasing process {:?}", handle.pid());
                handle.close().await
            }
            None => Ok(()),
        }
    }

    /// Release every agent, leaving all registries empty
    pub async fn shutdown(&self) {
        let agent_ids: Vec<AgentId> = {
            let state = self.inner.state.lock();
            let mut ids: Vec<AgentId> = state
                .handles
                .keys()
                .chain(state.in_flight.keys())
                .cloned()
                .collect();
            ids.sort();
            ids.dedup();
            ids
        };

        log::info!("Shutting down {} agent processes", agent_ids.len());

        let results = futures::future::join_all(agent_ids.iter().map(|id| self.release(id))).await;
        for (agent_id, result) in agent_ids.iter().zip(results) {
            if let Err(e) = result {
                log::warn!("[{agent_id}] failed to shut down cleanly: {e}");
            }
        }

        {
            let mut state = self.inner.state.lock();
            state.handles.clear();
            state.in_flight.clear();
            state.bindings.clear();
            state.launches.clear();
        }
        self.inner.router.clear_all("manager shut down");
    }

    // ------------------------------------------------------------------------
    // Session routes
    // ------------------------------------------------------------------------

    /// Route `session/update` notifications of one session to `handler`
    pub fn register_session_listener(
        &self,
        agent_id: &AgentId,
        session_id: &SessionId,
        handler: NotificationHandler,
    ) -> Detach {
        self.inner
            .router
            .register_listener(agent_id, session_id, handler)
    }

    /// Route `session/request_permission` requests of one session to `resolver`
    pub fn register_permission_resolver(
        &self,
        agent_id: &AgentId,
        session_id: &SessionId,
        resolver: PermissionResolver,
    ) -> Detach {
        self.inner
            .router
            .register_resolver(agent_id, session_id, resolver)
    }

    /// Drop every route of one session, telling its listeners it closed
    pub fn clear_session_routes(&self, agent_id: &AgentId, session_id: &SessionId, reason: &str) {
        self.inner.router.clear_session(agent_id, session_id, reason);
    }

    /// Router shared by every connection of this manager
    #[must_use]
    pub fn router(&self) -> &Arc<SessionRouter> {
        &self.inner.router
    }

    // ------------------------------------------------------------------------
    // Conversation bindings
    // ------------------------------------------------------------------------

    /// Record that `conversation_id` is served by `agent_id` in `workdir`
    pub fn bind_conversation(&self, agent_id: &AgentId, conversation_id: &ConversationId, workdir: &Path) {
        self.inner.state.lock().bindings.insert(
            conversation_id.clone(),
            ConversationBinding {
                agent_id: agent_id.clone(),
                workdir: workdir.to_path_buf(),
            },
        );
    }

    /// Forget a conversation binding
    pub fn unbind_conversation(&self, conversation_id: &ConversationId) -> Option<ConversationBinding> {
        self.inner.state.lock().bindings.remove(conversation_id)
    }

    /// Binding of one conversation
    #[must_use]
    pub fn binding(&self, conversation_id: &ConversationId) -> Option<ConversationBinding> {
        self.inner.state.lock().bindings.get(conversation_id).cloned()
    }

    /// Conversations bound to an agent
    #[must_use]
    pub fn conversations_for(&self, agent_id: &AgentId) -> Vec<ConversationId> {
        let mut conversations: Vec<ConversationId> = self
            .inner
            .state
            .lock()
            .bindings
            .iter()
            .filter(|(_, binding)| &binding.agent_id == agent_id)
            .map(|(conversation_id, _)| conversation_id.clone())
            .collect();
        conversations.sort();
        conversations
    }

    /// Re-read the base environment on the next spawn
    pub fn invalidate_environment(&self) {
        self.inner.environment.invalidate();
    }
}

impl std::fmt::Debug for ProcessManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("ProcessManager")
            .field("handles", &state.handles.len())
            .field("in_flight", &state.in_flight.len())
            .field("bindings", &state.bindings.len())
            .finish()
    }
}

// ============================================================================
// STARTUP AND EXIT
// ============================================================================

impl ProcessManagerInner {
    async fn start(inner: Arc<Self>, config: AgentConfig, generation: u64) -> SpawnResult {
        let result = inner.create_handle(&config, generation).await;

        let outcome = {
            let mut state = inner.state.lock();
            let current = state
                .in_flight
                .get(&config.id)
                .is_some_and(|in_flight| in_flight.generation == generation);
            if current {
                state.in_flight.remove(&config.id);
            }

            match result {
                Ok(handle) if current => {
                    state.handles.insert(config.id.clone(), Arc::clone(&handle));
                    Ok(handle)
                }
                Ok(handle) => Err(handle),
                Err(e) => {
                    log::error!("[{}] failed to start: {e}", config.id);
                    return Err(Arc::new(e));
                }
            }
        };

        match outcome {
            Ok(handle) => Ok(handle),
            Err(abandoned) => {
                log::info!("[{}] released during startup, closing", config.id);
                if let Err(e) = abandoned.close().await {
                    log::debug!("[{}] close after abandoned startup failed: {e}", config.id);
                }
                Err(Arc::new(AgentError::connection_closed(format!(
                    "agent {} was released during startup",
                    config.id
                ))))
            }
        }
    }

    async fn create_handle(self: &Arc<Self>, config: &AgentConfig, generation: u64) -> Result<Arc<ProcessHandle>> {
        let base_env = self.environment.get().await;
        let spec = resolve_launch(
            config,
            &base_env,
            &self.options.bundled_runtime,
            self.options.default_workdir.as_deref(),
        )?;

        let weak: Weak<Self> = Arc::downgrade(self);
        let agent_id = config.id.clone();
        let on_closed: CloseCallback = Box::new(move |reason| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_exit(&agent_id, generation, &reason);
            }
        });

        let ctx = LaunchContext {
            agent_id: config.id.clone(),
            spec,
            max_frame_size: self.options.max_frame_size,
            close_grace: self.options.close_grace,
            router: Arc::clone(&self.router),
            on_closed: Some(on_closed),
        };

        let connection = self.launcher.launch(ctx).await?;

        let client_info = Implementation {
            name: self.options.client_name.clone(),
            version: self.options.client_version.clone(),
        };
        let init = match connection
            .initialize(
                self.options.client_capabilities,
                Some(client_info),
                self.options.handshake_timeout,
            )
            .await
        {
            Ok(init) => init,
            Err(e) => {
                if let Err(close_err) = connection.close().await {
                    log::debug!("[{}] close after failed handshake: {close_err}", config.id);
                }
                return Err(e);
            }
        };

        let restart_count = {
            let mut state = self.state.lock();
            let launches = state.launches.entry(config.id.clone()).or_insert(0);
            let previous = *launches;
            *launches += 1;
            previous
        };

        log::info!(
            "[{}] ready (pid {:?}, restarts {restart_count})",
            config.id,
            connection.pid()
        );

        Ok(Arc::new(ProcessHandle::new(
            config.id.clone(),
            generation,
            restart_count,
            connection,
            init,
        )))
    }

    /// Called from the connection's reader task when the agent's output ends
    fn handle_exit(&self, agent_id: &AgentId, generation: u64, reason: &str) {
        let removed = {
            let mut state = self.state.lock();
            let matches = state
                .handles
                .get(agent_id)
                .is_some_and(|handle| handle.generation() == generation);
            if matches {
                state.bindings.retain(|_, binding| &binding.agent_id != agent_id);
                state.handles.remove(agent_id)
            } else {
                None
            }
        };

        let Some(handle) = removed else {
            return;
        };

        log::warn!("[{agent_id}] process exited unexpectedly: {reason}");
        self.router
            .clear_agent(agent_id, &format!("agent exited: {reason}"));

        // Reap the child
        tokio::spawn(async move {
            if let Err(e) = handle.close().await {
                log::debug!("[{}] close after exit failed: {e}", handle.agent_id());
            }
        });
    }
}
