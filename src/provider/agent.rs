//! Turn driver over agent sessions

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures::FutureExt;
use parking_lot::Mutex;

use crate::client::SessionEvent;
use crate::error::Result;
use crate::manager::{SessionHooks, SessionManager, SessionRecord, SessionStatus};
use crate::mapper::ContentMapper;
use crate::types::events::{MessageBlock, StopReason, StreamEvent};
use crate::types::identifiers::{AgentId, ConversationId, RequestId, SessionId};
use crate::types::permissions::{PermissionOutcome, RequestPermissionParams};
use crate::types::updates::SessionNotification;

use super::permissions::PermissionBroker;
use super::queue::EventQueue;
use super::{ChatRequest, EventStream, ModelProvider};

/// Receiver of blocks for the persisted assistant message
pub trait BlockSink: Send + Sync {
    /// Append one block to the conversation's current assistant message
    fn append(&self, conversation_id: &ConversationId, block: &MessageBlock);
}

struct ActiveTurn {
    id: u64,
    queue: Arc<EventQueue>,
    record: Option<Arc<SessionRecord>>,
}

impl ActiveTurn {
    /// Stop the agent's work and end the stream
    fn abort(self, broker: &PermissionBroker) {
        if let Some(record) = &self.record {
            if let Err(e) = record.cancel() {
                log::debug!("[{}] cancel not delivered: {e}", record.conversation_id());
            }
            broker.cancel_session(record.session_id());
        }
        self.queue.close();
    }
}

struct ProviderInner {
    sessions: SessionManager,
    broker: PermissionBroker,
    mapper: Mutex<ContentMapper>,
    turns: Mutex<HashMap<ConversationId, ActiveTurn>>,
    sink: Option<Arc<dyn BlockSink>>,
    next_turn: AtomicU64,
}

/// [`ModelProvider`] that runs each request as a prompt turn on an agent
///
/// One turn runs per conversation at a time; starting a new one cancels the
/// previous. Dropping a turn's stream before it ends cancels the turn.
#[derive(Clone)]
pub struct AgentProvider {
    inner: Arc<ProviderInner>,
}

impl AgentProvider {
    /// Provider over `sessions`
    #[must_use]
    pub fn new(sessions: SessionManager) -> Self {
        Self::build(sessions, None)
    }

    /// Provider that also hands message blocks to `sink`
    #[must_use]
    pub fn with_sink(sessions: SessionManager, sink: Arc<dyn BlockSink>) -> Self {
        Self::build(sessions, Some(sink))
    }

    fn build(sessions: SessionManager, sink: Option<Arc<dyn BlockSink>>) -> Self {
        Self {
            inner: Arc::new(ProviderInner {
                sessions,
                broker: PermissionBroker::new(),
                mapper: Mutex::new(ContentMapper::new()),
                turns: Mutex::new(HashMap::new()),
                sink,
                next_turn: AtomicU64::new(1),
            }),
        }
    }

    /// Session manager turns run on
    #[must_use]
    pub fn sessions(&self) -> &SessionManager {
        &self.inner.sessions
    }

    /// Whether a turn is running for `conversation_id`
    #[must_use]
    pub fn is_streaming(&self, conversation_id: &ConversationId) -> bool {
        self.inner.turns.lock().contains_key(conversation_id)
    }

    /// Permission requests awaiting a decision
    #[must_use]
    pub fn pending_permissions(&self) -> usize {
        self.inner.broker.pending_count()
    }

    /// Answer a permission prompt surfaced as [`StreamEvent::PermissionRequested`]
    ///
    /// # Errors
    /// Returns [`crate::AgentError::PermissionNotFound`] if the request is
    /// unknown or already answered.
    pub fn resolve_permission_request(
        &self,
        request_id: &RequestId,
        granted: bool,
    ) -> Result<PermissionOutcome> {
        self.inner.broker.resolve(request_id, granted)
    }

    /// Cancel the running turn of a conversation
    ///
    /// The agent is asked to stop and the stream ends without an error
    /// event. Returns `false` if no turn was running.
    pub fn cancel(&self, conversation_id: &ConversationId) -> bool {
        let turn = self.inner.turns.lock().remove(conversation_id);
        match turn {
            Some(turn) => {
                log::info!("[{conversation_id}] turn {} cancelled", turn.id);
                turn.abort(&self.inner.broker);
                true
            }
            None => false,
        }
    }

    /// Restart agents so they pick up new configuration
    pub async fn refresh_agents(&self, agent_ids: Option<&[AgentId]>) {
        self.inner.sessions.refresh_agents(agent_ids).await;
    }

    /// Cancel every turn, tear down every session and stop every agent
    pub async fn shutdown(&self) {
        let turns: Vec<ActiveTurn> = self.inner.turns.lock().drain().map(|(_, t)| t).collect();
        for turn in turns {
            turn.abort(&self.inner.broker);
        }
        let cleared = self.inner.sessions.clear_all_sessions().await;
        self.inner.sessions.processes().shutdown().await;
        self.inner.broker.cancel_all();
        log::info!("Provider shut down ({cleared} sessions cleared)");
    }
}

impl ModelProvider for AgentProvider {
    fn stream(&self, request: ChatRequest) -> EventStream {
        let inner = Arc::clone(&self.inner);
        let conversation_id = request.conversation_id.clone();
        let (turn_id, queue) = inner.begin_turn(&conversation_id);

        let guard = TurnGuard {
            inner: Arc::downgrade(&inner),
            conversation_id,
            turn_id,
            finished: false,
        };

        Box::pin(async_stream::stream! {
            let mut guard = guard;
            tokio::spawn(ProviderInner::run_turn(inner, turn_id, Arc::clone(&queue), request));
            while let Some(event) = queue.next().await {
                yield event;
            }
            guard.finished = true;
        })
    }
}

impl std::fmt::Debug for AgentProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentProvider")
            .field("turns", &self.inner.turns.lock().len())
            .field("broker", &self.inner.broker)
            .finish()
    }
}

/// Cancels its turn when the stream is dropped before the end
struct TurnGuard {
    inner: Weak<ProviderInner>,
    conversation_id: ConversationId,
    turn_id: u64,
    finished: bool,
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Some(inner) = self.inner.upgrade()
            && let Some(turn) = inner.take_turn(&self.conversation_id, self.turn_id)
        {
            log::debug!(
                "[{}] stream dropped, cancelling turn {}",
                self.conversation_id,
                self.turn_id
            );
            turn.abort(&inner.broker);
        }
    }
}

// ============================================================================
// TURN LIFECYCLE
// ============================================================================

impl ProviderInner {
    fn begin_turn(&self, conversation_id: &ConversationId) -> (u64, Arc<EventQueue>) {
        let id = self.next_turn.fetch_add(1, Ordering::Relaxed);
        let queue = Arc::new(EventQueue::new());
        let previous = self.turns.lock().insert(
            conversation_id.clone(),
            ActiveTurn {
                id,
                queue: Arc::clone(&queue),
                record: None,
            },
        );
        if let Some(previous) = previous {
            log::info!(
                "[{conversation_id}] turn {id} replaces running turn {}",
                previous.id
            );
            previous.abort(&self.broker);
        }
        (id, queue)
    }

    fn take_turn(&self, conversation_id: &ConversationId, turn_id: u64) -> Option<ActiveTurn> {
        let mut turns = self.turns.lock();
        match turns.get(conversation_id) {
            Some(turn) if turn.id == turn_id => turns.remove(conversation_id),
            _ => None,
        }
    }

    /// Attach the session to the turn; `false` if the turn is already over
    fn attach_record(
        &self,
        conversation_id: &ConversationId,
        turn_id: u64,
        record: &Arc<SessionRecord>,
    ) -> bool {
        let mut turns = self.turns.lock();
        match turns.get_mut(conversation_id) {
            Some(turn) if turn.id == turn_id && !turn.queue.is_closed() => {
                turn.record = Some(Arc::clone(record));
                true
            }
            _ => false,
        }
    }

    async fn run_turn(
        inner: Arc<Self>,
        turn_id: u64,
        queue: Arc<EventQueue>,
        request: ChatRequest,
    ) {
        let conversation_id = request.conversation_id.clone();
        let hooks = Self::hooks(&inner, &conversation_id);

        let record = match inner
            .sessions
            .get_or_create_session(
                &conversation_id,
                &request.agent,
                hooks,
                request.workdir.as_deref(),
            )
            .await
        {
            Ok(record) => record,
            Err(e) => {
                log::warn!("[{conversation_id}] no session for turn {turn_id}: {e}");
                queue.push_event(StreamEvent::error(e.to_string()));
                queue.close();
                inner.take_turn(&conversation_id, turn_id);
                return;
            }
        };

        if !inner.attach_record(&conversation_id, turn_id, &record) {
            log::debug!("[{conversation_id}] turn {turn_id} ended before its prompt was sent");
            return;
        }

        log::debug!(
            "[{conversation_id}] turn {turn_id} prompting session {}",
            record.session_id()
        );
        let status = match record.prompt(&request.prompt).await {
            Ok(response) => {
                if let Some(usage) = response.usage {
                    queue.push_event(StreamEvent::Usage(usage));
                }
                let reason = StopReason::from_wire(&response.stop_reason);
                let status = match reason {
                    StopReason::Cancelled => SessionStatus::Cancelled,
                    _ => SessionStatus::Completed,
                };
                queue.push_event(StreamEvent::Stop { reason });
                status
            }
            Err(e) => {
                log::warn!("[{conversation_id}] turn {turn_id} failed: {e}");
                queue.push_event(StreamEvent::error(e.to_string()));
                SessionStatus::Failed
            }
        };

        inner.sessions.update_status(&conversation_id, status).await;
        queue.close();
        inner.take_turn(&conversation_id, turn_id);
    }

    /// Hooks routing a session's traffic to whichever turn of the
    /// conversation currently owns that session
    ///
    /// The hooks hold no queue of their own, so a replaced turn that attaches
    /// late cannot steer events away from its successor.
    fn hooks(inner: &Arc<Self>, conversation_id: &ConversationId) -> SessionHooks {
        let on_notification = {
            let weak = Arc::downgrade(inner);
            let conversation_id = conversation_id.clone();
            move |event: SessionEvent| {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                match event {
                    SessionEvent::Update(notification) => {
                        inner.on_update(&conversation_id, &notification);
                    }
                    SessionEvent::Closed { session_id, reason } => {
                        inner.on_closed(&conversation_id, &session_id, &reason);
                    }
                }
            }
        };

        let on_permission = {
            let weak = Arc::downgrade(inner);
            let conversation_id = conversation_id.clone();
            move |params: RequestPermissionParams| {
                let Some(inner) = weak.upgrade() else {
                    return async { PermissionOutcome::Cancelled }.boxed();
                };
                match inner.live_queue(&conversation_id, &params.session_id) {
                    Some(queue) => inner.broker.request(params, &queue),
                    None => {
                        log::debug!(
                            "[{conversation_id}] permission request outside a turn, cancelling"
                        );
                        async { PermissionOutcome::Cancelled }.boxed()
                    }
                }
            }
        };

        SessionHooks::new(on_notification, on_permission)
    }

    /// Queue of the running turn, if it has `session_id` attached
    fn live_queue(
        &self,
        conversation_id: &ConversationId,
        session_id: &SessionId,
    ) -> Option<Arc<EventQueue>> {
        let turns = self.turns.lock();
        let turn = turns.get(conversation_id)?;
        let record = turn.record.as_ref()?;
        (record.session_id() == session_id && !turn.queue.is_closed())
            .then(|| Arc::clone(&turn.queue))
    }

    fn on_update(&self, conversation_id: &ConversationId, notification: &SessionNotification) {
        let Some(queue) = self.live_queue(conversation_id, &notification.session_id) else {
            log::trace!(
                "[{conversation_id}] dropping {} outside a turn",
                notification.update.kind()
            );
            return;
        };
        let mapped = self.mapper.lock().map(notification);

        if let Some(mode_id) = &mapped.current_mode_id {
            self.sessions.record_mode(conversation_id, mode_id);
        }
        if let Some(sink) = &self.sink {
            for block in &mapped.blocks {
                sink.append(conversation_id, block);
            }
        }
        for event in mapped.events {
            queue.push_event(event);
        }
    }

    fn on_closed(&self, conversation_id: &ConversationId, session_id: &SessionId, reason: &str) {
        let cancelled = self.broker.cancel_session(session_id);
        self.mapper.lock().clear_session(session_id);
        if cancelled > 0 {
            log::debug!("[{conversation_id}] {cancelled} permission requests cancelled");
        }

        if let Some(queue) = self.live_queue(conversation_id, session_id) {
            queue.push_event(StreamEvent::error(format!("Agent session ended: {reason}")));
            queue.close();
        }
    }
}
