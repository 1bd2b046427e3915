//! Correlation of agent permission requests with user decisions
//!
//! Each request gets a fresh id, is announced on the turn's event queue, and
//! waits until [`PermissionBroker::resolve`] is called with that id. Tearing a
//! session down resolves its leftovers as cancelled.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::{AgentError, Result};
use crate::types::events::{PermissionPrompt, StreamEvent};
use crate::types::identifiers::{RequestId, SessionId};
use crate::types::permissions::{
    PermissionOption, PermissionOutcome, RequestPermissionParams, select_option,
};

use super::queue::EventQueue;

struct PendingPermissionRequest {
    session_id: SessionId,
    options: Vec<PermissionOption>,
    created_at: DateTime<Utc>,
    resolve_tx: oneshot::Sender<PermissionOutcome>,
}

/// Registry of permission requests awaiting a decision
#[derive(Default)]
pub struct PermissionBroker {
    pending: Mutex<HashMap<RequestId, PendingPermissionRequest>>,
}

impl PermissionBroker {
    /// Empty broker
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Announce a request on `queue` and wait for its decision
    ///
    /// The returned future resolves once [`resolve`](Self::resolve) or a
    /// cancellation runs. If the queue has already ended nobody can decide,
    /// so the request is cancelled immediately.
    pub fn request(
        &self,
        params: RequestPermissionParams,
        queue: &EventQueue,
    ) -> BoxFuture<'static, PermissionOutcome> {
        let request_id = RequestId::generate();
        let (resolve_tx, resolve_rx) = oneshot::channel();

        let prompt = PermissionPrompt {
            request_id: request_id.clone(),
            session_id: params.session_id.clone(),
            tool_call_id: params.tool_call.tool_call_id.clone(),
            title: params
                .tool_call
                .title
                .clone()
                .unwrap_or_else(|| "tool".to_string()),
            kind: params.tool_call.kind.clone(),
            options: params.options.clone(),
        };

        self.pending.lock().insert(
            request_id.clone(),
            PendingPermissionRequest {
                session_id: params.session_id,
                options: params.options,
                created_at: Utc::now(),
                resolve_tx,
            },
        );

        if queue.push_event(StreamEvent::PermissionRequested(prompt)) {
            log::debug!("Permission request {request_id} announced");
        } else {
            log::debug!("Permission request {request_id} arrived after the turn ended");
            self.cancel_request(&request_id);
        }

        async move {
            resolve_rx
                .await
                .unwrap_or(PermissionOutcome::Cancelled)
        }
        .boxed()
    }

    /// Answer a pending request with a yes/no decision
    ///
    /// The decision is mapped onto the best matching option; without one
    /// the outcome is [`PermissionOutcome::Cancelled`].
    ///
    /// # Errors
    /// Returns [`AgentError::PermissionNotFound`] if the id is unknown or
    /// already resolved.
    pub fn resolve(&self, request_id: &RequestId, granted: bool) -> Result<PermissionOutcome> {
        let pending = self
            .pending
            .lock()
            .remove(request_id)
            .ok_or_else(|| AgentError::permission_not_found(request_id.as_str()))?;

        let outcome = select_option(&pending.options, granted);
        if outcome == PermissionOutcome::Cancelled {
            log::warn!(
                "Permission request {request_id}: no option matches granted={granted}, cancelling"
            );
        }
        log::debug!(
            "Permission request {request_id} resolved after {}ms",
            (Utc::now() - pending.created_at).num_milliseconds()
        );

        // The agent may have gone away meanwhile
        let _ = pending.resolve_tx.send(outcome.clone());
        Ok(outcome)
    }

    /// Cancel every pending request of a session, returning how many
    pub fn cancel_session(&self, session_id: &SessionId) -> usize {
        let drained: Vec<PendingPermissionRequest> = {
            let mut pending = self.pending.lock();
            let ids: Vec<RequestId> = pending
                .iter()
                .filter(|(_, p)| &p.session_id == session_id)
                .map(|(id, _)| id.clone())
                .collect();
            ids.iter().filter_map(|id| pending.remove(id)).collect()
        };
        cancel_all_of(drained)
    }

    /// Cancel every pending request
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<PendingPermissionRequest> =
            self.pending.lock().drain().map(|(_, p)| p).collect();
        cancel_all_of(drained)
    }

    /// Requests still awaiting a decision
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Requests of one session still awaiting a decision
    #[must_use]
    pub fn pending_for(&self, session_id: &SessionId) -> usize {
        self.pending
            .lock()
            .values()
            .filter(|p| &p.session_id == session_id)
            .count()
    }

    fn cancel_request(&self, request_id: &RequestId) {
        let removed = self.pending.lock().remove(request_id);
        if let Some(pending) = removed {
            let _ = pending.resolve_tx.send(PermissionOutcome::Cancelled);
        }
    }
}

fn cancel_all_of(drained: Vec<PendingPermissionRequest>) -> usize {
    let count = drained.len();
    for pending in drained {
        let _ = pending.resolve_tx.send(PermissionOutcome::Cancelled);
    }
    count
}

impl std::fmt::Debug for PermissionBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionBroker")
            .field("pending", &self.pending_count())
            .finish()
    }
}
