//! Background tasks for `AgentConnection`
//!
//! The writer task owns the transport and serializes every outbound frame.
//! The reader task consumes the transport's inbound channel and routes each
//! message.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::control::{
    JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, MessageId, RpcError, method,
};
use crate::error::Result;
use crate::transport::Transport;
use crate::types::permissions::{
    PermissionOutcome, RequestPermissionParams, RequestPermissionResponse,
};
use crate::types::updates::SessionNotification;

use super::{CloseCallback, ConnectionInner, SessionRouter, WriterCommand};

impl ConnectionInner {
    /// Record inbound traffic
    pub(crate) fn touch(&self) {
        *self.last_activity.lock() = Utc::now();
    }

    /// Queue a message for the writer task
    pub(crate) fn send(&self, message: &JsonRpcMessage) -> Result<()> {
        let frame = self.protocol.serialize_message(message)?;
        self.outbound
            .send(WriterCommand::Frame(frame))
            .map_err(|_| crate::error::AgentError::connection_closed("writer task has stopped"))
    }

    fn respond(&self, id: MessageId, result: &impl Serialize) {
        let message = match serde_json::to_value(result) {
            Ok(value) => JsonRpcMessage::result(id, value),
            Err(e) => JsonRpcMessage::error(
                id,
                RpcError {
                    code: crate::control::INTERNAL_ERROR,
                    message: e.to_string(),
                    data: None,
                },
            ),
        };
        if let Err(e) = self.send(&message) {
            log::debug!("[{}] dropping response: {e}", self.agent_id);
        }
    }

    fn respond_error(&self, id: MessageId, error: RpcError) {
        if let Err(e) = self.send(&JsonRpcMessage::error(id, error)) {
            log::debug!("[{}] dropping error response: {e}", self.agent_id);
        }
    }
}

/// Writer task - drains queued frames into the transport
pub(super) async fn writer_task<T: Transport + 'static>(
    mut transport: T,
    mut commands: mpsc::UnboundedReceiver<WriterCommand>,
    label: String,
) {
    while let Some(command) = commands.recv().await {
        match command {
            WriterCommand::Frame(frame) => {
                if let Err(e) = transport.write(&frame).await {
                    log::warn!("[{label}] write failed: {e}");
                }
            }
            WriterCommand::Close(ack) => {
                let result = transport.close().await;
                let _ = ack.send(result);
                return;
            }
        }
    }

    // Every sender is gone, nobody can talk to this agent any more
    if let Err(e) = transport.close().await {
        log::debug!("[{label}] close after last handle dropped failed: {e}");
    }
}

/// Reader task - routes inbound messages until the agent's output ends
pub(super) async fn reader_task(
    inner: Arc<ConnectionInner>,
    mut inbound: mpsc::UnboundedReceiver<Result<serde_json::Value>>,
    router: Arc<SessionRouter>,
    on_closed: Option<CloseCallback>,
) {
    let mut reason = "agent output closed".to_string();

    while let Some(item) = inbound.recv().await {
        match item {
            Ok(value) => {
                inner.touch();
                route_message(&inner, &router, value);
            }
            Err(e) => {
                log::warn!("[{}] read error: {e}", inner.agent_id);
                reason = e.to_string();
            }
        }
    }

    inner.alive.store(false, Ordering::SeqCst);
    let failed = inner.protocol.fail_all(&reason);
    log::info!(
        "[{}] connection closed ({reason}), failed {failed} pending requests",
        inner.agent_id
    );

    if let Some(callback) = on_closed {
        callback(reason);
    }
}

fn route_message(inner: &Arc<ConnectionInner>, router: &SessionRouter, value: serde_json::Value) {
    let message = match inner.protocol.parse_message(value) {
        Ok(message) => message,
        Err(e) => {
            log::warn!("[{}] dropping inbound frame: {e}", inner.agent_id);
            return;
        }
    };

    match message {
        JsonRpcMessage::Response(response) => {
            inner.protocol.handle_response(response);
        }
        JsonRpcMessage::Notification(notification) => {
            route_notification(inner, router, notification);
        }
        JsonRpcMessage::Request(request) => {
            route_request(inner, router, request);
        }
    }
}

fn route_notification(
    inner: &ConnectionInner,
    router: &SessionRouter,
    notification: JsonRpcNotification,
) {
    if notification.method != method::SESSION_UPDATE {
        log::debug!(
            "[{}] ignoring notification {}",
            inner.agent_id,
            notification.method
        );
        return;
    }

    match serde_json::from_value::<SessionNotification>(notification.params) {
        Ok(update) => {
            let session_id = update.session_id.clone();
            let kind = update.update.kind();
            if !router.dispatch(&inner.agent_id, update) {
                log::debug!(
                    "[{}] no listener for {kind} on session {session_id}",
                    inner.agent_id
                );
            }
        }
        Err(e) => {
            log::warn!("[{}] malformed session/update: {e}", inner.agent_id);
        }
    }
}

fn route_request(inner: &Arc<ConnectionInner>, router: &SessionRouter, request: JsonRpcRequest) {
    if request.method != method::SESSION_REQUEST_PERMISSION {
        log::debug!(
            "[{}] rejecting unsupported request {}",
            inner.agent_id,
            request.method
        );
        inner.respond_error(request.id, RpcError::method_not_found(&request.method));
        return;
    }

    let params = match serde_json::from_value::<RequestPermissionParams>(request.params) {
        Ok(params) => params,
        Err(e) => {
            inner.respond_error(request.id, RpcError::invalid_params(e.to_string()));
            return;
        }
    };

    let Some(resolver) = router.resolver(&inner.agent_id, &params.session_id) else {
        log::warn!(
            "[{}] no permission resolver for session {}, cancelling",
            inner.agent_id,
            params.session_id
        );
        inner.respond(
            request.id,
            &RequestPermissionResponse {
                outcome: PermissionOutcome::Cancelled,
            },
        );
        return;
    };

    // The decision may take as long as the user needs, keep reading meanwhile
    let decision = resolver(params);
    let inner = Arc::clone(inner);
    tokio::spawn(async move {
        let outcome = decision.await;
        inner.respond(request.id, &RequestPermissionResponse { outcome });
    });
}
