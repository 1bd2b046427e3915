//! `AgentConnection` implementation
//!
//! This module contains the constructor and the typed protocol calls.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::{mpsc, oneshot};

use crate::control::{
    CancelNotification, ClientCapabilities, Implementation, InitializeResponse,
    LoadSessionRequest, LoadSessionResponse, MessageId, NewSessionRequest, NewSessionResponse,
    PromptRequest, PromptResponse, ProtocolHandler, SetSessionModeRequest, method,
};
use crate::error::{AgentError, Result};
use crate::transport::Transport;
use crate::types::identifiers::{AgentId, SessionId};
use crate::types::updates::ContentBlock;

use super::tasks::{reader_task, writer_task};
use super::{ConnectionInner, LaunchContext, WriterCommand};

impl super::AgentConnection {
    /// Connect `transport` and start the reader and writer tasks
    ///
    /// The connection is not initialized yet; call
    /// [`initialize`](Self::initialize) before anything else.
    ///
    /// # Errors
    /// Returns error if the transport fails to connect
    pub async fn open<T: Transport + 'static>(mut transport: T, ctx: LaunchContext) -> Result<Self> {
        transport.connect().await?;

        let pid = transport.pid();
        let inbound = transport.read_messages();
        let (outbound, commands) = mpsc::unbounded_channel();

        let inner = Arc::new(ConnectionInner {
            agent_id: ctx.agent_id.clone(),
            pid,
            protocol: ProtocolHandler::new(),
            outbound,
            alive: AtomicBool::new(true),
            last_activity: Mutex::new(Utc::now()),
        });

        tokio::spawn(writer_task(transport, commands, ctx.agent_id.to_string()));
        tokio::spawn(reader_task(
            Arc::clone(&inner),
            inbound,
            ctx.router,
            ctx.on_closed,
        ));

        Ok(Self { inner })
    }

    /// Agent this connection talks to
    #[must_use]
    pub fn agent_id(&self) -> &AgentId {
        &self.inner.agent_id
    }

    /// OS process id, if any
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.inner.pid
    }

    /// Whether the agent's output is still open
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.inner.alive.load(Ordering::SeqCst)
    }

    /// When the agent last sent anything
    #[must_use]
    pub fn last_activity(&self) -> DateTime<Utc> {
        *self.inner.last_activity.lock()
    }

    /// Whether the handshake has completed
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.inner.protocol.is_initialized()
    }

    /// Requests still waiting for a response
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.inner.protocol.pending_count()
    }

    /// Send a request and wait for its result
    ///
    /// # Errors
    /// Returns [`AgentError::ConnectionClosed`] if the agent is gone (before or
    /// while waiting), [`AgentError::Rpc`] if the agent answered with an error,
    /// or a parse error if the result does not match `R`.
    pub async fn request<P, R>(&self, method: &str, params: &P) -> Result<R>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        if !self.is_alive() {
            return Err(AgentError::connection_closed(format!(
                "agent {} is not running",
                self.inner.agent_id
            )));
        }

        let (message, response_rx) = self.inner.protocol.create_request(method, &params)?;
        let id = match &message {
            crate::control::JsonRpcMessage::Request(request) => request.id.clone(),
            _ => return Err(AgentError::protocol("request builder produced a non-request")),
        };

        // Released on every exit, including the caller dropping this future
        let _slot = PendingSlot {
            protocol: &self.inner.protocol,
            id,
        };

        // The reader may have failed all pending requests before ours was registered
        if !self.is_alive() {
            return Err(AgentError::connection_closed(format!(
                "agent {} exited",
                self.inner.agent_id
            )));
        }

        self.inner.send(&message)?;

        let value = response_rx
            .await
            .map_err(|_| AgentError::connection_closed("response slot dropped"))??;

        serde_json::from_value(value.clone()).map_err(|e| {
            AgentError::message_parse(format!("Unexpected {method} result: {e}"), Some(value))
        })
    }

    /// Send a notification
    ///
    /// # Errors
    /// Returns error if the agent is gone or params cannot be serialized
    pub fn notify<P: Serialize + ?Sized>(&self, method: &str, params: &P) -> Result<()> {
        if !self.is_alive() {
            return Err(AgentError::connection_closed(format!(
                "agent {} is not running",
                self.inner.agent_id
            )));
        }
        let message = self.inner.protocol.create_notification(method, &params)?;
        self.inner.send(&message)
    }

    /// Perform the `initialize` handshake
    ///
    /// # Errors
    /// Returns [`AgentError::Timeout`] if the agent does not answer within
    /// `timeout`, or [`AgentError::Handshake`] if it answers with an error or
    /// an unsupported protocol version.
    pub async fn initialize(
        &self,
        capabilities: ClientCapabilities,
        client_info: Option<Implementation>,
        timeout: Duration,
    ) -> Result<InitializeResponse> {
        let request = self
            .inner
            .protocol
            .create_init_request(capabilities, client_info);

        let response: InitializeResponse =
            tokio::time::timeout(timeout, self.request(method::INITIALIZE, &request))
                .await
                .map_err(|_| {
                    AgentError::timeout(format!(
                        "agent {} did not answer initialize within {timeout:?}",
                        self.inner.agent_id
                    ))
                })?
                .map_err(|e| AgentError::handshake(e.to_string()))?;

        self.inner.protocol.handle_init_response(&response)?;

        log::info!(
            "[{}] initialized (protocol v{}, agent {})",
            self.inner.agent_id,
            response.protocol_version,
            response
                .agent_info
                .as_ref()
                .map_or("unknown", |info| info.name.as_str())
        );

        Ok(response)
    }

    /// Create a session rooted at `cwd`
    ///
    /// # Errors
    /// Returns error if the request fails
    pub async fn new_session(&self, cwd: &Path) -> Result<NewSessionResponse> {
        let request = NewSessionRequest {
            cwd: cwd.to_path_buf(),
            mcp_servers: Vec::new(),
        };
        self.request(method::SESSION_NEW, &request).await
    }

    /// Resume a previously created session
    ///
    /// # Errors
    /// Returns error if the request fails
    pub async fn load_session(
        &self,
        session_id: &SessionId,
        cwd: &Path,
    ) -> Result<LoadSessionResponse> {
        let request = LoadSessionRequest {
            session_id: session_id.clone(),
            cwd: cwd.to_path_buf(),
            mcp_servers: Vec::new(),
        };
        // Some agents answer with a bare null
        let value: serde_json::Value = self.request(method::SESSION_LOAD, &request).await?;
        if value.is_null() {
            return Ok(LoadSessionResponse::default());
        }
        serde_json::from_value(value.clone()).map_err(|e| {
            AgentError::message_parse(format!("Unexpected session/load result: {e}"), Some(value))
        })
    }

    /// Run one turn with a text prompt
    ///
    /// Resolves when the agent finishes the turn; updates arrive through the
    /// session router meanwhile.
    ///
    /// # Errors
    /// Returns error if the request fails or the agent exits mid-turn
    pub async fn prompt(&self, session_id: &SessionId, text: &str) -> Result<PromptResponse> {
        let request = PromptRequest {
            session_id: session_id.clone(),
            prompt: vec![ContentBlock::Text {
                text: text.to_string(),
            }],
        };
        self.request(method::SESSION_PROMPT, &request).await
    }

    /// Switch a session's mode
    ///
    /// # Errors
    /// Returns error if the request fails
    pub async fn set_mode(&self, session_id: &SessionId, mode_id: &str) -> Result<()> {
        let request = SetSessionModeRequest {
            session_id: session_id.clone(),
            mode_id: mode_id.to_string(),
        };
        let _: serde_json::Value = self.request(method::SESSION_SET_MODE, &request).await?;
        Ok(())
    }

    /// Ask the agent to stop the session's running turn
    ///
    /// # Errors
    /// Returns error if the agent is gone
    pub fn cancel(&self, session_id: &SessionId) -> Result<()> {
        self.notify(
            method::SESSION_CANCEL,
            &CancelNotification {
                session_id: session_id.clone(),
            },
        )
    }

    /// Close the transport and wait for the agent to exit
    ///
    /// Pending requests fail with [`AgentError::ConnectionClosed`] once the
    /// agent's output ends.
    ///
    /// # Errors
    /// Returns error if the transport fails to shut down cleanly
    pub async fn close(&self) -> Result<()> {
        self.inner.alive.store(false, Ordering::SeqCst);

        let (ack_tx, ack_rx) = oneshot::channel();
        if self.inner.outbound.send(WriterCommand::Close(ack_tx)).is_err() {
            // Writer already gone, transport already closed
            return Ok(());
        }
        ack_rx.await.unwrap_or(Ok(()))
    }
}

/// Pending request entry that is abandoned when dropped
///
/// Once the response has been routed the entry is already gone and the
/// abandon is a no-op.
struct PendingSlot<'a> {
    protocol: &'a ProtocolHandler,
    id: MessageId,
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        self.protocol.abandon(&self.id);
    }
}
