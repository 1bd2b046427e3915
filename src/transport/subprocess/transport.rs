//! Subprocess transport implementation

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::Transport;
use crate::error::{AgentError, Result};
use crate::types::options::{DEFAULT_CLOSE_GRACE, DEFAULT_MAX_FRAME_SIZE};

use super::config::LaunchSpec;

/// Transport that runs an agent as a child process and talks over stdio
pub struct SubprocessTransport {
    pub(super) spec: LaunchSpec,
    pub(super) label: String,
    pub(super) process: Option<Child>,
    pub(super) pid: Option<u32>,
    pub(super) stdin: Option<ChildStdin>,
    pub(super) stdout: Option<ChildStdout>,
    pub(super) ready: Arc<AtomicBool>,
    pub(super) max_frame_size: usize,
    pub(super) close_grace: Duration,
    pub(super) reader_task: Option<JoinHandle<()>>,
    pub(super) stderr_task: Option<JoinHandle<()>>,
}

impl SubprocessTransport {
    /// Create a new subprocess transport
    ///
    /// # Arguments
    /// * `spec` - Resolved launch spec
    /// * `label` - Name used in log lines (usually the agent id)
    pub fn new(spec: LaunchSpec, label: impl Into<String>) -> Self {
        Self {
            spec,
            label: label.into(),
            process: None,
            pid: None,
            stdin: None,
            stdout: None,
            ready: Arc::new(AtomicBool::new(false)),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            close_grace: DEFAULT_CLOSE_GRACE,
            reader_task: None,
            stderr_task: None,
        }
    }

    /// Set the maximum inbound frame size
    #[must_use]
    pub fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Set the grace period before a closing process is killed
    #[must_use]
    pub fn with_close_grace(mut self, grace: Duration) -> Self {
        self.close_grace = grace;
        self
    }

    /// The launch spec this transport runs
    #[must_use]
    pub fn spec(&self) -> &LaunchSpec {
        &self.spec
    }
}

impl Transport for SubprocessTransport {
    async fn connect(&mut self) -> Result<()> {
        self.connect_impl().await
    }

    async fn write(&mut self, data: &str) -> Result<()> {
        if !self.is_ready() {
            return Err(AgentError::transport("Transport is not ready for writing"));
        }

        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| AgentError::transport("stdin not available"))?;

        stdin
            .write_all(data.as_bytes())
            .await
            .map_err(|e| AgentError::transport(format!("Failed to write to stdin: {e}")))?;

        stdin
            .flush()
            .await
            .map_err(|e| AgentError::transport(format!("Failed to flush stdin: {e}")))?;

        Ok(())
    }

    async fn end_input(&mut self) -> Result<()> {
        if let Some(mut stdin) = self.stdin.take() {
            stdin
                .shutdown()
                .await
                .map_err(|e| AgentError::transport(format!("Failed to close stdin: {e}")))?;
        }
        Ok(())
    }

    fn read_messages(&mut self) -> mpsc::UnboundedReceiver<Result<serde_json::Value>> {
        self.read_messages_impl()
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn pid(&self) -> Option<u32> {
        self.pid
    }

    async fn close(&mut self) -> Result<()> {
        self.close_impl().await
    }
}

impl Drop for SubprocessTransport {
    fn drop(&mut self) {
        self.drop_impl();
    }
}
