//! Lifecycle management for subprocess transport (connect, close)

use std::sync::atomic::Ordering;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::error::{AgentError, Result};

use super::command::CommandBuilder;
use super::transport::SubprocessTransport;

impl SubprocessTransport {
    /// Spawn the agent process and set up stdio pipes
    ///
    /// # Errors
    /// Returns error if process spawning fails or stdio handles cannot be obtained
    pub(super) async fn connect_impl(&mut self) -> Result<()> {
        if self.process.is_some() {
            return Ok(());
        }

        let mut cmd = CommandBuilder::new(&self.spec).build();

        log::info!(
            "[{}] spawning {}",
            self.label,
            self.spec.display_command()
        );

        let mut child = cmd.spawn().map_err(|e| {
            if let Some(ref cwd) = self.spec.cwd
                && !cwd.exists()
            {
                return AgentError::connection(format!(
                    "Working directory does not exist: {}",
                    cwd.display()
                ));
            }
            AgentError::connection(format!(
                "Failed to start {}: {e}",
                self.spec.program.display()
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AgentError::connection("Failed to get stdin handle"))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AgentError::connection("Failed to get stdout handle"))?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AgentError::connection("Failed to get stderr handle"))?;

        // Drain stderr line by line into the log so the pipe never fills up
        let label = self.label.clone();
        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if !line.trim().is_empty() {
                            log::debug!("[{label}] stderr: {line}");
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        log::debug!("[{label}] stderr closed: {e}");
                        break;
                    }
                }
            }
        });

        self.pid = child.id();
        self.stdin = Some(stdin);
        self.stdout = Some(stdout);
        self.process = Some(child);
        self.stderr_task = Some(stderr_task);
        self.ready.store(true, Ordering::SeqCst);

        log::debug!("[{}] started with pid {:?}", self.label, self.pid);
        Ok(())
    }

    /// Close the transport and clean up resources
    ///
    /// # Errors
    /// Returns error if waiting on the process fails
    pub(super) async fn close_impl(&mut self) -> Result<()> {
        self.ready.store(false, Ordering::SeqCst);

        // Closing stdin is the polite way to ask an agent to exit
        if let Some(mut stdin) = self.stdin.take() {
            let _ = stdin.shutdown().await;
        }

        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }

        self.stdout = None;

        if let Some(mut child) = self.process.take() {
            match tokio::time::timeout(self.close_grace, child.wait()).await {
                Ok(Ok(status)) => {
                    log::debug!("[{}] exited with {status}", self.label);
                }
                Ok(Err(e)) => {
                    return Err(AgentError::Io(e));
                }
                Err(_) => {
                    log::warn!(
                        "[{}] did not exit within {:?}, killing",
                        self.label,
                        self.close_grace
                    );
                    let _ = child.kill().await;
                    let _ = child.wait().await;
                }
            }
        }

        Ok(())
    }

    /// Handle Drop cleanup
    pub(super) fn drop_impl(&mut self) {
        drop(self.stdin.take());

        if let Some(task) = self.reader_task.take() {
            task.abort();
        }

        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }

        if let Some(mut child) = self.process.take() {
            let _ = child.start_kill();
        }
    }
}
