//! Message reading logic for subprocess transport

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;

use crate::error::{AgentError, Result};
use crate::transport::codec::{Frame, FrameCodec};

use super::transport::SubprocessTransport;

/// Longest excerpt of a bad frame included in a log line
const LOG_EXCERPT: usize = 200;

impl SubprocessTransport {
    /// Read frames from the subprocess output
    ///
    /// This method spawns a background task that decodes stdout into JSON
    /// values. Lines that are too long or not JSON are logged and skipped.
    /// The receiver closes when stdout reaches EOF.
    pub(super) fn read_messages_impl(
        &mut self,
    ) -> mpsc::UnboundedReceiver<Result<serde_json::Value>> {
        let (tx, rx) = mpsc::unbounded_channel();

        let stdout = self.stdout.take();
        let max_frame_size = self.max_frame_size;
        let label = self.label.clone();

        let task = tokio::spawn(async move {
            let Some(stdout) = stdout else {
                let _ = tx.send(Err(AgentError::connection(
                    "Not connected - stdout not available",
                )));
                return;
            };

            let mut frames = FramedRead::new(stdout, FrameCodec::with_max_length(max_frame_size));

            while let Some(frame) = frames.next().await {
                match frame {
                    Ok(Frame::Line(line)) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<serde_json::Value>(line) {
                            Ok(value) => {
                                if tx.send(Ok(value)).is_err() {
                                    // Receiver dropped, stop reading
                                    break;
                                }
                            }
                            Err(e) => {
                                log::warn!(
                                    "[{label}] dropping non-JSON frame ({e}): {}",
                                    excerpt(line)
                                );
                            }
                        }
                    }
                    Ok(Frame::Oversized) => {
                        log::warn!(
                            "[{label}] dropping frame longer than {max_frame_size} bytes"
                        );
                    }
                    Err(e) => {
                        let _ = tx.send(Err(e));
                        break;
                    }
                }
            }

            log::debug!("[{label}] stdout closed");
        });

        self.reader_task = Some(task);

        rx
    }
}

fn excerpt(line: &str) -> &str {
    match line.char_indices().nth(LOG_EXCERPT) {
        Some((end, _)) => &line[..end],
        None => line,
    }
}
