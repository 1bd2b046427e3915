//! Transport layer for communicating with agent executables
//!
//! This module provides the transport abstraction, the newline framing codec,
//! environment resolution, and the subprocess implementation.

pub mod codec;
pub mod subprocess;

use tokio::sync::mpsc;

use crate::error::Result;

/// Transport trait for communicating with an agent
///
/// This trait defines the interface for sending and receiving framed
/// messages to/from one agent.
pub trait Transport: Send + Sync {
    /// Connect to the transport
    ///
    /// # Errors
    /// Returns error if connection fails
    fn connect(&mut self) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Write one frame to the transport
    ///
    /// # Arguments
    /// * `data` - Newline-terminated JSON text
    ///
    /// # Errors
    /// Returns error if write fails or transport is not ready
    fn write(&mut self, data: &str) -> impl std::future::Future<Output = Result<()>> + Send;

    /// End the input stream (close stdin)
    ///
    /// # Errors
    /// Returns error if closing fails
    fn end_input(&mut self) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Read messages from the transport
    ///
    /// Returns a receiver that yields one JSON value per inbound frame. This
    /// method spawns a background task to read frames, allowing concurrent
    /// writes. The receiver closes when the agent's output ends.
    fn read_messages(&mut self) -> mpsc::UnboundedReceiver<Result<serde_json::Value>>;

    /// Check if transport is ready for communication
    fn is_ready(&self) -> bool;

    /// OS process id, if the transport runs one
    fn pid(&self) -> Option<u32> {
        None
    }

    /// Close the transport and clean up resources
    ///
    /// # Errors
    /// Returns error if cleanup fails
    fn close(&mut self) -> impl std::future::Future<Output = Result<()>> + Send;
}

pub use codec::{Frame, FrameCodec};
pub use subprocess::{
    BundledRuntime, CommandSubstitute, LaunchSpec, ShellEnvironment, SubprocessTransport,
    resolve_launch,
};
