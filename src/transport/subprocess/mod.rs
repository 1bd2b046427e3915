//! Subprocess transport implementation
//!
//! This module spawns an agent executable as a child process and
//! communicates with it via newline-framed JSON on stdin/stdout. It also
//! resolves which executable to run and with which environment.

mod command;
mod config;
mod environment;
mod lifecycle;
mod reader;
mod transport;

// Re-export public types
pub use config::{LaunchSpec, PATH_VAR};
pub use environment::{BundledRuntime, CommandSubstitute, ShellEnvironment, resolve_launch};
pub use transport::SubprocessTransport;
