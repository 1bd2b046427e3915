//! Resolved launch specification for an agent subprocess

use std::collections::HashMap;
use std::path::PathBuf;

/// Name of the search path variable
#[cfg(windows)]
pub const PATH_VAR: &str = "Path";

/// Name of the search path variable
#[cfg(not(windows))]
pub const PATH_VAR: &str = "PATH";

/// Everything needed to spawn one agent process
///
/// Produced by [`super::resolve_launch`]. `env` is the complete environment
/// of the child. Nothing else is inherited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    /// Executable to run
    pub program: PathBuf,
    /// Arguments, including any leading arguments of a runtime substitute
    pub args: Vec<String>,
    /// Full child environment
    pub env: HashMap<String, String>,
    /// Working directory of the process
    pub cwd: Option<PathBuf>,
    /// Whether `program` came from the bundled runtime
    pub bundled: bool,
}

impl LaunchSpec {
    /// Command line for logging
    #[must_use]
    pub fn display_command(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}
