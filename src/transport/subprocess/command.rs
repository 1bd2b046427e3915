//! Command building logic for subprocess transport

use std::process::Stdio;

use tokio::process::Command;

use super::config::LaunchSpec;

/// Command builder for an agent launch spec
pub struct CommandBuilder<'a> {
    spec: &'a LaunchSpec,
}

impl<'a> CommandBuilder<'a> {
    /// Create a new command builder
    pub fn new(spec: &'a LaunchSpec) -> Self {
        Self { spec }
    }

    /// Build the command with arguments, environment and piped stdio
    pub fn build(&self) -> Command {
        let mut cmd = Command::new(&self.spec.program);
        cmd.args(&self.spec.args);

        // The spec carries the complete environment
        cmd.env_clear();
        cmd.envs(&self.spec.env);

        if let Some(ref cwd) = self.spec.cwd {
            cmd.env("PWD", cwd);
            cmd.current_dir(cwd);
        }

        // Stderr is piped, never inherited, so the child cannot touch the terminal
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        cmd
    }
}
