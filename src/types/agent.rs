//! Agent launch configuration

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::identifiers::AgentId;

/// Identity and launch spec of one configured agent
///
/// Supplied by the host's configuration. The bridge never edits or persists
/// it. Deserializes from the usual JSON shape:
///
/// ```json
/// { "id": "claude", "name": "Claude", "command": "npx",
///   "args": ["@zed-industries/claude-code-acp"], "env": {} }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Agent identifier
    pub id: AgentId,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Executable name or path
    pub command: String,
    /// Arguments passed to the executable
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment overrides merged over the inherited environment
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl AgentConfig {
    /// Create a config for `command` with no arguments
    pub fn new(id: impl Into<AgentId>, command: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.as_str().to_string(),
            id,
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
        }
    }

    /// Set the display name
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Append one argument
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Add an environment override
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Display name, falling back to the id
    #[must_use]
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            self.id.as_str()
        } else {
            &self.name
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_with_defaults() {
        let config: AgentConfig =
            serde_json::from_str(r#"{"id":"echo-agent","command":"echo-agent"}"#).unwrap();
        assert_eq!(config.id.as_str(), "echo-agent");
        assert!(config.args.is_empty());
        assert_eq!(config.display_name(), "echo-agent");
    }
}
