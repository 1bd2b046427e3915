//! Environment and executable resolution for agent launches

use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::{AgentError, Result};
use crate::types::agent::AgentConfig;

use super::config::{LaunchSpec, PATH_VAR};

/// Upper bound on resolving the login shell environment
const SHELL_ENV_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// Bundled runtime
// ============================================================================

/// Replacement used when a command is missing from the search path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSubstitute {
    /// Bundled executable
    pub program: PathBuf,
    /// Arguments placed before the configured ones (e.g. `["x"]` for `bun x`)
    pub leading_args: Vec<String>,
}

impl CommandSubstitute {
    /// Substitute with no leading arguments
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
        }
    }

    /// Add a leading argument
    #[must_use]
    pub fn leading_arg(mut self, arg: impl Into<String>) -> Self {
        self.leading_args.push(arg.into());
        self
    }
}

/// Runtime shipped with the host application
///
/// Its directories are prepended to every agent's `PATH`. Its substitutes
/// stand in for commands the user's system does not provide.
#[derive(Debug, Clone, Default)]
pub struct BundledRuntime {
    bin_dirs: Vec<PathBuf>,
    substitutes: HashMap<String, CommandSubstitute>,
}

impl BundledRuntime {
    /// Empty runtime
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a directory to prepend to `PATH`
    #[must_use]
    pub fn bin_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.bin_dirs.push(dir.into());
        self
    }

    /// Register a substitute for `command`
    #[must_use]
    pub fn substitute(mut self, command: impl Into<String>, substitute: CommandSubstitute) -> Self {
        self.substitutes.insert(command.into(), substitute);
        self
    }

    /// Directories prepended to `PATH`
    #[must_use]
    pub fn bin_dirs(&self) -> &[PathBuf] {
        &self.bin_dirs
    }

    /// Number of registered substitutes
    #[must_use]
    pub fn substitute_count(&self) -> usize {
        self.substitutes.len()
    }

    /// Substitute registered for `command`
    #[must_use]
    pub fn substitute_for(&self, command: &str) -> Option<&CommandSubstitute> {
        self.substitutes.get(command)
    }
}

// ============================================================================
// Shell environment cache
// ============================================================================

/// Lazily resolved base environment for agent processes
///
/// Desktop hosts are often started without the user's shell profile, so their
/// `PATH` misses tools like `node` or `npx`. With `login_shell` enabled the
/// environment is read once from `$SHELL -l -c env`. Otherwise it is the
/// inherited process environment. The result is cached until
/// [`invalidate`](Self::invalidate) is called.
#[derive(Debug)]
pub struct ShellEnvironment {
    login_shell: bool,
    cache: Mutex<Option<Arc<HashMap<String, String>>>>,
}

impl ShellEnvironment {
    /// Create an empty cache
    #[must_use]
    pub fn new(login_shell: bool) -> Self {
        Self {
            login_shell,
            cache: Mutex::new(None),
        }
    }

    /// Cached environment, resolving it on first use
    pub async fn get(&self) -> Arc<HashMap<String, String>> {
        if let Some(cached) = self.cache.lock().as_ref() {
            return Arc::clone(cached);
        }

        let resolved = Arc::new(if self.login_shell {
            load_login_shell_env().await
        } else {
            env::vars().collect()
        });

        let mut cache = self.cache.lock();
        // A concurrent caller may have filled it while we were resolving
        Arc::clone(cache.get_or_insert(resolved))
    }

    /// Drop the cached environment
    pub fn invalidate(&self) {
        if self.cache.lock().take().is_some() {
            log::debug!("Shell environment cache invalidated");
        }
    }

    /// Whether an environment is cached
    #[must_use]
    pub fn is_cached(&self) -> bool {
        self.cache.lock().is_some()
    }
}

impl Default for ShellEnvironment {
    fn default() -> Self {
        Self::new(false)
    }
}

async fn load_login_shell_env() -> HashMap<String, String> {
    let inherited: HashMap<String, String> = env::vars().collect();

    if cfg!(windows) {
        return inherited;
    }

    let shell = inherited
        .get("SHELL")
        .cloned()
        .unwrap_or_else(|| "/bin/sh".to_string());

    let output = tokio::process::Command::new(&shell)
        .arg("-l")
        .arg("-c")
        .arg("env")
        .stdin(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .kill_on_drop(true)
        .output();

    match tokio::time::timeout(SHELL_ENV_TIMEOUT, output).await {
        Ok(Ok(output)) if output.status.success() => {
            let parsed = parse_env_output(&String::from_utf8_lossy(&output.stdout));
            if parsed.is_empty() {
                log::warn!("Login shell {shell} printed no environment, using inherited");
                inherited
            } else {
                log::debug!("Resolved {} variables from login shell {shell}", parsed.len());
                parsed
            }
        }
        Ok(Ok(output)) => {
            log::warn!(
                "Login shell {shell} exited with {}, using inherited environment",
                output.status
            );
            inherited
        }
        Ok(Err(e)) => {
            log::warn!("Failed to run login shell {shell}: {e}, using inherited environment");
            inherited
        }
        Err(_) => {
            log::warn!("Login shell {shell} timed out, using inherited environment");
            inherited
        }
    }
}

fn parse_env_output(output: &str) -> HashMap<String, String> {
    output
        .lines()
        .filter_map(|line| {
            let (key, value) = line.split_once('=')?;
            let valid = !key.is_empty()
                && key
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_');
            valid.then(|| (key.to_string(), value.to_string()))
        })
        .collect()
}

// ============================================================================
// Launch resolution
// ============================================================================

/// Resolve the executable, arguments and environment for an agent
///
/// The configured environment is merged over `base`. The command is looked up
/// on the merged `PATH`. Only if it is missing there does a bundled substitute
/// take its place. Bundled directories are then prepended to `PATH`.
///
/// # Errors
/// Returns [`AgentError::ExecutableNotFound`] if neither the search path nor
/// the bundled runtime provides the command.
pub fn resolve_launch(
    config: &AgentConfig,
    base: &HashMap<String, String>,
    runtime: &BundledRuntime,
    cwd: Option<&Path>,
) -> Result<LaunchSpec> {
    if config.command.trim().is_empty() {
        return Err(AgentError::invalid_config(format!(
            "agent '{}' has an empty command",
            config.id
        )));
    }

    let mut env = base.clone();
    env.extend(config.env.iter().map(|(k, v)| (k.clone(), v.clone())));

    let system_path = env.get(PATH_VAR).cloned().unwrap_or_default();
    let lookup_dir = match cwd {
        Some(dir) => dir.to_path_buf(),
        None => env::current_dir()?,
    };

    let (program, args, bundled) =
        match which::which_in(&config.command, Some(&system_path), &lookup_dir) {
            Ok(found) => (found, config.args.clone(), false),
            Err(_) => {
                let Some(substitute) = runtime.substitute_for(&config.command) else {
                    return Err(AgentError::executable_not_found(&config.command));
                };
                log::info!(
                    "'{}' not found on PATH, using bundled {}",
                    config.command,
                    substitute.program.display()
                );
                let mut args = substitute.leading_args.clone();
                args.extend(config.args.iter().cloned());
                (substitute.program.clone(), args, true)
            }
        };

    if !runtime.bin_dirs().is_empty() {
        let joined = env::join_paths(
            runtime
                .bin_dirs()
                .iter()
                .cloned()
                .chain(env::split_paths(&system_path)),
        )
        .map_err(|e| AgentError::invalid_config(format!("bundled runtime dir: {e}")))?;
        env.insert(PATH_VAR.to_string(), joined.to_string_lossy().into_owned());
    }

    Ok(LaunchSpec {
        program,
        args,
        env,
        cwd: cwd.map(Path::to_path_buf),
        bundled,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    fn make_executable(dir: &Path, name: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join(name);
        std::fs::write(&path, "#!/bin/sh\nexit 0\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[test]
    fn finds_command_on_configured_path() {
        let bin = tempfile::tempdir().unwrap();
        let expected = make_executable(bin.path(), "fake-agent");

        let base = HashMap::from([(PATH_VAR.to_string(), "/nonexistent".to_string())]);
        let config = AgentConfig::new("fake", "fake-agent")
            .arg("--acp")
            .env(PATH_VAR, bin.path().to_string_lossy());

        let spec = resolve_launch(&config, &base, &BundledRuntime::new(), Some(bin.path())).unwrap();
        assert_eq!(spec.program, expected);
        assert_eq!(spec.args, vec!["--acp".to_string()]);
        assert!(!spec.bundled);
    }

    #[cfg(unix)]
    #[test]
    fn substitute_only_when_missing_and_bin_dirs_prepended() {
        let runtime_dir = tempfile::tempdir().unwrap();
        let bun = make_executable(runtime_dir.path(), "bun");
        let runtime = BundledRuntime::new()
            .bin_dir(runtime_dir.path())
            .substitute("npx", CommandSubstitute::new(&bun).leading_arg("x"));

        let base = HashMap::from([(PATH_VAR.to_string(), "/nonexistent".to_string())]);
        let config = AgentConfig::new("claude", "npx").arg("some-acp-agent");

        let spec = resolve_launch(&config, &base, &runtime, Some(runtime_dir.path())).unwrap();
        assert_eq!(spec.program, bun);
        assert_eq!(spec.args, vec!["x".to_string(), "some-acp-agent".to_string()]);
        assert!(spec.bundled);

        let path = spec.env.get(PATH_VAR).unwrap();
        let first = env::split_paths(path).next().unwrap();
        assert_eq!(first, runtime_dir.path());
    }

    #[test]
    fn missing_command_without_substitute_fails() {
        let base = HashMap::from([(PATH_VAR.to_string(), "/nonexistent".to_string())]);
        let config = AgentConfig::new("ghost", "definitely-not-installed-agent");
        let err = resolve_launch(&config, &base, &BundledRuntime::new(), None).unwrap_err();
        assert!(matches!(err, AgentError::ExecutableNotFound(_)));
    }

    #[test]
    fn parses_env_lines() {
        let parsed = parse_env_output("PATH=/usr/bin:/bin\nHOME=/home/me\n  continuation\n=bad\n");
        assert_eq!(parsed.get("PATH").map(String::as_str), Some("/usr/bin:/bin"));
        assert_eq!(parsed.len(), 2);
    }

    #[tokio::test]
    async fn cache_is_filled_lazily_and_invalidated() {
        let shell_env = ShellEnvironment::new(false);
        assert!(!shell_env.is_cached());

        let first = shell_env.get().await;
        assert!(shell_env.is_cached());
        let second = shell_env.get().await;
        assert!(Arc::ptr_eq(&first, &second));

        shell_env.invalidate();
        assert!(!shell_env.is_cached());
    }
}
