//! Bridge options and configuration
//!
//! This module contains the options shared by the process and session
//! managers, including a builder pattern for easy configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::control::ClientCapabilities;
use crate::transport::BundledRuntime;

/// Default time allowed for the `initialize` handshake
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default time a closing agent gets to exit before it is killed
pub const DEFAULT_CLOSE_GRACE: Duration = Duration::from_secs(5);

/// Default maximum size of one framed message (1 MiB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

// ============================================================================
// Bridge Options
// ============================================================================

/// Options for the process and session managers
#[derive(Clone)]
pub struct BridgeOptions {
    /// Upper bound on the `initialize` round trip
    pub handshake_timeout: Duration,
    /// Grace period between closing stdin and killing the agent
    pub close_grace: Duration,
    /// Maximum length of one newline-framed message
    pub max_frame_size: usize,
    /// Client name reported in `initialize`
    pub client_name: String,
    /// Client version reported in `initialize`
    pub client_version: String,
    /// Capabilities advertised in `initialize`
    pub client_capabilities: ClientCapabilities,
    /// Working directory used when a caller passes none
    pub default_workdir: Option<PathBuf>,
    /// Runtime shipped with the host application
    pub bundled_runtime: BundledRuntime,
    /// Resolve the environment from the user's login shell
    pub login_shell_env: bool,
}

impl BridgeOptions {
    /// Create a new builder for `BridgeOptions`
    #[must_use]
    pub fn builder() -> BridgeOptionsBuilder {
        BridgeOptionsBuilder::default()
    }
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            close_grace: DEFAULT_CLOSE_GRACE,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            client_name: "kodegen-acp-bridge".to_string(),
            client_version: crate::VERSION.to_string(),
            client_capabilities: ClientCapabilities::empty(),
            default_workdir: None,
            bundled_runtime: BundledRuntime::default(),
            login_shell_env: false,
        }
    }
}

impl std::fmt::Debug for BridgeOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeOptions")
            .field("handshake_timeout", &self.handshake_timeout)
            .field("close_grace", &self.close_grace)
            .field("max_frame_size", &self.max_frame_size)
            .field("client_name", &self.client_name)
            .field("client_version", &self.client_version)
            .field("client_capabilities", &self.client_capabilities)
            .field("default_workdir", &self.default_workdir)
            .field(
                "bundled_runtime",
                &format!(
                    "[{} dirs, {} substitutes]",
                    self.bundled_runtime.bin_dirs().len(),
                    self.bundled_runtime.substitute_count()
                ),
            )
            .field("login_shell_env", &self.login_shell_env)
            .finish()
    }
}

// ============================================================================
// Builder for BridgeOptions
// ============================================================================

/// Builder for `BridgeOptions`
#[derive(Debug, Default)]
pub struct BridgeOptionsBuilder {
    options: BridgeOptions,
}

impl BridgeOptionsBuilder {
    /// Set the handshake timeout
    #[must_use]
    pub const fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.options.handshake_timeout = timeout;
        self
    }

    /// Set the close grace period
    #[must_use]
    pub const fn close_grace(mut self, grace: Duration) -> Self {
        self.options.close_grace = grace;
        self
    }

    /// Set the maximum frame size
    ///
    /// # Panics
    /// Panics if `size` is zero
    #[must_use]
    pub fn max_frame_size(mut self, size: usize) -> Self {
        assert!(size > 0, "max_frame_size must be greater than zero");
        self.options.max_frame_size = size;
        self
    }

    /// Set the client name and version reported to agents
    #[must_use]
    pub fn client_info(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.options.client_name = name.into();
        self.options.client_version = version.into();
        self
    }

    /// Set the advertised client capabilities
    #[must_use]
    pub const fn client_capabilities(mut self, capabilities: ClientCapabilities) -> Self {
        self.options.client_capabilities = capabilities;
        self
    }

    /// Set the default working directory
    #[must_use]
    pub fn default_workdir(mut self, path: impl Into<PathBuf>) -> Self {
        self.options.default_workdir = Some(path.into());
        self
    }

    /// Set the bundled runtime
    #[must_use]
    pub fn bundled_runtime(mut self, runtime: BundledRuntime) -> Self {
        self.options.bundled_runtime = runtime;
        self
    }

    /// Resolve the environment from the login shell
    #[must_use]
    pub const fn login_shell_env(mut self, enabled: bool) -> Self {
        self.options.login_shell_env = enabled;
        self
    }

    /// Build the options
    #[must_use]
    pub fn build(self) -> BridgeOptions {
        self.options
    }
}
