//! Workspace directory registration
//!
//! Once a session's working directory is known, it is registered so that
//! other parts of the host (file browsing, previews) may read it.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use crate::error::Result;

/// Receives working directories negotiated for sessions
pub trait WorkspaceRegistry: Send + Sync {
    /// Allow access to `dir`
    ///
    /// # Errors
    /// Implementations may reject a directory; callers treat this as
    /// best-effort and only log it.
    fn register(&self, dir: &Path) -> Result<()>;
}

/// In-memory allow-list of workspace directories
#[derive(Debug, Default)]
pub struct AllowedWorkspaces {
    dirs: RwLock<BTreeSet<PathBuf>>,
}

impl AllowedWorkspaces {
    /// Empty allow-list
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `path` lies inside a registered directory
    #[must_use]
    pub fn contains(&self, path: &Path) -> bool {
        self.dirs.read().iter().any(|dir| path.starts_with(dir))
    }

    /// Registered directories, sorted
    #[must_use]
    pub fn list(&self) -> Vec<PathBuf> {
        self.dirs.read().iter().cloned().collect()
    }
}

impl WorkspaceRegistry for AllowedWorkspaces {
    fn register(&self, dir: &Path) -> Result<()> {
        if self.dirs.write().insert(dir.to_path_buf()) {
            log::debug!("Workspace registered: {}", dir.display());
        }
        Ok(())
    }
}
