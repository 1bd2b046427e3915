//! Session metadata persistence
//!
//! The session manager remembers which agent session serves which
//! conversation so a restarted agent can resume it with `session/load`.
//! Persistence is always best-effort: store failures are logged by the
//! caller and never fail a turn.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{AgentError, Result};
use crate::types::identifiers::{AgentId, ConversationId, SessionId};

/// Outcome of a conversation's most recent turn
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Session open, no turn finished yet or a turn is running
    #[default]
    Active,
    /// Last turn finished normally
    Completed,
    /// Last turn was cancelled
    Cancelled,
    /// Last turn ended with an error
    Failed,
}

/// What is persisted per conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
    /// Host-side conversation
    pub conversation_id: ConversationId,
    /// Agent serving it
    pub agent_id: AgentId,
    /// Session id assigned by the agent
    pub session_id: SessionId,
    /// Working directory the session was opened in
    pub workdir: PathBuf,
    /// Status of the last turn
    #[serde(default)]
    pub status: SessionStatus,
    /// Last modification
    pub updated_at: DateTime<Utc>,
}

impl SessionMetadata {
    /// Fresh metadata with status [`SessionStatus::Active`]
    pub fn new(
        conversation_id: ConversationId,
        agent_id: AgentId,
        session_id: SessionId,
        workdir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            conversation_id,
            agent_id,
            session_id,
            workdir: workdir.into(),
            status: SessionStatus::Active,
            updated_at: Utc::now(),
        }
    }
}

/// Key/value persistence for [`SessionMetadata`]
pub trait SessionStore: Send + Sync {
    /// Insert or replace the metadata of a conversation
    fn save(&self, metadata: SessionMetadata) -> BoxFuture<'_, Result<()>>;

    /// Metadata of a conversation, if any
    fn get<'a>(
        &'a self,
        conversation_id: &'a ConversationId,
    ) -> BoxFuture<'a, Result<Option<SessionMetadata>>>;

    /// Forget a conversation
    fn clear<'a>(&'a self, conversation_id: &'a ConversationId) -> BoxFuture<'a, Result<()>>;

    /// Rewrite the stored working directory of a conversation
    fn update_workdir<'a>(
        &'a self,
        conversation_id: &'a ConversationId,
        workdir: &'a Path,
    ) -> BoxFuture<'a, Result<()>>;

    /// Record the outcome of the last turn
    fn update_status<'a>(
        &'a self,
        conversation_id: &'a ConversationId,
        status: SessionStatus,
    ) -> BoxFuture<'a, Result<()>>;
}

type MetadataMap = HashMap<ConversationId, SessionMetadata>;

fn modify(map: &mut MetadataMap, conversation_id: &ConversationId, f: impl FnOnce(&mut SessionMetadata)) {
    if let Some(metadata) = map.get_mut(conversation_id) {
        f(metadata);
        metadata.updated_at = Utc::now();
    }
}

// ============================================================================
// In-memory store
// ============================================================================

/// Store that forgets everything when dropped
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    entries: Mutex<MetadataMap>,
}

impl InMemorySessionStore {
    /// Empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored conversations
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether nothing is stored
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl SessionStore for InMemorySessionStore {
    fn save(&self, metadata: SessionMetadata) -> BoxFuture<'_, Result<()>> {
        self.entries
            .lock()
            .insert(metadata.conversation_id.clone(), metadata);
        futures::future::ready(Ok(())).boxed()
    }

    fn get<'a>(
        &'a self,
        conversation_id: &'a ConversationId,
    ) -> BoxFuture<'a, Result<Option<SessionMetadata>>> {
        let found = self.entries.lock().get(conversation_id).cloned();
        futures::future::ready(Ok(found)).boxed()
    }

    fn clear<'a>(&'a self, conversation_id: &'a ConversationId) -> BoxFuture<'a, Result<()>> {
        self.entries.lock().remove(conversation_id);
        futures::future::ready(Ok(())).boxed()
    }

    fn update_workdir<'a>(
        &'a self,
        conversation_id: &'a ConversationId,
        workdir: &'a Path,
    ) -> BoxFuture<'a, Result<()>> {
        modify(&mut self.entries.lock(), conversation_id, |m| {
            m.workdir = workdir.to_path_buf();
        });
        futures::future::ready(Ok(())).boxed()
    }

    fn update_status<'a>(
        &'a self,
        conversation_id: &'a ConversationId,
        status: SessionStatus,
    ) -> BoxFuture<'a, Result<()>> {
        modify(&mut self.entries.lock(), conversation_id, |m| m.status = status);
        futures::future::ready(Ok(())).boxed()
    }
}

// ============================================================================
// JSON file store
// ============================================================================

/// Store backed by one JSON document on disk
///
/// Entries are cached in memory; every change rewrites the whole document
/// through a temporary file and a rename.
#[derive(Debug)]
pub struct JsonFileSessionStore {
    path: PathBuf,
    entries: Mutex<MetadataMap>,
    write_gate: tokio::sync::Mutex<()>,
}

impl JsonFileSessionStore {
    /// Open the store at `path`, loading it if the file exists
    ///
    /// # Errors
    /// Returns error if the file exists but cannot be read or parsed
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = match tokio::fs::read_to_string(&path).await {
            Ok(contents) if contents.trim().is_empty() => MetadataMap::new(),
            Ok(contents) => {
                let list: Vec<SessionMetadata> = serde_json::from_str(&contents).map_err(|e| {
                    AgentError::store(format!("{} is not a session store: {e}", path.display()))
                })?;
                list.into_iter()
                    .map(|m| (m.conversation_id.clone(), m))
                    .collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => MetadataMap::new(),
            Err(e) => {
                return Err(AgentError::store(format!(
                    "Failed to read {}: {e}",
                    path.display()
                )));
            }
        };

        log::debug!(
            "Loaded {} session entries from {}",
            entries.len(),
            path.display()
        );

        Ok(Self {
            path,
            entries: Mutex::new(entries),
            write_gate: tokio::sync::Mutex::new(()),
        })
    }

    /// File backing this store
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self) -> Result<()> {
        // Serializes writers; the snapshot is taken inside so the last writer
        // always writes the latest state
        let _gate = self.write_gate.lock().await;

        let document = {
            let entries = self.entries.lock();
            let mut list: Vec<&SessionMetadata> = entries.values().collect();
            list.sort_by(|a, b| a.conversation_id.cmp(&b.conversation_id));
            serde_json::to_string_pretty(&list)?
        };

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, document).await.map_err(|e| {
            AgentError::store(format!("Failed to write {}: {e}", tmp.display()))
        })?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(|e| {
            AgentError::store(format!("Failed to replace {}: {e}", self.path.display()))
        })?;
        Ok(())
    }
}

impl SessionStore for JsonFileSessionStore {
    fn save(&self, metadata: SessionMetadata) -> BoxFuture<'_, Result<()>> {
        async move {
            self.entries
                .lock()
                .insert(metadata.conversation_id.clone(), metadata);
            self.persist().await
        }
        .boxed()
    }

    fn get<'a>(
        &'a self,
        conversation_id: &'a ConversationId,
    ) -> BoxFuture<'a, Result<Option<SessionMetadata>>> {
        let found = self.entries.lock().get(conversation_id).cloned();
        futures::future::ready(Ok(found)).boxed()
    }

    fn clear<'a>(&'a self, conversation_id: &'a ConversationId) -> BoxFuture<'a, Result<()>> {
        async move {
            let removed = self.entries.lock().remove(conversation_id).is_some();
            if removed {
                self.persist().await?;
            }
            Ok(())
        }
        .boxed()
    }

    fn update_workdir<'a>(
        &'a self,
        conversation_id: &'a ConversationId,
        workdir: &'a Path,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            modify(&mut self.entries.lock(), conversation_id, |m| {
                m.workdir = workdir.to_path_buf();
            });
            self.persist().await
        }
        .boxed()
    }

    fn update_status<'a>(
        &'a self,
        conversation_id: &'a ConversationId,
        status: SessionStatus,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            modify(&mut self.entries.lock(), conversation_id, |m| m.status = status);
            self.persist().await
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(conversation: &str) -> SessionMetadata {
        SessionMetadata::new(
            ConversationId::new(conversation),
            AgentId::new("agent"),
            SessionId::new(format!("sess-{conversation}")),
            "/tmp/work",
        )
    }

    #[tokio::test]
    async fn in_memory_round_trip() {
        let store = InMemorySessionStore::new();
        let conversation = ConversationId::new("c1");
        store.save(metadata("c1")).await.unwrap();

        store
            .update_status(&conversation, SessionStatus::Completed)
            .await
            .unwrap();
        let loaded = store.get(&conversation).await.unwrap().unwrap();
        assert_eq!(loaded.status, SessionStatus::Completed);

        store.clear(&conversation).await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn json_file_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("sessions.json");

        {
            let store = JsonFileSessionStore::open(&path).await.unwrap();
            store.save(metadata("c1")).await.unwrap();
            store.save(metadata("c2")).await.unwrap();
            store
                .update_workdir(&ConversationId::new("c2"), Path::new("/srv/other"))
                .await
                .unwrap();
            store.clear(&ConversationId::new("c1")).await.unwrap();
        }

        let reopened = JsonFileSessionStore::open(&path).await.unwrap();
        assert!(reopened.get(&ConversationId::new("c1")).await.unwrap().is_none());
        let c2 = reopened
            .get(&ConversationId::new("c2"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(c2.workdir, PathBuf::from("/srv/other"));
        assert_eq!(c2.session_id, SessionId::new("sess-c2"));
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.json");
        std::fs::write(&path, "not json").unwrap();

        let err = JsonFileSessionStore::open(&path).await.unwrap_err();
        assert!(matches!(err, AgentError::Store(_)));
    }
}
