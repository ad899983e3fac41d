//! File-backed session store.
//!
//! Layout under the base directory, one folder per conversation:
//!
//! ```text
//! <base>/<conversation_id>/sessions.json     newest-first index
//! <base>/<conversation_id>/active_session    plain-text id, absent when none
//! <base>/<conversation_id>/sessions/<id>/    per-session storage
//! ```
//!
//! Index and pointer writes go through a temp file and a rename, so a
//! reader never sees a half-written file. Only one process may own a base
//! directory; concurrent writers to the same index are not supported.

use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::error::SessionError;
use crate::sessions::log::SessionLog;
use crate::sessions::model::{DEFAULT_TITLE, SessionMeta, SessionsIndex};

const INDEX_FILE: &str = "sessions.json";
const ACTIVE_FILE: &str = "active_session";
const SESSIONS_DIR: &str = "sessions";

/// Per-conversation registry of sessions plus an active pointer.
pub struct SessionStore {
    base_dir: PathBuf,
}

impl SessionStore {
    /// Create a store rooted at `base_dir`. Directories are created lazily.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Create a session, make it active, and return its metadata.
    pub async fn create_session(
        &self,
        conversation_id: &str,
        title: &str,
    ) -> Result<SessionMeta, SessionError> {
        let id = generate_session_id();
        let session = SessionMeta::new(&id, title, Utc::now());

        tokio::fs::create_dir_all(self.session_dir(conversation_id, &id)?).await?;

        let mut index = self.load_index(conversation_id).await?;
        index.prepend(session.clone());
        self.save_index(conversation_id, &index).await?;
        self.set_active(conversation_id, &id).await?;

        info!(conversation_id = %conversation_id, session_id = %id, "Created session");
        Ok(session)
    }

    pub async fn get_session(
        &self,
        conversation_id: &str,
        session_id: &str,
    ) -> Result<Option<SessionMeta>, SessionError> {
        let index = self.load_index(conversation_id).await?;
        Ok(index.get(session_id).cloned())
    }

    /// All sessions, newest first.
    pub async fn list_sessions(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<SessionMeta>, SessionError> {
        Ok(self.load_index(conversation_id).await?.into_sessions())
    }

    /// The active pointer, if set.
    pub async fn active_session_id(
        &self,
        conversation_id: &str,
    ) -> Result<Option<String>, SessionError> {
        let path = self.conversation_dir(conversation_id)?.join(ACTIVE_FILE);
        match tokio::fs::read_to_string(&path).await {
            Ok(raw) => {
                let id = raw.trim();
                Ok((!id.is_empty()).then(|| id.to_string()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Resolve the active session, creating one when the pointer is absent
    /// or points at nothing.
    pub async fn get_or_create_active_session(
        &self,
        conversation_id: &str,
    ) -> Result<SessionMeta, SessionError> {
        if let Some(active) = self.active_session_id(conversation_id).await? {
            if let Some(session) = self.get_session(conversation_id, &active).await? {
                return Ok(session);
            }
            debug!(
                conversation_id = %conversation_id,
                session_id = %active,
                "Active pointer references a missing session"
            );
        }
        self.create_session(conversation_id, DEFAULT_TITLE).await
    }

    /// Rename a session. Returns the updated metadata, `None` if absent.
    pub async fn update_session_title(
        &self,
        conversation_id: &str,
        session_id: &str,
        title: &str,
    ) -> Result<Option<SessionMeta>, SessionError> {
        self.update(conversation_id, session_id, |session| {
            session.title = title.to_string();
        })
        .await
    }

    /// Record one more message on a session.
    pub async fn touch_session(
        &self,
        conversation_id: &str,
        session_id: &str,
    ) -> Result<Option<SessionMeta>, SessionError> {
        self.update(conversation_id, session_id, |session| {
            session.last_message_at = Utc::now();
            session.message_count += 1;
        })
        .await
    }

    /// Point the active pointer at an existing session.
    pub async fn resume_session(
        &self,
        conversation_id: &str,
        session_id: &str,
    ) -> Result<SessionMeta, SessionError> {
        let session = self
            .get_session(conversation_id, session_id)
            .await?
            .ok_or_else(|| SessionError::NotFound {
                conversation_id: conversation_id.to_string(),
                session_id: session_id.to_string(),
            })?;
        self.set_active(conversation_id, session_id).await?;
        info!(conversation_id = %conversation_id, session_id = %session_id, "Resumed session");
        Ok(session)
    }

    /// Delete a session and its storage. Clears the active pointer when it
    /// pointed here. Returns whether anything was deleted.
    pub async fn delete_session(
        &self,
        conversation_id: &str,
        session_id: &str,
    ) -> Result<bool, SessionError> {
        let mut index = self.load_index(conversation_id).await?;
        if index.remove(session_id).is_none() {
            return Ok(false);
        }
        self.save_index(conversation_id, &index).await?;

        let dir = self.session_dir(conversation_id, session_id)?;
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(dir = %dir.display(), error = %e, "Failed to remove session storage"),
        }

        if self.active_session_id(conversation_id).await?.as_deref() == Some(session_id) {
            self.clear_active(conversation_id).await?;
        }

        info!(conversation_id = %conversation_id, session_id = %session_id, "Deleted session");
        Ok(true)
    }

    /// Storage directory for one session.
    pub fn session_dir(
        &self,
        conversation_id: &str,
        session_id: &str,
    ) -> Result<PathBuf, SessionError> {
        if !is_safe_component(session_id) {
            return Err(SessionError::NotFound {
                conversation_id: conversation_id.to_string(),
                session_id: session_id.to_string(),
            });
        }
        Ok(self
            .conversation_dir(conversation_id)?
            .join(SESSIONS_DIR)
            .join(session_id))
    }

    /// Context and transcript logs for one session.
    pub fn session_log(
        &self,
        conversation_id: &str,
        session_id: &str,
    ) -> Result<SessionLog, SessionError> {
        Ok(SessionLog::new(self.session_dir(conversation_id, session_id)?))
    }

    fn conversation_dir(&self, conversation_id: &str) -> Result<PathBuf, SessionError> {
        if !is_safe_component(conversation_id) {
            return Err(SessionError::InvalidConversation(conversation_id.to_string()));
        }
        Ok(self.base_dir.join(conversation_id))
    }

    async fn update<F>(
        &self,
        conversation_id: &str,
        session_id: &str,
        f: F,
    ) -> Result<Option<SessionMeta>, SessionError>
    where
        F: FnOnce(&mut SessionMeta),
    {
        let mut index = self.load_index(conversation_id).await?;
        let Some(session) = index.get_mut(session_id) else {
            return Ok(None);
        };
        f(session);
        let updated = session.clone();
        self.save_index(conversation_id, &index).await?;
        Ok(Some(updated))
    }

    /// Missing or unreadable index reads as empty.
    async fn load_index(&self, conversation_id: &str) -> Result<SessionsIndex, SessionError> {
        let path = self.conversation_dir(conversation_id)?.join(INDEX_FILE);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(SessionsIndex::default()),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Unreadable session index, starting fresh");
                return Ok(SessionsIndex::default());
            }
        };
        match serde_json::from_str(&content) {
            Ok(index) => Ok(index),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Corrupt session index, starting fresh");
                Ok(SessionsIndex::default())
            }
        }
    }

    async fn save_index(
        &self,
        conversation_id: &str,
        index: &SessionsIndex,
    ) -> Result<(), SessionError> {
        let path = self.conversation_dir(conversation_id)?.join(INDEX_FILE);
        let json = serde_json::to_vec_pretty(index)?;
        write_atomic(&path, &json).await
    }

    async fn set_active(&self, conversation_id: &str, session_id: &str) -> Result<(), SessionError> {
        let path = self.conversation_dir(conversation_id)?.join(ACTIVE_FILE);
        write_atomic(&path, session_id.as_bytes()).await
    }

    async fn clear_active(&self, conversation_id: &str) -> Result<(), SessionError> {
        let path = self.conversation_dir(conversation_id)?.join(ACTIVE_FILE);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// 32 random bits as 8 hex digits. Not checked against existing ids.
pub fn generate_session_id() -> String {
    format!("{:08x}", rand::random::<u32>())
}

/// A single, non-traversing path component.
fn is_safe_component(value: &str) -> bool {
    !value.is_empty()
        && value != "."
        && value != ".."
        && !value.contains(['/', '\\', '\0'])
}

/// Write `bytes` to a uniquely named sibling temp file, then rename over
/// `path`. Concurrent writers never share a temp file; the last rename wins.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), SessionError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(format!(".{:08x}.tmp", rand::random::<u32>()));
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, bytes).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}
