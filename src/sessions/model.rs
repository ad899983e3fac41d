//! Session metadata and the per-conversation index.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Title given to sessions created implicitly.
pub const DEFAULT_TITLE: &str = "New session";

/// Metadata for one resumable conversational thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMeta {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub last_message_at: DateTime<Utc>,
    pub message_count: u64,
}

impl SessionMeta {
    /// Fresh metadata with both timestamps at `now` and no messages.
    pub fn new(id: impl Into<String>, title: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            created_at: now,
            last_message_at: now,
            message_count: 0,
        }
    }
}

/// Newest-first list of a conversation's sessions, stored as a JSON array.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionsIndex {
    sessions: Vec<SessionMeta>,
}

impl SessionsIndex {
    pub fn sessions(&self) -> &[SessionMeta] {
        &self.sessions
    }

    pub fn into_sessions(self) -> Vec<SessionMeta> {
        self.sessions
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn get(&self, id: &str) -> Option<&SessionMeta> {
        self.sessions.iter().find(|s| s.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut SessionMeta> {
        self.sessions.iter_mut().find(|s| s.id == id)
    }

    /// Insert at the front (newest first).
    pub fn prepend(&mut self, session: SessionMeta) {
        self.sessions.insert(0, session);
    }

    /// Remove by id, returning the removed entry.
    pub fn remove(&mut self, id: &str) -> Option<SessionMeta> {
        let pos = self.sessions.iter().position(|s| s.id == id)?;
        Some(self.sessions.remove(pos))
    }
}
