//! Per-session logs consumed by the agent collaborator.
//!
//! - `context.jsonl` — one JSON `ContextEntry` per line, replayed as
//!   conversation context when a session is resumed
//! - `log.md` — an append-only human-readable transcript

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::warn;

use crate::error::SessionError;

pub const CONTEXT_FILE: &str = "context.jsonl";
pub const LOG_FILE: &str = "log.md";

/// One line of the context log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextEntry {
    pub role: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ContextEntry {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Handle on one session's storage directory.
#[derive(Debug, Clone)]
pub struct SessionLog {
    dir: PathBuf,
}

impl SessionLog {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Append one entry to `context.jsonl`.
    pub async fn append_context(&self, entry: &ContextEntry) -> Result<(), SessionError> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        self.append(CONTEXT_FILE, &line).await
    }

    /// All context entries; malformed lines are skipped.
    pub async fn read_context(&self) -> Result<Vec<ContextEntry>, SessionError> {
        let path = self.dir.join(CONTEXT_FILE);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        for (line_num, line) in content.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<ContextEntry>(trimmed) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(
                    line = line_num + 1,
                    error = %e,
                    path = %path.display(),
                    "Skipping malformed context line"
                ),
            }
        }
        Ok(entries)
    }

    /// Append a timestamped section to `log.md`.
    pub async fn append_log(&self, heading: &str, body: &str) -> Result<(), SessionError> {
        let timestamp = Utc::now().format("%Y-%m-%d %H:%M UTC");
        let entry = format!("\n## {timestamp} · {heading}\n\n{}\n", body.trim_end());
        self.append(LOG_FILE, &entry).await
    }

    async fn append(&self, name: &str, content: &str) -> Result<(), SessionError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join(name))
            .await?;
        file.write_all(content.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}
