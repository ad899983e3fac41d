//! Chat slash commands for session management.
//!
//! `/new [title]`, `/sessions`, `/resume <id>`, `/rename <title>` and
//! `/delete <id>`. Anything else is ordinary message text.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::SessionError;
use crate::sessions::model::DEFAULT_TITLE;
use crate::sessions::store::SessionStore;

/// `/command`, an optional `@botname` suffix, then the argument.
static COMMAND_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^/([a-z]+)(?:@\S+)?(?:\s+(.*))?$").expect("valid command regex")
});

/// A parsed session command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    New(Option<String>),
    List,
    Resume(String),
    Rename(String),
    Delete(String),
    /// Known command with a missing argument.
    Usage(&'static str),
}

impl SessionCommand {
    /// Parse message text. `None` when the text is not a session command.
    pub fn parse(text: &str) -> Option<Self> {
        let caps = COMMAND_RE.captures(text.trim())?;
        let name = caps.get(1)?.as_str();
        let arg = caps
            .get(2)
            .map(|m| m.as_str().trim().to_string())
            .filter(|a| !a.is_empty());

        let command = match (name, arg) {
            ("new", arg) => SessionCommand::New(arg),
            ("sessions", _) => SessionCommand::List,
            ("resume", Some(id)) => SessionCommand::Resume(id),
            ("resume", None) => SessionCommand::Usage("/resume <session id>"),
            ("rename", Some(title)) => SessionCommand::Rename(title),
            ("rename", None) => SessionCommand::Usage("/rename <title>"),
            ("delete", Some(id)) => SessionCommand::Delete(id),
            ("delete", None) => SessionCommand::Usage("/delete <session id>"),
            _ => return None,
        };
        Some(command)
    }

    /// Run the command and produce the reply text.
    pub async fn execute(
        &self,
        store: &SessionStore,
        conversation_id: &str,
    ) -> Result<String, SessionError> {
        match self {
            SessionCommand::New(title) => {
                let title = title.as_deref().unwrap_or(DEFAULT_TITLE);
                let session = store.create_session(conversation_id, title).await?;
                Ok(format!("Started session `{}`: {}", session.id, session.title))
            }
            SessionCommand::List => {
                let sessions = store.list_sessions(conversation_id).await?;
                if sessions.is_empty() {
                    return Ok("No sessions yet.".to_string());
                }
                let active = store.active_session_id(conversation_id).await?;
                let mut out = String::from("Sessions:");
                for s in sessions {
                    let marker = if active.as_deref() == Some(s.id.as_str()) {
                        "▶"
                    } else {
                        "•"
                    };
                    out.push_str(&format!(
                        "\n{marker} `{}` {} ({} messages, last {})",
                        s.id,
                        s.title,
                        s.message_count,
                        s.last_message_at.format("%Y-%m-%d %H:%M UTC")
                    ));
                }
                Ok(out)
            }
            SessionCommand::Resume(id) => match store.resume_session(conversation_id, id).await {
                Ok(session) => Ok(format!("Resumed `{}`: {}", session.id, session.title)),
                Err(SessionError::NotFound { .. }) => Ok(format!("No session `{id}`.")),
                Err(e) => Err(e),
            },
            SessionCommand::Rename(title) => {
                let session = store.get_or_create_active_session(conversation_id).await?;
                store
                    .update_session_title(conversation_id, &session.id, title)
                    .await?;
                Ok(format!("Renamed `{}` to: {title}", session.id))
            }
            SessionCommand::Delete(id) => {
                if store.delete_session(conversation_id, id).await? {
                    Ok(format!("Deleted session `{id}`."))
                } else {
                    Ok(format!("No session `{id}`."))
                }
            }
            SessionCommand::Usage(usage) => Ok(format!("Usage: {usage}")),
        }
    }
}
