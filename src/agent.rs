//! Interface to the external agent collaborator.
//!
//! The reasoning/tool loop lives outside this crate. Queued work hands it an
//! [`AgentRequest`] for the conversation's active session and waits for it
//! to finish before the next item for that conversation may start.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::AgentError;
use crate::sessions::{ContextEntry, SessionMeta, SessionStore};

/// Where a unit of work came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOrigin {
    /// A chat message typed by a person.
    User,
    /// A fired trigger descriptor.
    Event,
}

impl MessageOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageOrigin::User => "user",
            MessageOrigin::Event => "event",
        }
    }
}

impl std::fmt::Display for MessageOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One turn handed to the agent.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub conversation_id: String,
    pub session: SessionMeta,
    pub text: String,
    pub origin: MessageOrigin,
}

/// Runs the agent for one turn.
#[async_trait]
pub trait AgentRunner: Send + Sync {
    async fn run(&self, request: AgentRequest) -> Result<(), AgentError>;
}

/// Records every turn into the session's context log and transcript.
///
/// Stands in for a real agent when running the binary standalone.
pub struct TranscriptAgent {
    sessions: Arc<SessionStore>,
}

impl TranscriptAgent {
    pub fn new(sessions: Arc<SessionStore>) -> Self {
        Self { sessions }
    }
}

#[async_trait]
impl AgentRunner for TranscriptAgent {
    async fn run(&self, request: AgentRequest) -> Result<(), AgentError> {
        let failed = |e: crate::error::SessionError| AgentError::Failed {
            conversation_id: request.conversation_id.clone(),
            reason: e.to_string(),
        };

        let log = self
            .sessions
            .session_log(&request.conversation_id, &request.session.id)
            .map_err(failed)?;
        log.append_context(&ContextEntry::new(request.origin.as_str(), &request.text))
            .await
            .map_err(failed)?;
        log.append_log(request.origin.as_str(), &request.text)
            .await
            .map_err(failed)?;

        debug!(
            conversation_id = %request.conversation_id,
            session_id = %request.session.id,
            origin = %request.origin,
            "Recorded turn"
        );
        Ok(())
    }
}
