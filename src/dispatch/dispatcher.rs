//! Dispatcher — routes events and messages onto conversation queues.
//!
//! Each conversation gets a lazily created [`ConversationQueue`]. Every
//! queued turn resolves the active session, runs the agent, and records the
//! message on the session. Session commands go through the same queue, so
//! the queue is the only writer of a conversation's session index.
//! Trigger-originated turns are admission controlled: at most
//! `max_pending_events` may wait per conversation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::agent::{AgentRequest, AgentRunner, MessageOrigin};
use crate::config::DispatchConfig;
use crate::dispatch::queue::ConversationQueue;
use crate::error::SessionError;
use crate::events::EventTarget;
use crate::sessions::{DEFAULT_TITLE, SessionCommand, SessionStore};

/// Longest auto-generated session title, in bytes.
const AUTO_TITLE_MAX: usize = 48;

#[derive(Clone)]
struct Conversation {
    queue: ConversationQueue,
    /// Accepted events that have not started running yet.
    pending_events: Arc<AtomicUsize>,
}

/// Production [`EventTarget`] and entry point for chat messages.
pub struct Dispatcher {
    config: DispatchConfig,
    sessions: Arc<SessionStore>,
    agent: Arc<dyn AgentRunner>,
    conversations: Mutex<HashMap<String, Conversation>>,
}

impl Dispatcher {
    pub fn new(
        config: DispatchConfig,
        sessions: Arc<SessionStore>,
        agent: Arc<dyn AgentRunner>,
    ) -> Self {
        Self {
            config,
            sessions,
            agent,
            conversations: Mutex::new(HashMap::new()),
        }
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// The queue for `conversation_id`, created on first use.
    pub fn queue(&self, conversation_id: &str) -> ConversationQueue {
        self.conversation(conversation_id).queue
    }

    /// Accepted events for `conversation_id` that have not started.
    pub fn pending_events(&self, conversation_id: &str) -> usize {
        self.conversation(conversation_id)
            .pending_events
            .load(Ordering::SeqCst)
    }

    /// Queue a chat message. Messages are never rejected.
    pub fn submit_message(&self, conversation_id: &str, text: impl Into<String>) {
        let conversation = self.conversation(conversation_id);
        self.submit(conversation_id, conversation, text.into(), MessageOrigin::User);
    }

    /// Queue a session command behind any turns already waiting for this
    /// conversation. The receiver yields the reply text once it has run.
    pub fn submit_command(
        &self,
        conversation_id: &str,
        command: SessionCommand,
    ) -> oneshot::Receiver<Result<String, SessionError>> {
        let conversation = self.conversation(conversation_id);
        let sessions = Arc::clone(&self.sessions);
        let conversation_id = conversation_id.to_string();
        let label = format!("{command:?} for {conversation_id}");
        let (reply_tx, reply_rx) = oneshot::channel();

        conversation.queue.enqueue(label, async move {
            let reply = command.execute(&sessions, &conversation_id).await;
            let _ = reply_tx.send(reply);
            Ok(())
        });
        reply_rx
    }

    fn conversation(&self, conversation_id: &str) -> Conversation {
        let mut conversations = self
            .conversations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        conversations
            .entry(conversation_id.to_string())
            .or_insert_with(|| {
                debug!(conversation_id = %conversation_id, "Created conversation queue");
                Conversation {
                    queue: ConversationQueue::new(conversation_id),
                    pending_events: Arc::new(AtomicUsize::new(0)),
                }
            })
            .clone()
    }

    fn submit(
        &self,
        conversation_id: &str,
        conversation: Conversation,
        text: String,
        origin: MessageOrigin,
    ) {
        let sessions = Arc::clone(&self.sessions);
        let agent = Arc::clone(&self.agent);
        let pending_events = Arc::clone(&conversation.pending_events);
        let conversation_id = conversation_id.to_string();
        let label = format!("{origin} turn for {conversation_id}");

        conversation.queue.enqueue(label, async move {
            if origin == MessageOrigin::Event {
                pending_events.fetch_sub(1, Ordering::SeqCst);
            }
            run_turn(&sessions, agent.as_ref(), conversation_id, text, origin).await
        });
    }
}

impl EventTarget for Dispatcher {
    fn enqueue_event(&self, conversation_id: &str, text: String) -> bool {
        let conversation = self.conversation(conversation_id);
        let max = self.config.max_pending_events;

        let admitted = conversation
            .pending_events
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n < max).then_some(n + 1))
            .is_ok();

        if !admitted {
            warn!(
                conversation_id = %conversation_id,
                max_pending = max,
                "Conversation has too many pending events"
            );
            return false;
        }

        self.submit(conversation_id, conversation, text, MessageOrigin::Event);
        true
    }
}

/// One serialized turn: resolve session, run agent, record the message.
async fn run_turn(
    sessions: &SessionStore,
    agent: &dyn AgentRunner,
    conversation_id: String,
    text: String,
    origin: MessageOrigin,
) -> crate::error::Result<()> {
    let session = sessions.get_or_create_active_session(&conversation_id).await?;
    let session_id = session.id.clone();
    let first_user_message =
        origin == MessageOrigin::User && session.message_count == 0 && session.title == DEFAULT_TITLE;

    let title = first_user_message
        .then(|| truncate(&text, AUTO_TITLE_MAX))
        .filter(|title| !title.is_empty());

    let result = agent
        .run(AgentRequest {
            conversation_id: conversation_id.clone(),
            session,
            text,
            origin,
        })
        .await;

    // Bookkeeping failures are logged; the on-disk index stays as it was.
    if let Err(e) = sessions.touch_session(&conversation_id, &session_id).await {
        warn!(conversation_id = %conversation_id, session_id = %session_id, error = %e, "Failed to touch session");
    }
    if let Some(title) = title {
        match sessions
            .update_session_title(&conversation_id, &session_id, &title)
            .await
        {
            Ok(_) => info!(conversation_id = %conversation_id, session_id = %session_id, title = %title, "Titled session"),
            Err(e) => warn!(conversation_id = %conversation_id, error = %e, "Failed to title session"),
        }
    }

    result.map_err(Into::into)
}

/// First non-blank line of `s`, cut to at most `max` bytes.
fn truncate(s: &str, max: usize) -> String {
    let line = s
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or_default();
    if line.len() <= max {
        line.to_string()
    } else {
        let mut end = max;
        while end > 0 && !line.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &line[..end])
    }
}
