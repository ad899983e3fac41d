//! Serialized per-conversation execution of chat messages and events.

pub mod dispatcher;
pub mod queue;

pub use dispatcher::Dispatcher;
pub use queue::ConversationQueue;
