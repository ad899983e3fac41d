//! Multi-session persistence — several resumable threads per conversation.

pub mod commands;
pub mod log;
pub mod model;
pub mod store;

pub use commands::SessionCommand;
pub use log::{ContextEntry, SessionLog};
pub use model::{DEFAULT_TITLE, SessionMeta, SessionsIndex};
pub use store::SessionStore;
