//! Error types for chat-wake.

use std::path::PathBuf;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Trigger error: {0}")]
    Trigger(#[from] TriggerError),

    #[error("Watcher error: {0}")]
    Watcher(#[from] WatcherError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Errors produced while reading or classifying a trigger descriptor.
#[derive(Debug, thiserror::Error)]
pub enum TriggerError {
    #[error("Descriptor {file} is not valid JSON: {reason}")]
    Malformed { file: String, reason: String },

    #[error("Descriptor {file} is missing required field '{field}'")]
    MissingField { file: String, field: &'static str },

    #[error("Descriptor {file} has unknown trigger type '{kind}'")]
    UnknownType { file: String, kind: String },

    #[error("Descriptor {file} has invalid timestamp '{value}': {reason}")]
    InvalidTimestamp {
        file: String,
        value: String,
        reason: String,
    },

    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidCron { expression: String, reason: String },

    #[error("Unknown timezone '{0}'")]
    InvalidTimezone(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Trigger watcher lifecycle errors.
#[derive(Debug, thiserror::Error)]
pub enum WatcherError {
    #[error("Failed to prepare events directory {path}: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Watcher is already running")]
    AlreadyRunning,

    #[error("Watcher is not running")]
    NotRunning,
}

/// Session store errors.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Session {session_id} not found in conversation {conversation_id}")]
    NotFound {
        conversation_id: String,
        session_id: String,
    },

    #[error("Invalid conversation id '{0}'")]
    InvalidConversation(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors reported by the external agent collaborator.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Agent run failed for conversation {conversation_id}: {reason}")]
    Failed {
        conversation_id: String,
        reason: String,
    },

    #[error("Work item '{label}' panicked: {reason}")]
    Panicked { label: String, reason: String },
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;
