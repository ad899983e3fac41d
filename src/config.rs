//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Top-level configuration for the binary.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root of per-conversation session storage.
    pub data_dir: PathBuf,
    pub watcher: WatcherConfig,
    pub dispatch: DispatchConfig,
    /// Directory for the rolling log file. Stderr only when unset.
    pub log_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = PathBuf::from("./data");
        Self {
            watcher: WatcherConfig::new(data_dir.join("events")),
            data_dir,
            dispatch: DispatchConfig::default(),
            log_dir: None,
        }
    }
}

impl Config {
    /// Build configuration from `CHAT_WAKE_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let data_dir = std::env::var("CHAT_WAKE_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data"));

        let events_dir = std::env::var("CHAT_WAKE_EVENTS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("events"));

        let mut watcher = WatcherConfig::new(events_dir);
        if let Some(ms) = env_u64("CHAT_WAKE_DEBOUNCE_MS")? {
            watcher.debounce = Duration::from_millis(ms);
        }
        if let Some(ms) = env_u64("CHAT_WAKE_POLL_MS")? {
            watcher.poll_interval = Duration::from_millis(ms.max(1));
        }
        if let Some(n) = env_u64("CHAT_WAKE_PARSE_ATTEMPTS")? {
            watcher.parse_attempts = n.max(1) as u32;
        }
        if let Some(ms) = env_u64("CHAT_WAKE_PARSE_BACKOFF_MS")? {
            watcher.parse_backoff = Duration::from_millis(ms);
        }

        let mut dispatch = DispatchConfig::default();
        if let Some(n) = env_u64("CHAT_WAKE_MAX_PENDING_EVENTS")? {
            dispatch.max_pending_events = n as usize;
        }

        let log_dir = std::env::var("CHAT_WAKE_LOG_DIR").ok().map(PathBuf::from);

        Ok(Self {
            data_dir,
            watcher,
            dispatch,
            log_dir,
        })
    }
}

/// Trigger watcher tuning.
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Directory holding trigger descriptor files.
    pub events_dir: PathBuf,
    /// Quiet window before a changed file is handled.
    pub debounce: Duration,
    /// How often the directory is polled for changes.
    pub poll_interval: Duration,
    /// Total parse attempts before a descriptor is discarded.
    pub parse_attempts: u32,
    /// Delay before the second attempt; doubles after each failure.
    pub parse_backoff: Duration,
}

impl WatcherConfig {
    pub fn new(events_dir: PathBuf) -> Self {
        Self {
            events_dir,
            debounce: Duration::from_millis(100),
            poll_interval: Duration::from_millis(50),
            parse_attempts: 3,
            parse_backoff: Duration::from_millis(100),
        }
    }
}

/// Dispatcher admission control.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Max trigger-originated items waiting per conversation.
    pub max_pending_events: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_pending_events: 5,
        }
    }
}

fn env_u64(key: &str) -> Result<Option<u64>, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("'{raw}': {e}"),
            }),
        Err(_) => Ok(None),
    }
}
