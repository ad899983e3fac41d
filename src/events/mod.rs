//! Filesystem-driven triggers — descriptor files that wake a conversation.
//!
//! Core components:
//! - `descriptor` — the JSON descriptor format and the `Trigger` variants
//! - `schedule` — cron expressions evaluated in an IANA timezone
//! - `observer` — directory polling and per-file debounce
//! - `watcher` — the `TriggerWatcher` lifecycle and scheduling actor
//! - `target` — the `EventTarget` consumer interface

pub mod descriptor;
pub mod observer;
pub mod schedule;
pub mod target;
pub mod watcher;

pub use descriptor::{Descriptor, Trigger};
pub use schedule::CronSchedule;
pub use target::EventTarget;
pub use watcher::{TriggerWatcher, WatcherStatus};
