//! Chat Wake — filesystem triggers and multi-session storage for a chat agent.

pub mod agent;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod sessions;
