//! The consumer side of the trigger watcher.

/// Receives fired trigger payloads.
///
/// Returns `false` when the target refuses the payload (e.g. the
/// conversation already has too many events waiting). The watcher logs the
/// rejection and does not retry.
pub trait EventTarget: Send + Sync {
    fn enqueue_event(&self, conversation_id: &str, text: String) -> bool;
}
