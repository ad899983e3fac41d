//! Per-conversation serial work queue.
//!
//! Work items run one at a time in enqueue order. A failing or panicking
//! item is logged with its label and the queue moves on to the next one.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use futures::FutureExt;
use futures::future::BoxFuture;
use tracing::{debug, error};

use crate::error::{AgentError, Result};

/// Boxed unit of work.
pub type Work = BoxFuture<'static, Result<()>>;

struct WorkItem {
    label: String,
    work: Work,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<WorkItem>,
    processing: bool,
}

/// FIFO, single-concurrency runner for one conversation key.
///
/// Cloning shares the same queue. `enqueue` must be called from within a
/// tokio runtime; the queue drains on a spawned task.
#[derive(Clone)]
pub struct ConversationQueue {
    key: Arc<str>,
    state: Arc<Mutex<QueueState>>,
}

impl ConversationQueue {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: Arc::from(key.into()),
            state: Arc::new(Mutex::new(QueueState::default())),
        }
    }

    /// The conversation this queue serializes.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Append a work item and start draining if idle. Never blocks.
    pub fn enqueue<F>(&self, label: impl Into<String>, work: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let item = WorkItem {
            label: label.into(),
            work: work.boxed(),
        };

        let start = {
            let mut state = self.lock();
            state.pending.push_back(item);
            !std::mem::replace(&mut state.processing, true)
        };

        if start {
            tokio::spawn(drain(Arc::clone(&self.key), Arc::clone(&self.state)));
        }
    }

    /// Items waiting to start.
    pub fn size(&self) -> usize {
        self.lock().pending.len()
    }

    /// Whether an item is currently running (or about to).
    #[cfg(test)]
    fn is_processing(&self) -> bool {
        self.lock().processing
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        lock_state(&self.state)
    }
}

fn lock_state(state: &Mutex<QueueState>) -> MutexGuard<'_, QueueState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn drain(key: Arc<str>, state: Arc<Mutex<QueueState>>) {
    loop {
        let item = {
            let mut guard = lock_state(&state);
            match guard.pending.pop_front() {
                Some(item) => item,
                None => {
                    guard.processing = false;
                    return;
                }
            }
        };

        let label = item.label;
        debug!(conversation_id = %key, label = %label, "Running work item");

        // Own task so a panic is contained to the item.
        let result = match tokio::spawn(item.work).await {
            Ok(result) => result,
            Err(e) => Err(AgentError::Panicked {
                label: label.clone(),
                reason: e.to_string(),
            }
            .into()),
        };

        if let Err(e) = result {
            error!(conversation_id = %key, label = %label, error = %e, "Work item failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::mpsc;

    use super::*;

    #[tokio::test]
    async fn runs_in_enqueue_order_even_when_later_items_are_faster() {
        let queue = ConversationQueue::new("c");
        let (tx, mut rx) = mpsc::unbounded_channel();

        for (i, delay_ms) in [(0u32, 60u64), (1, 5), (2, 30), (3, 0)] {
            let tx = tx.clone();
            queue.enqueue(format!("item {i}"), async move {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                tx.send(i).unwrap();
                Ok(())
            });
        }
        drop(tx);

        let mut order = Vec::new();
        while let Some(i) = rx.recv().await {
            order.push(i);
        }
        assert_eq!(order, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn never_runs_two_items_at_once() {
        let queue = ConversationQueue::new("c");
        let running = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let peak = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();

        for _ in 0..5 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            let done_tx = done_tx.clone();
            queue.enqueue("overlap", async move {
                use std::sync::atomic::Ordering;
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                done_tx.send(()).unwrap();
                Ok(())
            });
        }

        for _ in 0..5 {
            done_rx.recv().await.unwrap();
        }
        assert_eq!(peak.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failures_and_panics_do_not_stop_the_queue() {
        let queue = ConversationQueue::new("c");
        let (tx, mut rx) = mpsc::unbounded_channel();

        queue.enqueue("fails", async {
            Err(AgentError::Failed {
                conversation_id: "c".into(),
                reason: "boom".into(),
            }
            .into())
        });
        queue.enqueue("panics", async {
            let explode = true;
            if explode {
                panic!("work item blew up");
            }
            Ok(())
        });
        queue.enqueue("succeeds", async move {
            tx.send("ran").unwrap();
            Ok(())
        });

        let got = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap();
        assert_eq!(got, Some("ran"));
    }

    #[tokio::test]
    async fn size_counts_items_not_yet_started() {
        let queue = ConversationQueue::new("c");
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let (started_tx, started_rx) = tokio::sync::oneshot::channel::<()>();

        queue.enqueue("blocker", async move {
            let _ = started_tx.send(());
            let _ = release_rx.await;
            Ok(())
        });
        started_rx.await.unwrap();

        queue.enqueue("a", async { Ok(()) });
        queue.enqueue("b", async { Ok(()) });
        assert_eq!(queue.size(), 2);
        assert!(queue.is_processing());

        release_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(2), async {
            while queue.is_processing() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(queue.size(), 0);
    }

    #[tokio::test]
    async fn clones_share_one_queue() {
        let queue = ConversationQueue::new("shared");
        let other = queue.clone();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        queue.enqueue("hold", async move {
            let _ = release_rx.await;
            Ok(())
        });
        other.enqueue("next", async { Ok(()) });
        assert_eq!(queue.size(), other.size());
        assert_eq!(other.key(), "shared");
        release_tx.send(()).unwrap();
    }
}
