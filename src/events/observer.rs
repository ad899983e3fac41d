//! Directory observation and per-file debounce.
//!
//! The observer polls the events directory and turns differences between
//! snapshots into create/modify/remove notifications. The debouncer holds
//! each filename until it has been quiet for the debounce window and then
//! forwards it once.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

/// What changed about a file between two polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Created,
    Modified,
    Removed,
}

/// Raw filesystem notification for one filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsNotification {
    pub file: String,
    pub kind: NotificationKind,
}

/// Enough metadata to tell whether a file was rewritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStamp {
    modified: Option<SystemTime>,
    len: u64,
}

pub type Snapshot = HashMap<String, FileStamp>;

/// Hidden files and in-progress `.tmp` writes are not descriptors.
pub fn is_descriptor_name(name: &str) -> bool {
    !name.starts_with('.') && !name.ends_with(".tmp")
}

/// Read the current set of descriptor files in `dir`.
pub async fn scan_dir(dir: &Path) -> std::io::Result<Snapshot> {
    let mut snapshot = Snapshot::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if !is_descriptor_name(&name) {
            continue;
        }
        // The file may vanish between listing and stat.
        let Ok(metadata) = entry.metadata().await else {
            continue;
        };
        if !metadata.is_file() {
            continue;
        }
        snapshot.insert(
            name,
            FileStamp {
                modified: metadata.modified().ok(),
                len: metadata.len(),
            },
        );
    }
    Ok(snapshot)
}

/// Notifications that turn `before` into `after`.
pub fn diff(before: &Snapshot, after: &Snapshot) -> Vec<FsNotification> {
    let mut out = Vec::new();
    for (name, stamp) in after {
        match before.get(name) {
            None => out.push(FsNotification {
                file: name.clone(),
                kind: NotificationKind::Created,
            }),
            Some(prev) if prev != stamp => out.push(FsNotification {
                file: name.clone(),
                kind: NotificationKind::Modified,
            }),
            Some(_) => {}
        }
    }
    for name in before.keys() {
        if !after.contains_key(name) {
            out.push(FsNotification {
                file: name.clone(),
                kind: NotificationKind::Removed,
            });
        }
    }
    out
}

/// Poll `dir` every `interval`, starting from `snapshot`, until the
/// receiving side goes away.
pub async fn observe(
    dir: PathBuf,
    interval: Duration,
    mut snapshot: Snapshot,
    tx: mpsc::UnboundedSender<FsNotification>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately; the caller already scanned.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let current = match scan_dir(&dir).await {
            Ok(current) => current,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Failed to poll events directory");
                continue;
            }
        };
        for notification in diff(&snapshot, &current) {
            debug!(file = %notification.file, kind = ?notification.kind, "Descriptor changed");
            if tx.send(notification).is_err() {
                return;
            }
        }
        snapshot = current;
    }
}

/// Forward each filename once it has been quiet for `window`.
pub async fn debounce(
    mut rx: mpsc::UnboundedReceiver<FsNotification>,
    window: Duration,
    tx: mpsc::UnboundedSender<String>,
) {
    let mut deadlines: HashMap<String, Instant> = HashMap::new();

    loop {
        let next = deadlines
            .values()
            .min()
            .copied()
            .unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));

        tokio::select! {
            received = rx.recv() => match received {
                Some(notification) => {
                    deadlines.insert(notification.file, Instant::now() + window);
                }
                None => break,
            },
            _ = tokio::time::sleep_until(next), if !deadlines.is_empty() => {
                let now = Instant::now();
                let due: Vec<String> = deadlines
                    .iter()
                    .filter(|(_, deadline)| **deadline <= now)
                    .map(|(file, _)| file.clone())
                    .collect();
                for file in due {
                    deadlines.remove(&file);
                    if tx.send(file).is_err() {
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stamp(len: u64) -> FileStamp {
        FileStamp {
            modified: Some(SystemTime::UNIX_EPOCH),
            len,
        }
    }

    #[test]
    fn diff_reports_each_kind() {
        let before: Snapshot = [("a".to_string(), stamp(1)), ("b".to_string(), stamp(1))]
            .into_iter()
            .collect();
        let after: Snapshot = [("b".to_string(), stamp(2)), ("c".to_string(), stamp(1))]
            .into_iter()
            .collect();

        let mut got: Vec<(String, NotificationKind)> = diff(&before, &after)
            .into_iter()
            .map(|n| (n.file, n.kind))
            .collect();
        got.sort_by(|a, b| a.0.cmp(&b.0));

        assert_eq!(
            got,
            vec![
                ("a".to_string(), NotificationKind::Removed),
                ("b".to_string(), NotificationKind::Modified),
                ("c".to_string(), NotificationKind::Created),
            ]
        );
    }

    #[test]
    fn ignores_hidden_and_temp_files() {
        assert!(is_descriptor_name("reminder.json"));
        assert!(!is_descriptor_name(".reminder.json"));
        assert!(!is_descriptor_name("reminder.json.tmp"));
    }

    #[tokio::test]
    async fn scan_skips_directories() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("a.json"), "{}").await.unwrap();
        tokio::fs::write(dir.path().join("b.json.tmp"), "{}").await.unwrap();
        tokio::fs::create_dir(dir.path().join("nested")).await.unwrap();

        let snapshot = scan_dir(dir.path()).await.unwrap();
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.contains_key("a.json"));
    }

    #[tokio::test]
    async fn debounce_collapses_bursts() {
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(debounce(raw_rx, Duration::from_millis(100), out_tx));

        for kind in [NotificationKind::Created, NotificationKind::Modified] {
            raw_tx
                .send(FsNotification {
                    file: "x.json".to_string(),
                    kind,
                })
                .unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        raw_tx
            .send(FsNotification {
                file: "y.json".to_string(),
                kind: NotificationKind::Created,
            })
            .unwrap();

        let mut got = Vec::new();
        for _ in 0..2 {
            let file = tokio::time::timeout(Duration::from_secs(2), out_rx.recv())
                .await
                .unwrap()
                .unwrap();
            got.push(file);
        }
        got.sort();
        assert_eq!(got, vec!["x.json".to_string(), "y.json".to_string()]);

        // Nothing else arrives for the burst.
        let extra = tokio::time::timeout(Duration::from_millis(250), out_rx.recv()).await;
        assert!(extra.is_err());

        drop(raw_tx);
        task.await.unwrap();
    }
}
