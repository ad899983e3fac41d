//! Trigger watcher — turns the events directory into scheduled firings.
//!
//! The watcher is a small pipeline of tasks:
//! - an **observer** polling the directory for create/modify/remove,
//! - a **debouncer** collapsing bursts per filename (last write wins),
//! - an **actor** that owns all bookkeeping (known files, one-shot timers,
//!   recurring schedules), parses descriptors, schedules them, and fires
//!   them into the [`EventTarget`].
//!
//! Timers and cron loops are spawned tasks that send `Fire` messages back
//! to the actor; cancelling a registration aborts its task. Every
//! registration carries an id so a `Fire` that raced a cancel is ignored.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::WatcherConfig;
use crate::error::{TriggerError, WatcherError};
use crate::events::descriptor::{Descriptor, Trigger};
use crate::events::observer::{self, FsNotification};
use crate::events::schedule::{CronSchedule, delay_until};
use crate::events::target::EventTarget;

/// Point-in-time view of the watcher's bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatcherStatus {
    /// Filenames with a successfully parsed descriptor.
    pub known_files: Vec<String>,
    /// Filenames waiting on a one-shot timer.
    pub pending_timers: Vec<String>,
    /// Filenames with an active recurring schedule.
    pub active_schedules: Vec<String>,
    /// Handling passes run since start (one per debounced change).
    pub passes: u64,
}

/// Watches a directory of trigger descriptors.
pub struct TriggerWatcher {
    config: WatcherConfig,
    target: Arc<dyn EventTarget>,
    running: Option<Running>,
}

struct Running {
    commands: mpsc::UnboundedSender<Command>,
    actor: JoinHandle<()>,
    observer: JoinHandle<()>,
    debouncer: JoinHandle<()>,
}

impl TriggerWatcher {
    pub fn new(config: WatcherConfig, target: Arc<dyn EventTarget>) -> Self {
        Self {
            config,
            target,
            running: None,
        }
    }

    /// Directory being watched.
    pub fn events_dir(&self) -> &Path {
        &self.config.events_dir
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Create the directory, scan existing descriptors, and start watching.
    pub async fn start(&mut self) -> Result<(), WatcherError> {
        if self.running.is_some() {
            return Err(WatcherError::AlreadyRunning);
        }

        let dir = self.config.events_dir.clone();
        let dir_err = |source: std::io::Error| WatcherError::Directory {
            path: dir.clone(),
            source,
        };
        tokio::fs::create_dir_all(&dir).await.map_err(dir_err)?;

        let snapshot = observer::scan_dir(&dir).await.map_err(dir_err)?;
        let started_at = SystemTime::now();

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (changed_tx, changed_rx) = mpsc::unbounded_channel();
        let (raw_tx, raw_rx) = mpsc::unbounded_channel::<FsNotification>();

        // Everything already present is handled as newly discovered.
        let mut existing: Vec<&String> = snapshot.keys().collect();
        existing.sort();
        for file in existing {
            let _ = changed_tx.send(file.clone());
        }

        let state = WatcherState {
            config: self.config.clone(),
            target: Arc::clone(&self.target),
            started_at,
            commands: command_tx.clone(),
            startup: snapshot.keys().cloned().collect(),
            known: HashSet::new(),
            registrations: HashMap::new(),
            inflight: HashMap::new(),
            next_id: 0,
            passes: 0,
        };

        let actor = tokio::spawn(state.run(command_rx, changed_rx));
        let debouncer = tokio::spawn(observer::debounce(raw_rx, self.config.debounce, changed_tx));
        let observer = tokio::spawn(observer::observe(
            dir.clone(),
            self.config.poll_interval,
            snapshot,
            raw_tx,
        ));

        info!(dir = %dir.display(), "Trigger watcher started");

        self.running = Some(Running {
            commands: command_tx,
            actor,
            observer,
            debouncer,
        });
        Ok(())
    }

    /// Cancel all timers and schedules and stop watching. Safe to call twice.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        running.observer.abort();
        running.debouncer.abort();

        let (ack_tx, ack_rx) = oneshot::channel();
        if running.commands.send(Command::Stop(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
        let _ = running.actor.await;

        info!(dir = %self.config.events_dir.display(), "Trigger watcher stopped");
    }

    /// Snapshot of the current bookkeeping.
    pub async fn status(&self) -> Result<WatcherStatus, WatcherError> {
        let running = self.running.as_ref().ok_or(WatcherError::NotRunning)?;
        let (tx, rx) = oneshot::channel();
        running
            .commands
            .send(Command::Status(tx))
            .map_err(|_| WatcherError::NotRunning)?;
        rx.await.map_err(|_| WatcherError::NotRunning)
    }
}

impl Drop for TriggerWatcher {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            running.observer.abort();
            running.debouncer.abort();
            running.actor.abort();
        }
    }
}

/// Messages handled by the actor.
enum Command {
    Parsed {
        file: String,
        pass: u64,
        at_startup: bool,
        outcome: ParseOutcome,
    },
    Fire {
        file: String,
        registration: u64,
    },
    Status(oneshot::Sender<WatcherStatus>),
    Stop(oneshot::Sender<()>),
}

/// Result of reading one descriptor file.
enum ParseOutcome {
    Ready {
        descriptor: Descriptor,
        modified: SystemTime,
    },
    Missing,
    Failed(TriggerError),
}

/// A pending timer or recurring schedule for one filename.
struct Registration {
    id: u64,
    descriptor: Descriptor,
    handle: JoinHandle<()>,
}

impl Registration {
    fn cancel(self) {
        self.handle.abort();
    }
}

struct WatcherState {
    config: WatcherConfig,
    target: Arc<dyn EventTarget>,
    started_at: SystemTime,
    /// Files found by the startup scan and not yet handled. Only these can
    /// be stale; anything the observer reports later was written after start.
    startup: HashSet<String>,
    commands: mpsc::UnboundedSender<Command>,
    known: HashSet<String>,
    registrations: HashMap<String, Registration>,
    /// Latest handling pass per filename; older parse results are dropped.
    inflight: HashMap<String, u64>,
    next_id: u64,
    passes: u64,
}

impl WatcherState {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut changed: mpsc::UnboundedReceiver<String>,
    ) {
        loop {
            tokio::select! {
                Some(file) = changed.recv() => self.on_changed(file),
                command = commands.recv() => match command {
                    Some(Command::Parsed { file, pass, at_startup, outcome }) => {
                        self.on_parsed(file, pass, at_startup, outcome).await;
                    }
                    Some(Command::Fire { file, registration }) => {
                        self.on_fire(file, registration).await;
                    }
                    Some(Command::Status(reply)) => {
                        let _ = reply.send(self.status());
                    }
                    Some(Command::Stop(ack)) => {
                        self.shutdown();
                        let _ = ack.send(());
                        break;
                    }
                    None => {
                        self.shutdown();
                        break;
                    }
                },
            }
        }
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Start a handling pass for a debounced change.
    fn on_changed(&mut self, file: String) {
        self.passes += 1;

        // A rewrite replaces the schedule; a removal just cancels it.
        if let Some(previous) = self.registrations.remove(&file) {
            debug!(file = %file, "Cancelled previous registration");
            previous.cancel();
        }

        let pass = self.next_id();
        self.inflight.insert(file.clone(), pass);
        let at_startup = self.startup.remove(&file);

        let path = self.config.events_dir.join(&file);
        let attempts = self.config.parse_attempts;
        let backoff = self.config.parse_backoff;
        let commands = self.commands.clone();
        tokio::spawn(async move {
            let outcome = read_descriptor(&path, &file, attempts, backoff).await;
            let _ = commands.send(Command::Parsed {
                file,
                pass,
                at_startup,
                outcome,
            });
        });
    }

    async fn on_parsed(
        &mut self,
        file: String,
        pass: u64,
        at_startup: bool,
        outcome: ParseOutcome,
    ) {
        if self.inflight.get(&file) != Some(&pass) {
            debug!(file = %file, "Discarding superseded parse result");
            return;
        }
        self.inflight.remove(&file);

        match outcome {
            ParseOutcome::Missing => {
                if self.known.remove(&file) {
                    debug!(file = %file, "Descriptor removed");
                }
            }
            ParseOutcome::Failed(e) => {
                warn!(file = %file, error = %e, "Unparsable trigger descriptor, deleting");
                self.known.remove(&file);
                self.remove_file(&file).await;
            }
            ParseOutcome::Ready {
                descriptor,
                modified,
            } => {
                self.known.insert(file.clone());
                self.schedule(file, descriptor, modified, at_startup).await;
            }
        }
    }

    async fn schedule(
        &mut self,
        file: String,
        descriptor: Descriptor,
        modified: SystemTime,
        at_startup: bool,
    ) {
        match &descriptor.trigger {
            Trigger::Immediate => {
                if at_startup && modified < self.started_at {
                    info!(file = %file, "Stale immediate trigger from before startup, deleting");
                    self.known.remove(&file);
                    self.remove_file(&file).await;
                    return;
                }
                self.fire(&file, &descriptor).await;
            }
            Trigger::OneShot { at, fire_at } => {
                let now = Utc::now();
                if *fire_at <= now {
                    info!(file = %file, at = %at, "One-shot trigger already past, deleting");
                    self.known.remove(&file);
                    self.remove_file(&file).await;
                    return;
                }

                let id = self.next_id();
                let delay = delay_until(*fire_at, now);
                let commands = self.commands.clone();
                let timer_file = file.clone();
                let handle = tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = commands.send(Command::Fire {
                        file: timer_file,
                        registration: id,
                    });
                });

                info!(file = %file, at = %at, delay_secs = delay.as_secs(), "Scheduled one-shot trigger");
                self.registrations.insert(
                    file,
                    Registration {
                        id,
                        descriptor,
                        handle,
                    },
                );
            }
            Trigger::Periodic { schedule, timezone } => {
                let cron = match CronSchedule::parse(schedule, timezone) {
                    Ok(cron) => cron,
                    Err(e) => {
                        warn!(file = %file, error = %e, "Unusable periodic trigger, deleting");
                        self.known.remove(&file);
                        self.remove_file(&file).await;
                        return;
                    }
                };

                let id = self.next_id();
                let commands = self.commands.clone();
                let handle = tokio::spawn(run_cron(cron, file.clone(), id, commands));

                info!(file = %file, schedule = %schedule, timezone = %timezone, "Scheduled periodic trigger");
                self.registrations.insert(
                    file,
                    Registration {
                        id,
                        descriptor,
                        handle,
                    },
                );
            }
        }
    }

    async fn on_fire(&mut self, file: String, registration: u64) {
        let Some(current) = self.registrations.get(&file) else {
            debug!(file = %file, "Ignoring fire for cancelled registration");
            return;
        };
        if current.id != registration {
            debug!(file = %file, "Ignoring fire for replaced registration");
            return;
        }

        let descriptor = if current.descriptor.trigger.is_periodic() {
            current.descriptor.clone()
        } else {
            match self.registrations.remove(&file) {
                Some(done) => done.descriptor,
                None => return,
            }
        };
        self.fire(&file, &descriptor).await;
    }

    /// Hand the payload to the target; single-use descriptors are deleted
    /// whether or not the target accepted them.
    async fn fire(&mut self, file: &str, descriptor: &Descriptor) {
        let payload = descriptor.payload(file);
        let accepted = self
            .target
            .enqueue_event(&descriptor.conversation_id, payload);

        if accepted {
            info!(
                file = %file,
                conversation_id = %descriptor.conversation_id,
                trigger = descriptor.trigger.type_tag(),
                "Trigger fired"
            );
        } else {
            warn!(
                file = %file,
                conversation_id = %descriptor.conversation_id,
                trigger = descriptor.trigger.type_tag(),
                "Trigger rejected by event target"
            );
        }

        if !descriptor.trigger.is_periodic() {
            self.known.remove(file);
            self.remove_file(file).await;
        }
    }

    async fn remove_file(&self, file: &str) {
        let path = self.config.events_dir.join(file);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(file = %file, error = %e, "Failed to delete descriptor"),
        }
    }

    fn status(&self) -> WatcherStatus {
        let mut known_files: Vec<String> = self.known.iter().cloned().collect();
        let mut pending_timers = Vec::new();
        let mut active_schedules = Vec::new();
        for (file, registration) in &self.registrations {
            if registration.descriptor.trigger.is_periodic() {
                active_schedules.push(file.clone());
            } else {
                pending_timers.push(file.clone());
            }
        }
        known_files.sort();
        pending_timers.sort();
        active_schedules.sort();

        WatcherStatus {
            known_files,
            pending_timers,
            active_schedules,
            passes: self.passes,
        }
    }

    fn shutdown(&mut self) {
        let count = self.registrations.len();
        for (_, registration) in self.registrations.drain() {
            registration.cancel();
        }
        self.known.clear();
        self.inflight.clear();
        self.startup.clear();
        debug!(cancelled = count, "Cleared trigger registrations");
    }
}

/// Recurring loop for one periodic descriptor.
async fn run_cron(
    cron: CronSchedule,
    file: String,
    registration: u64,
    commands: mpsc::UnboundedSender<Command>,
) {
    loop {
        let now = Utc::now();
        let Some(next) = cron.next_after(now) else {
            info!(file = %file, schedule = %cron.expression(), "Cron schedule has no further matches");
            return;
        };
        tokio::time::sleep(delay_until(next, now)).await;
        let fire = Command::Fire {
            file: file.clone(),
            registration,
        };
        if commands.send(fire).is_err() {
            return;
        }
    }
}

/// Read and parse a descriptor, retrying with exponential backoff to ride
/// out a writer that has not finished yet.
async fn read_descriptor(
    path: &Path,
    file: &str,
    attempts: u32,
    backoff: Duration,
) -> ParseOutcome {
    let mut attempt = 1;
    let mut delay = backoff;
    loop {
        match try_read_descriptor(path, file).await {
            Ok(outcome) => return outcome,
            Err(e) if attempt >= attempts => return ParseOutcome::Failed(e),
            Err(e) => {
                debug!(file = %file, attempt, error = %e, "Descriptor parse failed, retrying");
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(2);
                attempt += 1;
            }
        }
    }
}

async fn try_read_descriptor(path: &Path, file: &str) -> Result<ParseOutcome, TriggerError> {
    let metadata = match tokio::fs::metadata(path).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ParseOutcome::Missing),
        Err(e) => return Err(e.into()),
    };
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ParseOutcome::Missing),
        Err(e) => return Err(e.into()),
    };
    let descriptor = Descriptor::parse(file, &content)?;
    Ok(ParseOutcome::Ready {
        descriptor,
        modified: metadata.modified()?,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<(String, String)>>,
    }

    impl EventTarget for Recorder {
        fn enqueue_event(&self, conversation_id: &str, text: String) -> bool {
            self.events
                .lock()
                .unwrap()
                .push((conversation_id.to_string(), text));
            true
        }
    }

    fn fast_config(dir: &Path) -> WatcherConfig {
        WatcherConfig {
            events_dir: dir.to_path_buf(),
            debounce: Duration::from_millis(60),
            poll_interval: Duration::from_millis(15),
            parse_attempts: 3,
            parse_backoff: Duration::from_millis(20),
        }
    }

    #[tokio::test]
    async fn read_descriptor_gives_up_after_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        tokio::fs::write(&path, "{ not json").await.unwrap();

        let started = std::time::Instant::now();
        let outcome = read_descriptor(&path, "bad.json", 3, Duration::from_millis(20)).await;
        assert!(matches!(outcome, ParseOutcome::Failed(TriggerError::Malformed { .. })));
        // Two backoff sleeps: 20ms + 40ms.
        assert!(started.elapsed() >= Duration::from_millis(60));
    }

    #[tokio::test]
    async fn read_descriptor_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone.json");
        let outcome = read_descriptor(&path, "gone.json", 3, Duration::from_millis(5)).await;
        assert!(matches!(outcome, ParseOutcome::Missing));
    }

    #[tokio::test]
    async fn read_descriptor_recovers_from_partial_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slow.json");
        tokio::fs::write(&path, r#"{"type":"immed"#).await.unwrap();

        let writer_path = path.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            tokio::fs::write(
                &writer_path,
                r#"{"type":"immediate","conversationId":"1","text":"done"}"#,
            )
            .await
            .unwrap();
        });

        let outcome = read_descriptor(&path, "slow.json", 3, Duration::from_millis(30)).await;
        match outcome {
            ParseOutcome::Ready { descriptor, .. } => assert_eq!(descriptor.text, "done"),
            _ => panic!("expected descriptor after retry"),
        }
    }

    #[tokio::test]
    async fn start_twice_is_an_error_and_stop_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let events = dir.path().join("events");
        let mut watcher = TriggerWatcher::new(fast_config(&events), Arc::new(Recorder::default()));

        watcher.start().await.unwrap();
        assert!(events.is_dir());
        assert!(matches!(watcher.start().await, Err(WatcherError::AlreadyRunning)));

        watcher.stop().await;
        watcher.stop().await;
        assert!(!watcher.is_running());
        assert!(matches!(watcher.status().await, Err(WatcherError::NotRunning)));
    }

    #[tokio::test]
    async fn immediate_written_right_after_start_fires() {
        for round in 0..10 {
            let dir = tempfile::tempdir().unwrap();
            let recorder = Arc::new(Recorder::default());
            let mut watcher = TriggerWatcher::new(fast_config(dir.path()), recorder.clone());
            watcher.start().await.unwrap();

            std::fs::write(
                dir.path().join("now.json"),
                r#"{"type":"immediate","conversationId":"1","text":"fresh"}"#,
            )
            .unwrap();

            let fired = tokio::time::timeout(Duration::from_secs(2), async {
                while recorder.events.lock().unwrap().is_empty() {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            })
            .await;
            assert!(fired.is_ok(), "round {round}: immediate was dropped");
            watcher.stop().await;
        }
    }

    #[tokio::test]
    async fn stop_cancels_pending_timers() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Arc::new(Recorder::default());
        let mut watcher = TriggerWatcher::new(fast_config(dir.path()), recorder.clone());
        watcher.start().await.unwrap();

        let at = (Utc::now() + chrono::Duration::milliseconds(600)).to_rfc3339();
        let body = format!(r#"{{"type":"one-shot","conversationId":"1","text":"later","at":"{at}"}}"#);
        tokio::fs::write(dir.path().join("later.json"), body).await.unwrap();

        tokio::time::sleep(Duration::from_millis(250)).await;
        let status = watcher.status().await.unwrap();
        assert_eq!(status.pending_timers, vec!["later.json".to_string()]);

        watcher.stop().await;
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(recorder.events.lock().unwrap().is_empty());
        // The descriptor is left for the next run.
        assert!(dir.path().join("later.json").exists());
    }

    #[tokio::test]
    async fn rewrite_replaces_schedule() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Arc::new(Recorder::default());
        let mut watcher = TriggerWatcher::new(fast_config(dir.path()), recorder.clone());
        watcher.start().await.unwrap();

        let path = dir.path().join("r.json");
        tokio::fs::write(
            &path,
            r#"{"type":"periodic","conversationId":"1","text":"a","schedule":"0 9 * * *","timezone":"UTC"}"#,
        )
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(watcher.status().await.unwrap().active_schedules, vec!["r.json".to_string()]);

        let at = (Utc::now() + chrono::Duration::hours(1)).to_rfc3339();
        tokio::fs::write(
            &path,
            format!(r#"{{"type":"one-shot","conversationId":"1","text":"b","at":"{at}"}}"#),
        )
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;

        let status = watcher.status().await.unwrap();
        assert!(status.active_schedules.is_empty());
        assert_eq!(status.pending_timers, vec!["r.json".to_string()]);
        assert_eq!(status.known_files, vec!["r.json".to_string()]);

        watcher.stop().await;
    }
}
