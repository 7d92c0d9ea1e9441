//! Watch Scheduler
//!
//! Reruns the pipeline when watched files change, never overlapping two runs.
//! A change that arrives while a run is in flight queues one trailing rerun;
//! any number of further changes collapse into that same rerun.
//!
//! ```text
//! Idle        + change  -> Running
//! Running     + change  -> QueuedRerun
//! QueuedRerun + change  -> QueuedRerun
//! Running     + settled -> Idle
//! QueuedRerun + settled -> Running
//! ```

use notify::{RecursiveMode, Watcher};
use notify_debouncer_mini::{DebounceEventResult, Debouncer, new_debouncer};
use std::future::Future;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;

/// What happened to a watched path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// Created within the last debounce windows
    Added,
    /// Modified
    Changed,
    /// No longer exists
    Removed,
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ChangeKind::Added => "added",
            ChangeKind::Changed => "changed",
            ChangeKind::Removed => "removed",
        })
    }
}

/// One debounced file-system change. Every kind triggers a rerun.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// Path reported by the watcher
    pub path: PathBuf,
    /// What happened to it
    pub kind: ChangeKind,
}

/// Where the scheduler is between runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// No run in flight
    Idle,
    /// A run is in flight and nothing is queued
    Running,
    /// A run is in flight and another will follow it
    QueuedRerun,
}

/// The scheduling rules, separate from any clock or runtime
#[derive(Debug, Clone)]
pub struct WatchScheduler {
    state: SchedulerState,
}

impl Default for WatchScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl WatchScheduler {
    /// Start idle
    pub fn new() -> Self {
        Self {
            state: SchedulerState::Idle,
        }
    }

    /// Current state
    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// A change arrived. Returns `true` if a run should start now.
    pub fn on_change(&mut self) -> bool {
        match self.state {
            SchedulerState::Idle => {
                self.state = SchedulerState::Running;
                true
            }
            SchedulerState::Running | SchedulerState::QueuedRerun => {
                self.state = SchedulerState::QueuedRerun;
                false
            }
        }
    }

    /// The in-flight run settled (pass or fail). Returns `true` if the
    /// queued rerun should start now.
    pub fn on_settled(&mut self) -> bool {
        match self.state {
            SchedulerState::QueuedRerun => {
                self.state = SchedulerState::Running;
                true
            }
            SchedulerState::Running | SchedulerState::Idle => {
                self.state = SchedulerState::Idle;
                false
            }
        }
    }
}

/// Drive `run` from a stream of changes until the stream closes.
///
/// The first run starts immediately. Returns the number of runs started.
pub async fn drive<F, Fut>(mut changes: mpsc::Receiver<ChangeEvent>, mut run: F) -> usize
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut scheduler = WatchScheduler::new();
    let mut runs = 0usize;
    let mut closed = false;
    let mut start = scheduler.on_change();

    loop {
        while start {
            runs += 1;
            let in_flight = run();
            tokio::pin!(in_flight);

            loop {
                tokio::select! {
                    _ = &mut in_flight => break,
                    change = changes.recv(), if !closed => match change {
                        Some(change) => {
                            scheduler.on_change();
                            tracing::debug!(
                                path = %change.path.display(),
                                kind = %change.kind,
                                "change during run; rerun queued"
                            );
                        }
                        None => closed = true,
                    },
                }
            }

            start = scheduler.on_settled();
        }

        if closed {
            return runs;
        }
        tracing::info!("Watching for changes...");

        match changes.recv().await {
            Some(change) => {
                tracing::info!("{} {}. Rerunning!", change.path.display(), change.kind);
                start = scheduler.on_change();
            }
            None => return runs,
        }
    }
}

/// Keeps the underlying watcher alive; dropping it stops the change stream
pub struct ChangeSource {
    _debouncer: Debouncer<notify::RecommendedWatcher>,
}

fn classify(path: PathBuf, window: Duration) -> ChangeEvent {
    let kind = match std::fs::metadata(&path) {
        Err(_) => ChangeKind::Removed,
        Ok(meta) => {
            let recently_created = meta
                .created()
                .ok()
                .and_then(|created| SystemTime::now().duration_since(created).ok())
                .is_some_and(|age| age <= window * 2);
            if recently_created {
                ChangeKind::Added
            } else {
                ChangeKind::Changed
            }
        }
    };
    ChangeEvent { path, kind }
}

/// Watch `paths` recursively, emitting one event per changed path per
/// `debounce` window. Paths that do not exist are skipped with a warning.
pub fn watch_paths(
    paths: &[PathBuf],
    debounce: Duration,
) -> Result<(ChangeSource, mpsc::Receiver<ChangeEvent>), notify::Error> {
    let (tx, rx) = mpsc::channel(256);

    let mut debouncer = new_debouncer(debounce, move |res: DebounceEventResult| match res {
        Ok(events) => {
            for event in events {
                if tx.blocking_send(classify(event.path, debounce)).is_err() {
                    return;
                }
            }
        }
        Err(e) => tracing::warn!("file watcher error: {e}"),
    })?;

    let mut watched = 0usize;
    for path in paths {
        if !path.exists() {
            tracing::warn!(path = %path.display(), "watch path does not exist; skipped");
            continue;
        }
        debouncer.watcher().watch(path, RecursiveMode::Recursive)?;
        watched += 1;
    }
    tracing::debug!(paths = watched, ?debounce, "file watcher started");

    Ok((
        ChangeSource {
            _debouncer: debouncer,
        },
        rx,
    ))
}
