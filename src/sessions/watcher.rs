//! File watcher for the Claude session store
//!
//! Uses the notify crate to watch the store root (for projects appearing or
//! disappearing) and each project directory (for index and log writes).
//! Bursts of raw events are coalesced by a single resettable timer; when it
//! fires the whole store is rescanned and every listener receives the full
//! snapshot.
//!
//! ```text
//! notify thread ──filename──▶ pump task ──▶ handle_fs_event ──▶ debounce timer
//!                                                                   │
//!                                      listeners ◀── emit ◀── rescan + classify
//! ```

use super::store::{discover_projects, is_session_file, session_count, ClaudeProject};
use crate::util::{isolate, now_millis};
use anyhow::Result;
use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionChangeType {
    Created,
    Updated,
    Deleted,
    Refresh,
}

impl SessionChangeType {
    /// Classify a rescan by comparing total session counts
    pub fn classify(previous: usize, current: usize) -> Self {
        use std::cmp::Ordering::*;
        match current.cmp(&previous) {
            Greater => Self::Created,
            Less => Self::Deleted,
            Equal => Self::Updated,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
            Self::Refresh => "refresh",
        }
    }
}

/// One observed change. `projects` is always the complete current state.
#[derive(Debug, Clone, Serialize)]
pub struct SessionChangeEvent {
    #[serde(rename = "type")]
    pub kind: SessionChangeType,
    pub projects: Vec<ClaudeProject>,
    pub timestamp: i64,
}

impl SessionChangeEvent {
    pub fn session_count(&self) -> usize {
        session_count(&self.projects)
    }
}

pub type Listener = Arc<dyn Fn(&SessionChangeEvent) -> Result<()> + Send + Sync>;

/// Handle returned by [`SessionsWatcher::add_listener`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchPhase {
    Stopped,
    Starting,
    Watching,
}

struct WatchState {
    phase: WatchPhase,
    last_projects: Option<Vec<ClaudeProject>>,
    debounce: Option<JoinHandle<()>>,
    fs_watcher: Option<RecommendedWatcher>,
    watched_projects: HashSet<String>,
    pump: Option<JoinHandle<()>>,
}

struct Inner {
    root: PathBuf,
    debounce: Duration,
    state: Mutex<WatchState>,
    listeners: Mutex<BTreeMap<ListenerId, Listener>>,
    next_listener: AtomicU64,
    /// Held while a debounced event is dispatched so `stop` can wait it out
    dispatch_gate: Mutex<()>,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, WatchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn listeners(&self) -> MutexGuard<'_, BTreeMap<ListenerId, Listener>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Watches the session store and fans change events out to listeners.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SessionsWatcher {
    inner: Arc<Inner>,
}

impl SessionsWatcher {
    pub fn new(root: impl Into<PathBuf>, debounce: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                root: root.into(),
                debounce,
                state: Mutex::new(WatchState {
                    phase: WatchPhase::Stopped,
                    last_projects: None,
                    debounce: None,
                    fs_watcher: None,
                    watched_projects: HashSet::new(),
                    pump: None,
                }),
                listeners: Mutex::new(BTreeMap::new()),
                next_listener: AtomicU64::new(1),
                dispatch_gate: Mutex::new(()),
            }),
        }
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    pub fn phase(&self) -> WatchPhase {
        self.inner.state().phase
    }

    /// Seed the baseline and begin watching. A second call is a no-op.
    pub async fn start(&self) -> Result<()> {
        {
            let mut state = self.inner.state();
            if state.phase != WatchPhase::Stopped {
                tracing::warn!("Claude sessions watcher already started");
                return Ok(());
            }
            state.phase = WatchPhase::Starting;
        }

        tracing::info!("Starting Claude sessions watcher on: {}", self.inner.root.display());

        let projects = discover_projects(&self.inner.root);
        let (tx, rx) = mpsc::unbounded_channel::<String>();

        let watcher_result = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if is_content_change(&event.kind) => {
                    for path in event.paths {
                        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                            let _ = tx.send(name.to_string());
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::debug!("Session store watch error: {}", e),
            },
            notify::Config::default(),
        );

        let mut fs_watcher = match watcher_result {
            Ok(w) => w,
            Err(e) => {
                tracing::error!("Failed to create file watcher: {}", e);
                self.inner.state().phase = WatchPhase::Stopped;
                return Err(e.into());
            }
        };

        if let Err(e) = fs_watcher.watch(&self.inner.root, RecursiveMode::NonRecursive) {
            tracing::warn!(
                "Failed to watch session store {}: {}",
                self.inner.root.display(),
                e
            );
        }

        let mut watched_projects = HashSet::new();
        watch_new_projects(&mut fs_watcher, &self.inner.root, &projects, &mut watched_projects);

        let pump = tokio::spawn(pump_events(Arc::downgrade(&self.inner), rx));

        let mut state = self.inner.state();
        if state.phase != WatchPhase::Starting {
            // stop() raced with startup
            pump.abort();
            return Ok(());
        }
        state.last_projects = Some(projects);
        state.fs_watcher = Some(fs_watcher);
        state.watched_projects = watched_projects;
        state.pump = Some(pump);
        state.phase = WatchPhase::Watching;

        tracing::info!("Claude sessions watcher started successfully");
        Ok(())
    }

    /// Stop watching. No debounced event is delivered after this returns.
    pub fn stop(&self) {
        let _gate = self
            .inner
            .dispatch_gate
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut state = self.inner.state();
        if state.phase == WatchPhase::Stopped {
            return;
        }

        tracing::info!("Stopping Claude sessions watcher");
        state.phase = WatchPhase::Stopped;

        if let Some(timer) = state.debounce.take() {
            timer.abort();
        }
        if let Some(pump) = state.pump.take() {
            pump.abort();
        }
        // Dropping the notify watcher releases its OS handles
        state.fs_watcher = None;
        state.watched_projects.clear();
    }

    /// Entry point for one raw filesystem notification.
    ///
    /// Names that are not session files are discarded; anything else
    /// (re)arms the debounce timer. Ignored unless the watcher is running.
    pub fn handle_fs_event(&self, filename: &str) {
        if !is_session_file(filename) {
            return;
        }

        let mut state = self.inner.state();
        if state.phase != WatchPhase::Watching {
            return;
        }

        if let Some(previous) = state.debounce.take() {
            previous.abort();
        }

        let weak = Arc::downgrade(&self.inner);
        let delay = self.inner.debounce;
        state.debounce = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                fire_debounced(inner).await;
            }
        }));
    }

    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&SessionChangeEvent) -> Result<()> + Send + Sync + 'static,
    {
        let id = ListenerId(self.inner.next_listener.fetch_add(1, Ordering::Relaxed));
        self.inner.listeners().insert(id, Arc::new(listener));
        id
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.listeners().remove(&id).is_some()
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners().len()
    }

    /// Last known snapshot, or a fresh scan if nothing has been scanned yet
    pub fn get_current_sessions(&self) -> Vec<ClaudeProject> {
        if let Some(projects) = self.inner.state().last_projects.clone() {
            return projects;
        }
        discover_projects(&self.inner.root)
    }

    /// Rescan immediately and emit a `refresh` event, bypassing debounce
    pub fn refresh(&self) -> SessionChangeEvent {
        let projects = discover_projects(&self.inner.root);
        self.inner.state().last_projects = Some(projects.clone());

        let event = SessionChangeEvent {
            kind: SessionChangeType::Refresh,
            projects,
            timestamp: now_millis(),
        };
        emit(&self.inner, &event);
        event
    }
}

/// Only content and namespace changes qualify. Opens and reads (including
/// our own rescans) and metadata-only changes are ignored.
fn is_content_change(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Any
            | EventKind::Create(_)
            | EventKind::Remove(_)
            | EventKind::Modify(ModifyKind::Data(_) | ModifyKind::Name(_) | ModifyKind::Any)
    )
}

fn watch_project(fs_watcher: &mut RecommendedWatcher, root: &Path, encoded: &str) -> bool {
    let dir = root.join(encoded);
    match fs_watcher.watch(&dir, RecursiveMode::NonRecursive) {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!("Failed to watch project directory {}: {}", dir.display(), e);
            false
        }
    }
}

/// Add a watch for every project not yet in `watched`; failures are skipped
fn watch_new_projects(
    fs_watcher: &mut RecommendedWatcher,
    root: &Path,
    projects: &[ClaudeProject],
    watched: &mut HashSet<String>,
) {
    for project in projects {
        if !watched.contains(&project.encoded_path)
            && watch_project(fs_watcher, root, &project.encoded_path)
        {
            watched.insert(project.encoded_path.clone());
        }
    }
}

async fn pump_events(inner: Weak<Inner>, mut rx: mpsc::UnboundedReceiver<String>) {
    while let Some(name) = rx.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        SessionsWatcher { inner }.handle_fs_event(&name);
    }
}

async fn fire_debounced(inner: Arc<Inner>) {
    let root = inner.root.clone();
    let projects = match tokio::task::spawn_blocking(move || discover_projects(&root)).await {
        Ok(projects) => projects,
        Err(e) => {
            tracing::warn!("Session store rescan failed: {}", e);
            return;
        }
    };
    dispatch_rescan(&inner, projects);
}

fn dispatch_rescan(inner: &Inner, projects: Vec<ClaudeProject>) {
    let _gate = inner
        .dispatch_gate
        .lock()
        .unwrap_or_else(PoisonError::into_inner);

    let event = {
        let mut state = inner.state();
        if state.phase != WatchPhase::Watching {
            return;
        }

        let previous = state.last_projects.as_deref().map(session_count).unwrap_or(0);
        let kind = SessionChangeType::classify(previous, session_count(&projects));

        // Projects created after start get their own watch
        let WatchState {
            fs_watcher,
            watched_projects,
            ..
        } = &mut *state;
        if let Some(fs_watcher) = fs_watcher.as_mut() {
            watch_new_projects(fs_watcher, &inner.root, &projects, watched_projects);
        }

        state.last_projects = Some(projects.clone());
        SessionChangeEvent {
            kind,
            projects,
            timestamp: now_millis(),
        }
    };

    emit(inner, &event);
}

/// Deliver to every listener; one failing listener never affects the others
fn emit(inner: &Inner, event: &SessionChangeEvent) {
    tracing::debug!(
        project_count = event.projects.len(),
        session_count = event.session_count(),
        "Emitting session change event: {}",
        event.kind.as_str()
    );

    let listeners: Vec<Listener> = inner.listeners().values().cloned().collect();
    for listener in listeners {
        isolate("session change listener", || listener(event));
    }
}
