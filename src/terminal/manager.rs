//! Terminal session lifecycle and output fan-out
//!
//! Each session owns one PTY process. Output is delivered to every attached
//! subscriber as it arrives, or parked in an [`OutputBuffer`] while nobody is
//! attached. Delivery happens with the session state locked, which keeps the
//! per-session byte order identical to what the PTY produced even when a
//! subscriber attaches mid-stream.

use super::buffer::OutputBuffer;
use super::pty::{EventSink, PtyEvent, PtyProcess, PtySpawner, SpawnRequest};
use super::shell::{build_environment, resolve_shell, validate_workdir};
use crate::config::TerminalConfig;
use crate::util::{isolate, now_millis};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Instant;
use tokio::task::JoinHandle;

pub const SESSION_ENDED_NOTICE: &str = "\r\n[Session ended. Create a new terminal.]\r\n";

pub const MIN_COLS: u16 = 10;
pub const MIN_ROWS: u16 = 2;

const LOGIN_ARGS: &[&str] = &["-l"];

/// Receives raw PTY bytes. Runs while the session is locked, so it must not
/// call back into the manager for the same session.
pub type Subscriber = Arc<dyn Fn(&[u8]) -> Result<()> + Send + Sync>;

struct SessionState {
    alive: bool,
    last_activity: Instant,
    subscribers: BTreeMap<u64, Subscriber>,
    next_subscriber: u64,
    buffer: OutputBuffer,
    has_had_subscriber: bool,
}

impl SessionState {
    fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    fn deliver(&self, data: &[u8]) {
        for subscriber in self.subscribers.values() {
            isolate("terminal subscriber", || subscriber(data));
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One live (or recently exited) PTY-backed shell
pub struct TerminalSession {
    id: String,
    workdir: PathBuf,
    created_at: DateTime<Utc>,
    pid: Option<u32>,
    process: Mutex<Box<dyn PtyProcess>>,
    state: Arc<Mutex<SessionState>>,
}

impl TerminalSession {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn is_alive(&self) -> bool {
        lock(&self.state).alive
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.state).subscribers.len()
    }

    pub fn has_had_subscriber(&self) -> bool {
        lock(&self.state).has_had_subscriber
    }

    /// Bytes currently parked for the next subscriber
    pub fn buffered_len(&self) -> usize {
        lock(&self.state).buffer.len()
    }

    fn touch(&self) {
        lock(&self.state).touch();
    }

    fn summary(&self) -> TerminalSummary {
        let state = lock(&self.state);
        let idle_ms = state.last_activity.elapsed().as_millis() as i64;
        TerminalSummary {
            id: self.id.clone(),
            workdir: self.workdir.to_string_lossy().to_string(),
            pid: self.pid,
            created_at: self.created_at.timestamp_millis(),
            last_activity: now_millis() - idle_ms,
            subscriber_count: state.subscribers.len(),
            alive: state.alive,
        }
    }
}

impl std::fmt::Debug for TerminalSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerminalSession")
            .field("id", &self.id)
            .field("workdir", &self.workdir)
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalSummary {
    pub id: String,
    pub workdir: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    pub created_at: i64,
    pub last_activity: i64,
    pub subscriber_count: usize,
    pub alive: bool,
}

/// Handle for one subscriber; dropping it leaves the subscriber attached
#[derive(Debug)]
pub struct Subscription {
    session_id: String,
    subscriber_id: u64,
    state: Weak<Mutex<SessionState>>,
}

impl Subscription {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn unsubscribe(self) {
        if let Some(state) = self.state.upgrade() {
            lock(&state).subscribers.remove(&self.subscriber_id);
            tracing::debug!(
                "[Terminal] Subscriber {} left {}",
                self.subscriber_id,
                self.session_id
            );
        }
    }
}

/// Owns every terminal session of the process
pub struct TerminalManager {
    spawner: Arc<dyn PtySpawner>,
    config: TerminalConfig,
    sessions: Mutex<HashMap<String, Arc<TerminalSession>>>,
}

impl TerminalManager {
    pub fn new(spawner: Arc<dyn PtySpawner>, config: TerminalConfig) -> Self {
        Self {
            spawner,
            config,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &TerminalConfig {
        &self.config
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<String, Arc<TerminalSession>>> {
        lock(&self.sessions)
    }

    fn lookup(&self, id: &str) -> Option<Arc<TerminalSession>> {
        self.sessions().get(id).cloned()
    }

    /// Create a session, or return the live one already registered under `id`
    pub fn create(&self, id: &str, workdir: &Path) -> Result<Arc<TerminalSession>> {
        let mut sessions = self.sessions();

        if let Some(existing) = sessions.get(id) {
            if existing.is_alive() {
                existing.touch();
                return Ok(existing.clone());
            }
            tracing::info!("[Terminal] Replacing exited session {}", id);
            sessions.remove(id);
        }

        let env_lookup = |key: &str| std::env::var(key).ok();
        let shell = resolve_shell(env_lookup);
        let cwd = validate_workdir(workdir, &self.config.fallback_workdir);
        let env = build_environment(&cwd, &shell, self.config.cols, self.config.rows, env_lookup);

        let state = Arc::new(Mutex::new(SessionState {
            alive: true,
            last_activity: Instant::now(),
            subscribers: BTreeMap::new(),
            next_subscriber: 0,
            buffer: OutputBuffer::new(self.config.max_buffer_bytes),
            has_had_subscriber: false,
        }));
        let sink = event_sink(id, &state);

        let mut request = SpawnRequest {
            program: shell,
            args: LOGIN_ARGS.iter().map(|a| a.to_string()).collect(),
            cwd,
            env,
            cols: self.config.cols,
            rows: self.config.rows,
        };

        tracing::info!(
            "[Terminal] Creating session {} with {} in {}",
            id,
            request.program.display(),
            request.cwd.display()
        );

        let process = match self.spawner.spawn(&request, sink.clone()) {
            Ok(process) => process,
            Err(e) => {
                tracing::warn!("[Terminal] Login shell failed for {}: {:#}, retrying", id, e);
                request.args.clear();
                self.spawner
                    .spawn(&request, sink)
                    .with_context(|| format!("Failed to create terminal {}", id))?
            }
        };

        let session = Arc::new(TerminalSession {
            id: id.to_string(),
            workdir: request.cwd,
            created_at: Utc::now(),
            pid: process.pid(),
            process: Mutex::new(process),
            state,
        });
        tracing::info!("[Terminal] Session {} started (pid {:?})", id, session.pid);

        sessions.insert(id.to_string(), session.clone());
        Ok(session)
    }

    /// Look up a session, counting the lookup as activity
    pub fn get(&self, id: &str) -> Option<Arc<TerminalSession>> {
        let session = self.lookup(id)?;
        session.touch();
        Some(session)
    }

    pub fn write(&self, id: &str, data: &[u8]) -> bool {
        let Some(session) = self.lookup(id) else {
            return false;
        };
        {
            let mut state = lock(&session.state);
            if !state.alive {
                return false;
            }
            state.touch();
        }

        let result = lock(&session.process).write(data);
        match result {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("[Terminal] Write to {} failed: {:#}", id, e);
                false
            }
        }
    }

    pub fn resize(&self, id: &str, cols: u16, rows: u16) -> bool {
        let Some(session) = self.lookup(id) else {
            return false;
        };
        if !session.is_alive() {
            return false;
        }

        let (cols, rows) = (cols.max(MIN_COLS), rows.max(MIN_ROWS));
        let result = lock(&session.process).resize(cols, rows);
        match result {
            Ok(()) => {
                tracing::debug!("[Terminal] Resized {} to {}x{}", id, cols, rows);
                true
            }
            Err(e) => {
                tracing::error!("[Terminal] Resize of {} failed: {:#}", id, e);
                false
            }
        }
    }

    /// Terminate a session and forget it immediately
    pub fn kill(&self, id: &str) -> bool {
        let Some(session) = self.sessions().remove(id) else {
            return false;
        };
        terminate(&session);
        tracing::info!("[Terminal] Killed session {}", id);
        true
    }

    /// Attach a subscriber.
    ///
    /// Output parked while nobody was attached goes to this subscriber only.
    /// A session that already ended answers with a one-line notice.
    pub fn subscribe<F>(&self, id: &str, callback: F) -> Option<Subscription>
    where
        F: Fn(&[u8]) -> Result<()> + Send + Sync + 'static,
    {
        let Some(session) = self.lookup(id) else {
            tracing::warn!("[Terminal] Subscribe to unknown session {}", id);
            return None;
        };
        let subscriber: Subscriber = Arc::new(callback);

        let mut state = lock(&session.state);
        let subscriber_id = state.next_subscriber;
        state.next_subscriber += 1;
        state.subscribers.insert(subscriber_id, subscriber.clone());
        state.touch();

        let backlog = state.buffer.take();
        if !backlog.is_empty() {
            tracing::debug!("[Terminal] Flushing {} buffered bytes to {}", backlog.len(), id);
            isolate("terminal subscriber", || subscriber(&backlog));
        }
        state.has_had_subscriber = true;

        if !state.alive {
            isolate("terminal subscriber", || {
                subscriber(SESSION_ENDED_NOTICE.as_bytes())
            });
        }

        Some(Subscription {
            session_id: id.to_string(),
            subscriber_id,
            state: Arc::downgrade(&session.state),
        })
    }

    pub fn list(&self) -> Vec<TerminalSummary> {
        let sessions: Vec<Arc<TerminalSession>> = self.sessions().values().cloned().collect();
        let mut summaries: Vec<TerminalSummary> = sessions.iter().map(|s| s.summary()).collect();
        summaries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        summaries
    }

    pub fn session_count(&self) -> usize {
        self.sessions().len()
    }

    /// Remove idle sessions and exited ones nobody is watching.
    ///
    /// Returns the number of sessions removed.
    pub fn sweep(&self) -> usize {
        let timeout = self.config.idle_timeout();
        let reaped: Vec<Arc<TerminalSession>> = {
            let mut sessions = self.sessions();
            let expired: Vec<String> = sessions
                .iter()
                .filter(|(_, session)| {
                    let state = lock(&session.state);
                    let idle = state.last_activity.elapsed() > timeout;
                    let abandoned = !state.alive && state.subscribers.is_empty();
                    idle || abandoned
                })
                .map(|(id, _)| id.clone())
                .collect();
            expired.iter().filter_map(|id| sessions.remove(id)).collect()
        };

        for session in &reaped {
            tracing::info!("[Terminal] Reaping session {}", session.id);
            terminate(session);
        }
        reaped.len()
    }

    /// Run [`sweep`](Self::sweep) on the configured interval until the
    /// manager is dropped
    pub fn start_reaper(self: &Arc<Self>) -> JoinHandle<()> {
        let manager = Arc::downgrade(self);
        let period = self.config.sweep_interval();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // First tick fires immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                let reaped = manager.sweep();
                if reaped > 0 {
                    tracing::info!("[Terminal] Sweep removed {} sessions", reaped);
                }
            }
        })
    }
}

/// Best-effort kill of a still-running session
fn terminate(session: &TerminalSession) {
    let was_alive = {
        let mut state = lock(&session.state);
        std::mem::replace(&mut state.alive, false)
    };
    if was_alive {
        if let Err(e) = lock(&session.process).kill() {
            tracing::debug!("[Terminal] Kill of {} ignored: {:#}", session.id, e);
        }
    }
}

fn event_sink(id: &str, state: &Arc<Mutex<SessionState>>) -> EventSink {
    let id = id.to_string();
    let state = Arc::clone(state);

    Arc::new(move |event: PtyEvent| {
        let mut state = lock(&state);
        match event {
            PtyEvent::Output(data) => {
                if !state.alive {
                    return;
                }
                state.touch();
                if state.subscribers.is_empty() {
                    state.buffer.push(&data);
                } else {
                    state.deliver(&data);
                }
            }
            PtyEvent::Exit(info) => {
                tracing::info!(
                    "[Terminal] Session {} exited (code {:?}, signal {:?})",
                    id,
                    info.code,
                    info.signal
                );
                state.alive = false;
                state.deliver(info.notice().as_bytes());
                state.subscribers.clear();
            }
        }
    })
}
