//! Test utilities and fixtures for helm tests
#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use helm::discovery::{ListeningSocket, ProcessInfo, ProcessInspector};
use helm::terminal::{EventSink, ExitInfo, PtyEvent, PtyProcess, PtySpawner, SpawnRequest};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

// ---------------------------------------------------------------------------
// Session store fixtures
// ---------------------------------------------------------------------------

/// One `sessions-index.json` entry
pub fn session_entry(session_id: &str, project_path: &str, prompt: &str, messages: u64) -> Value {
    json!({
        "sessionId": session_id,
        "projectPath": project_path,
        "firstPrompt": prompt,
        "messageCount": messages,
        "created": "2026-10-01T09:00:00Z",
        "modified": format!("2026-10-01T10:{:02}:00Z", messages % 60),
        "isSidechain": false
    })
}

/// Create a project directory `dir_name` with an index and one log per entry
pub fn write_project(root: &Path, dir_name: &str, entries: &[Value]) -> PathBuf {
    let dir = root.join(dir_name);
    fs::create_dir_all(&dir).unwrap();
    write_index(&dir, entries);
    for entry in entries {
        let id = entry["sessionId"].as_str().unwrap();
        fs::write(
            dir.join(format!("{}.jsonl", id)),
            "{\"type\":\"user\",\"message\":{\"content\":\"hi\"}}\n",
        )
        .unwrap();
    }
    dir
}

pub fn write_index(project_dir: &Path, entries: &[Value]) {
    let index = json!({ "version": 1, "entries": entries });
    fs::write(
        project_dir.join("sessions-index.json"),
        serde_json::to_string_pretty(&index).unwrap(),
    )
    .unwrap();
}

/// Two projects: `/home/dev/api` with 3 sessions, `/home/dev/web` with 2
pub fn five_session_store(root: &Path) {
    write_project(
        root,
        "-home-dev-api",
        &[
            session_entry("api-1", "/home/dev/api", "Add pagination", 12),
            session_entry("api-2", "/home/dev/api", "Fix auth bug", 4),
            session_entry("api-3", "/home/dev/api", "Write tests", 30),
        ],
    );
    write_project(
        root,
        "-home-dev-web",
        &[
            session_entry("web-1", "/home/dev/web", "Dark mode", 7),
            session_entry("web-2", "/home/dev/web", "Bump deps", 2),
        ],
    );
}

// ---------------------------------------------------------------------------
// Process inspection fake
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeInspector {
    pub sockets: Vec<ListeningSocket>,
    pub cwds: HashMap<u32, std::result::Result<Option<PathBuf>, String>>,
    pub ttys: HashMap<u32, Option<String>>,
    pub processes: Vec<ProcessInfo>,
    pub fail_sockets: bool,
    pub fail_processes: bool,
}

impl FakeInspector {
    pub fn socket(mut self, pid: u32, command: &str, port: u16) -> Self {
        self.sockets.push(ListeningSocket {
            pid,
            command: command.to_string(),
            port,
        });
        self
    }

    pub fn cwd(mut self, pid: u32, path: &str) -> Self {
        self.cwds.insert(pid, Ok(Some(PathBuf::from(path))));
        self
    }

    pub fn cwd_error(mut self, pid: u32, message: &str) -> Self {
        self.cwds.insert(pid, Err(message.to_string()));
        self
    }

    pub fn tty(mut self, pid: u32, tty: &str) -> Self {
        self.ttys.insert(pid, Some(tty.to_string()));
        self
    }

    pub fn process(mut self, pid: u32, tty: Option<&str>, command_line: &str) -> Self {
        self.processes.push(ProcessInfo {
            pid,
            tty: tty.map(str::to_string),
            command_line: command_line.to_string(),
            started_at: Some("Mon Oct 19 10:00:00 2026".to_string()),
        });
        self
    }
}

#[async_trait]
impl ProcessInspector for FakeInspector {
    async fn list_listening_processes(&self) -> Result<Vec<ListeningSocket>> {
        if self.fail_sockets {
            anyhow::bail!("lsof not installed");
        }
        Ok(self.sockets.clone())
    }

    async fn working_directory(&self, pid: u32) -> Result<Option<PathBuf>> {
        match self.cwds.get(&pid) {
            Some(Ok(path)) => Ok(path.clone()),
            Some(Err(message)) => anyhow::bail!("{}", message),
            None => Ok(None),
        }
    }

    async fn controlling_terminal(&self, pid: u32) -> Result<Option<String>> {
        Ok(self.ttys.get(&pid).cloned().flatten())
    }

    async fn list_terminal_processes(&self) -> Result<Vec<ProcessInfo>> {
        if self.fail_processes {
            anyhow::bail!("ps failed");
        }
        Ok(self.processes.clone())
    }
}

// ---------------------------------------------------------------------------
// PTY fake
// ---------------------------------------------------------------------------

/// What the fake remembers about one spawned PTY
pub struct FakeHandle {
    pub request: SpawnRequest,
    sink: EventSink,
    pub writes: Arc<Mutex<Vec<u8>>>,
    pub resizes: Arc<Mutex<Vec<(u16, u16)>>>,
    pub killed: Arc<AtomicBool>,
}

impl FakeHandle {
    /// Simulate the shell printing something
    pub fn emit(&self, data: &[u8]) {
        (self.sink)(PtyEvent::Output(data.to_vec()));
    }

    /// Simulate the shell exiting on its own
    pub fn exit(&self, code: u32) {
        (self.sink)(PtyEvent::Exit(ExitInfo {
            code: Some(code),
            signal: None,
        }));
    }

    pub fn written(&self) -> Vec<u8> {
        self.writes.lock().unwrap().clone()
    }

    pub fn resized(&self) -> Vec<(u16, u16)> {
        self.resizes.lock().unwrap().clone()
    }

    pub fn was_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }
}

struct FakePty {
    pid: u32,
    echo: bool,
    sink: EventSink,
    writes: Arc<Mutex<Vec<u8>>>,
    resizes: Arc<Mutex<Vec<(u16, u16)>>>,
    killed: Arc<AtomicBool>,
}

impl PtyProcess for FakePty {
    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.writes.lock().unwrap().extend_from_slice(data);
        if self.echo {
            (self.sink)(PtyEvent::Output(data.to_vec()));
        }
        Ok(())
    }

    fn resize(&mut self, cols: u16, rows: u16) -> Result<()> {
        self.resizes.lock().unwrap().push((cols, rows));
        Ok(())
    }

    fn kill(&mut self) -> Result<()> {
        if self.killed.swap(true, Ordering::SeqCst) {
            anyhow::bail!("process already exited");
        }
        Ok(())
    }
}

/// In-memory PTY spawner. Optionally echoes writes back as output (like a
/// terminal in cooked mode) and can be told to fail the first N spawns.
#[derive(Default)]
pub struct FakePtySpawner {
    echo: bool,
    failures_left: AtomicUsize,
    next_pid: AtomicU32,
    attempts: Mutex<Vec<SpawnRequest>>,
    handles: Mutex<Vec<Arc<FakeHandle>>>,
}

impl FakePtySpawner {
    pub fn new() -> Self {
        Self {
            next_pid: AtomicU32::new(7000),
            ..Self::default()
        }
    }

    pub fn echoing() -> Self {
        Self {
            echo: true,
            ..Self::new()
        }
    }

    pub fn failing(times: usize) -> Self {
        let spawner = Self::new();
        spawner.failures_left.store(times, Ordering::SeqCst);
        spawner
    }

    pub fn spawn_count(&self) -> usize {
        self.handles.lock().unwrap().len()
    }

    pub fn attempts(&self) -> Vec<SpawnRequest> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn handle(&self, index: usize) -> Arc<FakeHandle> {
        self.handles.lock().unwrap()[index].clone()
    }

    pub fn last(&self) -> Arc<FakeHandle> {
        self.handles.lock().unwrap().last().cloned().unwrap()
    }
}

impl PtySpawner for FakePtySpawner {
    fn spawn(&self, request: &SpawnRequest, events: EventSink) -> Result<Box<dyn PtyProcess>> {
        self.attempts.lock().unwrap().push(request.clone());

        let fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            anyhow::bail!("posix_spawnp failed");
        }

        let handle = Arc::new(FakeHandle {
            request: request.clone(),
            sink: events.clone(),
            writes: Arc::new(Mutex::new(Vec::new())),
            resizes: Arc::new(Mutex::new(Vec::new())),
            killed: Arc::new(AtomicBool::new(false)),
        });
        self.handles.lock().unwrap().push(handle.clone());

        Ok(Box::new(FakePty {
            pid: self.next_pid.fetch_add(1, Ordering::SeqCst),
            echo: self.echo,
            sink: events,
            writes: handle.writes.clone(),
            resizes: handle.resizes.clone(),
            killed: handle.killed.clone(),
        }))
    }
}

/// Subscriber that appends everything it receives to a shared buffer
pub fn collector() -> (
    Arc<Mutex<Vec<u8>>>,
    impl Fn(&[u8]) -> Result<()> + Send + Sync + 'static,
) {
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    (received, move |data: &[u8]| {
        sink.lock().unwrap().extend_from_slice(data);
        Ok(())
    })
}

// ---------------------------------------------------------------------------
// HTTP stub
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct StubRoute {
    pub path: &'static str,
    pub status: u16,
    pub body: String,
    /// Accept the request but never answer
    pub hang: bool,
}

impl StubRoute {
    pub fn status(path: &'static str, status: u16) -> Self {
        Self {
            path,
            status,
            body: String::new(),
            hang: false,
        }
    }

    pub fn json(path: &'static str, body: Value) -> Self {
        Self {
            path,
            status: 200,
            body: body.to_string(),
            hang: false,
        }
    }

    pub fn hang(path: &'static str) -> Self {
        Self {
            path,
            status: 200,
            body: String::new(),
            hang: true,
        }
    }
}

/// Minimal HTTP/1.1 server on an ephemeral port; unknown paths get 404
pub struct HttpStub {
    pub port: u16,
    task: JoinHandle<()>,
}

impl Drop for HttpStub {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub async fn http_stub(routes: Vec<StubRoute>) -> HttpStub {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let routes = Arc::new(routes);

    let task = tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            let routes = routes.clone();
            tokio::spawn(async move {
                let mut buf = vec![0u8; 4096];
                let mut read = 0;
                while !buf[..read].windows(4).any(|w| w == b"\r\n\r\n") {
                    match stream.read(&mut buf[read..]).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => read += n,
                    }
                    if read == buf.len() {
                        break;
                    }
                }

                let request = String::from_utf8_lossy(&buf[..read]);
                let path = request.split_whitespace().nth(1).unwrap_or("/").to_string();
                let route = routes.iter().find(|r| r.path == path).cloned();

                let (status, body) = match route {
                    Some(r) if r.hang => {
                        tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
                        return;
                    }
                    Some(r) => (r.status, r.body),
                    None => (404, String::new()),
                };

                let response = format!(
                    "HTTP/1.1 {} Stub\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    });

    HttpStub { port, task }
}

/// A port nothing is listening on
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}
