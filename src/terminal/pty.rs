//! Pseudo-terminal spawning
//!
//! `PtySpawner` is the seam between the session manager and the OS. The
//! native implementation uses portable-pty and forwards output from a
//! dedicated reader thread, so chunks arrive in exactly the order the PTY
//! produced them, followed by a single exit event.

use anyhow::{Context, Result};
use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, MasterPty, PtySize};
use std::io::{ErrorKind, Read, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

const READ_CHUNK: usize = 8192;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnRequest {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: Vec<(String, String)>,
    pub cols: u16,
    pub rows: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExitInfo {
    pub code: Option<u32>,
    pub signal: Option<String>,
}

impl ExitInfo {
    /// Line shown to attached viewers when the process ends
    pub fn notice(&self) -> String {
        let mut text = match self.code {
            Some(code) => format!("\r\n[Process exited with code {}", code),
            None => "\r\n[Process exited".to_string(),
        };
        if let Some(signal) = &self.signal {
            text.push_str(&format!(", signal {}", signal));
        }
        text.push_str("]\r\n");
        text
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PtyEvent {
    Output(Vec<u8>),
    Exit(ExitInfo),
}

/// Receives every event of one PTY, from whatever thread produces it
pub type EventSink = Arc<dyn Fn(PtyEvent) + Send + Sync>;

pub trait PtyProcess: Send {
    fn pid(&self) -> Option<u32>;
    fn write(&mut self, data: &[u8]) -> Result<()>;
    fn resize(&mut self, cols: u16, rows: u16) -> Result<()>;
    fn kill(&mut self) -> Result<()>;
}

pub trait PtySpawner: Send + Sync {
    fn spawn(&self, request: &SpawnRequest, events: EventSink) -> Result<Box<dyn PtyProcess>>;
}

/// Spawns real PTYs through portable-pty
#[derive(Debug, Default, Clone, Copy)]
pub struct NativePtySpawner;

struct NativePty {
    master: Box<dyn MasterPty + Send>,
    writer: Box<dyn Write + Send>,
    killer: Box<dyn ChildKiller + Send + Sync>,
    pid: Option<u32>,
}

impl PtySpawner for NativePtySpawner {
    fn spawn(&self, request: &SpawnRequest, events: EventSink) -> Result<Box<dyn PtyProcess>> {
        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: request.rows,
                cols: request.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .context("Failed to open pty")?;

        let mut cmd = CommandBuilder::new(&request.program);
        cmd.args(&request.args);
        cmd.cwd(&request.cwd);
        cmd.env_clear();
        for (key, value) in &request.env {
            cmd.env(key, value);
        }

        let mut child = pair
            .slave
            .spawn_command(cmd)
            .with_context(|| format!("Failed to spawn {}", request.program.display()))?;
        // The master only sees EOF once every slave handle is closed
        drop(pair.slave);

        let pid = child.process_id();
        let killer = child.clone_killer();
        let mut reader = pair.master.try_clone_reader()?;
        let writer = pair.master.take_writer()?;

        thread::Builder::new()
            .name(format!("pty-reader-{}", pid.unwrap_or_default()))
            .spawn(move || {
                let mut buf = [0u8; READ_CHUNK];
                loop {
                    match reader.read(&mut buf) {
                        Ok(0) => break,
                        Ok(n) => events(PtyEvent::Output(buf[..n].to_vec())),
                        Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                        // EIO once the child side is gone
                        Err(_) => break,
                    }
                }

                let exit = match child.wait() {
                    Ok(status) => ExitInfo {
                        code: Some(status.exit_code()),
                        signal: status.signal().map(str::to_string),
                    },
                    Err(e) => {
                        tracing::warn!("[Terminal] Failed to reap pty child: {}", e);
                        ExitInfo::default()
                    }
                };
                events(PtyEvent::Exit(exit));
            })
            .context("Failed to start pty reader thread")?;

        Ok(Box::new(NativePty {
            master: pair.master,
            writer,
            killer,
            pid,
        }))
    }
}

impl PtyProcess for NativePty {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.writer.write_all(data)?;
        self.writer.flush()?;
        Ok(())
    }

    fn resize(&mut self, cols: u16, rows: u16) -> Result<()> {
        self.master.resize(PtySize {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        })
    }

    fn kill(&mut self) -> Result<()> {
        self.killer.kill()?;
        Ok(())
    }
}
