//! OS process and socket introspection
//!
//! [`ProcessInspector`] is the narrow interface the scanner needs. The
//! default [`ShellInspector`] shells out to `lsof` and `ps`, which exist on
//! both macOS and Linux; output parsing is kept in pure functions.

use anyhow::{Context, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::PathBuf;
use tokio::process::Command;

static PORT_SUFFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r":(\d+)$").expect("valid regex"));

/// Minimum whitespace-separated columns of an `lsof` socket line
const LSOF_MIN_COLUMNS: usize = 9;

/// `lstart` prints e.g. `Mon Oct 19 10:00:00 2026`
const LSTART_TOKENS: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListeningSocket {
    pub pid: u32,
    /// Process image name as reported by lsof (may be truncated)
    pub command: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub tty: Option<String>,
    pub command_line: String,
    pub started_at: Option<String>,
}

#[async_trait]
pub trait ProcessInspector: Send + Sync {
    /// Every process holding a listening TCP socket
    async fn list_listening_processes(&self) -> Result<Vec<ListeningSocket>>;

    async fn working_directory(&self, pid: u32) -> Result<Option<PathBuf>>;

    /// Controlling terminal name, `None` for daemons and orphans
    async fn controlling_terminal(&self, pid: u32) -> Result<Option<String>>;

    /// Full process table with terminals and command lines
    async fn list_terminal_processes(&self) -> Result<Vec<ProcessInfo>>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ShellInspector;

impl ShellInspector {
    async fn run(program: &str, args: &[&str]) -> Result<std::process::Output> {
        Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to run {}", program))
    }
}

#[async_trait]
impl ProcessInspector for ShellInspector {
    async fn list_listening_processes(&self) -> Result<Vec<ListeningSocket>> {
        let output = Self::run("lsof", &["-iTCP", "-sTCP:LISTEN", "-n", "-P"]).await?;
        // lsof exits 1 when nothing matches
        if !output.status.success() && output.stdout.is_empty() {
            return Ok(Vec::new());
        }
        Ok(parse_listening_sockets(&String::from_utf8_lossy(&output.stdout)))
    }

    async fn working_directory(&self, pid: u32) -> Result<Option<PathBuf>> {
        let pid = pid.to_string();
        let output = Self::run("lsof", &["-a", "-p", &pid, "-d", "cwd", "-Fn"]).await?;
        Ok(parse_cwd_field(&String::from_utf8_lossy(&output.stdout)))
    }

    async fn controlling_terminal(&self, pid: u32) -> Result<Option<String>> {
        let pid = pid.to_string();
        let output = Self::run("ps", &["-p", &pid, "-o", "tty="]).await?;
        if !output.status.success() {
            anyhow::bail!("ps exited with {} for pid {}", output.status, pid);
        }
        Ok(normalize_tty(&String::from_utf8_lossy(&output.stdout)))
    }

    async fn list_terminal_processes(&self) -> Result<Vec<ProcessInfo>> {
        let output = Self::run("ps", &["-axo", "pid=,tty=,lstart=,command="]).await?;
        if !output.status.success() {
            anyhow::bail!("ps exited with {}", output.status);
        }
        Ok(parse_process_table(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Parse `lsof -iTCP -sTCP:LISTEN -n -P` output.
///
/// The address column is second to last (the last is `(LISTEN)`).
pub fn parse_listening_sockets(output: &str) -> Vec<ListeningSocket> {
    output
        .lines()
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < LSOF_MIN_COLUMNS {
                return None;
            }
            let pid = parts[1].parse().ok()?;
            let address = parts[parts.len() - 2];
            let port = PORT_SUFFIX.captures(address)?.get(1)?.as_str().parse().ok()?;
            Some(ListeningSocket {
                pid,
                command: parts[0].to_string(),
                port,
            })
        })
        .collect()
}

/// Pick the path out of `lsof -Fn` field output
pub fn parse_cwd_field(output: &str) -> Option<PathBuf> {
    output
        .lines()
        .filter_map(|l| l.strip_prefix('n'))
        .find(|p| p.starts_with('/'))
        .map(PathBuf::from)
}

/// `?` and `??` mean no controlling terminal
pub fn normalize_tty(raw: &str) -> Option<String> {
    let tty = raw.trim();
    match tty {
        "" | "?" | "??" => None,
        other => Some(other.to_string()),
    }
}

/// Parse `ps -axo pid=,tty=,lstart=,command=` output
pub fn parse_process_table(output: &str) -> Vec<ProcessInfo> {
    output
        .lines()
        .filter_map(|line| {
            let mut tokens = line.split_whitespace();
            let pid = tokens.next()?.parse().ok()?;
            let tty = normalize_tty(tokens.next()?);
            let lstart: Vec<&str> = tokens.by_ref().take(LSTART_TOKENS).collect();
            if lstart.len() < LSTART_TOKENS {
                return None;
            }
            let command_line = tokens.collect::<Vec<_>>().join(" ");
            if command_line.is_empty() {
                return None;
            }
            Some(ProcessInfo {
                pid,
                tty,
                command_line,
                started_at: Some(lstart.join(" ")),
            })
        })
        .collect()
}
