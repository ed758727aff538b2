//! Point-in-time discovery of local agent processes
//!
//! Two passes over the OS state:
//! 1. listening sockets owned by agent binaries (servers and TUIs with an
//!    embedded server), enriched with cwd, tty and a health probe
//! 2. terminal-attached agent processes with no socket at all
//!
//! Each per-process lookup degrades to a default on failure; nothing here
//! aborts a scan.

use super::classify::{terminal_label, DefaultClassifier, ProcessClassifier, TerminalCandidate};
use super::health::HealthProber;
use super::platform::{ListeningSocket, ProcessInfo, ProcessInspector, ShellInspector};
use crate::config::DiscoveryConfig;
use crate::data::{
    dedupe_by_id, project_name_for, CliFamily, ServerDescriptor, ServerMode, ServerStatus,
    UNKNOWN_WORKDIR,
};
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;

/// Candidates enriched at once
const ENRICH_CONCURRENCY: usize = 8;

pub struct Scanner {
    inspector: Arc<dyn ProcessInspector>,
    classifier: Arc<dyn ProcessClassifier>,
    prober: HealthProber,
    /// Ports this process itself listens on
    reserved_ports: Vec<u16>,
}

impl Scanner {
    pub fn new(
        inspector: Arc<dyn ProcessInspector>,
        classifier: Arc<dyn ProcessClassifier>,
        prober: HealthProber,
        config: &DiscoveryConfig,
    ) -> Self {
        Self {
            inspector,
            classifier,
            prober,
            reserved_ports: vec![config.http_port, config.internal_port],
        }
    }

    /// Scanner backed by `lsof`/`ps` and the default heuristics
    pub fn from_config(config: &DiscoveryConfig) -> Self {
        Self::new(
            Arc::new(ShellInspector),
            Arc::new(DefaultClassifier::new(&config.binary_patterns)),
            HealthProber::new(config.probe_timeout()),
            config,
        )
    }

    /// Listening servers ordered by port, then terminal-only sessions by pid
    pub async fn scan(&self) -> Vec<ServerDescriptor> {
        let candidates = self.listening_candidates().await;

        let mut servers: Vec<ServerDescriptor> = stream::iter(candidates)
            .map(|(socket, family)| self.describe_listening(socket, family))
            .buffer_unordered(ENRICH_CONCURRENCY)
            .collect()
            .await;
        servers.sort_by_key(|s| (s.port, s.pid));

        let claimed: HashSet<u32> = servers.iter().map(|s| s.pid).collect();
        let mut terminals = self.terminal_only(&claimed).await;
        terminals.sort_by_key(|s| s.pid);
        servers.extend(terminals);

        dedupe_by_id(&mut servers);

        tracing::debug!("Scan found {} agent processes", servers.len());
        servers
    }

    async fn listening_candidates(&self) -> Vec<(ListeningSocket, CliFamily)> {
        let sockets = match self.inspector.list_listening_processes().await {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!("Listening socket enumeration failed: {:#}", e);
                return Vec::new();
            }
        };

        let mut ports = HashSet::new();
        sockets
            .into_iter()
            .filter(|s| !self.reserved_ports.contains(&s.port))
            .filter_map(|s| {
                let family = self.classifier.matches_listening(&s.command)?;
                Some((s, family))
            })
            .filter(|(s, _)| ports.insert(s.port))
            .collect()
    }

    async fn describe_listening(&self, socket: ListeningSocket, family: CliFamily) -> ServerDescriptor {
        let pid = socket.pid;
        let (workdir, tty, status) = tokio::join!(
            self.workdir_of(pid),
            self.inspector.controlling_terminal(pid),
            self.prober.probe(socket.port),
        );

        let mode = match tty {
            Ok(Some(_)) => ServerMode::Tui,
            Ok(None) => ServerMode::Serve,
            Err(e) => {
                tracing::debug!("tty lookup for pid {} failed: {:#}", pid, e);
                ServerMode::Serve
            }
        };

        ServerDescriptor {
            id: ServerDescriptor::listening_id(pid, socket.port),
            pid,
            port: socket.port,
            mode,
            project_name: project_name_for(&workdir),
            workdir,
            status,
            family,
            is_remote: false,
            remote_host: None,
            started_at: None,
        }
    }

    async fn terminal_only(&self, claimed: &HashSet<u32>) -> Vec<ServerDescriptor> {
        let processes = match self.inspector.list_terminal_processes().await {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!("Process table enumeration failed: {:#}", e);
                return Vec::new();
            }
        };

        let own_pid = std::process::id();
        let candidates: Vec<(ProcessInfo, String, TerminalCandidate)> = processes
            .into_iter()
            .filter(|p| p.pid != own_pid && !claimed.contains(&p.pid))
            .filter_map(|p| {
                // Backgrounded or orphaned: nobody is looking at it
                let tty = p.tty.clone()?;
                let candidate = self.classifier.classify_terminal(&p.command_line)?;
                Some((p, tty, candidate))
            })
            .collect();

        stream::iter(candidates)
            .map(|(process, tty, candidate)| self.describe_terminal(process, tty, candidate))
            .buffer_unordered(ENRICH_CONCURRENCY)
            .collect()
            .await
    }

    async fn describe_terminal(
        &self,
        process: ProcessInfo,
        tty: String,
        candidate: TerminalCandidate,
    ) -> ServerDescriptor {
        let workdir = match candidate.remote_host {
            Some(_) => UNKNOWN_WORKDIR.to_string(),
            None => self.workdir_of(process.pid).await,
        };

        ServerDescriptor {
            id: ServerDescriptor::terminal_id(process.pid),
            pid: process.pid,
            port: 0,
            mode: ServerMode::TerminalOnly,
            project_name: terminal_label(candidate.remote_host.as_deref(), &workdir, &tty),
            workdir,
            status: ServerStatus::TerminalOnly,
            family: candidate.family,
            is_remote: candidate.remote_host.is_some(),
            remote_host: candidate.remote_host,
            started_at: process.started_at,
        }
    }

    async fn workdir_of(&self, pid: u32) -> String {
        match self.inspector.working_directory(pid).await {
            Ok(Some(path)) => path.to_string_lossy().to_string(),
            Ok(None) => UNKNOWN_WORKDIR.to_string(),
            Err(e) => {
                tracing::warn!("Failed to get cwd for pid {}: {:#}", pid, e);
                UNKNOWN_WORKDIR.to_string()
            }
        }
    }
}
