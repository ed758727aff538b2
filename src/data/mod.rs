use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

pub mod tool_call;

pub use tool_call::{ToolCallState, ToolTime};

/// Sentinel used when a process working directory cannot be resolved
pub const UNKNOWN_WORKDIR: &str = "unknown";

/// Display name used when the working directory is unknown
pub const UNKNOWN_PROJECT: &str = "Unknown Project";

/// One detected agent process (or configured remote server)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerDescriptor {
    pub id: String,
    pub pid: u32,
    /// Listening port, 0 for terminal-only processes
    pub port: u16,
    pub mode: ServerMode,
    pub workdir: String,
    pub project_name: String,
    pub status: ServerStatus,
    pub family: CliFamily,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_remote: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
}

impl ServerDescriptor {
    /// Composite id for a process with a listening socket
    pub fn listening_id(pid: u32, port: u16) -> String {
        format!("{}-{}", pid, port)
    }

    /// Synthetic id for a process without an HTTP endpoint
    pub fn terminal_id(pid: u32) -> String {
        format!("term-{}", pid)
    }

    /// Base URL collaborators should use to reach this server
    pub fn base_url(&self) -> String {
        let host = match (&self.remote_host, self.is_remote) {
            (Some(host), true) => host.as_str(),
            _ => "127.0.0.1",
        };
        format!("http://{}:{}", host, self.port)
    }

    pub fn has_endpoint(&self) -> bool {
        self.port != 0
    }
}

/// How the agent process is being run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServerMode {
    /// Attached to a controlling terminal
    Tui,
    /// Headless server
    Serve,
    /// Terminal session with no HTTP endpoint
    TerminalOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServerStatus {
    Healthy,
    Unhealthy,
    TerminalOnly,
}

impl ServerStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }
}

/// Which coding-agent CLI a process belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum CliFamily {
    #[default]
    Opencode,
    ClaudeCode,
    Other,
}

impl CliFamily {
    /// Infer the family from a binary name or command line fragment
    pub fn from_name(name: &str) -> Self {
        let lower = name.to_lowercase();
        if lower.contains("opencode") {
            Self::Opencode
        } else if lower.contains("claude") {
            Self::ClaudeCode
        } else {
            Self::Other
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Opencode => "OpenCode",
            Self::ClaudeCode => "Claude Code",
            Self::Other => "Agent",
        }
    }
}

/// Display name for a working directory: its basename, or a placeholder
pub fn project_name_for(workdir: &str) -> String {
    if workdir == UNKNOWN_WORKDIR {
        return UNKNOWN_PROJECT.to_string();
    }
    Path::new(workdir)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
        .map(|n| n.to_string())
        .unwrap_or_else(|| UNKNOWN_PROJECT.to_string())
}

/// Keep the first descriptor for each id, preserving order.
/// Returns how many were dropped.
pub fn dedupe_by_id(servers: &mut Vec<ServerDescriptor>) -> usize {
    let before = servers.len();
    let mut seen = HashSet::new();
    servers.retain(|s| seen.insert(s.id.clone()));
    before - servers.len()
}
