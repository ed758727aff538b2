//! Reader for the Claude Code session store
//!
//! Directory structure:
//! ```text
//! ~/.claude/projects/
//! ├── -home-user-project/          # Folder name = path with / → -
//! │   ├── sessions-index.json      # Manifest of known sessions
//! │   └── {sessionId}.jsonl        # Session message log
//! └── ...
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::Path;

/// Per-project manifest file name
pub const SESSION_INDEX_FILE: &str = "sessions-index.json";

/// Extension of per-session message logs
pub const SESSION_LOG_EXTENSION: &str = ".jsonl";

const UNTITLED_SESSION: &str = "Untitled Session";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaudeSession {
    pub session_id: String,
    pub project_path: String,
    pub first_prompt: String,
    pub message_count: u64,
    pub created: Option<String>,
    pub modified: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_branch: Option<String>,
    pub is_sidechain: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaudeProject {
    /// Directory name inside the store, e.g. `-home-user-project`
    pub encoded_path: String,
    pub project_path: String,
    pub sessions: Vec<ClaudeSession>,
}

/// Raw manifest. Entries are decoded one by one so a single bad entry
/// does not hide the rest of the project.
#[derive(Debug, Deserialize)]
struct SessionIndex {
    #[serde(default)]
    entries: Option<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexEntry {
    session_id: String,
    project_path: Option<String>,
    first_prompt: Option<String>,
    message_count: Option<u64>,
    created: Option<String>,
    modified: Option<String>,
    git_branch: Option<String>,
    is_sidechain: Option<bool>,
}

/// Session as presented to API consumers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: String,
    pub title: String,
    pub directory: String,
    pub created_at: Option<i64>,
    pub updated_at: Option<i64>,
    #[serde(flatten)]
    pub session: ClaudeSession,
}

/// `/home/user/project` → `-home-user-project`
pub fn encode_project_path(path: &str) -> String {
    path.replace('/', "-")
}

/// Best-effort inverse of [`encode_project_path`] (lossy for paths with dashes)
pub fn decode_project_dir(name: &str) -> String {
    name.strip_prefix('-')
        .map(|rest| format!("/{}", rest.replace('-', "/")))
        .unwrap_or_else(|| name.to_string())
}

/// Whether a changed file name belongs to the session store
pub fn is_session_file(filename: &str) -> bool {
    filename.ends_with(SESSION_INDEX_FILE) || filename.ends_with(SESSION_LOG_EXTENSION)
}

/// Scan every project directory under `root`.
///
/// A missing root yields an empty list. Projects whose index is missing or
/// malformed are logged and skipped.
pub fn discover_projects(root: &Path) -> Vec<ClaudeProject> {
    let entries = match fs::read_dir(root) {
        Ok(e) => e,
        Err(e) => {
            tracing::debug!("Failed to read session store {}: {}", root.display(), e);
            return Vec::new();
        }
    };

    let mut projects = Vec::new();

    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !name.starts_with('-') {
            continue;
        }

        match load_project(&path, name) {
            Ok(Some(project)) => projects.push(project),
            Ok(None) => {}
            Err(e) => tracing::warn!("Failed to read Claude sessions for {}: {:#}", name, e),
        }
    }

    // read_dir order is platform dependent
    projects.sort_by(|a, b| a.encoded_path.cmp(&b.encoded_path));
    projects
}

fn load_project(dir: &Path, encoded: &str) -> Result<Option<ClaudeProject>> {
    let index_path = dir.join(SESSION_INDEX_FILE);
    let content = fs::read_to_string(&index_path)
        .with_context(|| format!("reading {}", index_path.display()))?;
    let index: SessionIndex = serde_json::from_str(&content)
        .with_context(|| format!("parsing {}", index_path.display()))?;

    let Some(raw_entries) = index.entries else {
        return Ok(None);
    };

    let entries: Vec<IndexEntry> = raw_entries
        .into_iter()
        .enumerate()
        .filter_map(|(i, raw)| match serde_json::from_value(raw) {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::warn!("Skipping entry {} of {}: {}", i, index_path.display(), e);
                None
            }
        })
        .collect();

    let project_path = entries
        .first()
        .and_then(|e| e.project_path.clone())
        .unwrap_or_else(|| decode_project_dir(encoded));

    let sessions = entries
        .into_iter()
        .map(|entry| ClaudeSession {
            session_id: entry.session_id,
            project_path: entry.project_path.unwrap_or_else(|| project_path.clone()),
            first_prompt: entry
                .first_prompt
                .filter(|p| !p.is_empty())
                .unwrap_or_else(|| UNTITLED_SESSION.to_string()),
            message_count: entry.message_count.unwrap_or(0),
            created: entry.created,
            modified: entry.modified,
            git_branch: entry.git_branch,
            is_sidechain: entry.is_sidechain.unwrap_or(false),
        })
        .collect();

    Ok(Some(ClaudeProject {
        encoded_path: encoded.to_string(),
        project_path,
        sessions,
    }))
}

/// Total number of sessions across all projects
pub fn session_count(projects: &[ClaudeProject]) -> usize {
    projects.iter().map(|p| p.sessions.len()).sum()
}

/// Flatten projects into one list, most recently modified first
pub fn flatten_sessions(projects: &[ClaudeProject]) -> Vec<SessionSummary> {
    let mut all: Vec<SessionSummary> = projects
        .iter()
        .flat_map(|p| p.sessions.iter())
        .map(|s| SessionSummary {
            id: s.session_id.clone(),
            title: s.first_prompt.clone(),
            directory: s.project_path.clone(),
            created_at: s.created.as_deref().and_then(parse_millis),
            updated_at: s.modified.as_deref().and_then(parse_millis),
            session: s.clone(),
        })
        .collect();

    all.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    all
}

fn parse_millis(ts: &str) -> Option<i64> {
    chrono::DateTime::parse_from_rfc3339(ts)
        .ok()
        .map(|dt| dt.timestamp_millis())
}

/// Read every parseable line of a session log.
///
/// Malformed lines are skipped; a missing log yields an empty list.
pub fn read_session_messages(root: &Path, project_path: &str, session_id: &str) -> Vec<Value> {
    let file = root
        .join(encode_project_path(project_path))
        .join(format!("{}{}", session_id, SESSION_LOG_EXTENSION));

    let content = match fs::read_to_string(&file) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Failed to read Claude session {}: {}", session_id, e);
            return Vec::new();
        }
    };

    content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|l| serde_json::from_str(l).ok())
        .collect()
}
