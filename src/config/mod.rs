use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub terminal: TerminalConfig,
    #[serde(default)]
    pub remote_servers: Vec<RemoteServerConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Port of our own HTTP surface, never reported as an agent
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// Internal coordination port, never reported as an agent
    #[serde(default = "default_internal_port")]
    pub internal_port: u16,
    #[serde(default = "default_cache_ttl_ms")]
    pub cache_ttl_ms: u64,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    #[serde(default = "default_remote_probe_timeout_ms")]
    pub remote_probe_timeout_ms: u64,
    /// Case-insensitive fragments of agent binary names
    #[serde(default = "default_binary_patterns")]
    pub binary_patterns: Vec<String>,
}

fn default_http_port() -> u16 {
    5001
}

fn default_internal_port() -> u16 {
    5551
}

fn default_cache_ttl_ms() -> u64 {
    5000
}

fn default_probe_timeout_ms() -> u64 {
    2000
}

fn default_remote_probe_timeout_ms() -> u64 {
    3000
}

fn default_binary_patterns() -> Vec<String> {
    vec!["opencode".to_string(), "claude".to_string()]
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            http_port: default_http_port(),
            internal_port: default_internal_port(),
            cache_ttl_ms: default_cache_ttl_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
            remote_probe_timeout_ms: default_remote_probe_timeout_ms(),
            binary_patterns: default_binary_patterns(),
        }
    }
}

impl DiscoveryConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn remote_probe_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_probe_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    #[serde(default = "default_projects_dir")]
    pub projects_dir: PathBuf,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

/// `~/.claude/projects`, where Claude Code keeps per-project session files
pub fn default_projects_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".claude").join("projects"))
        .unwrap_or_else(|| PathBuf::from("/tmp/.claude/projects"))
}

fn default_debounce_ms() -> u64 {
    500
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            projects_dir: default_projects_dir(),
            debounce_ms: default_debounce_ms(),
        }
    }
}

impl SessionsConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalConfig {
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Budget, in bytes of raw PTY output, for output produced while
    /// nobody is attached
    #[serde(default = "default_max_buffer_bytes", alias = "max_buffer_chars")]
    pub max_buffer_bytes: usize,
    #[serde(default = "default_fallback_workdir")]
    pub fallback_workdir: PathBuf,
    #[serde(default = "default_cols")]
    pub cols: u16,
    #[serde(default = "default_rows")]
    pub rows: u16,
}

fn default_idle_timeout_secs() -> u64 {
    30 * 60
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_max_buffer_bytes() -> usize {
    50_000
}

fn default_fallback_workdir() -> PathBuf {
    PathBuf::from("/tmp")
}

fn default_cols() -> u16 {
    80
}

fn default_rows() -> u16 {
    24
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_idle_timeout_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            max_buffer_bytes: default_max_buffer_bytes(),
            fallback_workdir: default_fallback_workdir(),
            cols: default_cols(),
            rows: default_rows(),
        }
    }
}

impl TerminalConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// An always-on agent server on another host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteServerConfig {
    pub id: u32,
    pub name: String,
    pub host: String,
    #[serde(default = "default_remote_port")]
    pub port: u16,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_remote_port() -> u16 {
    60828
}

fn default_true() -> bool {
    true
}

pub fn config_dir() -> Result<PathBuf> {
    let dir = directories::ProjectDirs::from("", "", "helm")
        .context("Could not determine config directory")?
        .config_dir()
        .to_path_buf();
    Ok(dir)
}

pub fn default_config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.toml"))
}

/// Load configuration, then apply environment overrides.
///
/// An explicitly requested file must exist; a missing default file yields
/// the built-in defaults.
pub fn load(path: Option<&Path>) -> Result<Config> {
    let mut config = match path {
        Some(p) => {
            if !p.exists() {
                anyhow::bail!("Config file not found at {}", p.display());
            }
            read_file(p)?
        }
        None => match default_config_path() {
            Ok(p) if p.exists() => read_file(&p)?,
            _ => Config::default(),
        },
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

fn read_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config from {}", path.display()))?;

    parse(&content).with_context(|| format!("Failed to parse config from {}", path.display()))
}

pub fn parse(content: &str) -> Result<Config> {
    Ok(toml::from_str(content)?)
}

/// Apply `PORT`, `OPENCODE_SERVER_PORT` and `HELM_CLAUDE_PROJECTS_DIR`.
///
/// Unparseable port values are ignored with a warning.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup("PORT") {
        match value.trim().parse() {
            Ok(port) => config.discovery.http_port = port,
            Err(e) => tracing::warn!("Ignoring invalid PORT {:?}: {}", value, e),
        }
    }

    if let Some(value) = lookup("OPENCODE_SERVER_PORT") {
        match value.trim().parse() {
            Ok(port) => config.discovery.internal_port = port,
            Err(e) => tracing::warn!("Ignoring invalid OPENCODE_SERVER_PORT {:?}: {}", value, e),
        }
    }

    if let Some(dir) = lookup("HELM_CLAUDE_PROJECTS_DIR") {
        if !dir.trim().is_empty() {
            config.sessions.projects_dir = PathBuf::from(dir);
        }
    }
}
