//! Always-on servers on other machines, taken from configuration
//!
//! These never show up in the local socket table, so they are probed
//! directly: `GET /session` first (which also tells us the project), then
//! `GET /api/health`.

use super::health::{HEALTH_PATH, SESSION_PATH};
use super::HTTP_CLIENT;
use crate::config::{DiscoveryConfig, RemoteServerConfig};
use crate::data::{CliFamily, ServerDescriptor, ServerMode, ServerStatus, UNKNOWN_WORKDIR};
use futures::stream::{self, StreamExt};
use serde_json::Value;
use std::time::Duration;

const REMOTE_CONCURRENCY: usize = 4;

#[derive(Debug, Clone)]
pub struct RemoteServers {
    configs: Vec<RemoteServerConfig>,
    client: reqwest::Client,
    session_timeout: Duration,
    health_timeout: Duration,
}

impl RemoteServers {
    pub fn new(configs: Vec<RemoteServerConfig>, discovery: &DiscoveryConfig) -> Self {
        Self {
            configs,
            client: HTTP_CLIENT.clone(),
            session_timeout: discovery.remote_probe_timeout(),
            health_timeout: discovery.probe_timeout(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.configs.iter().all(|c| !c.enabled)
    }

    /// Descriptors for every enabled remote, in configuration order
    pub async fn discover(&self) -> Vec<ServerDescriptor> {
        let enabled: Vec<RemoteServerConfig> =
            self.configs.iter().filter(|c| c.enabled).cloned().collect();
        stream::iter(enabled)
            .map(|config| async move { self.describe(&config).await })
            .buffered(REMOTE_CONCURRENCY)
            .collect()
            .await
    }

    async fn describe(&self, config: &RemoteServerConfig) -> ServerDescriptor {
        let base = format!("http://{}:{}", config.host, config.port);
        let mut status = ServerStatus::Unhealthy;
        let mut workdir = UNKNOWN_WORKDIR.to_string();

        match self.fetch_sessions(&format!("{}{}", base, SESSION_PATH)).await {
            Ok(sessions) => {
                status = ServerStatus::Healthy;
                if let Some(dir) = workdir_from_sessions(&sessions) {
                    workdir = dir;
                }
            }
            Err(e) => {
                tracing::debug!("Remote {} session probe failed: {}", config.name, e);
                if self.health_ok(&format!("{}{}", base, HEALTH_PATH)).await {
                    status = ServerStatus::Healthy;
                }
            }
        }

        if status.is_healthy() {
            tracing::debug!("Remote server {} ({}) is reachable", config.name, base);
        }

        ServerDescriptor {
            id: format!("remote-{}", config.id),
            pid: 0,
            port: config.port,
            mode: ServerMode::Serve,
            project_name: remote_display_name(&config.name, &workdir),
            workdir,
            status,
            family: CliFamily::Opencode,
            is_remote: true,
            remote_host: Some(config.host.clone()),
            started_at: None,
        }
    }

    async fn fetch_sessions(&self, url: &str) -> Result<Vec<Value>, reqwest::Error> {
        let response = self
            .client
            .get(url)
            .timeout(self.session_timeout)
            .send()
            .await?
            .error_for_status()?;
        // A healthy server with an unexpected body still counts as healthy
        Ok(response.json::<Vec<Value>>().await.unwrap_or_default())
    }

    async fn health_ok(&self, url: &str) -> bool {
        match self.client.get(url).timeout(self.health_timeout).send().await {
            Ok(r) => r.status().is_success(),
            Err(_) => false,
        }
    }
}

/// First session directory that is actually known
pub fn workdir_from_sessions(sessions: &[Value]) -> Option<String> {
    let known = sessions
        .iter()
        .filter_map(|s| s.get("directory").and_then(Value::as_str))
        .find(|d| !d.is_empty() && *d != UNKNOWN_WORKDIR);
    known.map(str::to_string)
}

/// `devbox` + `/srv/app/` → `devbox (app)`
pub fn remote_display_name(name: &str, workdir: &str) -> String {
    if workdir == UNKNOWN_WORKDIR {
        return name.to_string();
    }
    match workdir.split('/').filter(|s| !s.is_empty()).last() {
        Some(project) => format!("{} ({})", name, project),
        None => name.to_string(),
    }
}
