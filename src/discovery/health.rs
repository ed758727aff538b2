//! HTTP liveness probing for discovered servers

use super::HTTP_CLIENT;
use crate::data::ServerStatus;
use reqwest::StatusCode;
use std::time::Duration;

pub const HEALTH_PATH: &str = "/api/health";
pub const SESSION_PATH: &str = "/session";

const LOCALHOST: &str = "127.0.0.1";

/// Classifies a server as healthy or unhealthy. Never fails.
///
/// The primary check is `GET /api/health`; if that does not answer 2xx,
/// `GET /session` is tried once, where 401 also counts as alive.
#[derive(Debug, Clone)]
pub struct HealthProber {
    client: reqwest::Client,
    timeout: Duration,
}

impl HealthProber {
    pub fn new(timeout: Duration) -> Self {
        Self::with_client(HTTP_CLIENT.clone(), timeout)
    }

    pub fn with_client(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn probe(&self, port: u16) -> ServerStatus {
        self.probe_host(LOCALHOST, port).await
    }

    pub async fn probe_host(&self, host: &str, port: u16) -> ServerStatus {
        // Two sequential requests at most
        let ceiling = self.timeout * 2;
        match tokio::time::timeout(ceiling, self.check(host, port)).await {
            Ok(status) => status,
            Err(_) => {
                tracing::debug!("Health probe of {}:{} exceeded {:?}", host, port, ceiling);
                ServerStatus::Unhealthy
            }
        }
    }

    async fn check(&self, host: &str, port: u16) -> ServerStatus {
        let base = format!("http://{}:{}", host, port);

        match self.status_of(&format!("{}{}", base, HEALTH_PATH)).await {
            Ok(code) if code.is_success() => return ServerStatus::Healthy,
            Ok(code) => tracing::debug!("{}{} answered {}", base, HEALTH_PATH, code),
            Err(e) => tracing::debug!("{}{} unreachable: {}", base, HEALTH_PATH, e),
        }

        match self.status_of(&format!("{}{}", base, SESSION_PATH)).await {
            Ok(code) if code.is_success() || code == StatusCode::UNAUTHORIZED => {
                ServerStatus::Healthy
            }
            Ok(code) => {
                tracing::debug!("{}{} answered {}", base, SESSION_PATH, code);
                ServerStatus::Unhealthy
            }
            Err(e) => {
                tracing::debug!("{}{} unreachable: {}", base, SESSION_PATH, e);
                ServerStatus::Unhealthy
            }
        }
    }

    async fn status_of(&self, url: &str) -> Result<StatusCode, reqwest::Error> {
        self.client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map(|r| r.status())
    }
}
