//! Cached view of discovered servers
//!
//! Scans are expensive (several subprocesses plus HTTP probes per
//! candidate), so reads are served from the last snapshot while it is
//! younger than the freshness window. Snapshots are replaced wholesale.

use super::remote::RemoteServers;
use super::scanner::Scanner;
use crate::config::Config;
use crate::data::{dedupe_by_id, ServerDescriptor};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// Anything that can produce a fresh server list
#[async_trait]
pub trait ServerSource: Send + Sync {
    async fn discover(&self) -> Vec<ServerDescriptor>;
}

#[async_trait]
impl ServerSource for Scanner {
    async fn discover(&self) -> Vec<ServerDescriptor> {
        self.scan().await
    }
}

/// Local scan merged with configured remote servers
pub struct Discovery {
    scanner: Scanner,
    remotes: RemoteServers,
}

impl Discovery {
    pub fn new(scanner: Scanner, remotes: RemoteServers) -> Self {
        Self { scanner, remotes }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Scanner::from_config(&config.discovery),
            RemoteServers::new(config.remote_servers.clone(), &config.discovery),
        )
    }
}

#[async_trait]
impl ServerSource for Discovery {
    async fn discover(&self) -> Vec<ServerDescriptor> {
        let (mut servers, remote) = tokio::join!(self.scanner.scan(), self.remotes.discover());
        servers.extend(remote);

        let dropped = dedupe_by_id(&mut servers);
        if dropped > 0 {
            tracing::warn!("Dropped {} servers with duplicate ids", dropped);
        }
        servers
    }
}

struct Snapshot {
    servers: Vec<ServerDescriptor>,
    captured_at: Instant,
}

pub struct ServerRegistry {
    source: Arc<dyn ServerSource>,
    ttl: Duration,
    cache: RwLock<Option<Arc<Snapshot>>>,
    scans: AtomicU64,
}

impl ServerRegistry {
    pub fn new(source: Arc<dyn ServerSource>, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            cache: RwLock::new(None),
            scans: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Arc::new(Discovery::from_config(config)),
            config.discovery.cache_ttl(),
        )
    }

    /// Cached servers, rescanning first if the snapshot is stale or missing.
    ///
    /// Concurrent misses may each scan; the last one to finish wins.
    pub async fn get_all(&self) -> Vec<ServerDescriptor> {
        if let Some(snapshot) = self.cache.read().await.as_ref() {
            if snapshot.captured_at.elapsed() <= self.ttl {
                return snapshot.servers.clone();
            }
        }
        self.refresh().await
    }

    /// Rescan unconditionally and replace the snapshot
    pub async fn refresh(&self) -> Vec<ServerDescriptor> {
        let servers = self.source.discover().await;
        self.scans.fetch_add(1, Ordering::Relaxed);

        let snapshot = Arc::new(Snapshot {
            servers: servers.clone(),
            captured_at: Instant::now(),
        });
        *self.cache.write().await = Some(snapshot);

        tracing::debug!("Server registry refreshed: {} servers", servers.len());
        servers
    }

    pub async fn get_by_id(&self, id: &str) -> Option<ServerDescriptor> {
        self.get_all().await.into_iter().find(|s| s.id == id)
    }

    /// Number of scans performed so far
    pub fn scan_count(&self) -> u64 {
        self.scans.load(Ordering::Relaxed)
    }

    /// Age of the current snapshot, if any
    pub async fn age(&self) -> Option<Duration> {
        self.cache
            .read()
            .await
            .as_ref()
            .map(|s| s.captured_at.elapsed())
    }
}
