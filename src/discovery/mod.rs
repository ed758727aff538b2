//! Discovery of running coding-agent processes
//!
//! ```text
//! ProcessInspector (lsof/ps) ─┐
//! ProcessClassifier ──────────┼─▶ Scanner ─┐
//! HealthProber ───────────────┘            ├─▶ Discovery ─▶ ServerRegistry (TTL cache)
//!                          RemoteServers ──┘
//! ```

pub mod classify;
pub mod health;
pub mod platform;
pub mod registry;
pub mod remote;
pub mod scanner;

use once_cell::sync::Lazy;
use std::time::Duration;

pub use classify::{DefaultClassifier, ProcessClassifier, TerminalCandidate};
pub use health::HealthProber;
pub use platform::{ListeningSocket, ProcessInfo, ProcessInspector, ShellInspector};
pub use registry::{Discovery, ServerRegistry, ServerSource};
pub use remote::RemoteServers;
pub use scanner::Scanner;

/// Shared HTTP client for probes so connections are pooled per host.
/// Individual requests set their own timeouts.
pub static HTTP_CLIENT: Lazy<reqwest::Client> = Lazy::new(|| {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(2))
        .pool_max_idle_per_host(2)
        .no_proxy()
        .build()
        .expect("Failed to create HTTP client")
});
