//! Tests for process scanning against a fake OS

mod test_utils;

use helm::config::{DiscoveryConfig, RemoteServerConfig};
use helm::data::{CliFamily, ServerMode, ServerStatus, UNKNOWN_PROJECT, UNKNOWN_WORKDIR};
use helm::discovery::{
    DefaultClassifier, Discovery, HealthProber, RemoteServers, Scanner, ServerSource,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use test_utils::{closed_port, http_stub, FakeInspector, StubRoute};

fn scanner(inspector: FakeInspector) -> Scanner {
    let config = DiscoveryConfig::default();
    Scanner::new(
        Arc::new(inspector),
        Arc::new(DefaultClassifier::new(&config.binary_patterns)),
        HealthProber::new(Duration::from_millis(300)),
        &config,
    )
}

mod listening {
    use super::*;

    #[tokio::test]
    async fn failed_cwd_lookup_degrades_to_unknown() {
        let stub = http_stub(vec![StubRoute::status("/api/health", 200)]).await;
        let dead = closed_port().await;
        let inspector = FakeInspector::default()
            .socket(100, "opencode", stub.port)
            .socket(101, "opencode", dead)
            .cwd_error(100, "lsof: permission denied")
            .cwd(101, "/home/dev/api")
            .tty(100, "ttys001");

        let servers = scanner(inspector).scan().await;
        assert_eq!(servers.len(), 2);

        let broken = servers.iter().find(|s| s.pid == 100).unwrap();
        assert_eq!(broken.workdir, UNKNOWN_WORKDIR);
        assert_eq!(broken.project_name, UNKNOWN_PROJECT);
        assert_eq!(broken.mode, ServerMode::Tui);
        assert_eq!(broken.status, ServerStatus::Healthy);
        assert_eq!(broken.id, format!("100-{}", stub.port));

        let fine = servers.iter().find(|s| s.pid == 101).unwrap();
        assert_eq!(fine.workdir, "/home/dev/api");
        assert_eq!(fine.project_name, "api");
        assert_eq!(fine.mode, ServerMode::Serve);
        assert_eq!(fine.status, ServerStatus::Unhealthy);
        assert_eq!(fine.family, CliFamily::Opencode);
    }

    #[tokio::test]
    async fn filters_reserved_ports_duplicates_and_other_binaries() {
        let config = DiscoveryConfig::default();
        let port = closed_port().await;
        let inspector = FakeInspector::default()
            .socket(100, "opencode", port)
            .socket(104, "opencode", port)
            .socket(102, "node", 3000)
            .socket(103, "opencode", config.http_port)
            .socket(105, "claude", config.internal_port)
            .socket(106, "Google", 9222);

        let servers = scanner(inspector).scan().await;

        let pids: Vec<u32> = servers.iter().map(|s| s.pid).collect();
        assert_eq!(pids, vec![100]);
    }

    #[tokio::test]
    async fn socket_enumeration_failure_yields_empty_list() {
        let inspector = FakeInspector {
            fail_sockets: true,
            fail_processes: true,
            ..FakeInspector::default()
        };
        assert!(scanner(inspector).scan().await.is_empty());
    }

    #[tokio::test]
    async fn results_are_ordered_by_port() {
        let mut ports = vec![closed_port().await, closed_port().await, closed_port().await];
        ports.dedup();
        let mut inspector = FakeInspector::default();
        for (i, port) in ports.iter().enumerate() {
            inspector = inspector.socket(200 + i as u32, "opencode", *port);
        }

        let servers = scanner(inspector).scan().await;
        let got: Vec<u16> = servers.iter().map(|s| s.port).collect();
        let mut sorted = got.clone();
        sorted.sort();
        assert_eq!(got, sorted);
    }
}

mod terminal_only {
    use super::*;

    fn inspector_with_terminals(claimed_port: u16) -> FakeInspector {
        FakeInspector::default()
            .socket(100, "opencode", claimed_port)
            .tty(100, "ttys001")
            .process(100, Some("ttys001"), "opencode")
            .process(200, Some("pts/1"), "claude --resume")
            .cwd(200, "/home/dev/web")
            .process(201, Some("pts/2"), "claude -p summarize the diff")
            .process(202, None, "claude")
            .process(203, Some("pts/3"), "ssh -p 2222 dev@devbox claude")
            .process(204, Some("pts/4"), "vim notes.md")
            .process(205, Some("pts/5"), "node /usr/local/bin/claude")
            .cwd_error(205, "process vanished")
    }

    #[tokio::test]
    async fn finds_interactive_sessions_without_ports() {
        let port = closed_port().await;
        let servers = scanner(inspector_with_terminals(port)).scan().await;

        let ids: Vec<&str> = servers.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                format!("100-{}", port).as_str(),
                "term-200",
                "term-203",
                "term-205"
            ]
        );

        let local = servers.iter().find(|s| s.id == "term-200").unwrap();
        assert_eq!(local.mode, ServerMode::TerminalOnly);
        assert_eq!(local.status, ServerStatus::TerminalOnly);
        assert_eq!(local.port, 0);
        assert_eq!(local.workdir, "/home/dev/web");
        assert_eq!(local.project_name, "web (pts/1)");
        assert_eq!(local.family, CliFamily::ClaudeCode);
        assert!(!local.is_remote);
        assert!(local.started_at.is_some());

        let remote = servers.iter().find(|s| s.id == "term-203").unwrap();
        assert!(remote.is_remote);
        assert_eq!(remote.remote_host.as_deref(), Some("devbox"));
        assert_eq!(remote.workdir, UNKNOWN_WORKDIR);
        assert_eq!(remote.project_name, "devbox (pts/3)");

        let orphan_cwd = servers.iter().find(|s| s.id == "term-205").unwrap();
        assert_eq!(orphan_cwd.workdir, UNKNOWN_WORKDIR);
        assert_eq!(orphan_cwd.project_name, format!("{} (pts/5)", UNKNOWN_PROJECT));
    }

    #[tokio::test]
    async fn ids_are_unique() {
        let port = closed_port().await;
        let servers = scanner(inspector_with_terminals(port)).scan().await;

        let ids: HashSet<&str> = servers.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids.len(), servers.len());
    }

    #[tokio::test]
    async fn process_table_failure_keeps_listening_results() {
        let port = closed_port().await;
        let inspector = FakeInspector {
            fail_processes: true,
            ..inspector_with_terminals(port)
        };

        let servers = scanner(inspector).scan().await;
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].pid, 100);
    }
}

mod merged_discovery {
    use super::*;

    fn remote(id: u32, name: &str, port: u16) -> RemoteServerConfig {
        RemoteServerConfig {
            id,
            name: name.to_string(),
            host: "127.0.0.1".to_string(),
            port,
            enabled: true,
        }
    }

    #[tokio::test]
    async fn duplicate_remote_ids_are_reported_once() {
        let port = closed_port().await;
        let config = DiscoveryConfig {
            probe_timeout_ms: 300,
            remote_probe_timeout_ms: 300,
            ..DiscoveryConfig::default()
        };
        let remotes = RemoteServers::new(
            vec![remote(1, "devbox", port), remote(1, "devbox-copy", port), remote(2, "ci", port)],
            &config,
        );
        let local = FakeInspector::default().socket(100, "opencode", port);
        let discovery = Discovery::new(scanner(local), remotes);

        let servers = discovery.discover().await;

        let ids: Vec<String> = servers.iter().map(|s| s.id.clone()).collect();
        assert_eq!(
            ids,
            vec![format!("100-{}", port), "remote-1".to_string(), "remote-2".to_string()]
        );
        let first = servers.iter().find(|s| s.id == "remote-1").unwrap();
        assert_eq!(first.project_name, "devbox");
    }
}
