use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use helm::config;
use helm::discovery::ServerRegistry;
use helm::sessions::{store, SessionsWatcher};
use helm::terminal::{NativePtySpawner, TerminalManager};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser, Debug)]
#[command(name = "helm")]
#[command(about = "Control plane for local coding-agent processes")]
#[command(version)]
struct Args {
    /// Path to config file
    #[arg(long, short)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List running agent servers and terminal sessions as JSON
    Scan {
        /// Only print the server with this id
        #[arg(long)]
        id: Option<String>,
    },
    /// List Claude Code sessions, most recent first
    Sessions {
        /// Print the message log of one session instead
        #[arg(long)]
        show: Option<String>,
    },
    /// Print session store changes as JSON lines until interrupted
    Watch,
    /// Run an interactive shell through the terminal manager
    Shell {
        /// Working directory (defaults to the current directory)
        #[arg(long)]
        workdir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // stdout carries JSON, so logs go to stderr
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("helm=info".parse()?),
        )
        .init();

    let config = config::load(args.config.as_deref())?;

    match args.command.unwrap_or(Command::Scan { id: None }) {
        Command::Scan { id } => scan(&config, id.as_deref()).await,
        Command::Sessions { show } => sessions(&config, show.as_deref()),
        Command::Watch => watch(&config).await,
        Command::Shell { workdir } => shell(&config, workdir).await,
    }
}

async fn scan(config: &config::Config, id: Option<&str>) -> Result<()> {
    let registry = ServerRegistry::from_config(config);

    let json = match id {
        Some(id) => {
            let server = registry
                .get_by_id(id)
                .await
                .with_context(|| format!("No server with id {}", id))?;
            serde_json::to_string_pretty(&server)?
        }
        None => serde_json::to_string_pretty(&registry.get_all().await)?,
    };
    println!("{}", json);
    Ok(())
}

fn sessions(config: &config::Config, show: Option<&str>) -> Result<()> {
    let root = &config.sessions.projects_dir;
    let projects = store::discover_projects(root);

    let json = match show {
        Some(session_id) => {
            let session = projects
                .iter()
                .flat_map(|p| p.sessions.iter())
                .find(|s| s.session_id == session_id)
                .with_context(|| format!("No session with id {}", session_id))?;
            let messages =
                store::read_session_messages(root, &session.project_path, &session.session_id);
            serde_json::to_string_pretty(&messages)?
        }
        None => serde_json::to_string_pretty(&store::flatten_sessions(&projects))?,
    };
    println!("{}", json);
    Ok(())
}

async fn watch(config: &config::Config) -> Result<()> {
    let watcher = SessionsWatcher::new(&config.sessions.projects_dir, config.sessions.debounce());

    watcher.add_listener(|event| {
        let line = serde_json::to_string(event)?;
        let mut out = std::io::stdout().lock();
        writeln!(out, "{}", line)?;
        out.flush()?;
        Ok(())
    });

    watcher.start().await?;
    watcher.refresh();

    tokio::signal::ctrl_c().await?;
    watcher.stop();
    Ok(())
}

async fn shell(config: &config::Config, workdir: Option<PathBuf>) -> Result<()> {
    let workdir = match workdir {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };

    let manager = Arc::new(TerminalManager::new(
        Arc::new(NativePtySpawner),
        config.terminal.clone(),
    ));
    let reaper = manager.start_reaper();

    let id = uuid::Uuid::new_v4().to_string();
    let session = manager.create(&id, &workdir)?;
    tracing::info!("Shell session {} in {}", id, session.workdir().display());

    let subscription = manager.subscribe(&id, |data| {
        let mut out = std::io::stdout().lock();
        out.write_all(data)?;
        out.flush()?;
        Ok(())
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut liveness = tokio::time::interval(Duration::from_millis(250));

    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => {
                    if !manager.write(&id, format!("{}\n", line).as_bytes()) {
                        break;
                    }
                }
                None => break,
            },
            _ = liveness.tick() => {
                if !session.is_alive() {
                    break;
                }
            }
        }
    }

    if let Some(subscription) = subscription {
        subscription.unsubscribe();
    }
    manager.kill(&id);
    reaper.abort();
    Ok(())
}
