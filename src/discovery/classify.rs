//! Command-line heuristics for recognising agent processes
//!
//! Everything here is pattern matching on process names and argument
//! vectors, kept behind [`ProcessClassifier`] so a platform can swap in
//! better rules without touching the scanner.

use crate::data::{project_name_for, CliFamily};

/// Hosts that embed agent extensions and would otherwise match by name
const BROWSER_MARKERS: &[&str] = &["chrome", "chromium", "firefox", "safari", "brave", "helper"];

/// One-shot invocations driven by scripts rather than a person at a terminal
const AUTOMATION_FLAGS: &[&str] = &["--print", "-p", "--output-format"];
const AUTOMATION_SUBCOMMANDS: &[&str] = &["run", "mcp"];

/// Runtimes that launch the agent as their first argument
const INTERPRETERS: &[&str] = &["node", "bun", "deno", "npx", "python", "python3"];

/// ssh options that consume the following argument
const SSH_OPTS_WITH_ARG: &str = "BbcDEeFIiJLlmOoPpQRSWw";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalCandidate {
    pub family: CliFamily,
    /// Set when the agent runs on another machine behind `ssh`
    pub remote_host: Option<String>,
}

pub trait ProcessClassifier: Send + Sync {
    /// Whether a process with a listening socket is an agent server
    fn matches_listening(&self, command: &str) -> Option<CliFamily>;

    /// Whether a terminal-attached process is an interactive agent session
    fn classify_terminal(&self, command_line: &str) -> Option<TerminalCandidate>;
}

#[derive(Debug, Clone)]
pub struct DefaultClassifier {
    patterns: Vec<String>,
}

impl DefaultClassifier {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            patterns: patterns
                .into_iter()
                .map(|p| p.as_ref().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    fn matches_name(&self, name: &str) -> bool {
        let lower = name.to_lowercase();
        if BROWSER_MARKERS.iter().any(|b| lower.contains(b)) {
            return false;
        }
        self.patterns.iter().any(|p| lower.contains(p.as_str()))
    }

    /// Match a local argv, returning the family of the agent binary
    fn match_local(&self, args: &[&str]) -> Option<CliFamily> {
        let program = basename(args.first()?);
        let (agent, rest) = if self.matches_name(program) {
            (program, &args[1..])
        } else if INTERPRETERS.contains(&program) {
            let script = basename(args.get(1)?);
            if !self.matches_name(script) {
                return None;
            }
            (script, &args[2..])
        } else {
            return None;
        };

        if is_automation(rest) {
            return None;
        }
        Some(CliFamily::from_name(agent))
    }
}

impl ProcessClassifier for DefaultClassifier {
    fn matches_listening(&self, command: &str) -> Option<CliFamily> {
        self.matches_name(command)
            .then(|| CliFamily::from_name(command))
    }

    fn classify_terminal(&self, command_line: &str) -> Option<TerminalCandidate> {
        let args: Vec<&str> = command_line.split_whitespace().collect();
        let program = basename(args.first()?);

        if program == "ssh" {
            let (host, remote_args) = split_ssh(&args[1..])?;
            let family = self.match_local(&remote_args)?;
            return Some(TerminalCandidate {
                family,
                remote_host: Some(host),
            });
        }

        self.match_local(&args).map(|family| TerminalCandidate {
            family,
            remote_host: None,
        })
    }
}

fn basename(token: &str) -> &str {
    token.rsplit('/').next().unwrap_or(token)
}

fn is_automation(args: &[&str]) -> bool {
    if args.iter().any(|a| AUTOMATION_FLAGS.contains(a)) {
        return true;
    }
    args.iter()
        .find(|a| !a.starts_with('-'))
        .map(|sub| AUTOMATION_SUBCOMMANDS.contains(sub))
        .unwrap_or(false)
}

/// Split `ssh [opts] [user@]host [command...]` into host and remote argv
fn split_ssh<'a>(args: &[&'a str]) -> Option<(String, Vec<&'a str>)> {
    let mut iter = args.iter().copied();
    while let Some(arg) = iter.next() {
        if let Some(opt) = arg.strip_prefix('-') {
            // `-p 22` takes the next token, `-p22` does not
            if opt.len() == 1 && SSH_OPTS_WITH_ARG.contains(opt) {
                iter.next();
            }
            continue;
        }
        let host = ssh_host(arg)?;
        return Some((host, iter.collect()));
    }
    None
}

/// `ssh://dev@devbox:2222` → `devbox`
fn ssh_host(destination: &str) -> Option<String> {
    let dest = destination.strip_prefix("ssh://").unwrap_or(destination);
    let dest = dest.rsplit('@').next().unwrap_or(dest);
    let host = match dest.split_once(':') {
        Some((host, _port)) => host,
        None => dest,
    };
    (!host.is_empty()).then(|| host.to_string())
}

/// Distinguish concurrent sessions in one place: `host (tty)` for remote
/// sessions, `project (tty)` for local ones
pub fn terminal_label(remote_host: Option<&str>, workdir: &str, tty: &str) -> String {
    match remote_host {
        Some(host) => format!("{} ({})", host, tty),
        None => format!("{} ({})", project_name_for(workdir), tty),
    }
}
