//! Shell selection and process environment for terminal sessions

use std::path::{Path, PathBuf};

/// Tried in order after `$SHELL`
const SHELL_CANDIDATES: &[&str] = &[
    "/bin/zsh",
    "/bin/bash",
    "/bin/sh",
    "/usr/bin/zsh",
    "/usr/bin/bash",
    "/usr/bin/sh",
];

const POSIX_SHELL: &str = "/bin/sh";

const DEFAULT_PATH: &str = "/usr/local/bin:/usr/bin:/bin:/usr/sbin:/sbin";

const DEFAULT_LOCALE: &str = "en_US.UTF-8";

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Pick the interactive shell: the user's `$SHELL` if usable, otherwise the
/// first executable candidate, otherwise `/bin/sh`.
pub fn resolve_shell<F>(lookup: F) -> PathBuf
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(shell) = lookup("SHELL").filter(|s| !s.is_empty()) {
        let path = PathBuf::from(&shell);
        if is_executable(&path) {
            tracing::info!("[Terminal] Using user shell: {}", shell);
            return path;
        }
    }

    SHELL_CANDIDATES
        .iter()
        .map(PathBuf::from)
        .find(|p| is_executable(p))
        .map(|p| {
            tracing::info!("[Terminal] Found shell: {}", p.display());
            p
        })
        .unwrap_or_else(|| PathBuf::from(POSIX_SHELL))
}

/// Use `requested` if it can be listed and entered, else `fallback`
pub fn validate_workdir(requested: &Path, fallback: &Path) -> PathBuf {
    if requested.is_dir() && std::fs::read_dir(requested).is_ok() {
        return requested.to_path_buf();
    }
    tracing::warn!(
        "[Terminal] Workdir {} not accessible, using {}",
        requested.display(),
        fallback.display()
    );
    fallback.to_path_buf()
}

/// Minimal but complete environment for a login shell.
///
/// Nothing else is inherited from the daemon's own environment.
pub fn build_environment<F>(
    workdir: &Path,
    shell: &Path,
    cols: u16,
    rows: u16,
    lookup: F,
) -> Vec<(String, String)>
where
    F: Fn(&str) -> Option<String>,
{
    let home = lookup("HOME")
        .or_else(|| dirs::home_dir().map(|h| h.to_string_lossy().to_string()))
        .unwrap_or_else(|| "/tmp".to_string());

    let pairs = [
        ("HOME", home),
        ("USER", lookup("USER").unwrap_or_else(|| "helm".to_string())),
        ("SHELL", shell.to_string_lossy().to_string()),
        ("TERM", "xterm-256color".to_string()),
        ("COLORTERM", "truecolor".to_string()),
        ("PATH", lookup("PATH").unwrap_or_else(|| DEFAULT_PATH.to_string())),
        ("PWD", workdir.to_string_lossy().to_string()),
        ("LANG", lookup("LANG").unwrap_or_else(|| DEFAULT_LOCALE.to_string())),
        ("LC_ALL", lookup("LC_ALL").unwrap_or_else(|| DEFAULT_LOCALE.to_string())),
        ("LINES", rows.to_string()),
        ("COLUMNS", cols.to_string()),
        // Keep shell history out of the user's real history file
        ("HISTFILE", String::new()),
        ("HISTSIZE", "1000".to_string()),
    ];

    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_resolve_shell_ignores_missing_user_shell() {
        let env = env_of(&[("SHELL", "/nonexistent/fish")]);
        let shell = resolve_shell(|k| env.get(k).cloned());
        assert_ne!(shell, PathBuf::from("/nonexistent/fish"));
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_shell_prefers_user_shell() {
        let env = env_of(&[("SHELL", "/bin/sh")]);
        assert_eq!(resolve_shell(|k| env.get(k).cloned()), PathBuf::from("/bin/sh"));
    }

    #[test]
    fn test_validate_workdir_falls_back() {
        let fallback = std::env::temp_dir();
        let chosen = validate_workdir(Path::new("/nonexistent/project"), &fallback);
        assert_eq!(chosen, fallback);
    }

    #[test]
    fn test_validate_workdir_keeps_accessible_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        let chosen = validate_workdir(dir.path(), Path::new("/tmp"));
        assert_eq!(chosen, dir.path());
    }

    #[test]
    fn test_build_environment() {
        let env = env_of(&[("HOME", "/home/dev"), ("PATH", "/opt/bin")]);
        let vars: HashMap<String, String> = build_environment(
            Path::new("/work"),
            Path::new("/bin/bash"),
            120,
            40,
            |k| env.get(k).cloned(),
        )
        .into_iter()
        .collect();

        assert_eq!(vars["HOME"], "/home/dev");
        assert_eq!(vars["PATH"], "/opt/bin");
        assert_eq!(vars["SHELL"], "/bin/bash");
        assert_eq!(vars["TERM"], "xterm-256color");
        assert_eq!(vars["PWD"], "/work");
        assert_eq!(vars["LANG"], DEFAULT_LOCALE);
        assert_eq!(vars["COLUMNS"], "120");
        assert_eq!(vars["LINES"], "40");
        assert_eq!(vars["HISTFILE"], "");
    }
}
