//! Logging Setup
//!
//! One `tracing-subscriber` fmt layer with an `EnvFilter`, installed once per
//! process by the binaries.
//!
//! The filter comes from `TERMPLEX_LOG` (or `RUST_LOG`), falling back to
//! `info` for this workspace's crates. Output goes to stderr unless
//! `TERMPLEX_LOG_FILE` names a file. The local TUI owns the terminal, so it
//! always logs to a file.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

use crate::config::RuntimeEnv;

/// Default filter directive for the workspace crates
pub const DEFAULT_FILTER: &str =
    "termplex_core=info,termplex_server=info,termplex_tui=info,warn";

/// Log file used by the local TUI when none is configured
#[must_use]
pub fn default_log_path() -> PathBuf {
    dirs::state_dir()
        .or_else(dirs::data_local_dir)
        .unwrap_or_else(std::env::temp_dir)
        .join("termplex")
        .join("termplex.log")
}

/// Where log lines go
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogTarget {
    /// Standard error
    Stderr,
    /// Append to a file
    File(PathBuf),
}

impl LogTarget {
    /// Pick the target for `env`
    ///
    /// An explicit `TERMPLEX_LOG_FILE` always wins; otherwise processes that
    /// own the terminal log to [`default_log_path`].
    #[must_use]
    pub fn resolve(env: &RuntimeEnv, owns_terminal: bool) -> Self {
        match (&env.log_file, owns_terminal) {
            (Some(path), _) => Self::File(path.clone()),
            (None, true) => Self::File(default_log_path()),
            (None, false) => Self::Stderr,
        }
    }
}

/// Build the filter for `env`, with `level` overriding the default
///
/// # Errors
///
/// Returns the parse error for a malformed directive.
pub fn filter(
    env: &RuntimeEnv,
    level: Option<&str>,
) -> Result<EnvFilter, tracing_subscriber::filter::ParseError> {
    match (&env.log_filter, level) {
        (Some(directives), _) => EnvFilter::try_new(directives),
        (None, Some(level)) => EnvFilter::try_new(format!(
            "termplex_core={level},termplex_server={level},termplex_tui={level},warn"
        )),
        (None, None) => EnvFilter::try_new(DEFAULT_FILTER),
    }
}

/// Install the global subscriber
///
/// Returns the target in use. Calling it twice is harmless: the second
/// subscriber is refused and the first stays in place.
///
/// # Errors
///
/// Fails if the filter does not parse or the log file cannot be opened.
pub fn init(
    env: &RuntimeEnv,
    level: Option<&str>,
    owns_terminal: bool,
) -> Result<LogTarget, Box<dyn std::error::Error + Send + Sync>> {
    let filter = filter(env, level)?;
    let target = LogTarget::resolve(env, owns_terminal);

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let installed = match &target {
        LogTarget::Stderr => builder.with_writer(std::io::stderr).try_init(),
        LogTarget::File(path) => {
            let file = open_log_file(path)?;
            builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
        }
    };
    if installed.is_err() {
        tracing::debug!("Global subscriber already installed");
    }
    Ok(target)
}

fn open_log_file(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    OpenOptions::new().create(true).append(true).open(path)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_target_resolution() {
        let env = RuntimeEnv::default();
        assert_eq!(LogTarget::resolve(&env, false), LogTarget::Stderr);
        assert_eq!(
            LogTarget::resolve(&env, true),
            LogTarget::File(default_log_path())
        );

        let env = RuntimeEnv {
            log_file: Some(PathBuf::from("/tmp/x.log")),
            ..RuntimeEnv::default()
        };
        assert_eq!(
            LogTarget::resolve(&env, false),
            LogTarget::File(PathBuf::from("/tmp/x.log"))
        );
    }

    #[test]
    fn test_filter_sources() {
        let env = RuntimeEnv::default();
        assert!(filter(&env, None).is_ok());
        assert!(filter(&env, Some("debug")).is_ok());

        let env = RuntimeEnv {
            log_filter: Some("termplex_core=trace".into()),
            ..RuntimeEnv::default()
        };
        assert_eq!(
            filter(&env, Some("warn")).unwrap().to_string(),
            "termplex_core=trace"
        );
    }

    #[test]
    fn test_open_log_file_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("termplex.log");
        open_log_file(&path).unwrap();
        assert!(path.exists());
    }
}
