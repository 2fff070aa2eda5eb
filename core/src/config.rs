//! TOML Configuration
//!
//! Centralized configuration for the multiplexer, loaded from
//! `~/.config/termplex/termplex.toml` (or an explicit path).
//!
//! # Configuration Priority
//!
//! Highest first:
//! 1. CLI arguments ([`CliOverrides`])
//! 2. Environment variables (`TERMPLEX_*`)
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [server]
//! listen_address = "0.0.0.0"
//! listen_port = 7373
//! max_sessions = 32
//! handshake_timeout_ms = 5000
//! allowed_users = ["alice", "bob"]
//!
//! [display]
//! command_capacity = 64
//! tick_ms = 1000
//! theme = "dusk"
//!
//! [application]
//! grace_period_ms = 2000
//! exit_when_idle = false
//! ```

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::theme::Theme;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading or applying configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("failed to read config file at {path}: {source}")]
    Read {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("failed to parse TOML config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("invalid configuration: {0}")]
    Invalid(String),

    /// The listen address could not be bound
    #[error("cannot listen on {addr}: {source}")]
    Bind {
        /// Address that was attempted
        addr: String,
        /// The underlying IO error
        source: std::io::Error,
    },
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where the configuration's highest-priority values came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// `[server]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerToml {
    /// Interface to listen on
    pub listen_address: Option<String>,
    /// TCP port
    pub listen_port: Option<u16>,
    /// Maximum concurrent remote sessions (pty pool size)
    pub max_sessions: Option<usize>,
    /// Time allowed for a client to send `Hello`
    pub handshake_timeout_ms: Option<u64>,
    /// Where to write the server token
    pub token_file: Option<PathBuf>,
    /// Users allowed to connect (empty = anyone with the token)
    pub allowed_users: Option<Vec<String>>,
}

/// `[display]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayToml {
    /// Depth of each display's command queue
    pub command_capacity: Option<usize>,
    /// Frame tick in milliseconds (0 = off)
    pub tick_ms: Option<u64>,
    /// Whether an unhandled Ctrl+C closes the display
    pub quit_on_interrupt: Option<bool>,
    /// Built-in theme name
    pub theme: Option<String>,
}

/// `[application]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationToml {
    /// Time each display gets to close during terminate
    pub grace_period_ms: Option<u64>,
    /// Whether `run` returns once every display has closed
    pub exit_when_idle: Option<bool>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TermplexToml {
    /// Server section
    pub server: ServerToml,
    /// Display section
    pub display: DisplayToml,
    /// Application section
    pub application: ApplicationToml,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Resolved configuration
#[derive(Clone, Debug)]
pub struct AppConfig {
    /// Interface to listen on
    pub listen_address: String,
    /// TCP port (0 = pick any)
    pub listen_port: u16,
    /// Maximum concurrent remote sessions
    pub max_sessions: usize,
    /// Time allowed for the client handshake
    pub handshake_timeout: Duration,
    /// Token file override
    pub token_file: Option<PathBuf>,
    /// Users allowed to connect (empty = anyone with the token)
    pub allowed_users: Vec<String>,
    /// Depth of each display's command queue
    pub command_capacity: usize,
    /// Optional frame tick
    pub tick_interval: Option<Duration>,
    /// Whether an unhandled Ctrl+C closes the display
    pub quit_on_interrupt: bool,
    /// Built-in theme name
    pub theme: String,
    /// Time each display gets to close during terminate
    pub grace_period: Duration,
    /// Whether `run` returns once every display has closed
    pub exit_when_idle: bool,
    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,
    pub(crate) source: ConfigSource,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen_address: "127.0.0.1".to_string(),
            listen_port: 7373,
            max_sessions: 16,
            handshake_timeout: Duration::from_secs(5),
            token_file: None,
            allowed_users: Vec::new(),
            command_capacity: 64,
            tick_interval: None,
            quit_on_interrupt: true,
            theme: "dusk".to_string(),
            grace_period: Duration::from_millis(2000),
            exit_when_idle: false,
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

/// Values given on the command line
#[derive(Clone, Debug, Default)]
pub struct CliOverrides {
    /// `--listen-address`
    pub listen_address: Option<String>,
    /// `--listen-port`
    pub listen_port: Option<u16>,
    /// `--token-file`
    pub token_file: Option<PathBuf>,
}

impl AppConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the highest-priority source that contributed a value
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Resolved listen address
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] if `listen_address` is not an IP address.
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr = self.listen_address.parse().map_err(|_| {
            ConfigError::Invalid(format!(
                "listen_address '{}' is not an IP address",
                self.listen_address
            ))
        })?;
        Ok(SocketAddr::new(ip, self.listen_port))
    }

    /// Resolved theme
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] for an unknown theme name.
    pub fn resolve_theme(&self) -> Result<Theme, ConfigError> {
        Theme::by_name(&self.theme).ok_or_else(|| {
            ConfigError::Invalid(format!(
                "unknown theme '{}' (expected one of {})",
                self.theme,
                Theme::BUILTIN.join(", ")
            ))
        })
    }

    /// Check every value
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] naming the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.socket_addr()?;
        if self.grace_period.is_zero() {
            return Err(ConfigError::Invalid("grace_period_ms must be > 0".into()));
        }
        if self.command_capacity == 0 {
            return Err(ConfigError::Invalid("command_capacity must be > 0".into()));
        }
        if self.max_sessions == 0 {
            return Err(ConfigError::Invalid("max_sessions must be > 0".into()));
        }
        if self.handshake_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "handshake_timeout_ms must be > 0".into(),
            ));
        }
        if self.tick_interval.is_some_and(|tick| tick.is_zero()) {
            return Err(ConfigError::Invalid("tick_ms must be > 0".into()));
        }
        self.resolve_theme()?;
        Ok(())
    }

    /// Apply command-line values (highest priority)
    pub fn apply_cli(&mut self, cli: &CliOverrides) {
        if let Some(addr) = &cli.listen_address {
            self.listen_address.clone_from(addr);
            self.source = ConfigSource::Cli;
        }
        if let Some(port) = cli.listen_port {
            self.listen_port = port;
            self.source = ConfigSource::Cli;
        }
        if let Some(path) = &cli.token_file {
            self.token_file = Some(path.clone());
            self.source = ConfigSource::Cli;
        }
    }
}

// =============================================================================
// Runtime Environment
// =============================================================================

/// Profiling mode requested through `TERMPLEX_PROFILE`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ProfileMode {
    /// No profiling
    #[default]
    Off,
    /// CPU profile
    Cpu,
    /// Memory profile
    Mem,
}

impl std::str::FromStr for ProfileMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "off" | "none" => Ok(Self::Off),
            "cpu" => Ok(Self::Cpu),
            "mem" | "memory" => Ok(Self::Mem),
            other => Err(ConfigError::Invalid(format!(
                "TERMPLEX_PROFILE '{other}' (expected cpu, mem or off)"
            ))),
        }
    }
}

/// Process-level settings read from the environment at startup
#[derive(Clone, Debug, Default)]
pub struct RuntimeEnv {
    /// Log destination (`TERMPLEX_LOG_FILE`)
    pub log_file: Option<PathBuf>,
    /// Log filter (`TERMPLEX_LOG`, then `RUST_LOG`)
    pub log_filter: Option<String>,
    /// Profiling mode (`TERMPLEX_PROFILE`)
    pub profile: ProfileMode,
    /// Profile output (`TERMPLEX_PROFILE_PATH`)
    pub profile_path: Option<PathBuf>,
    /// Config file override (`TERMPLEX_CONFIG`)
    pub config_path: Option<PathBuf>,
}

impl RuntimeEnv {
    /// Read from the process environment
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] for an unknown profile mode.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read through a lookup function
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] for an unknown profile mode.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Ok(Self {
            log_file: non_empty("TERMPLEX_LOG_FILE").map(PathBuf::from),
            log_filter: non_empty("TERMPLEX_LOG").or_else(|| non_empty("RUST_LOG")),
            profile: non_empty("TERMPLEX_PROFILE")
                .map(|v| v.parse())
                .transpose()?
                .unwrap_or_default(),
            profile_path: non_empty("TERMPLEX_PROFILE_PATH").map(PathBuf::from),
            config_path: non_empty("TERMPLEX_CONFIG").map(PathBuf::from),
        })
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/termplex/termplex.toml` or the platform
/// equivalent.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("termplex").join("termplex.toml"))
}

/// Load configuration from the default path plus the environment
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed, or an
/// environment variable holds an unparsable value. A missing config file is
/// not an error.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path plus the environment
///
/// # Errors
///
/// See [`load_config`].
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<AppConfig, ConfigError> {
    load_config_with(path, |key| std::env::var(key).ok())
}

/// Load configuration with an explicit environment lookup
///
/// # Errors
///
/// See [`load_config`].
pub fn load_config_with(
    path: Option<PathBuf>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<AppConfig, ConfigError> {
    let mut config = AppConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::Read {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: TermplexToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config);
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(path = %config_path.display(), "Loaded configuration from file");
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config, env)?;
    Ok(config)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut AppConfig, toml: &TermplexToml) {
    if let Some(addr) = &toml.server.listen_address {
        config.listen_address.clone_from(addr);
    }
    if let Some(port) = toml.server.listen_port {
        config.listen_port = port;
    }
    if let Some(max) = toml.server.max_sessions {
        config.max_sessions = max;
    }
    if let Some(ms) = toml.server.handshake_timeout_ms {
        config.handshake_timeout = Duration::from_millis(ms);
    }
    if toml.server.token_file.is_some() {
        config.token_file.clone_from(&toml.server.token_file);
    }
    if let Some(users) = &toml.server.allowed_users {
        config.allowed_users.clone_from(users);
    }

    if let Some(capacity) = toml.display.command_capacity {
        config.command_capacity = capacity;
    }
    if let Some(ms) = toml.display.tick_ms {
        config.tick_interval = (ms > 0).then(|| Duration::from_millis(ms));
    }
    if let Some(quit) = toml.display.quit_on_interrupt {
        config.quit_on_interrupt = quit;
    }
    if let Some(theme) = &toml.display.theme {
        config.theme.clone_from(theme);
    }

    if let Some(ms) = toml.application.grace_period_ms {
        config.grace_period = Duration::from_millis(ms);
    }
    if let Some(idle) = toml.application.exit_when_idle {
        config.exit_when_idle = idle;
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("{key}='{value}' is not a valid value")))
}

/// Apply environment variable overrides to the config
fn apply_env_config(
    config: &mut AppConfig,
    env: impl Fn(&str) -> Option<String>,
) -> Result<(), ConfigError> {
    if let Some(addr) = env("TERMPLEX_LISTEN_ADDRESS") {
        config.listen_address = addr;
        config.source = ConfigSource::Env;
    }
    if let Some(port) = env("TERMPLEX_LISTEN_PORT") {
        config.listen_port = parse_env("TERMPLEX_LISTEN_PORT", &port)?;
        config.source = ConfigSource::Env;
    }
    if let Some(ms) = env("TERMPLEX_GRACE_MS") {
        config.grace_period = Duration::from_millis(parse_env("TERMPLEX_GRACE_MS", &ms)?);
        config.source = ConfigSource::Env;
    }
    if let Some(max) = env("TERMPLEX_MAX_SESSIONS") {
        config.max_sessions = parse_env("TERMPLEX_MAX_SESSIONS", &max)?;
        config.source = ConfigSource::Env;
    }
    if let Some(path) = env("TERMPLEX_TOKEN_FILE") {
        config.token_file = Some(PathBuf::from(path));
        config.source = ConfigSource::Env;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use pretty_assertions::assert_eq;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        config.validate().unwrap();
        assert_eq!(config.source(), ConfigSource::Default);
        assert_eq!(config.socket_addr().unwrap().port(), 7373);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config =
            load_config_with(Some(PathBuf::from("/nonexistent/termplex.toml")), env(&[]))
                .unwrap();
        assert_eq!(config.source(), ConfigSource::Default);
        assert!(config.config_file_path.is_none());
    }

    #[test]
    fn test_priority_cli_over_env_over_file() {
        let file = write_config(
            r#"
            [server]
            listen_port = 9000
            max_sessions = 3

            [application]
            grace_period_ms = 500
            "#,
        );

        let mut config = load_config_with(
            Some(file.path().to_path_buf()),
            env(&[("TERMPLEX_LISTEN_PORT", "9100")]),
        )
        .unwrap();
        assert_eq!(config.listen_port, 9100);
        assert_eq!(config.max_sessions, 3);
        assert_eq!(config.grace_period, Duration::from_millis(500));
        assert_eq!(config.source(), ConfigSource::Env);

        config.apply_cli(&CliOverrides {
            listen_port: Some(9200),
            ..Default::default()
        });
        assert_eq!(config.listen_port, 9200);
        assert_eq!(config.source(), ConfigSource::Cli);
    }

    #[test]
    fn test_file_sections() {
        let file = write_config(
            r#"
            [server]
            allowed_users = ["alice"]

            [display]
            tick_ms = 250
            theme = "ascii"
            quit_on_interrupt = false
            "#,
        );
        let config = load_config_with(Some(file.path().to_path_buf()), env(&[])).unwrap();
        assert_eq!(config.allowed_users, vec!["alice".to_string()]);
        assert_eq!(config.tick_interval, Some(Duration::from_millis(250)));
        assert!(!config.quit_on_interrupt);
        assert_eq!(config.resolve_theme().unwrap().name, "ascii");
        assert_eq!(config.source(), ConfigSource::File);
    }

    #[test]
    fn test_parse_error() {
        let file = write_config("[server\nlisten_port = ");
        assert!(matches!(
            load_config_with(Some(file.path().to_path_buf()), env(&[])),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_bad_env_value() {
        assert!(matches!(
            load_config_with(None, env(&[("TERMPLEX_GRACE_MS", "soon")])),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_validation() {
        let mut config = AppConfig {
            grace_period: Duration::ZERO,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());

        config.grace_period = Duration::from_secs(1);
        config.listen_address = "not-an-ip".into();
        assert!(config.validate().is_err());

        config.listen_address = "::1".into();
        config.command_capacity = 0;
        assert!(config.validate().is_err());

        config.command_capacity = 1;
        config.theme = "neon".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_tick_is_rejected() {
        let mut config = AppConfig::default();
        config.tick_interval = Some(Duration::ZERO);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("tick_ms"), "{err}");

        config.tick_interval = Some(Duration::from_millis(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_runtime_env() {
        let rt = RuntimeEnv::from_lookup(env(&[
            ("TERMPLEX_PROFILE", "CPU"),
            ("RUST_LOG", "debug"),
            ("TERMPLEX_LOG_FILE", "/tmp/termplex.log"),
        ]))
        .unwrap();
        assert_eq!(rt.profile, ProfileMode::Cpu);
        assert_eq!(rt.log_filter.as_deref(), Some("debug"));
        assert_eq!(rt.log_file, Some(PathBuf::from("/tmp/termplex.log")));

        assert!(RuntimeEnv::from_lookup(env(&[("TERMPLEX_PROFILE", "gpu")])).is_err());
    }
}
