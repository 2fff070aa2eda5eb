//! Sessions
//!
//! A session is one attached terminal: the local tty or one remote
//! connection. Each session gets exactly one display for its lifetime.

use std::fmt;
use std::net::SocketAddr;
use std::time::{Instant, SystemTime};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::canvas::Size;
use crate::server::auth::Identity;

/// Unique session identifier
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generate a new random session ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The underlying UUID
    #[must_use]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Short form for log lines (first 8 hex digits)
    #[must_use]
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Where a session's terminal lives
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionOrigin {
    /// The process's own controlling terminal
    Local,
    /// A network peer
    Remote(SocketAddr),
}

impl fmt::Display for SessionOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::Remote(addr) => write!(f, "{addr}"),
        }
    }
}

/// An attached terminal and who is behind it
#[derive(Clone, Debug)]
pub struct Session {
    /// Session id
    pub id: SessionId,
    /// Authenticated user
    pub identity: Identity,
    /// Where the terminal is
    pub origin: SessionOrigin,
    /// Terminal geometry at attach time
    pub size: Size,
    /// Terminal type reported by the client (e.g. `xterm-256color`)
    pub term: Option<String>,
    /// Wall-clock attach time
    pub started_at: SystemTime,
    started: Instant,
}

impl Session {
    /// Create a session for an authenticated identity
    #[must_use]
    pub fn new(identity: Identity, origin: SessionOrigin, size: Size) -> Self {
        Self {
            id: SessionId::new(),
            identity,
            origin,
            size,
            term: None,
            started_at: SystemTime::now(),
            started: Instant::now(),
        }
    }

    /// Session for the local terminal, owned by the current user
    #[must_use]
    pub fn local(size: Size) -> Self {
        Self::new(Identity::local(), SessionOrigin::Local, size)
    }

    /// Set the terminal type
    #[must_use]
    pub fn with_term(mut self, term: impl Into<String>) -> Self {
        self.term = Some(term.into());
        self
    }

    /// Time since attach
    #[must_use]
    pub fn uptime(&self) -> std::time::Duration {
        self.started.elapsed()
    }

    /// Whether this is the local terminal
    #[must_use]
    pub fn is_local(&self) -> bool {
        self.origin == SessionOrigin::Local
    }
}
