//! Connection Authentication
//!
//! Remote sessions present credentials in their `Hello` frame. The server
//! hands them to an [`Authenticator`]; nothing else about the connection
//! (session, pseudo terminal, display) exists until it says yes.
//!
//! # Token model
//!
//! - The server generates a 32-byte random token at startup
//! - Stored as hex in a token file with 0o600 permissions
//! - Clients read the file (or are given the token) and send it as the secret
//! - Comparison is constant-time
//!
//! # Usage
//!
//! ```ignore
//! let token = SessionToken::generate();
//! token.write_to_file(&default_token_path())?;
//!
//! let auth = TokenAuthenticator::new(token).allow_users(["alice"]);
//! let identity = auth.authenticate(&credentials).await?;
//! ```

use std::collections::HashSet;
use std::fmt;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Size of the server token in bytes
pub const TOKEN_SIZE: usize = 32;

/// Token file name within the runtime directory
pub const TOKEN_FILENAME: &str = "server.token";

/// Runtime directory name
pub const RUNTIME_DIR_NAME: &str = "termplex";

/// Why a connection was refused, or a token could not be handled
#[derive(Debug, Error)]
pub enum AuthError {
    /// Secret did not match
    #[error("invalid credentials for user '{0}'")]
    InvalidCredentials(String),

    /// User is not on the allow-list
    #[error("user '{0}' is not allowed")]
    UserNotAllowed(String),

    /// Authentication is disabled for every user
    #[error("authentication disabled")]
    Disabled,

    /// Token text is not valid hex of the right length
    #[error("invalid token format: {0}")]
    InvalidToken(String),

    /// Token file could not be read or written
    #[error("token file {path}: {source}")]
    TokenFile {
        /// The token file
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },
}

/// What a client presents
#[derive(Clone, Serialize, Deserialize)]
pub struct Credentials {
    /// Claimed user name
    pub user: String,
    /// Shared secret
    pub secret: String,
}

impl Credentials {
    /// Create credentials
    pub fn new(user: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            secret: secret.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// An authenticated user
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    /// User name
    pub user: String,
}

impl Identity {
    /// Create an identity
    pub fn new(user: impl Into<String>) -> Self {
        Self { user: user.into() }
    }

    /// The user running this process
    #[must_use]
    pub fn local() -> Self {
        let user = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_else(|_| "local".to_string());
        Self { user }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.user)
    }
}

/// Decides whether credentials are good
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Check credentials, returning who they belong to
    async fn authenticate(&self, credentials: &Credentials) -> Result<Identity, AuthError>;
}

/// Server token
#[derive(Clone)]
pub struct SessionToken {
    bytes: [u8; TOKEN_SIZE],
}

impl SessionToken {
    /// Generate a new random token
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; TOKEN_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Parse a hex-encoded token
    ///
    /// # Errors
    ///
    /// [`AuthError::InvalidToken`] if the text is not `2 * TOKEN_SIZE` hex
    /// digits.
    pub fn from_hex(encoded: &str) -> Result<Self, AuthError> {
        let decoded =
            hex::decode(encoded.trim()).map_err(|e| AuthError::InvalidToken(e.to_string()))?;
        let bytes: [u8; TOKEN_SIZE] = decoded.try_into().map_err(|v: Vec<u8>| {
            AuthError::InvalidToken(format!("expected {TOKEN_SIZE} bytes, got {}", v.len()))
        })?;
        Ok(Self { bytes })
    }

    /// Hex encoding
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }

    /// Write the token to a file readable only by the owner
    ///
    /// Missing parent directories are created with 0o700 permissions.
    ///
    /// # Errors
    ///
    /// [`AuthError::TokenFile`] on any I/O failure.
    pub fn write_to_file(&self, path: &Path) -> Result<(), AuthError> {
        let io_err = |source| AuthError::TokenFile {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(io_err)?;
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                        .map_err(io_err)?;
                }
            }
        }

        let mut file = File::create(path).map_err(io_err)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(fs::Permissions::from_mode(0o600))
                .map_err(io_err)?;
        }
        file.write_all(self.to_hex().as_bytes()).map_err(io_err)?;
        file.write_all(b"\n").map_err(io_err)?;
        file.sync_all().map_err(io_err)?;

        tracing::debug!(path = %path.display(), "Server token written");
        Ok(())
    }

    /// Read a token file
    ///
    /// # Errors
    ///
    /// [`AuthError::TokenFile`] if the file cannot be read,
    /// [`AuthError::InvalidToken`] if its content is malformed.
    pub fn read_from_file(path: &Path) -> Result<Self, AuthError> {
        let contents = fs::read_to_string(path).map_err(|source| AuthError::TokenFile {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_hex(&contents)
    }

    /// Constant-time check of a presented secret
    #[must_use]
    pub fn validate(&self, provided: &str) -> bool {
        match Self::from_hex(provided) {
            Ok(other) => constant_time_compare(&self.bytes, &other.bytes),
            Err(_) => false,
        }
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionToken([REDACTED])")
    }
}

/// Default token file location
///
/// `$XDG_RUNTIME_DIR/termplex/server.token`, falling back to the local data
/// directory and finally the temp directory.
#[must_use]
pub fn default_token_path() -> PathBuf {
    dirs::runtime_dir()
        .or_else(dirs::data_local_dir)
        .unwrap_or_else(std::env::temp_dir)
        .join(RUNTIME_DIR_NAME)
        .join(TOKEN_FILENAME)
}

fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Shared-token authenticator with an optional user allow-list
#[derive(Debug)]
pub struct TokenAuthenticator {
    token: SessionToken,
    allowed_users: Option<HashSet<String>>,
}

impl TokenAuthenticator {
    /// Accept any user presenting `token`
    #[must_use]
    pub fn new(token: SessionToken) -> Self {
        Self {
            token,
            allowed_users: None,
        }
    }

    /// Restrict to the given users
    #[must_use]
    pub fn allow_users<I, S>(mut self, users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_users = Some(users.into_iter().map(Into::into).collect());
        self
    }
}

#[async_trait]
impl Authenticator for TokenAuthenticator {
    async fn authenticate(&self, credentials: &Credentials) -> Result<Identity, AuthError> {
        // Check the secret first so an unknown user and a bad secret take
        // the same path.
        if !self.token.validate(&credentials.secret) {
            return Err(AuthError::InvalidCredentials(credentials.user.clone()));
        }
        if let Some(allowed) = &self.allowed_users {
            if !allowed.contains(&credentials.user) {
                return Err(AuthError::UserNotAllowed(credentials.user.clone()));
            }
        }
        Ok(Identity::new(credentials.user.clone()))
    }
}

/// Refuses everyone
#[derive(Clone, Copy, Debug, Default)]
pub struct DenyAll;

#[async_trait]
impl Authenticator for DenyAll {
    async fn authenticate(&self, _credentials: &Credentials) -> Result<Identity, AuthError> {
        Err(AuthError::Disabled)
    }
}
