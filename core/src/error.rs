//! Error Taxonomy
//!
//! Every fallible operation in the crate returns one of these. The narrow
//! errors are scoped to the component that raises them; [`MuxError`] wraps
//! them all for callers that cross component boundaries.
//!
//! | Error | Effect |
//! |-------|--------|
//! | [`BackendError`] | closes the affected display only |
//! | [`ProtocolError`] | logged, the offending event or frame is dropped |
//! | [`AuthError`] | the connection is refused |
//! | [`ConfigError`] | fatal at startup |
//! | [`MuxError::ResourceExhausted`] | the connection is refused |

use thiserror::Error;

use crate::object::ObjectId;
pub use crate::config::ConfigError;
pub use crate::server::auth::AuthError;

/// I/O failure or loss of a terminal backend
#[derive(Debug, Error)]
pub enum BackendError {
    /// Read or write failed
    #[error("backend i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer went away
    #[error("backend closed")]
    Closed,

    /// Operation attempted before `open` or after `close`
    #[error("backend is not open")]
    NotOpen,
}

/// Malformed input or wire data
///
/// Never fatal. The event or frame that produced it is dropped.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// Bytes that are not valid UTF-8
    #[error("invalid utf-8 input: {0:02x?}")]
    InvalidUtf8(Vec<u8>),

    /// An escape sequence the decoder does not know
    #[error("unrecognized escape sequence: {0:02x?}")]
    UnrecognizedSequence(Vec<u8>),

    /// An escape sequence that never terminated
    #[error("escape sequence exceeds {0} bytes")]
    SequenceTooLong(usize),

    /// A frame larger than the transport accepts
    #[error("frame size {0} exceeds maximum")]
    FrameTooLarge(usize),

    /// Frame payload corrupted in transit
    #[error("checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        /// Checksum carried in the frame header
        expected: u32,
        /// Checksum computed over the payload
        actual: u32,
    },

    /// Payload could not be (de)serialized
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A terminal size beyond what a session may claim
    #[error("terminal size {cols}x{rows} exceeds {max_cols}x{max_rows}")]
    GeometryTooLarge {
        /// Claimed columns
        cols: u16,
        /// Claimed rows
        rows: u16,
        /// Column limit
        max_cols: u16,
        /// Row limit
        max_rows: u16,
    },

    /// A well-formed frame arriving at the wrong point of the conversation
    #[error("unexpected frame: {0}")]
    UnexpectedFrame(String),
}

/// Top-level error for the multiplexer and application
#[derive(Debug, Error)]
pub enum MuxError {
    /// Terminal backend failure
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// Malformed input or wire data
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Credentials rejected
    #[error("authentication failed: {0}")]
    Authentication(#[from] AuthError),

    /// Invalid configuration or unusable listen address
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// A bounded pool ran out
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Work refused because the application is terminating
    #[error("application is shutting down")]
    ShuttingDown,

    /// A window or object id that is not (or no longer) in the tree
    #[error("unknown object {0}")]
    UnknownObject(ObjectId),

    /// No constructor registered for an object kind
    #[error("unknown object kind '{0}'")]
    UnknownKind(String),
}

impl MuxError {
    /// Whether this error should stop the process at startup
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error_display() {
        let err = ProtocolError::ChecksumMismatch {
            expected: 0xdead_beef,
            actual: 1,
        };
        assert_eq!(
            err.to_string(),
            "checksum mismatch: expected 0xdeadbeef, got 0x00000001"
        );
    }

    #[test]
    fn test_backend_error_wraps_into_mux() {
        let err: MuxError = BackendError::Closed.into();
        assert!(matches!(err, MuxError::Backend(BackendError::Closed)));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_config_error_is_fatal() {
        let err: MuxError = ConfigError::Invalid("grace_period_ms must be > 0".into()).into();
        assert!(err.is_fatal());
    }
}
