//! Wire Protocol
//!
//! Frames exchanged between a remote client and the session server, carried
//! by the [`frame`](super::frame) codec.
//!
//! # Conversation
//!
//! ```text
//!  client                              server
//!    │── Hello {user, secret, size} ──▶  │  authenticate, allocate, spawn
//!    │◀── Accepted {session_id} ───────  │      (or Rejected {reason}, close)
//!    │── Input / Resize ──────────────▶  │
//!    │◀── Output ──────────────────────  │
//!    │── Bye ─────────────────────────▶  │      (or Goodbye {reason})
//! ```

use serde::{Deserialize, Serialize};

use crate::canvas::Size;
use crate::error::ProtocolError;
use crate::server::auth::Credentials;

/// Protocol version spoken by this build
pub const PROTOCOL_VERSION: u32 = 1;

/// Widest terminal a remote session may claim
pub const MAX_COLS: u16 = 512;

/// Tallest terminal a remote session may claim
pub const MAX_ROWS: u16 = 256;

/// Validate a client-supplied terminal size
///
/// Every display allocates several screen-sized canvases, so the size a
/// client sends is bounded before anything is allocated for it.
///
/// # Errors
///
/// [`ProtocolError::GeometryTooLarge`] past [`MAX_COLS`] or [`MAX_ROWS`].
pub fn checked_size(cols: u16, rows: u16) -> Result<Size, ProtocolError> {
    if cols > MAX_COLS || rows > MAX_ROWS {
        return Err(ProtocolError::GeometryTooLarge {
            cols,
            rows,
            max_cols: MAX_COLS,
            max_rows: MAX_ROWS,
        });
    }
    Ok(Size::new(cols, rows))
}

/// Client to server
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Opening frame: who is connecting and how big their terminal is
    Hello {
        /// Claimed user
        user: String,
        /// Shared secret
        secret: String,
        /// Terminal columns
        cols: u16,
        /// Terminal rows
        rows: u16,
        /// Terminal type, e.g. `xterm-256color`
        #[serde(default, skip_serializing_if = "Option::is_none")]
        term: Option<String>,
    },
    /// Raw terminal input
    Input {
        /// Bytes as typed
        bytes: Vec<u8>,
    },
    /// Terminal geometry changed
    Resize {
        /// Columns
        cols: u16,
        /// Rows
        rows: u16,
    },
    /// Client is detaching
    Bye,
}

impl ClientFrame {
    /// Build a `Hello` frame
    #[must_use]
    pub fn hello(credentials: &Credentials, size: Size, term: Option<String>) -> Self {
        Self::Hello {
            user: credentials.user.clone(),
            secret: credentials.secret.clone(),
            cols: size.cols,
            rows: size.rows,
            term,
        }
    }

    /// Short name for logs
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Hello { .. } => "hello",
            Self::Input { .. } => "input",
            Self::Resize { .. } => "resize",
            Self::Bye => "bye",
        }
    }
}

/// Server to client
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Session is up
    Accepted {
        /// Id of the new session
        session_id: String,
    },
    /// Session refused; the connection closes next
    Rejected {
        /// Why
        reason: String,
    },
    /// Encoded terminal output
    Output {
        /// Escape sequences and text
        bytes: Vec<u8>,
    },
    /// The display closed; the connection closes next
    Goodbye {
        /// Why
        reason: String,
    },
}

impl ServerFrame {
    /// Short name for logs
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Accepted { .. } => "accepted",
            Self::Rejected { .. } => "rejected",
            Self::Output { .. } => "output",
            Self::Goodbye { .. } => "goodbye",
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_client_frame_json_shape() {
        let frame = ClientFrame::Resize { cols: 80, rows: 24 };
        let json = serde_json::to_string(&frame).unwrap();
        assert_eq!(json, r#"{"type":"resize","cols":80,"rows":24}"#);

        let bye: ClientFrame = serde_json::from_str(r#"{"type":"bye"}"#).unwrap();
        assert_eq!(bye, ClientFrame::Bye);
    }

    #[test]
    fn test_hello_without_term() {
        let hello: ClientFrame = serde_json::from_str(
            r#"{"type":"hello","user":"alice","secret":"s","cols":10,"rows":5}"#,
        )
        .unwrap();
        assert_eq!(
            hello,
            ClientFrame::Hello {
                user: "alice".into(),
                secret: "s".into(),
                cols: 10,
                rows: 5,
                term: None,
            }
        );
    }

    #[test]
    fn test_checked_size_bounds() {
        assert_eq!(checked_size(80, 24).unwrap(), Size::new(80, 24));
        assert_eq!(
            checked_size(MAX_COLS, MAX_ROWS).unwrap(),
            Size::new(MAX_COLS, MAX_ROWS)
        );
        assert!(matches!(
            checked_size(MAX_COLS + 1, 24),
            Err(ProtocolError::GeometryTooLarge { cols, .. }) if cols == MAX_COLS + 1
        ));
        assert!(checked_size(80, u16::MAX).is_err());
    }

    #[test]
    fn test_server_frame_names() {
        assert_eq!(
            ServerFrame::Rejected {
                reason: "no".into()
            }
            .name(),
            "rejected"
        );
        assert_eq!(ClientFrame::Bye.name(), "bye");
    }
}
