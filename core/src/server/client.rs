//! Remote Client
//!
//! The other end of [`SessionServer`](super::SessionServer): connects,
//! performs the `Hello` handshake and then exchanges input and output
//! frames.
//!
//! # Usage
//!
//! ```ignore
//! let creds = Credentials::new("alice", token.to_hex());
//! let mut client = RemoteClient::connect(addr, &creds, Size::new(80, 24), None).await?;
//! client.send_input(b"q").await?;
//! while let Some(frame) = client.next_frame().await? {
//!     // ...
//! }
//! ```

use std::net::SocketAddr;

use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::debug;

use crate::canvas::Size;
use crate::error::ProtocolError;
use crate::server::auth::Credentials;
use crate::server::frame::{encode, read_frame, FrameDecoder};
use crate::server::protocol::{ClientFrame, ServerFrame};

const READ_BUFFER_SIZE: usize = 8192;

/// Client-side failures
#[derive(Debug, Error)]
pub enum ClientError {
    /// Socket failure
    #[error("connection error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame could not be encoded
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The server refused the session
    #[error("session rejected: {0}")]
    Rejected(String),

    /// The server hung up during the handshake
    #[error("server closed the connection")]
    Disconnected,
}

/// Sending half of a remote session
#[derive(Debug)]
pub struct RemoteSender {
    writer: OwnedWriteHalf,
}

impl RemoteSender {
    async fn send(&mut self, frame: &ClientFrame) -> Result<(), ClientError> {
        let bytes = encode(frame)?;
        self.writer.write_all(&bytes).await?;
        Ok(())
    }

    /// Forward raw terminal input
    ///
    /// # Errors
    ///
    /// Socket failure.
    pub async fn send_input(&mut self, bytes: &[u8]) -> Result<(), ClientError> {
        self.send(&ClientFrame::Input {
            bytes: bytes.to_vec(),
        })
        .await
    }

    /// Report a new terminal size
    ///
    /// # Errors
    ///
    /// Socket failure.
    pub async fn resize(&mut self, size: Size) -> Result<(), ClientError> {
        self.send(&ClientFrame::Resize {
            cols: size.cols,
            rows: size.rows,
        })
        .await
    }

    /// Say goodbye and shut the write side down
    ///
    /// # Errors
    ///
    /// Socket failure.
    pub async fn bye(&mut self) -> Result<(), ClientError> {
        self.send(&ClientFrame::Bye).await?;
        self.writer.shutdown().await?;
        Ok(())
    }
}

/// Receiving half of a remote session
#[derive(Debug)]
pub struct RemoteReceiver {
    reader: OwnedReadHalf,
    decoder: FrameDecoder,
    buf: Vec<u8>,
}

impl RemoteReceiver {
    /// Next frame from the server, `None` once the server hangs up
    ///
    /// Cancel-safe.
    ///
    /// # Errors
    ///
    /// Socket failure.
    pub async fn next_frame(&mut self) -> Result<Option<ServerFrame>, ClientError> {
        Ok(read_frame::<ServerFrame, _>(&mut self.reader, &mut self.decoder, &mut self.buf).await?)
    }
}

/// An attached remote session
#[derive(Debug)]
pub struct RemoteClient {
    session_id: String,
    sender: RemoteSender,
    receiver: RemoteReceiver,
}

impl RemoteClient {
    /// Connect to `addr` and open a session
    ///
    /// # Errors
    ///
    /// [`ClientError::Rejected`] if the server refuses (bad credentials,
    /// no capacity, shutting down), [`ClientError::Disconnected`] if it hangs
    /// up first, [`ClientError::Io`] for socket failures.
    pub async fn connect(
        addr: SocketAddr,
        credentials: &Credentials,
        size: Size,
        term: Option<String>,
    ) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();
        let mut sender = RemoteSender { writer };
        let mut receiver = RemoteReceiver {
            reader,
            decoder: FrameDecoder::new(),
            buf: vec![0u8; READ_BUFFER_SIZE],
        };

        sender.send(&ClientFrame::hello(credentials, size, term)).await?;
        loop {
            match receiver.next_frame().await? {
                Some(ServerFrame::Accepted { session_id }) => {
                    debug!(%addr, session = %session_id, "Session accepted");
                    return Ok(Self {
                        session_id,
                        sender,
                        receiver,
                    });
                }
                Some(ServerFrame::Rejected { reason }) => return Err(ClientError::Rejected(reason)),
                Some(ServerFrame::Goodbye { reason }) => return Err(ClientError::Rejected(reason)),
                Some(other) => {
                    debug!(frame = other.name(), "Ignoring frame before acceptance");
                }
                None => return Err(ClientError::Disconnected),
            }
        }
    }

    /// Id the server assigned to this session
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// See [`RemoteSender::send_input`]
    ///
    /// # Errors
    ///
    /// Socket failure.
    pub async fn send_input(&mut self, bytes: &[u8]) -> Result<(), ClientError> {
        self.sender.send_input(bytes).await
    }

    /// See [`RemoteSender::resize`]
    ///
    /// # Errors
    ///
    /// Socket failure.
    pub async fn resize(&mut self, size: Size) -> Result<(), ClientError> {
        self.sender.resize(size).await
    }

    /// See [`RemoteSender::bye`]
    ///
    /// # Errors
    ///
    /// Socket failure.
    pub async fn bye(&mut self) -> Result<(), ClientError> {
        self.sender.bye().await
    }

    /// See [`RemoteReceiver::next_frame`]
    ///
    /// # Errors
    ///
    /// Socket failure.
    pub async fn next_frame(&mut self) -> Result<Option<ServerFrame>, ClientError> {
        self.receiver.next_frame().await
    }

    /// Split into halves that can be driven from separate tasks
    #[must_use]
    pub fn into_split(self) -> (RemoteSender, RemoteReceiver) {
        (self.sender, self.receiver)
    }
}
