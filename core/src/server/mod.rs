//! Session Multiplexer
//!
//! Accepts remote terminals over TCP and gives each authenticated one its
//! own display.
//!
//! # Per-connection flow
//!
//! ```text
//!  accept ─▶ Hello (≤ handshake_timeout) ─▶ authenticate ─▶ allocate pty
//!                                               │               │
//!                                           Rejected        Rejected
//!                                                               │
//!          spawn_display ─▶ Accepted ─▶ pump ◀──────────────────┘ (ok)
//!                                        │
//!            EOF / Bye / transport error ┴─ display closed ─▶ Goodbye
//!                         │
//!              hang up pty, wait for Closed
//! ```
//!
//! Nothing about a session exists until authentication succeeds: a refused
//! client never allocates a pseudo terminal and never reaches a display.
//! Per-connection failures are logged and end that connection only; the
//! accept loop keeps going.

pub mod auth;
pub mod client;
pub mod frame;
pub mod protocol;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

use crate::application::Application;
use crate::backend::{PtyPool, PtyReader, PtyWriter};
use crate::config::ConfigError;
use crate::error::MuxError;
use crate::scene::Scene;
use crate::session::{Session, SessionId, SessionOrigin};

pub use auth::{Authenticator, Credentials, Identity};
pub use client::{ClientError, RemoteClient, RemoteReceiver, RemoteSender};
pub use frame::{read_frame, write_frame, FrameDecoder, MAX_FRAME_SIZE};
pub use protocol::{checked_size, ClientFrame, ServerFrame, MAX_COLS, MAX_ROWS};

/// Socket read buffer size
const READ_BUFFER_SIZE: usize = 8192;

/// Builds the scene of each remote session
pub type SceneBuilder = Arc<dyn Fn(&mut Scene) -> Result<(), MuxError> + Send + Sync>;

/// Statistics for one live session
#[derive(Clone, Debug)]
pub struct SessionStats {
    /// Session id
    pub session_id: SessionId,
    /// Authenticated user
    pub user: String,
    /// Remote address
    pub peer: SocketAddr,
    /// Session uptime in seconds
    pub uptime_secs: u64,
    /// Input bytes received from the client
    pub bytes_in: u64,
    /// Output bytes sent to the client
    pub bytes_out: u64,
}

/// Accept/refuse counters since startup
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ServerCounters {
    /// Connections accepted by the listener
    pub connections: u64,
    /// Sessions established
    pub accepted: u64,
    /// Connections refused before a session existed
    pub rejected: u64,
}

#[derive(Debug)]
struct SessionState {
    user: String,
    peer: SocketAddr,
    started: Instant,
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
}

#[derive(Debug, Default)]
struct Counters {
    connections: AtomicU64,
    accepted: AtomicU64,
    rejected: AtomicU64,
}

struct Shared {
    app: Application,
    auth: Arc<dyn Authenticator>,
    pool: PtyPool,
    handshake_timeout: Duration,
    scene: SceneBuilder,
    sessions: DashMap<SessionId, Arc<SessionState>>,
    counters: Counters,
}

/// How a pumping session ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PumpEnd {
    ClientEof,
    ClientBye,
    TransportError,
    DisplayClosed,
}

/// TCP front end creating one display per authenticated connection
pub struct SessionServer {
    shared: Arc<Shared>,
    listener: Option<TcpListener>,
}

impl std::fmt::Debug for SessionServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionServer")
            .field("local_addr", &self.local_addr())
            .field("sessions", &self.shared.sessions.len())
            .field("pool_live", &self.shared.pool.live())
            .finish()
    }
}

impl SessionServer {
    /// Create a server for `app`, sized from its configuration
    #[must_use]
    pub fn new(app: Application, auth: Arc<dyn Authenticator>) -> Self {
        let pool = PtyPool::new(app.config().max_sessions);
        let handshake_timeout = app.config().handshake_timeout;
        Self {
            shared: Arc::new(Shared {
                app,
                auth,
                pool,
                handshake_timeout,
                scene: Arc::new(|_| Ok(())),
                sessions: DashMap::new(),
                counters: Counters::default(),
            }),
            listener: None,
        }
    }

    /// Build each session's scene with `builder`
    ///
    /// Only takes effect before the server starts handing out connections.
    #[must_use]
    pub fn with_scene<F>(mut self, builder: F) -> Self
    where
        F: Fn(&mut Scene) -> Result<(), MuxError> + Send + Sync + 'static,
    {
        if let Some(shared) = Arc::get_mut(&mut self.shared) {
            shared.scene = Arc::new(builder);
        }
        self
    }

    /// Bind the listener
    ///
    /// Returns the bound address (useful with port 0).
    ///
    /// # Errors
    ///
    /// [`MuxError::Configuration`] with [`ConfigError::Bind`] if the address
    /// cannot be bound.
    pub async fn listen(&mut self, addr: SocketAddr) -> Result<SocketAddr, MuxError> {
        let bind_err = |source| ConfigError::Bind {
            addr: addr.to_string(),
            source,
        };
        let listener = TcpListener::bind(addr).await.map_err(bind_err)?;
        let local = listener.local_addr().map_err(bind_err)?;
        info!(addr = %local, max_sessions = self.shared.pool.capacity(), "Listening for sessions");
        self.listener = Some(listener);
        Ok(local)
    }

    /// Bound address, once listening
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    /// Accept connections until `shutdown` is cancelled
    ///
    /// # Errors
    ///
    /// [`MuxError::Configuration`] if [`SessionServer::listen`] was not
    /// called first.
    pub async fn serve(&self, shutdown: CancellationToken) -> Result<(), MuxError> {
        let listener = self
            .listener
            .as_ref()
            .ok_or_else(|| ConfigError::Invalid("server is not listening".into()))?;

        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    info!("Shutdown requested, stopping accept loop");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => self.spawn_connection(stream, peer),
                    Err(e) => {
                        error!(error = %e, "Accept failed");
                    }
                },
            }
        }
        Ok(())
    }

    fn spawn_connection(&self, stream: TcpStream, peer: SocketAddr) {
        let connection = self.shared.counters.connections.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(%peer, connection, "Connection accepted");
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "Could not disable Nagle");
        }
        let shared = Arc::clone(&self.shared);
        tokio::spawn(
            handle_connection(shared, stream, peer)
                .instrument(tracing::info_span!("connection", %peer, connection)),
        );
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    /// Live sessions
    #[must_use]
    pub fn sessions(&self) -> Vec<SessionStats> {
        self.shared
            .sessions
            .iter()
            .map(|entry| {
                let state = entry.value();
                SessionStats {
                    session_id: *entry.key(),
                    user: state.user.clone(),
                    peer: state.peer,
                    uptime_secs: state.started.elapsed().as_secs(),
                    bytes_in: state.bytes_in.load(Ordering::Relaxed),
                    bytes_out: state.bytes_out.load(Ordering::Relaxed),
                }
            })
            .collect()
    }

    /// Number of live sessions
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.shared.sessions.len()
    }

    /// Counters since startup
    #[must_use]
    pub fn counters(&self) -> ServerCounters {
        let c = &self.shared.counters;
        ServerCounters {
            connections: c.connections.load(Ordering::Relaxed),
            accepted: c.accepted.load(Ordering::Relaxed),
            rejected: c.rejected.load(Ordering::Relaxed),
        }
    }

    /// The pseudo terminal pool
    #[must_use]
    pub fn pool(&self) -> &PtyPool {
        &self.shared.pool
    }
}

// ============================================================================
// Connection handling
// ============================================================================

async fn handle_connection(shared: Arc<Shared>, stream: TcpStream, peer: SocketAddr) {
    let (mut reader, mut writer) = stream.into_split();
    let mut decoder = FrameDecoder::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    let hello = tokio::time::timeout(
        shared.handshake_timeout,
        read_frame::<ClientFrame, _>(&mut reader, &mut decoder, &mut buf),
    )
    .await;
    let (credentials, (cols, rows), term) = match hello {
        Ok(Ok(Some(ClientFrame::Hello {
            user,
            secret,
            cols,
            rows,
            term,
        }))) => (Credentials::new(user, secret), (cols, rows), term),
        Ok(Ok(Some(other))) => {
            warn!(frame = other.name(), "Expected hello");
            refuse(&shared, &mut writer, "expected hello").await;
            return;
        }
        Ok(Ok(None)) => {
            debug!("Client left before hello");
            return;
        }
        Ok(Err(e)) => {
            warn!(error = %e, "Handshake read failed");
            return;
        }
        Err(_) => {
            warn!(timeout_ms = shared.handshake_timeout.as_millis() as u64, "Handshake timed out");
            refuse(&shared, &mut writer, "handshake timeout").await;
            return;
        }
    };

    let size = match checked_size(cols, rows) {
        Ok(size) => size,
        Err(e) => {
            warn!(user = %credentials.user, error = %e, "Refusing session");
            refuse(&shared, &mut writer, &e.to_string()).await;
            return;
        }
    };

    let identity = match shared.auth.authenticate(&credentials).await {
        Ok(identity) => identity,
        Err(e) => {
            warn!(user = %credentials.user, error = %e, "Authentication failed");
            refuse(&shared, &mut writer, "authentication failed").await;
            return;
        }
    };

    let (master, backend) = match shared.pool.allocate(size) {
        Ok(pair) => pair,
        Err(e) => {
            warn!(user = %identity, error = %e, "Refusing session");
            refuse(&shared, &mut writer, &e.to_string()).await;
            return;
        }
    };

    let mut session = Session::new(identity, SessionOrigin::Remote(peer), size);
    if let Some(term) = term {
        session = session.with_term(term);
    }
    let session_id = session.id;
    let user = session.identity.user.clone();

    let builder = Arc::clone(&shared.scene);
    let display = match shared
        .app
        .spawn_display(session, backend, move |scene| builder(scene))
    {
        Ok(display) => display,
        Err(e) => {
            warn!(error = %e, "Refusing session");
            refuse(&shared, &mut writer, &e.to_string()).await;
            return;
        }
    };

    if let Err(e) = write_frame(
        &mut writer,
        &ServerFrame::Accepted {
            session_id: session_id.to_string(),
        },
    )
    .await
    {
        warn!(error = %e, "Failed to confirm session");
        master.hangup();
        display.wait_closed().await;
        return;
    }

    let state = Arc::new(SessionState {
        user: user.clone(),
        peer,
        started: Instant::now(),
        bytes_in: AtomicU64::new(0),
        bytes_out: AtomicU64::new(0),
    });
    shared.sessions.insert(session_id, Arc::clone(&state));
    shared.counters.accepted.fetch_add(1, Ordering::Relaxed);
    info!(session = %session_id.short(), %user, %size, "Session accepted");

    let (mut pty_in, mut pty_out) = master.split();
    let end = tokio::select! {
        end = pump_input(&mut reader, &mut decoder, &mut buf, &mut pty_in, &state) => end,
        end = pump_output(&mut writer, &mut pty_out, &state) => end,
    };

    // Output still in flight is abandoned.
    pty_in.hangup();
    drop(pty_in);
    drop(pty_out);
    display.wait_closed().await;
    let _ = writer.shutdown().await;

    shared.sessions.remove(&session_id);
    info!(
        session = %session_id.short(),
        ending = ?end,
        uptime_secs = state.started.elapsed().as_secs(),
        bytes_in = state.bytes_in.load(Ordering::Relaxed),
        bytes_out = state.bytes_out.load(Ordering::Relaxed),
        "Session ended"
    );
}

async fn pump_input(
    reader: &mut OwnedReadHalf,
    decoder: &mut FrameDecoder,
    buf: &mut [u8],
    pty: &mut PtyWriter,
    state: &SessionState,
) -> PumpEnd {
    loop {
        let frame = match read_frame::<ClientFrame, _>(reader, decoder, buf).await {
            Ok(Some(frame)) => frame,
            Ok(None) => return PumpEnd::ClientEof,
            Err(e) => {
                warn!(error = %e, "Transport read failed");
                return PumpEnd::TransportError;
            }
        };
        let delivered = match frame {
            ClientFrame::Input { bytes } => {
                state
                    .bytes_in
                    .fetch_add(bytes.len() as u64, Ordering::Relaxed);
                pty.send_input(bytes).await
            }
            ClientFrame::Resize { cols, rows } => match checked_size(cols, rows) {
                Ok(size) => pty.resize(size).await,
                Err(e) => {
                    warn!(error = %e, "Dropping resize");
                    Ok(())
                }
            },
            ClientFrame::Bye => return PumpEnd::ClientBye,
            ClientFrame::Hello { .. } => {
                warn!("Ignoring repeated hello");
                Ok(())
            }
        };
        if delivered.is_err() {
            return PumpEnd::DisplayClosed;
        }
    }
}

async fn pump_output(
    writer: &mut OwnedWriteHalf,
    pty: &mut PtyReader,
    state: &SessionState,
) -> PumpEnd {
    while let Some(bytes) = pty.recv_output().await {
        let len = bytes.len() as u64;
        if let Err(e) = write_frame(writer, &ServerFrame::Output { bytes }).await {
            warn!(error = %e, "Transport write failed");
            return PumpEnd::TransportError;
        }
        state.bytes_out.fetch_add(len, Ordering::Relaxed);
    }
    let goodbye = ServerFrame::Goodbye {
        reason: "display closed".into(),
    };
    if let Err(e) = write_frame(writer, &goodbye).await {
        debug!(error = %e, "Could not send goodbye");
    }
    PumpEnd::DisplayClosed
}

async fn refuse(shared: &Shared, writer: &mut OwnedWriteHalf, reason: &str) {
    shared.counters.rejected.fetch_add(1, Ordering::Relaxed);
    let frame = ServerFrame::Rejected {
        reason: reason.to_string(),
    };
    if let Err(e) = write_frame(writer, &frame).await {
        debug!(error = %e, "Could not send rejection");
    }
    let _ = writer.shutdown().await;
}
