//! Attach - Remote Session Client
//!
//! Connects the local tty to a session server: stdin bytes go up as
//! `Input` frames untouched (the server's pty decodes them), `Output` frames
//! are written straight to stdout, and `SIGWINCH` becomes a `Resize` frame.
//!
//! ```text
//!  stdin ──▶ RemoteSender ──────▶ server pty ──▶ display
//!  stdout ◀── RemoteReceiver ◀── server pty ◀── display
//! ```

use std::net::SocketAddr;

use anyhow::Context;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use termplex_core::server::{RemoteReceiver, RemoteSender, ServerFrame, MAX_COLS, MAX_ROWS};
use termplex_core::{Credentials, RemoteClient, Size};

use crate::local::RawModeGuard;

const STDIN_BUFFER_SIZE: usize = 1024;

/// How an attached session ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Detach {
    /// The server closed the display
    Goodbye(String),
    /// The server went away without saying goodbye
    ServerHungUp,
    /// Local stdin reached EOF
    InputClosed,
}

impl std::fmt::Display for Detach {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Goodbye(reason) => write!(f, "session closed: {reason}"),
            Self::ServerHungUp => write!(f, "server hung up"),
            Self::InputClosed => write!(f, "input closed"),
        }
    }
}

/// Attach this terminal to a remote session until it ends
///
/// # Errors
///
/// Connection, handshake or terminal failures.
pub async fn run(addr: SocketAddr, credentials: &Credentials) -> anyhow::Result<Detach> {
    let size = terminal_size().context("reading terminal size")?;
    let term = std::env::var("TERM").ok();
    let client = RemoteClient::connect(addr, credentials, size, term)
        .await
        .with_context(|| format!("attaching to {addr}"))?;
    tracing::info!(%addr, session = client.session_id(), "Attached");

    let _raw = RawModeGuard::enter(false).context("entering raw mode")?;
    let (sender, receiver) = client.into_split();

    let detach = tokio::select! {
        detach = forward_output(receiver) => detach?,
        detach = forward_input(sender) => detach?,
    };
    tracing::info!(%detach, "Detached");
    Ok(detach)
}

async fn forward_output(mut receiver: RemoteReceiver) -> anyhow::Result<Detach> {
    let mut stdout = tokio::io::stdout();
    loop {
        match receiver.next_frame().await? {
            Some(ServerFrame::Output { bytes }) => {
                stdout.write_all(&bytes).await?;
                stdout.flush().await?;
            }
            Some(ServerFrame::Goodbye { reason }) => return Ok(Detach::Goodbye(reason)),
            Some(other) => tracing::debug!(frame = other.name(), "Ignoring frame"),
            None => return Ok(Detach::ServerHungUp),
        }
    }
}

async fn forward_input(mut sender: RemoteSender) -> anyhow::Result<Detach> {
    let mut stdin = tokio::io::stdin();
    let mut buf = vec![0u8; STDIN_BUFFER_SIZE];
    let mut winch = resize_signal()?;

    loop {
        tokio::select! {
            read = stdin.read(&mut buf) => {
                let n = read?;
                if n == 0 {
                    sender.bye().await?;
                    return Ok(Detach::InputClosed);
                }
                sender.send_input(&buf[..n]).await?;
            }
            () = next_resize(&mut winch) => {
                sender.resize(terminal_size()?).await?;
            }
        }
    }
}

/// Local terminal size, capped at what the server accepts
fn terminal_size() -> std::io::Result<Size> {
    let (cols, rows) = crossterm::terminal::size()?;
    Ok(clamp_size(cols, rows))
}

fn clamp_size(cols: u16, rows: u16) -> Size {
    Size::new(cols.min(MAX_COLS), rows.min(MAX_ROWS))
}

#[cfg(unix)]
type ResizeSignal = Option<tokio::signal::unix::Signal>;
#[cfg(not(unix))]
type ResizeSignal = Option<()>;

#[cfg(unix)]
fn resize_signal() -> std::io::Result<ResizeSignal> {
    use tokio::signal::unix::{signal, SignalKind};
    Ok(Some(signal(SignalKind::window_change())?))
}

#[cfg(not(unix))]
fn resize_signal() -> std::io::Result<ResizeSignal> {
    Ok(None)
}

async fn next_resize(signal: &mut ResizeSignal) {
    #[cfg(unix)]
    if let Some(signal) = signal {
        if signal.recv().await.is_some() {
            return;
        }
    }
    #[cfg(not(unix))]
    let _ = signal;
    std::future::pending().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detach_display() {
        assert_eq!(
            Detach::Goodbye("display closed".into()).to_string(),
            "session closed: display closed"
        );
        assert_eq!(Detach::ServerHungUp.to_string(), "server hung up");
    }

    #[test]
    fn test_clamp_size() {
        assert_eq!(clamp_size(80, 24), Size::new(80, 24));
        assert_eq!(clamp_size(u16::MAX, 30), Size::new(MAX_COLS, 30));
        assert_eq!(clamp_size(100, u16::MAX), Size::new(100, MAX_ROWS));
    }
}
