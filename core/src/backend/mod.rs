//! Terminal Backends
//!
//! A backend is the byte-level connection between a display and a physical
//! or virtual terminal. The display owns its backend exclusively; nothing
//! else reads from or writes to it.
//!
//! # Implementations
//!
//! - [`PtyBackend`]: the slave side of a virtual pseudo terminal, used for
//!   remote sessions
//! - [`SimulatedTerminal`]: scriptable in-memory backend for tests
//! - `LocalTerminal` (tui crate): the process's own tty via crossterm

pub mod pty;
pub mod simulated;

use async_trait::async_trait;

use crate::canvas::Size;
use crate::error::{BackendError, ProtocolError};
use crate::input::InputEvent;

pub use pty::{PtyBackend, PtyLease, PtyMaster, PtyPool, PtyReader, PtyWriter};
pub use simulated::{SimulatedHandle, SimulatedTerminal};

/// Something that happened on a backend
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BackendEvent {
    /// Decoded input
    Input(InputEvent),
    /// Terminal geometry changed
    Resize(Size),
    /// Bytes the decoder could not make sense of
    Undecodable(ProtocolError),
    /// The peer went away; no further events follow
    Disconnected,
}

/// Contract between a display and its terminal
#[async_trait]
pub trait TerminalBackend: Send {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Prepare the terminal and report its geometry
    async fn open(&mut self) -> Result<Size, BackendError>;

    /// Wait for the next event
    ///
    /// Must be cancel-safe: the display polls it inside `select!`, and a
    /// cancelled call must not lose an event.
    async fn next_event(&mut self) -> Result<BackendEvent, BackendError>;

    /// Last known geometry
    fn size(&self) -> Size;

    /// Write encoded output
    async fn write(&mut self, bytes: &[u8]) -> Result<(), BackendError>;

    /// Release the terminal
    async fn close(&mut self) -> Result<(), BackendError>;
}

#[async_trait]
impl<T: TerminalBackend + ?Sized> TerminalBackend for Box<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    async fn open(&mut self) -> Result<Size, BackendError> {
        (**self).open().await
    }

    async fn next_event(&mut self) -> Result<BackendEvent, BackendError> {
        (**self).next_event().await
    }

    fn size(&self) -> Size {
        (**self).size()
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<(), BackendError> {
        (**self).write(bytes).await
    }

    async fn close(&mut self) -> Result<(), BackendError> {
        (**self).close().await
    }
}
