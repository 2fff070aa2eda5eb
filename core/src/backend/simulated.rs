//! Simulated Terminal
//!
//! In-memory backend driven by a script. Tests hold a [`SimulatedHandle`]
//! to feed events and inspect what the display wrote.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{BackendEvent, TerminalBackend};
use crate::canvas::Size;
use crate::error::BackendError;
use crate::input::{InputDecoder, InputEvent, KeyEvent};

#[derive(Debug)]
enum Script {
    Event(BackendEvent),
    Bytes(Vec<u8>),
    Fail(String),
}

#[derive(Debug, Default)]
struct Recorded {
    output: Mutex<Vec<u8>>,
    writes: AtomicUsize,
    opened: AtomicBool,
    closed: AtomicBool,
    stall_writes: AtomicBool,
    hang_on_close: AtomicBool,
}

/// Scriptable backend
#[derive(Debug)]
pub struct SimulatedTerminal {
    script: mpsc::UnboundedReceiver<Script>,
    recorded: Arc<Recorded>,
    decoder: InputDecoder,
    pending: VecDeque<BackendEvent>,
    size: Size,
    disconnected: bool,
}

/// Test-side control of a [`SimulatedTerminal`]
#[derive(Clone, Debug)]
pub struct SimulatedHandle {
    script: mpsc::UnboundedSender<Script>,
    recorded: Arc<Recorded>,
}

impl SimulatedTerminal {
    /// Create a terminal of the given geometry plus its control handle
    #[must_use]
    pub fn new(size: Size) -> (Self, SimulatedHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let recorded = Arc::new(Recorded::default());
        let terminal = Self {
            script: rx,
            recorded: Arc::clone(&recorded),
            decoder: InputDecoder::new(),
            pending: VecDeque::new(),
            size,
            disconnected: false,
        };
        (terminal, SimulatedHandle { script: tx, recorded })
    }
}

impl SimulatedHandle {
    fn push(&self, item: Script) {
        // The terminal may already be gone; scripts sent after that are moot.
        let _ = self.script.send(item);
    }

    /// Queue a raw backend event
    pub fn send(&self, event: BackendEvent) {
        self.push(Script::Event(event));
    }

    /// Queue a key press
    pub fn key(&self, key: impl Into<KeyEvent>) {
        self.send(BackendEvent::Input(InputEvent::Key(key.into())));
    }

    /// Queue a geometry change
    pub fn resize(&self, size: Size) {
        self.send(BackendEvent::Resize(size));
    }

    /// Queue raw bytes, decoded as a real terminal would
    pub fn bytes(&self, bytes: &[u8]) {
        self.push(Script::Bytes(bytes.to_vec()));
    }

    /// Queue a disconnect
    pub fn disconnect(&self) {
        self.send(BackendEvent::Disconnected);
    }

    /// Queue an I/O failure
    pub fn fail(&self, message: impl Into<String>) {
        self.push(Script::Fail(message.into()));
    }

    /// Make every subsequent write wait forever
    pub fn stall_writes(&self, stall: bool) {
        self.recorded.stall_writes.store(stall, Ordering::Release);
    }

    /// Make `close` wait forever
    pub fn hang_on_close(&self) {
        self.recorded.hang_on_close.store(true, Ordering::Release);
    }

    /// Everything written so far
    #[must_use]
    pub fn output(&self) -> Vec<u8> {
        self.recorded.output.lock().clone()
    }

    /// Everything written so far, lossily as text
    #[must_use]
    pub fn output_text(&self) -> String {
        String::from_utf8_lossy(&self.recorded.output.lock()).into_owned()
    }

    /// Forget recorded output
    pub fn clear_output(&self) {
        self.recorded.output.lock().clear();
    }

    /// Number of `write` calls
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.recorded.writes.load(Ordering::Acquire)
    }

    /// Whether `open` succeeded
    #[must_use]
    pub fn is_opened(&self) -> bool {
        self.recorded.opened.load(Ordering::Acquire)
    }

    /// Whether `close` completed
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.recorded.closed.load(Ordering::Acquire)
    }
}

#[async_trait]
impl TerminalBackend for SimulatedTerminal {
    fn name(&self) -> &'static str {
        "simulated"
    }

    async fn open(&mut self) -> Result<Size, BackendError> {
        self.recorded.opened.store(true, Ordering::Release);
        Ok(self.size)
    }

    async fn next_event(&mut self) -> Result<BackendEvent, BackendError> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Ok(event);
            }
            if self.disconnected {
                return Ok(BackendEvent::Disconnected);
            }
            match self.script.recv().await {
                Some(Script::Event(event)) => {
                    if let BackendEvent::Resize(size) = event {
                        self.size = size;
                    }
                    if event == BackendEvent::Disconnected {
                        self.disconnected = true;
                    }
                    return Ok(event);
                }
                Some(Script::Bytes(bytes)) => {
                    self.decoder.push(&bytes);
                    while let Some(item) = self.decoder.next() {
                        self.pending.push_back(match item {
                            Ok(event) => BackendEvent::Input(event),
                            Err(err) => BackendEvent::Undecodable(err),
                        });
                    }
                    if let Some(esc) = self.decoder.flush() {
                        self.pending.push_back(BackendEvent::Input(esc));
                    }
                }
                Some(Script::Fail(message)) => {
                    return Err(BackendError::Io(io::Error::other(message)));
                }
                None => self.disconnected = true,
            }
        }
    }

    fn size(&self) -> Size {
        self.size
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<(), BackendError> {
        if !self.recorded.opened.load(Ordering::Acquire) {
            return Err(BackendError::NotOpen);
        }
        if self.recorded.stall_writes.load(Ordering::Acquire) {
            std::future::pending::<()>().await;
        }
        self.recorded.output.lock().extend_from_slice(bytes);
        self.recorded.writes.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), BackendError> {
        if self.recorded.hang_on_close.load(Ordering::Acquire) {
            std::future::pending::<()>().await;
        }
        self.recorded.opened.store(false, Ordering::Release);
        self.recorded.closed.store(true, Ordering::Release);
        Ok(())
    }
}
