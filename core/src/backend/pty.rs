//! Virtual Pseudo Terminals
//!
//! A virtual pseudo terminal is a pair of channels standing between a
//! network transport and a display:
//!
//! ```text
//!   transport                                    display
//!  ┌───────────┐   input / resize / hangup   ┌────────────┐
//!  │ PtyMaster │ ──────────────────────────▶ │ PtyBackend │
//!  │           │ ◀────────────────────────── │  (decoder) │
//!  └───────────┘          output             └────────────┘
//! ```
//!
//! Allocation goes through a bounded [`PtyPool`]. The slot is returned when
//! both halves have been dropped.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{BackendEvent, TerminalBackend};
use crate::canvas::Size;
use crate::error::{BackendError, MuxError};
use crate::input::{InputDecoder, ESC_TIMEOUT};

/// Channel depth between master and slave
pub const PTY_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug)]
enum PtyInput {
    Bytes(Vec<u8>),
    Resize(Size),
    Hangup,
}

#[derive(Debug, Default)]
struct PoolCounters {
    live: AtomicUsize,
    total: AtomicU64,
}

/// Bounded allocator of virtual pseudo terminals
#[derive(Clone, Debug)]
pub struct PtyPool {
    max: usize,
    counters: Arc<PoolCounters>,
}

/// Holds one pool slot; shared by both halves of a pty
#[derive(Debug)]
pub struct PtyLease {
    counters: Arc<PoolCounters>,
}

impl Drop for PtyLease {
    fn drop(&mut self) {
        self.counters.live.fetch_sub(1, Ordering::AcqRel);
    }
}

impl PtyPool {
    /// Create a pool allowing at most `max` live terminals
    #[must_use]
    pub fn new(max: usize) -> Self {
        Self {
            max,
            counters: Arc::new(PoolCounters::default()),
        }
    }

    /// Allocate a terminal of the given geometry
    ///
    /// # Errors
    ///
    /// [`MuxError::ResourceExhausted`] when `max` terminals are live.
    pub fn allocate(&self, size: Size) -> Result<(PtyMaster, PtyBackend), MuxError> {
        self.counters
            .live
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |live| {
                (live < self.max).then_some(live + 1)
            })
            .map_err(|live| {
                MuxError::ResourceExhausted(format!("pty pool full ({live}/{})", self.max))
            })?;
        self.counters.total.fetch_add(1, Ordering::Relaxed);

        let lease = Arc::new(PtyLease {
            counters: Arc::clone(&self.counters),
        });
        let (input_tx, input_rx) = mpsc::channel(PTY_CHANNEL_CAPACITY);
        let (output_tx, output_rx) = mpsc::channel(PTY_CHANNEL_CAPACITY);

        let master = PtyMaster {
            input: input_tx,
            output: output_rx,
            size,
            _lease: Arc::clone(&lease),
        };
        let backend = PtyBackend {
            input: input_rx,
            output: Some(output_tx),
            decoder: InputDecoder::new(),
            pending: VecDeque::new(),
            size,
            opened: false,
            hung_up: false,
            _lease: lease,
        };
        tracing::debug!(live = self.live(), max = self.max, %size, "Pty allocated");
        Ok((master, backend))
    }

    /// Terminals currently allocated
    #[must_use]
    pub fn live(&self) -> usize {
        self.counters.live.load(Ordering::Acquire)
    }

    /// Terminals allocated since the pool was created
    #[must_use]
    pub fn total_allocated(&self) -> u64 {
        self.counters.total.load(Ordering::Relaxed)
    }

    /// Pool capacity
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.max
    }
}

/// Transport-facing half of a virtual pty
#[derive(Debug)]
pub struct PtyMaster {
    input: mpsc::Sender<PtyInput>,
    output: mpsc::Receiver<Vec<u8>>,
    size: Size,
    _lease: Arc<PtyLease>,
}

impl PtyMaster {
    /// Feed bytes typed by the remote user
    ///
    /// # Errors
    ///
    /// [`BackendError::Closed`] once the display side is gone.
    pub async fn send_input(&self, bytes: Vec<u8>) -> Result<(), BackendError> {
        self.input
            .send(PtyInput::Bytes(bytes))
            .await
            .map_err(|_| BackendError::Closed)
    }

    /// Report a geometry change, in band with input
    ///
    /// # Errors
    ///
    /// [`BackendError::Closed`] once the display side is gone.
    pub async fn resize(&mut self, size: Size) -> Result<(), BackendError> {
        self.size = size;
        self.input
            .send(PtyInput::Resize(size))
            .await
            .map_err(|_| BackendError::Closed)
    }

    /// Tell the display the remote end is gone
    pub fn hangup(&self) {
        // A full queue still closes: dropping the master closes the channel.
        let _ = self.input.try_send(PtyInput::Hangup);
    }

    /// Wait for the next chunk of display output
    ///
    /// Returns `None` once the display has closed its side. Cancel-safe.
    pub async fn recv_output(&mut self) -> Option<Vec<u8>> {
        self.output.recv().await
    }

    /// Geometry as last reported by the transport
    #[must_use]
    pub fn size(&self) -> Size {
        self.size
    }

    /// Separate the input and output sides so both can be driven at once
    #[must_use]
    pub fn split(self) -> (PtyWriter, PtyReader) {
        let writer = PtyWriter {
            input: self.input,
            size: self.size,
            _lease: Arc::clone(&self._lease),
        };
        let reader = PtyReader {
            output: self.output,
            _lease: self._lease,
        };
        (writer, reader)
    }
}

/// Input side of a split [`PtyMaster`]
#[derive(Debug)]
pub struct PtyWriter {
    input: mpsc::Sender<PtyInput>,
    size: Size,
    _lease: Arc<PtyLease>,
}

impl PtyWriter {
    /// See [`PtyMaster::send_input`]
    ///
    /// # Errors
    ///
    /// [`BackendError::Closed`] once the display side is gone.
    pub async fn send_input(&self, bytes: Vec<u8>) -> Result<(), BackendError> {
        self.input
            .send(PtyInput::Bytes(bytes))
            .await
            .map_err(|_| BackendError::Closed)
    }

    /// See [`PtyMaster::resize`]
    ///
    /// # Errors
    ///
    /// [`BackendError::Closed`] once the display side is gone.
    pub async fn resize(&mut self, size: Size) -> Result<(), BackendError> {
        self.size = size;
        self.input
            .send(PtyInput::Resize(size))
            .await
            .map_err(|_| BackendError::Closed)
    }

    /// See [`PtyMaster::hangup`]
    pub fn hangup(&self) {
        let _ = self.input.try_send(PtyInput::Hangup);
    }

    /// Geometry as last reported by the transport
    #[must_use]
    pub fn size(&self) -> Size {
        self.size
    }
}

/// Output side of a split [`PtyMaster`]
#[derive(Debug)]
pub struct PtyReader {
    output: mpsc::Receiver<Vec<u8>>,
    _lease: Arc<PtyLease>,
}

impl PtyReader {
    /// See [`PtyMaster::recv_output`]
    pub async fn recv_output(&mut self) -> Option<Vec<u8>> {
        self.output.recv().await
    }
}

/// Display-facing half of a virtual pty
#[derive(Debug)]
pub struct PtyBackend {
    input: mpsc::Receiver<PtyInput>,
    output: Option<mpsc::Sender<Vec<u8>>>,
    decoder: InputDecoder,
    pending: VecDeque<BackendEvent>,
    size: Size,
    opened: bool,
    hung_up: bool,
    _lease: Arc<PtyLease>,
}

impl PtyBackend {
    fn decode_chunk(&mut self, bytes: &[u8]) {
        self.decoder.push(bytes);
        while let Some(item) = self.decoder.next() {
            self.pending.push_back(match item {
                Ok(event) => BackendEvent::Input(event),
                Err(err) => BackendEvent::Undecodable(err),
            });
        }
    }

    fn flush_escape(&mut self) {
        if let Some(esc) = self.decoder.flush() {
            self.pending.push_back(BackendEvent::Input(esc));
        }
    }

    /// Next message from the master; a lone `ESC` waits at most
    /// [`ESC_TIMEOUT`] for the rest of its sequence
    async fn recv_input(&mut self) -> Option<Option<PtyInput>> {
        if !self.decoder.has_lone_escape() {
            return Some(self.input.recv().await);
        }
        tokio::time::timeout(ESC_TIMEOUT, self.input.recv()).await.ok()
    }
}

#[async_trait]
impl TerminalBackend for PtyBackend {
    fn name(&self) -> &'static str {
        "pty"
    }

    async fn open(&mut self) -> Result<Size, BackendError> {
        if self.output.is_none() {
            return Err(BackendError::Closed);
        }
        self.opened = true;
        Ok(self.size)
    }

    async fn next_event(&mut self) -> Result<BackendEvent, BackendError> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Ok(event);
            }
            if self.hung_up {
                if self.decoder.has_lone_escape() {
                    self.flush_escape();
                    continue;
                }
                return Ok(BackendEvent::Disconnected);
            }
            // Only this await can be cancelled; everything after it is sync.
            let Some(received) = self.recv_input().await else {
                self.flush_escape();
                continue;
            };
            match received {
                Some(PtyInput::Bytes(bytes)) => self.decode_chunk(&bytes),
                Some(PtyInput::Resize(size)) => {
                    self.flush_escape();
                    self.size = size;
                    self.pending.push_back(BackendEvent::Resize(size));
                }
                Some(PtyInput::Hangup) | None => self.hung_up = true,
            }
        }
    }

    fn size(&self) -> Size {
        self.size
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<(), BackendError> {
        if !self.opened {
            return Err(BackendError::NotOpen);
        }
        let output = self.output.as_ref().ok_or(BackendError::NotOpen)?;
        output
            .send(bytes.to_vec())
            .await
            .map_err(|_| BackendError::Closed)
    }

    async fn close(&mut self) -> Result<(), BackendError> {
        self.opened = false;
        self.output = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::{InputEvent, KeyCode, KeyEvent};

    #[test]
    fn test_pool_limits_and_releases() {
        let pool = PtyPool::new(1);
        let pair = pool.allocate(Size::new(80, 24)).unwrap();
        assert_eq!(pool.live(), 1);
        assert!(matches!(
            pool.allocate(Size::new(80, 24)),
            Err(MuxError::ResourceExhausted(_))
        ));

        // Slot stays taken until both halves are gone.
        let (master, backend) = pair;
        drop(master);
        assert_eq!(pool.live(), 1);
        drop(backend);
        assert_eq!(pool.live(), 0);
        assert_eq!(pool.total_allocated(), 1);
    }

    #[tokio::test]
    async fn test_input_and_resize_arrive_in_order() {
        let pool = PtyPool::new(4);
        let (mut master, mut backend) = pool.allocate(Size::new(80, 24)).unwrap();
        assert_eq!(backend.open().await.unwrap(), Size::new(80, 24));

        master.send_input(b"a".to_vec()).await.unwrap();
        master.resize(Size::new(40, 12)).await.unwrap();
        master.send_input(b"b".to_vec()).await.unwrap();

        let a = BackendEvent::Input(InputEvent::Key(KeyEvent::plain(KeyCode::Char('a'))));
        let b = BackendEvent::Input(InputEvent::Key(KeyEvent::plain(KeyCode::Char('b'))));
        assert_eq!(backend.next_event().await.unwrap(), a);
        assert_eq!(
            backend.next_event().await.unwrap(),
            BackendEvent::Resize(Size::new(40, 12))
        );
        assert_eq!(backend.size(), Size::new(40, 12));
        assert_eq!(backend.next_event().await.unwrap(), b);
    }

    #[tokio::test]
    async fn test_escape_sequence_split_across_chunks() {
        let pool = PtyPool::new(4);
        let (mut master, mut backend) = pool.allocate(Size::new(80, 24)).unwrap();
        backend.open().await.unwrap();

        master.send_input(b"\x1b".to_vec()).await.unwrap();
        master.send_input(b"[A".to_vec()).await.unwrap();

        assert_eq!(
            backend.next_event().await.unwrap(),
            BackendEvent::Input(InputEvent::Key(KeyEvent::plain(KeyCode::Up)))
        );
    }

    #[tokio::test]
    async fn test_lone_escape_resolves_after_timeout() {
        let pool = PtyPool::new(4);
        let (mut master, mut backend) = pool.allocate(Size::new(80, 24)).unwrap();
        backend.open().await.unwrap();

        master.send_input(b"\x1b".to_vec()).await.unwrap();
        let esc = BackendEvent::Input(InputEvent::Key(KeyEvent::plain(KeyCode::Esc)));
        assert_eq!(backend.next_event().await.unwrap(), esc);

        // A hangup right behind an ESC still delivers the key first.
        master.send_input(b"\x1b".to_vec()).await.unwrap();
        master.hangup();
        assert_eq!(backend.next_event().await.unwrap(), esc);
        assert_eq!(backend.next_event().await.unwrap(), BackendEvent::Disconnected);
    }

    #[tokio::test]
    async fn test_split_halves_share_the_slot() {
        let pool = PtyPool::new(1);
        let (master, mut backend) = pool.allocate(Size::new(10, 5)).unwrap();
        let (writer, mut reader) = master.split();
        backend.open().await.unwrap();

        backend.write(b"out").await.unwrap();
        assert_eq!(reader.recv_output().await, Some(b"out".to_vec()));
        writer.hangup();
        assert_eq!(backend.next_event().await.unwrap(), BackendEvent::Disconnected);

        drop(writer);
        drop(backend);
        assert_eq!(pool.live(), 1);
        drop(reader);
        assert_eq!(pool.live(), 0);
    }

    #[tokio::test]
    async fn test_output_and_hangup() {
        let pool = PtyPool::new(4);
        let (mut master, mut backend) = pool.allocate(Size::new(10, 5)).unwrap();
        assert!(matches!(backend.write(b"x").await, Err(BackendError::NotOpen)));

        backend.open().await.unwrap();
        backend.write(b"hello").await.unwrap();
        assert_eq!(master.recv_output().await, Some(b"hello".to_vec()));

        master.hangup();
        assert_eq!(backend.next_event().await.unwrap(), BackendEvent::Disconnected);

        backend.close().await.unwrap();
        assert_eq!(master.recv_output().await, None);
    }

    #[tokio::test]
    async fn test_dropped_master_disconnects() {
        let pool = PtyPool::new(4);
        let (master, mut backend) = pool.allocate(Size::new(10, 5)).unwrap();
        drop(master);
        assert_eq!(backend.next_event().await.unwrap(), BackendEvent::Disconnected);
    }
}
