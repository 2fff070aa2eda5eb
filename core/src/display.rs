//! Display - One Terminal, One Task
//!
//! A display binds a [`Scene`] to a [`TerminalBackend`] and runs its
//! render/input loop on a dedicated tokio task.
//!
//! # Lifecycle
//!
//! ```text
//!  Starting ──▶ Running ◀──▶ Suspended
//!                  │              │
//!                  └──────┬───────┘
//!                         ▼
//!                      Closing ──▶ Closed
//! ```
//!
//! The state is published on a `watch` channel; [`DisplayHandle`] is the
//! outside world's only way in. Commands travel through a bounded queue and
//! are handled on the display's own task, in order with its backend events.
//!
//! # Loop priority
//!
//! Each iteration takes the first ready of, in order: cancellation, control
//! commands, backend events, redraw sources, the frame tick.

use std::fmt;
use std::io;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::AbortHandle;
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::ansi::{self, PatchEncoder};
use crate::application::Application;
use crate::backend::{BackendEvent, TerminalBackend};
use crate::canvas::{Canvas, Size};
use crate::compositor::Compositor;
use crate::config::AppConfig;
use crate::error::{BackendError, MuxError};
use crate::input::InputEvent;
use crate::registry::DisplayRegistry;
use crate::scene::Scene;
use crate::session::{Session, SessionId};
use crate::signal::Signal;

/// Default command queue depth
pub const DEFAULT_COMMAND_CAPACITY: usize = 64;

/// Builds a display's window tree once the terminal is open
pub type SetupFn = Box<dyn FnOnce(&mut Scene) -> Result<(), MuxError> + Send>;

/// Where a display is in its lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DisplayState {
    /// Opening the terminal and building the scene
    Starting,
    /// Dispatching input and rendering
    Running,
    /// Reading the terminal but neither dispatching nor rendering
    Suspended,
    /// Restoring and releasing the terminal
    Closing,
    /// Gone
    Closed,
}

impl DisplayState {
    /// Whether the display has finished
    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self == Self::Closed
    }
}

impl fmt::Display for DisplayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Suspended => "suspended",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Control messages for a running display
#[derive(Debug)]
pub enum DisplayCommand {
    /// Dispatch a signal to the focused window
    Signal(Signal),
    /// Stop dispatching and rendering
    Suspend,
    /// Resume with a full redraw
    Resume,
    /// Close the display
    Shutdown,
    /// Run a render pass
    Redraw,
    /// Send back a copy of the presented frame
    ///
    /// Input the backend already holds is handled first, so the frame
    /// reflects everything delivered before the request.
    Snapshot(oneshot::Sender<Canvas>),
}

/// Per-display settings
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DisplayConfig {
    /// Depth of the command queue
    pub command_capacity: usize,
    /// Optional periodic render for animated content
    pub tick_interval: Option<Duration>,
    /// Close on a Ctrl+C no handler stopped
    pub quit_on_interrupt: bool,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            command_capacity: DEFAULT_COMMAND_CAPACITY,
            tick_interval: None,
            quit_on_interrupt: true,
        }
    }
}

impl From<&AppConfig> for DisplayConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            command_capacity: config.command_capacity,
            tick_interval: config.tick_interval,
            quit_on_interrupt: config.quit_on_interrupt,
        }
    }
}

// ============================================================================
// Handle
// ============================================================================

/// Outside control of one display
#[derive(Clone, Debug)]
pub struct DisplayHandle {
    session: Arc<Session>,
    commands: mpsc::Sender<DisplayCommand>,
    state: watch::Receiver<DisplayState>,
    cancel: CancellationToken,
    abort: Arc<OnceLock<AbortHandle>>,
}

impl DisplayHandle {
    /// The session being presented
    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Session id
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.session.id
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> DisplayState {
        *self.state.borrow()
    }

    /// Watch state changes
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<DisplayState> {
        self.state.clone()
    }

    /// Wait until the display reaches `target`
    ///
    /// Returns `false` if it closed first.
    pub async fn wait_for_state(&self, target: DisplayState) -> bool {
        let mut state = self.state.clone();
        // Bound to a local so the watch guard drops before `state`.
        let reached = match state.wait_for(|s| *s == target || s.is_closed()).await {
            Ok(reached) => *reached == target,
            Err(_) => target.is_closed(),
        };
        reached
    }

    /// Wait until the display is closed
    pub async fn wait_closed(&self) {
        self.wait_for_state(DisplayState::Closed).await;
    }

    /// Queue a command without waiting
    ///
    /// # Errors
    ///
    /// [`MuxError::ResourceExhausted`] when the queue is full,
    /// [`BackendError::Closed`] when the display is gone.
    pub fn send(&self, command: DisplayCommand) -> Result<(), MuxError> {
        self.commands.try_send(command).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => MuxError::ResourceExhausted(format!(
                "command queue of session {} is full",
                self.session.id.short()
            )),
            mpsc::error::TrySendError::Closed(_) => BackendError::Closed.into(),
        })
    }

    /// Stop dispatch and rendering
    ///
    /// # Errors
    ///
    /// See [`DisplayHandle::send`].
    pub fn suspend(&self) -> Result<(), MuxError> {
        self.send(DisplayCommand::Suspend)
    }

    /// Resume after [`DisplayHandle::suspend`]
    ///
    /// # Errors
    ///
    /// See [`DisplayHandle::send`].
    pub fn resume(&self) -> Result<(), MuxError> {
        self.send(DisplayCommand::Resume)
    }

    /// Ask the display to close
    ///
    /// # Errors
    ///
    /// See [`DisplayHandle::send`].
    pub fn shutdown(&self) -> Result<(), MuxError> {
        self.send(DisplayCommand::Shutdown)
    }

    /// Copy of what the terminal is believed to show
    ///
    /// `None` once the display has closed.
    pub async fn snapshot(&self) -> Option<Canvas> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(DisplayCommand::Snapshot(tx)).await.ok()?;
        rx.await.ok()
    }

    /// Cooperatively cancel the display
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Abandon the display's task and backend
    ///
    /// Returns `false` if the task was never started.
    pub fn abort(&self) -> bool {
        match self.abort.get() {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }
}

// ============================================================================
// Task
// ============================================================================

/// Why a display left the running loop
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CloseReason {
    Disconnected,
    BackendFailed,
    Cancelled,
    ShutdownRequested,
    HandlerRequested,
    Interrupt,
    SetupFailed,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::BackendFailed => "backend failed",
            Self::Cancelled => "cancelled",
            Self::ShutdownRequested => "shutdown requested",
            Self::HandlerRequested => "handler requested close",
            Self::Interrupt => "interrupt key",
            Self::SetupFailed => "setup failed",
        };
        f.write_str(name)
    }
}

/// Publishes `Closed` and leaves the registry however the task ends
///
/// Runs on normal completion and when the task is aborted.
struct CloseGuard {
    session: SessionId,
    state: watch::Sender<DisplayState>,
    registry: DisplayRegistry,
}

impl Drop for CloseGuard {
    fn drop(&mut self) {
        // Leave the registry first: waiters on `Closed` may count displays.
        self.registry.unregister(&self.session);
        self.state.send_if_modified(|state| {
            let changed = !state.is_closed();
            *state = DisplayState::Closed;
            changed
        });
    }
}

struct Display {
    session: Arc<Session>,
    backend: Box<dyn TerminalBackend>,
    scene: Scene,
    compositor: Compositor,
    encoder: PatchEncoder,
    commands: mpsc::Receiver<DisplayCommand>,
    commands_open: bool,
    cancel: CancellationToken,
    config: DisplayConfig,
    redraw: Vec<watch::Receiver<u64>>,
    setup: Option<SetupFn>,
    backend_alive: bool,
    guard: CloseGuard,
}

/// Start a display task and register its handle
pub(crate) fn spawn(
    app: &Application,
    session: Session,
    backend: Box<dyn TerminalBackend>,
    setup: SetupFn,
    cancel: CancellationToken,
) -> DisplayHandle {
    let config = DisplayConfig::from(app.config());
    let registry = app.displays().clone();
    let session = Arc::new(session);

    let (command_tx, command_rx) = mpsc::channel(config.command_capacity.max(1));
    let (state_tx, state_rx) = watch::channel(DisplayState::Starting);

    let handle = DisplayHandle {
        session: Arc::clone(&session),
        commands: command_tx,
        state: state_rx,
        cancel: cancel.clone(),
        abort: Arc::new(OnceLock::new()),
    };
    // Register before the task exists so its guard cannot unregister first.
    registry.register(handle.clone());

    let display = Display {
        session: Arc::clone(&session),
        backend,
        scene: Scene::new(Arc::clone(&session), app.clone(), session.size),
        compositor: Compositor::new(session.size),
        encoder: PatchEncoder::new(),
        commands: command_rx,
        commands_open: true,
        cancel,
        config,
        redraw: Vec::new(),
        setup: Some(setup),
        backend_alive: true,
        guard: CloseGuard {
            session: session.id,
            state: state_tx,
            registry,
        },
    };

    let span = tracing::info_span!(
        "display",
        session = %session.id.short(),
        user = %session.identity,
        origin = %session.origin,
    );
    let task = tokio::spawn(display.run().instrument(span));
    let _ = handle.abort.set(task.abort_handle());
    handle
}

impl Display {
    async fn run(mut self) {
        tracing::info!(backend = self.backend.name(), size = %self.session.size, "Display starting");

        let reason = match self.start().await {
            Ok(()) => self.event_loop().await,
            Err(reason) => reason,
        };
        self.close(reason).await;
    }

    fn state(&self) -> DisplayState {
        *self.guard.state.borrow()
    }

    fn set_state(&self, next: DisplayState) {
        let previous = self.guard.state.send_replace(next);
        if previous != next {
            tracing::info!(from = %previous, to = %next, "Display state changed");
        }
    }

    // ========================================================================
    // Starting
    // ========================================================================

    async fn start(&mut self) -> Result<(), CloseReason> {
        let size = match self.backend.open().await {
            Ok(size) => size,
            Err(e) => {
                tracing::error!(error = %e, "Failed to open terminal");
                self.backend_alive = false;
                return Err(CloseReason::BackendFailed);
            }
        };
        self.scene.resize(size);
        self.compositor = Compositor::new(size);

        if let Some(setup) = self.setup.take() {
            if let Err(e) = setup(&mut self.scene) {
                tracing::error!(error = %e, "Display setup failed");
                return Err(CloseReason::SetupFailed);
            }
        }
        self.collect_redraw_sources();

        self.write(ansi::prologue()).await?;
        self.render().await?;
        self.set_state(DisplayState::Running);
        Ok(())
    }

    // ========================================================================
    // Running / Suspended
    // ========================================================================

    async fn event_loop(&mut self) -> CloseReason {
        let mut tick = self.config.tick_interval.map(|period| {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval
        });

        loop {
            let step = tokio::select! {
                biased;

                () = self.cancel.cancelled() => Err(CloseReason::Cancelled),

                command = self.commands.recv(), if self.commands_open => {
                    self.on_command(command).await
                }

                event = self.backend.next_event() => self.on_backend_event(event).await,

                (index, alive) = next_redraw(&mut self.redraw) => {
                    self.on_redraw(index, alive).await
                }

                () = next_tick(&mut tick) => {
                    self.scene.invalidate();
                    self.render_if_needed().await
                }
            };

            if let Err(reason) = step {
                return reason;
            }
            self.collect_redraw_sources();
            if self.scene.is_close_requested() {
                return CloseReason::HandlerRequested;
            }
        }
    }

    async fn on_command(&mut self, command: Option<DisplayCommand>) -> Result<(), CloseReason> {
        let Some(command) = command else {
            self.commands_open = false;
            return Ok(());
        };

        match command {
            DisplayCommand::Shutdown | DisplayCommand::Signal(Signal::Shutdown) => {
                Err(CloseReason::ShutdownRequested)
            }
            DisplayCommand::Signal(signal) => {
                if self.state() == DisplayState::Running {
                    self.scene.dispatch(&signal);
                    self.render_if_needed().await?;
                }
                Ok(())
            }
            DisplayCommand::Suspend => {
                if self.state() == DisplayState::Running {
                    self.set_state(DisplayState::Suspended);
                }
                Ok(())
            }
            DisplayCommand::Resume => {
                if self.state() != DisplayState::Suspended {
                    return Ok(());
                }
                self.set_state(DisplayState::Running);
                self.full_redraw().await
            }
            DisplayCommand::Redraw => {
                self.scene.invalidate();
                self.render_if_needed().await
            }
            DisplayCommand::Snapshot(reply) => {
                self.drain_ready_events().await?;
                // The requester may have given up waiting.
                let _ = reply.send(self.compositor.presented().clone());
                Ok(())
            }
        }
    }

    /// Handle backend events that are already waiting, without blocking
    async fn drain_ready_events(&mut self) -> Result<(), CloseReason> {
        while let Some(event) = self.backend.next_event().now_or_never() {
            self.on_backend_event(event).await?;
        }
        Ok(())
    }

    async fn on_backend_event(
        &mut self,
        event: Result<BackendEvent, BackendError>,
    ) -> Result<(), CloseReason> {
        let event = match event {
            Ok(event) => event,
            Err(e) => {
                tracing::error!(error = %e, "Terminal backend failed");
                self.backend_alive = false;
                return Err(CloseReason::BackendFailed);
            }
        };

        match event {
            BackendEvent::Disconnected => {
                self.backend_alive = false;
                Err(CloseReason::Disconnected)
            }
            BackendEvent::Undecodable(e) => {
                tracing::warn!(error = %e, "Dropped undecodable input");
                Ok(())
            }
            BackendEvent::Resize(size) => self.on_resize(size).await,
            BackendEvent::Input(input) => {
                if self.state() != DisplayState::Running {
                    tracing::trace!("Input ignored while suspended");
                    return Ok(());
                }
                let signal = match input {
                    InputEvent::Key(key) => Signal::Key(key),
                    InputEvent::Paste(text) => Signal::Paste(text),
                };
                let emission = self.scene.dispatch(&signal);
                if let Signal::Key(key) = &signal {
                    if key.is_interrupt() && !emission.is_stopped() && self.config.quit_on_interrupt
                    {
                        return Err(CloseReason::Interrupt);
                    }
                }
                self.render_if_needed().await
            }
        }
    }

    async fn on_resize(&mut self, size: Size) -> Result<(), CloseReason> {
        if size == self.scene.size() {
            return Ok(());
        }
        tracing::debug!(size = %size, "Terminal resized");
        self.scene.resize(size);
        if self.state() != DisplayState::Running {
            // Resume repaints at whatever the geometry is by then.
            return Ok(());
        }
        self.scene.broadcast(&Signal::Resize(size));
        self.full_redraw().await
    }

    async fn on_redraw(&mut self, index: usize, alive: bool) -> Result<(), CloseReason> {
        if !alive {
            self.redraw.swap_remove(index);
            return Ok(());
        }
        self.scene.invalidate();
        self.render_if_needed().await
    }

    fn collect_redraw_sources(&mut self) {
        self.redraw.extend(self.scene.take_redraw_sources());
    }

    // ========================================================================
    // Rendering
    // ========================================================================

    async fn render_if_needed(&mut self) -> Result<(), CloseReason> {
        if self.state() != DisplayState::Running || !self.scene.take_needs_render() {
            return Ok(());
        }
        self.render().await
    }

    async fn full_redraw(&mut self) -> Result<(), CloseReason> {
        self.write(ansi::clear_screen()).await?;
        self.compositor
            .invalidate(self.scene.size(), self.scene.tree_mut());
        self.render().await
    }

    async fn render(&mut self) -> Result<(), CloseReason> {
        self.scene.take_needs_render();
        let drawn = self.scene.draw();
        let patches = self.compositor.render(self.scene.tree_mut());
        self.scene.take_needs_render();
        tracing::trace!(drawn, patches = patches.len(), "Render pass");
        if patches.is_empty() {
            return Ok(());
        }
        let bytes = self.encoder.encode(&patches);
        self.write(bytes).await
    }

    async fn write(&mut self, bytes: io::Result<Vec<u8>>) -> Result<(), CloseReason> {
        let bytes = bytes.map_err(|e| {
            tracing::error!(error = %e, "Failed to encode output");
            CloseReason::BackendFailed
        })?;
        if bytes.is_empty() {
            return Ok(());
        }
        if let Err(e) = self.backend.write(&bytes).await {
            tracing::error!(error = %e, "Terminal write failed");
            self.backend_alive = false;
            return Err(CloseReason::BackendFailed);
        }
        Ok(())
    }

    // ========================================================================
    // Closing / Closed
    // ========================================================================

    async fn close(mut self, reason: CloseReason) {
        tracing::info!(reason = %reason, "Display closing");
        self.set_state(DisplayState::Closing);

        if self.backend_alive {
            // Best effort; the terminal may already be unusable.
            let _ = self.write(ansi::epilogue()).await;
        }
        if let Err(e) = self.backend.close().await {
            tracing::warn!(error = %e, "Terminal close failed");
        }

        self.scene.revoke_all();
        self.guard.registry.unregister(&self.session.id);
        self.set_state(DisplayState::Closed);
        tracing::info!(uptime_ms = self.session.uptime().as_millis() as u64, "Display closed");
    }
}

async fn next_redraw(sources: &mut [watch::Receiver<u64>]) -> (usize, bool) {
    if sources.is_empty() {
        return std::future::pending().await;
    }
    let waits = sources.iter_mut().map(|rx| Box::pin(rx.changed()));
    let (result, index, _) = futures::future::select_all(waits).await;
    (index, result.is_ok())
}

async fn next_tick(tick: &mut Option<Interval>) {
    match tick {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::backend::SimulatedTerminal;
    use crate::canvas::{Rect, Style};
    use crate::input::{KeyCode, KeyEvent};
    use crate::signal::{Propagation, PRIORITY_NORMAL};

    fn app() -> Application {
        Application::initialize(AppConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_starts_running_and_renders() {
        let app = app();
        let (term, handle) = SimulatedTerminal::new(Size::new(10, 2));
        let display = app
            .spawn_display(Session::local(Size::new(10, 2)), term, |scene| {
                let root = scene.root();
                scene.set_draw_handler(root, |canvas, _| {
                    canvas.put_str(0, 0, "hi", Style::default());
                })
            })
            .unwrap();

        assert!(display.wait_for_state(DisplayState::Running).await);
        assert!(handle.is_opened());
        assert!(handle.output_text().contains("hi"));
        let snapshot = display.snapshot().await.unwrap();
        assert_eq!(snapshot.row_text(0), "hi        ");
    }

    #[tokio::test]
    async fn test_disconnect_closes_and_unregisters() {
        let app = app();
        let (term, handle) = SimulatedTerminal::new(Size::new(4, 1));
        let display = app
            .spawn_display(Session::local(Size::new(4, 1)), term, |_| Ok(()))
            .unwrap();
        display.wait_for_state(DisplayState::Running).await;
        assert_eq!(app.display_count(), 1);

        handle.disconnect();
        display.wait_closed().await;
        assert!(handle.is_closed());
        assert_eq!(app.display_count(), 0);
        assert!(display.snapshot().await.is_none());
    }

    #[tokio::test]
    async fn test_unhandled_interrupt_closes() {
        let app = app();
        let (term, handle) = SimulatedTerminal::new(Size::new(4, 1));
        let display = app
            .spawn_display(Session::local(Size::new(4, 1)), term, |_| Ok(()))
            .unwrap();
        display.wait_for_state(DisplayState::Running).await;

        handle.key(KeyEvent::ctrl('c'));
        display.wait_closed().await;
        assert_eq!(display.state(), DisplayState::Closed);
    }

    #[tokio::test]
    async fn test_stopped_interrupt_keeps_running() {
        let app = app();
        let (term, handle) = SimulatedTerminal::new(Size::new(4, 1));
        let display = app
            .spawn_display(Session::local(Size::new(4, 1)), term, |scene| {
                let root = scene.root();
                scene.connect_key(root, PRIORITY_NORMAL, |_, _| Propagation::Stop);
                Ok(())
            })
            .unwrap();
        display.wait_for_state(DisplayState::Running).await;

        handle.key(KeyEvent::ctrl('c'));
        // Snapshot is queued behind the key, so the key has been handled.
        assert!(display.snapshot().await.is_some());
        assert_eq!(display.state(), DisplayState::Running);
    }

    #[tokio::test]
    async fn test_setup_failure_closes() {
        let app = app();
        let (term, handle) = SimulatedTerminal::new(Size::new(4, 1));
        let display = app
            .spawn_display(Session::local(Size::new(4, 1)), term, |scene| {
                scene.remove_window(crate::object::ObjectId::next()).map(|_| ())
            })
            .unwrap();
        display.wait_closed().await;
        assert!(handle.is_closed());
    }

    #[tokio::test]
    async fn test_suspend_skips_dispatch_until_resume() {
        let app = app();
        let keys = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&keys);
        let (term, handle) = SimulatedTerminal::new(Size::new(8, 2));
        let display = app
            .spawn_display(Session::local(Size::new(8, 2)), term, move |scene| {
                let root = scene.root();
                scene.connect_key(root, PRIORITY_NORMAL, move |_, _| {
                    seen.fetch_add(1, Ordering::SeqCst);
                    Propagation::Stop
                });
                Ok(())
            })
            .unwrap();
        display.wait_for_state(DisplayState::Running).await;

        display.suspend().unwrap();
        assert!(display.wait_for_state(DisplayState::Suspended).await);
        handle.key(KeyCode::Char('a'));
        handle.resize(Size::new(4, 1));
        display.snapshot().await.unwrap();
        assert_eq!(keys.load(Ordering::SeqCst), 0);

        display.resume().unwrap();
        assert!(display.wait_for_state(DisplayState::Running).await);
        let snapshot = display.snapshot().await.unwrap();
        assert_eq!(snapshot.size(), Size::new(4, 1));

        handle.key(KeyCode::Char('b'));
        display.snapshot().await.unwrap();
        assert_eq!(keys.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_broadcast_signal_reaches_focus() {
        let app = app();
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&hits);
        let (term, _handle) = SimulatedTerminal::new(Size::new(8, 2));
        let display = app
            .spawn_display(Session::local(Size::new(8, 2)), term, move |scene| {
                let root = scene.root();
                let child = scene.add_window(root, Rect::new(0, 0, 4, 1))?;
                scene.focus(child)?;
                scene.connect_custom(root, "ping", PRIORITY_NORMAL, move |_, _| {
                    seen.fetch_add(1, Ordering::SeqCst);
                    Propagation::Continue
                });
                Ok(())
            })
            .unwrap();
        display.wait_for_state(DisplayState::Running).await;

        display
            .send(DisplayCommand::Signal(Signal::custom("ping", vec![])))
            .unwrap();
        display.snapshot().await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        display.send(DisplayCommand::Signal(Signal::Shutdown)).unwrap();
        display.wait_closed().await;
    }

    #[tokio::test]
    async fn test_redraw_source_triggers_render() {
        let app = app();
        let model = crate::shared::SharedModel::new(0u32);
        let view = model.clone();
        let (term, handle) = SimulatedTerminal::new(Size::new(6, 1));
        let display = app
            .spawn_display(Session::local(Size::new(6, 1)), term, move |scene| {
                scene.redraw_on(view.subscribe());
                let root = scene.root();
                scene.set_draw_handler(root, move |canvas, _| {
                    let value = view.read(|v| *v);
                    canvas.put_str(0, 0, &format!("n={value}"), Style::default());
                })
            })
            .unwrap();
        display.wait_for_state(DisplayState::Running).await;
        assert_eq!(display.snapshot().await.unwrap().row_text(0), "n=0   ");

        let writes = handle.write_count();
        model.update(|v| *v = 7);
        let mut text = String::new();
        for _ in 0..50 {
            text = display.snapshot().await.unwrap().row_text(0);
            if text.starts_with("n=7") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(text, "n=7   ");
        assert!(handle.write_count() > writes);
    }
}
