//! Application - Process-Wide Context
//!
//! Owns what all displays share: configuration, theme, the object registry
//! and the display registry. There is no global instance; tests create as
//! many applications as they like.
//!
//! # Lifecycle
//!
//! ```text
//!  initialize ──▶ spawn_display* ──▶ run ─────────────┐
//!                                     │               │
//!                          terminate(reason) ◀── idle (exit_when_idle)
//!                                     │
//!        cancel all ─▶ wait ≤ grace each ─▶ abort stragglers ─▶ report
//! ```
//!
//! # Usage
//!
//! ```ignore
//! let app = Application::initialize(load_config()?)?;
//! app.spawn_display(Session::local(size), backend, |scene| build(scene))?;
//! let code = app.run().await;
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

use crate::backend::TerminalBackend;
use crate::config::AppConfig;
use crate::display::{self, DisplayCommand, DisplayHandle};
use crate::error::MuxError;
use crate::object::ObjectRegistry;
use crate::registry::{BroadcastResult, DisplayRegistry, RegistrySummary};
use crate::scene::Scene;
use crate::session::{Session, SessionId};
use crate::signal::Signal;
use crate::theme::Theme;

/// Why the application is terminating
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TerminateReason {
    /// Asked to by the embedding program
    Requested,
    /// An OS signal (SIGINT, SIGTERM)
    Signal(String),
    /// Every display closed and `exit_when_idle` is set
    Idle,
    /// An unrecoverable error
    Fatal(String),
}

impl TerminateReason {
    /// Whether the process should exit unsuccessfully
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

impl fmt::Display for TerminateReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Requested => f.write_str("requested"),
            Self::Signal(name) => write!(f, "signal {name}"),
            Self::Idle => f.write_str("idle"),
            Self::Fatal(message) => write!(f, "fatal: {message}"),
        }
    }
}

/// Outcome of [`Application::terminate`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TerminateReport {
    /// Reason given by the first caller
    pub reason: TerminateReason,
    /// Displays that closed within their grace period
    pub closed: Vec<SessionId>,
    /// Displays that had to be detached
    pub forced: Vec<SessionId>,
    /// Time terminate took
    pub elapsed: Duration,
}

impl TerminateReport {
    /// Whether every display closed on its own
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.forced.is_empty()
    }

    /// Process exit code for this report
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        i32::from(self.reason.is_fatal())
    }
}

struct Inner {
    config: AppConfig,
    theme: Arc<Theme>,
    objects: ObjectRegistry,
    displays: DisplayRegistry,
    cancel: CancellationToken,
    terminating: AtomicBool,
    report: OnceCell<TerminateReport>,
    done: CancellationToken,
}

/// Shared handle to the application
#[derive(Clone)]
pub struct Application {
    inner: Arc<Inner>,
}

impl fmt::Debug for Application {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Application")
            .field("theme", &self.inner.theme.name)
            .field("displays", &self.inner.displays.count())
            .field("terminating", &self.is_terminating())
            .finish()
    }
}

impl Application {
    /// Validate `config` and create the application
    ///
    /// # Errors
    ///
    /// [`MuxError::Configuration`] for any invalid value.
    pub fn initialize(config: AppConfig) -> Result<Self, MuxError> {
        config.validate()?;
        let theme = config.resolve_theme()?;
        tracing::info!(
            theme = %theme.name,
            grace_ms = config.grace_period.as_millis() as u64,
            source = %config.source(),
            "Application initialized"
        );
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                theme: Arc::new(theme),
                objects: ObjectRegistry::new(),
                displays: DisplayRegistry::new(),
                cancel: CancellationToken::new(),
                terminating: AtomicBool::new(false),
                report: OnceCell::new(),
                done: CancellationToken::new(),
            }),
        })
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Resolved configuration
    #[must_use]
    pub fn config(&self) -> &AppConfig {
        &self.inner.config
    }

    /// Active theme
    #[must_use]
    pub fn theme(&self) -> Arc<Theme> {
        Arc::clone(&self.inner.theme)
    }

    /// Constructible object kinds
    #[must_use]
    pub fn objects(&self) -> &ObjectRegistry {
        &self.inner.objects
    }

    /// Live displays
    #[must_use]
    pub fn displays(&self) -> &DisplayRegistry {
        &self.inner.displays
    }

    /// Handle for one session's display
    #[must_use]
    pub fn display(&self, id: &SessionId) -> Option<DisplayHandle> {
        self.inner.displays.get(id)
    }

    /// Number of live displays
    #[must_use]
    pub fn display_count(&self) -> usize {
        self.inner.displays.count()
    }

    /// Registry summary
    #[must_use]
    pub fn summary(&self) -> RegistrySummary {
        self.inner.displays.summary()
    }

    /// Whether terminate has started
    #[must_use]
    pub fn is_terminating(&self) -> bool {
        self.inner.terminating.load(Ordering::SeqCst)
    }

    /// Token cancelled once terminate starts
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    // ========================================================================
    // Displays
    // ========================================================================

    /// Run a display for `session` on its own task
    ///
    /// `setup` builds the window tree once the terminal is open. Must be
    /// called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// [`MuxError::ShuttingDown`] once terminate has started.
    pub fn spawn_display<B, F>(
        &self,
        session: Session,
        backend: B,
        setup: F,
    ) -> Result<DisplayHandle, MuxError>
    where
        B: TerminalBackend + 'static,
        F: FnOnce(&mut Scene) -> Result<(), MuxError> + Send + 'static,
    {
        if self.is_terminating() {
            return Err(MuxError::ShuttingDown);
        }
        let cancel = self.inner.cancel.child_token();
        Ok(display::spawn(
            self,
            session,
            Box::new(backend),
            Box::new(setup),
            cancel,
        ))
    }

    /// Queue `signal` on every live display without blocking
    pub fn broadcast(&self, signal: Signal) -> BroadcastResult {
        self.inner.displays.broadcast(&signal)
    }

    // ========================================================================
    // Run / Terminate
    // ========================================================================

    /// Wait for terminate, or for the last display to close
    ///
    /// The idle exit only applies with `exit_when_idle` and once at least
    /// one display has existed. Returns the process exit code.
    pub async fn run(&self) -> i32 {
        let report = tokio::select! {
            () = self.inner.done.cancelled() => self.inner.report.get().cloned(),
            () = self.wait_idle(), if self.inner.config.exit_when_idle => {
                Some(self.terminate(TerminateReason::Idle).await)
            }
        };
        report.map_or(0, |r| r.exit_code())
    }

    async fn wait_idle(&self) {
        let mut live = self.inner.displays.watch_live();
        loop {
            let count = *live.borrow_and_update();
            if count == 0 && self.inner.displays.total_registered() > 0 {
                return;
            }
            if live.changed().await.is_err() {
                return std::future::pending().await;
            }
        }
    }

    /// Close every display and stop accepting new ones
    ///
    /// Idempotent: concurrent and later callers get the first report.
    pub async fn terminate(&self, reason: TerminateReason) -> TerminateReport {
        let report = self
            .inner
            .report
            .get_or_init(|| self.shutdown_displays(reason))
            .await
            .clone();
        self.inner.done.cancel();
        report
    }

    async fn shutdown_displays(&self, reason: TerminateReason) -> TerminateReport {
        let started = Instant::now();
        self.inner.terminating.store(true, Ordering::SeqCst);
        // Children of this token include displays spawned concurrently.
        self.inner.cancel.cancel();

        let handles = self.inner.displays.handles();
        let grace = self.inner.config.grace_period;
        tracing::info!(
            reason = %reason,
            displays = handles.len(),
            grace_ms = grace.as_millis() as u64,
            "Terminating application"
        );

        for handle in &handles {
            handle.cancel();
            // A full queue is fine: cancellation already reached it.
            let _ = handle.send(DisplayCommand::Shutdown);
        }

        let waits = handles.iter().map(|handle| async move {
            let closed = tokio::time::timeout(grace, handle.wait_closed())
                .await
                .is_ok();
            (handle, closed)
        });
        let results = futures::future::join_all(waits).await;

        let mut report = TerminateReport {
            reason,
            closed: Vec::new(),
            forced: Vec::new(),
            elapsed: Duration::ZERO,
        };
        for (handle, closed) in results {
            if closed {
                report.closed.push(handle.id());
                continue;
            }
            tracing::error!(
                session = %handle.id().short(),
                state = %handle.state(),
                grace_ms = grace.as_millis() as u64,
                "Display did not close in time, detaching"
            );
            handle.abort();
            self.inner.displays.unregister(&handle.id());
            report.forced.push(handle.id());
        }

        report.elapsed = started.elapsed();
        tracing::info!(
            closed = report.closed.len(),
            forced = report.forced.len(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Application terminated"
        );
        report
    }
}
