//! Display Registry
//!
//! Tracks every live display of an application by session id.
//!
//! # Thread Safety
//!
//! One `RwLock<HashMap>`; inserts and removals hold the write lock only long
//! enough to touch the map and publish the new live count. Broadcasts clone
//! the handles out under the read lock and send outside it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::watch;

use crate::display::{DisplayCommand, DisplayHandle, DisplayState};
use crate::session::SessionId;
use crate::signal::Signal;

/// Result of a broadcast operation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastResult {
    /// Displays whose queue accepted the signal
    pub sent: usize,
    /// Displays whose queue was full or closed
    pub failed: usize,
    /// Sessions that did not get it
    pub failed_sessions: Vec<SessionId>,
}

impl BroadcastResult {
    /// Check if every display got the signal
    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }

    /// Check if no display got it
    #[must_use]
    pub fn all_failed(&self) -> bool {
        self.sent == 0 && self.failed > 0
    }
}

/// Summary of registry state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrySummary {
    /// Live displays
    pub live: usize,
    /// Displays ever registered
    pub total: u64,
    /// Live displays by state
    pub running: usize,
    /// Suspended displays
    pub suspended: usize,
}

/// Live displays by session
#[derive(Clone, Debug)]
pub struct DisplayRegistry {
    displays: Arc<RwLock<HashMap<SessionId, DisplayHandle>>>,
    live: Arc<watch::Sender<usize>>,
    total: Arc<AtomicU64>,
}

impl Default for DisplayRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DisplayRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        let (live, _) = watch::channel(0);
        Self {
            displays: Arc::new(RwLock::new(HashMap::new())),
            live: Arc::new(live),
            total: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Add a display
    pub fn register(&self, handle: DisplayHandle) {
        let id = handle.id();
        let live = {
            let mut displays = self.displays.write();
            displays.insert(id, handle);
            self.total.fetch_add(1, Ordering::SeqCst);
            self.live.send_replace(displays.len());
            displays.len()
        };
        tracing::debug!(session = %id.short(), live, "Display registered");
    }

    /// Remove a display, returning its handle if it was present
    pub fn unregister(&self, id: &SessionId) -> Option<DisplayHandle> {
        let mut displays = self.displays.write();
        let removed = displays.remove(id);
        if removed.is_some() {
            self.live.send_replace(displays.len());
            tracing::debug!(session = %id.short(), live = displays.len(), "Display unregistered");
        }
        removed
    }

    /// Handle for a session
    #[must_use]
    pub fn get(&self, id: &SessionId) -> Option<DisplayHandle> {
        self.displays.read().get(id).cloned()
    }

    /// Whether a session has a live display
    #[must_use]
    pub fn contains(&self, id: &SessionId) -> bool {
        self.displays.read().contains_key(id)
    }

    /// Number of live displays
    #[must_use]
    pub fn count(&self) -> usize {
        self.displays.read().len()
    }

    /// Displays ever registered
    #[must_use]
    pub fn total_registered(&self) -> u64 {
        self.total.load(Ordering::SeqCst)
    }

    /// Live session ids
    #[must_use]
    pub fn session_ids(&self) -> Vec<SessionId> {
        self.displays.read().keys().copied().collect()
    }

    /// Clone out every live handle
    #[must_use]
    pub fn handles(&self) -> Vec<DisplayHandle> {
        self.displays.read().values().cloned().collect()
    }

    /// Watch the live count
    #[must_use]
    pub fn watch_live(&self) -> watch::Receiver<usize> {
        self.live.subscribe()
    }

    /// Queue `signal` on every live display
    ///
    /// Uses `try_send`; a full or closed queue counts as a failure and never
    /// blocks the caller.
    pub fn broadcast(&self, signal: &Signal) -> BroadcastResult {
        let mut result = BroadcastResult::default();
        for handle in self.handles() {
            match handle.send(DisplayCommand::Signal(signal.clone())) {
                Ok(()) => result.sent += 1,
                Err(e) => {
                    tracing::warn!(session = %handle.id().short(), error = %e, "Broadcast not delivered");
                    result.failed += 1;
                    result.failed_sessions.push(handle.id());
                }
            }
        }
        tracing::debug!(
            kind = %signal.kind(),
            sent = result.sent,
            failed = result.failed,
            "Broadcast signal"
        );
        result
    }

    /// Summary of registry state
    #[must_use]
    pub fn summary(&self) -> RegistrySummary {
        let displays = self.displays.read();
        let mut summary = RegistrySummary {
            live: displays.len(),
            total: self.total_registered(),
            ..RegistrySummary::default()
        };
        for handle in displays.values() {
            match handle.state() {
                DisplayState::Running => summary.running += 1,
                DisplayState::Suspended => summary.suspended += 1,
                _ => {}
            }
        }
        summary
    }
}
