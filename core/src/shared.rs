//! Shared Application Model
//!
//! State that every display presents at once (a document, a scoreboard, a
//! chat log). Displays run on separate tasks, so the model is the one place
//! where their writes meet.
//!
//! # Write policy
//!
//! - All writes go through a single lock and are applied in lock order;
//!   the last writer wins
//! - Every write bumps a version counter
//! - Editors that must not overwrite a change they have not seen use
//!   [`SharedModel::try_update`] with the version they read
//!
//! Displays register [`SharedModel::subscribe`] as a redraw source and
//! repaint whenever the version moves.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::watch;

/// A compare-and-update lost the race
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("version conflict: expected {expected}, current {current}")]
pub struct VersionConflict {
    /// Version the editor based its change on
    pub expected: u64,
    /// Version actually current
    pub current: u64,
}

struct Inner<T> {
    value: Mutex<(T, u64)>,
    version: watch::Sender<u64>,
}

/// Versioned state shared by all displays
pub struct SharedModel<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for SharedModel<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for SharedModel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let guard = self.inner.value.lock();
        f.debug_struct("SharedModel")
            .field("value", &guard.0)
            .field("version", &guard.1)
            .finish()
    }
}

impl<T: Default> Default for SharedModel<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> SharedModel<T> {
    /// Wrap an initial value at version 0
    pub fn new(value: T) -> Self {
        let (version, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                value: Mutex::new((value, 0)),
                version,
            }),
        }
    }

    /// Current version
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.value.lock().1
    }

    /// Read the value
    pub fn read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.value.lock().0)
    }

    /// Read the value together with its version
    pub fn read_versioned<R>(&self, f: impl FnOnce(&T) -> R) -> (R, u64) {
        let guard = self.inner.value.lock();
        (f(&guard.0), guard.1)
    }

    /// Change the value unconditionally, returning the new version
    pub fn update(&self, f: impl FnOnce(&mut T)) -> u64 {
        let version = {
            let mut guard = self.inner.value.lock();
            f(&mut guard.0);
            guard.1 += 1;
            guard.1
        };
        self.publish(version);
        version
    }

    /// Change the value only if nobody else has since `expected`
    ///
    /// # Errors
    ///
    /// [`VersionConflict`] when the model moved on; the value is untouched.
    pub fn try_update(&self, expected: u64, f: impl FnOnce(&mut T)) -> Result<u64, VersionConflict> {
        let version = {
            let mut guard = self.inner.value.lock();
            if guard.1 != expected {
                return Err(VersionConflict {
                    expected,
                    current: guard.1,
                });
            }
            f(&mut guard.0);
            guard.1 += 1;
            guard.1
        };
        self.publish(version);
        Ok(version)
    }

    /// Watch the version
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.version.subscribe()
    }

    fn publish(&self, version: u64) {
        // Publishing outside the lock can reorder two writers' notifications;
        // keep the watch monotonic.
        self.inner.version.send_if_modified(|current| {
            if version > *current {
                *current = version;
                true
            } else {
                false
            }
        });
    }
}
