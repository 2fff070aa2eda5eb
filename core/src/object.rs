//! Objects and the Kind Registry
//!
//! Every window and every other signal-bearing entity is identified by an
//! [`ObjectId`] drawn from one process-wide counter, so ids never collide
//! across displays.
//!
//! [`ObjectRegistry`] is the capability seam for extensions: it maps a kind
//! name to a constructor that builds an object of that kind inside a scene.
//! How the constructor got there (compiled in, loaded by a host) is not the
//! registry's concern.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::MuxError;
use crate::scene::Scene;

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque, process-unique object identifier
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(u64);

impl ObjectId {
    /// Allocate a fresh id
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value
    #[must_use]
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obj-{}", self.0)
    }
}

/// Builds an object of some kind as a child of `parent`
pub type Constructor =
    Arc<dyn Fn(&mut Scene, ObjectId) -> Result<ObjectId, MuxError> + Send + Sync>;

/// Process-wide table of constructible object kinds
#[derive(Clone, Default)]
pub struct ObjectRegistry {
    kinds: Arc<RwLock<HashMap<String, Constructor>>>,
}

impl fmt::Debug for ObjectRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

impl ObjectRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor, returning the one it replaces
    pub fn register_kind<F>(&self, name: impl Into<String>, ctor: F) -> Option<Constructor>
    where
        F: Fn(&mut Scene, ObjectId) -> Result<ObjectId, MuxError> + Send + Sync + 'static,
    {
        let name = name.into();
        tracing::debug!(kind = %name, "Object kind registered");
        self.kinds.write().insert(name, Arc::new(ctor))
    }

    /// Remove a kind
    pub fn unregister_kind(&self, name: &str) -> Option<Constructor> {
        self.kinds.write().remove(name)
    }

    /// Build an object of `kind` under `parent`
    ///
    /// # Errors
    ///
    /// [`MuxError::UnknownKind`] when nothing is registered under `kind`, or
    /// whatever the constructor returns.
    pub fn construct(
        &self,
        kind: &str,
        scene: &mut Scene,
        parent: ObjectId,
    ) -> Result<ObjectId, MuxError> {
        // Clone out of the lock so the constructor may itself use the registry.
        let ctor = self
            .kinds
            .read()
            .get(kind)
            .cloned()
            .ok_or_else(|| MuxError::UnknownKind(kind.to_string()))?;
        ctor(scene, parent)
    }

    /// Registered kind names, sorted
    #[must_use]
    pub fn kinds(&self) -> Vec<String> {
        let mut names: Vec<String> = self.kinds.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Whether a kind is registered
    #[must_use]
    pub fn contains(&self, kind: &str) -> bool {
        self.kinds.read().contains_key(kind)
    }
}
