//! Signal Bus
//!
//! Per-display publish/subscribe dispatch. Handlers subscribe to a signal
//! kind on a specific object; emitting a signal on that object runs them in
//! descending priority order (ties in subscription order) until one returns
//! [`Propagation::Stop`].
//!
//! # Re-entrancy
//!
//! Handlers receive the owning context mutably, so they may connect,
//! disconnect or emit while an emission is in progress. The handler list is
//! snapshotted when the emission starts:
//!
//! - handlers connected during the emission are not run by it;
//! - handlers disconnected during the emission are skipped when their turn
//!   comes.
//!
//! # Usage
//!
//! ```ignore
//! scene.bus_mut().connect_key(window, PRIORITY_HIGH, |scene, key| {
//!     if key.code == KeyCode::Char('q') {
//!         scene.request_close();
//!         return Propagation::Stop;
//!     }
//!     Propagation::Continue
//! });
//!
//! let emission = SignalBus::emit(&mut scene, window, &Signal::Key(key));
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::canvas::Size;
use crate::input::KeyEvent;
use crate::object::ObjectId;

/// Priority for handlers that must see a signal before anything else
pub const PRIORITY_HIGH: i32 = 100;
/// Default priority
pub const PRIORITY_NORMAL: i32 = 0;
/// Priority for fallbacks
pub const PRIORITY_LOW: i32 = -100;

static NEXT_SUBSCRIPTION_ID: AtomicU64 = AtomicU64::new(1);

/// Argument carried by a custom signal
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SignalArg {
    /// Boolean flag
    Bool(bool),
    /// Integer value
    Int(i64),
    /// Floating point value
    Float(f64),
    /// Text value
    Text(String),
}

/// A named notification
#[derive(Clone, Debug, PartialEq)]
pub enum Signal {
    /// Decoded key press
    Key(KeyEvent),
    /// Bracketed paste
    Paste(String),
    /// Terminal geometry changed
    Resize(Size),
    /// Focus moved to or away from the target
    FocusChanged {
        /// `true` when the target gained focus
        gained: bool,
    },
    /// Content should be redrawn
    Redraw,
    /// The display is being asked to close
    Shutdown,
    /// Application-defined signal
    Custom {
        /// Signal name
        name: String,
        /// Arguments
        args: Vec<SignalArg>,
    },
}

impl Signal {
    /// Build a custom signal
    pub fn custom(name: impl Into<String>, args: Vec<SignalArg>) -> Self {
        Self::Custom {
            name: name.into(),
            args,
        }
    }

    /// The subscription key for this signal
    #[must_use]
    pub fn kind(&self) -> SignalKind {
        match self {
            Self::Key(_) => SignalKind::Key,
            Self::Paste(_) => SignalKind::Paste,
            Self::Resize(_) => SignalKind::Resize,
            Self::FocusChanged { .. } => SignalKind::FocusChanged,
            Self::Redraw => SignalKind::Redraw,
            Self::Shutdown => SignalKind::Shutdown,
            Self::Custom { name, .. } => SignalKind::Custom(name.clone()),
        }
    }
}

/// What a handler subscribes to
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SignalKind {
    /// [`Signal::Key`]
    Key,
    /// [`Signal::Paste`]
    Paste,
    /// [`Signal::Resize`]
    Resize,
    /// [`Signal::FocusChanged`]
    FocusChanged,
    /// [`Signal::Redraw`]
    Redraw,
    /// [`Signal::Shutdown`]
    Shutdown,
    /// [`Signal::Custom`] with this name
    Custom(String),
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key => f.write_str("key"),
            Self::Paste => f.write_str("paste"),
            Self::Resize => f.write_str("resize"),
            Self::FocusChanged => f.write_str("focus-changed"),
            Self::Redraw => f.write_str("redraw"),
            Self::Shutdown => f.write_str("shutdown"),
            Self::Custom(name) => write!(f, "custom:{name}"),
        }
    }
}

/// Handler verdict
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Propagation {
    /// Let lower-priority handlers (and ancestors) see the signal
    Continue,
    /// Consume the signal
    Stop,
}

/// Identifies one subscription
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Outcome of one emission
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Emission {
    /// Number of handlers that ran
    pub invoked: usize,
    /// The handler that stopped propagation, if any
    pub stopped_by: Option<SubscriptionId>,
}

impl Emission {
    /// Whether no handler ran
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.invoked == 0
    }

    /// Whether a handler consumed the signal
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped_by.is_some()
    }
}

/// Handler signature
pub type Handler<C> = Arc<dyn Fn(&mut C, &Signal) -> Propagation + Send + Sync>;

struct Slot<C> {
    id: SubscriptionId,
    priority: i32,
    active: AtomicBool,
    handler: Handler<C>,
}

/// Contexts that own a signal bus
///
/// Emission needs the context mutably (for handlers) and the bus (for the
/// snapshot), so the bus lives inside the context.
pub trait SignalHost: Sized {
    /// Shared access to the bus
    fn bus(&self) -> &SignalBus<Self>;
    /// Mutable access to the bus
    fn bus_mut(&mut self) -> &mut SignalBus<Self>;
}

/// Subscription table for one context type
pub struct SignalBus<C> {
    slots: HashMap<(ObjectId, SignalKind), Vec<Arc<Slot<C>>>>,
    index: HashMap<SubscriptionId, (ObjectId, SignalKind)>,
}

impl<C> Default for SignalBus<C> {
    fn default() -> Self {
        Self {
            slots: HashMap::new(),
            index: HashMap::new(),
        }
    }
}

impl<C> fmt::Debug for SignalBus<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalBus")
            .field("subscriptions", &self.index.len())
            .finish()
    }
}

impl<C> SignalBus<C> {
    /// Create an empty bus
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `handler` to `kind` signals on `object`
    pub fn connect<F>(
        &mut self,
        object: ObjectId,
        kind: SignalKind,
        priority: i32,
        handler: F,
    ) -> SubscriptionId
    where
        F: Fn(&mut C, &Signal) -> Propagation + Send + Sync + 'static,
    {
        let id = SubscriptionId(NEXT_SUBSCRIPTION_ID.fetch_add(1, Ordering::Relaxed));
        let slot = Arc::new(Slot {
            id,
            priority,
            active: AtomicBool::new(true),
            handler: Arc::new(handler),
        });

        let list = self.slots.entry((object, kind.clone())).or_default();
        // Equal priorities keep insertion order: insert after the last slot
        // whose priority is >= ours.
        let at = list.partition_point(|s| s.priority >= priority);
        list.insert(at, slot);
        self.index.insert(id, (object, kind));
        id
    }

    /// Subscribe to key presses
    pub fn connect_key<F>(&mut self, object: ObjectId, priority: i32, handler: F) -> SubscriptionId
    where
        F: Fn(&mut C, &KeyEvent) -> Propagation + Send + Sync + 'static,
    {
        self.connect(object, SignalKind::Key, priority, move |ctx, signal| {
            match signal {
                Signal::Key(key) => handler(ctx, key),
                _ => Propagation::Continue,
            }
        })
    }

    /// Subscribe to geometry changes
    pub fn connect_resize<F>(
        &mut self,
        object: ObjectId,
        priority: i32,
        handler: F,
    ) -> SubscriptionId
    where
        F: Fn(&mut C, Size) -> Propagation + Send + Sync + 'static,
    {
        self.connect(object, SignalKind::Resize, priority, move |ctx, signal| {
            match signal {
                Signal::Resize(size) => handler(ctx, *size),
                _ => Propagation::Continue,
            }
        })
    }

    /// Subscribe to focus changes; the handler receives `gained`
    pub fn connect_focus<F>(
        &mut self,
        object: ObjectId,
        priority: i32,
        handler: F,
    ) -> SubscriptionId
    where
        F: Fn(&mut C, bool) -> Propagation + Send + Sync + 'static,
    {
        self.connect(
            object,
            SignalKind::FocusChanged,
            priority,
            move |ctx, signal| match signal {
                Signal::FocusChanged { gained } => handler(ctx, *gained),
                _ => Propagation::Continue,
            },
        )
    }

    /// Subscribe to a named custom signal
    pub fn connect_custom<F>(
        &mut self,
        object: ObjectId,
        name: impl Into<String>,
        priority: i32,
        handler: F,
    ) -> SubscriptionId
    where
        F: Fn(&mut C, &[SignalArg]) -> Propagation + Send + Sync + 'static,
    {
        self.connect(
            object,
            SignalKind::Custom(name.into()),
            priority,
            move |ctx, signal| match signal {
                Signal::Custom { args, .. } => handler(ctx, args),
                _ => Propagation::Continue,
            },
        )
    }

    /// Revoke one subscription
    ///
    /// Returns `false` when the id is unknown or already revoked.
    pub fn disconnect(&mut self, id: SubscriptionId) -> bool {
        let Some(key) = self.index.remove(&id) else {
            return false;
        };
        if let Some(list) = self.slots.get_mut(&key) {
            if let Some(pos) = list.iter().position(|s| s.id == id) {
                list.remove(pos).active.store(false, Ordering::Release);
            }
            if list.is_empty() {
                self.slots.remove(&key);
            }
        }
        true
    }

    /// Revoke every subscription on `object`, returning how many were removed
    pub fn disconnect_object(&mut self, object: ObjectId) -> usize {
        let mut removed = 0;
        self.slots.retain(|(owner, _), list| {
            if *owner != object {
                return true;
            }
            for slot in list.drain(..) {
                slot.active.store(false, Ordering::Release);
                removed += 1;
            }
            false
        });
        self.index.retain(|_, (owner, _)| *owner != object);
        removed
    }

    /// Revoke everything
    pub fn clear(&mut self) {
        for slot in self.slots.values().flatten() {
            slot.active.store(false, Ordering::Release);
        }
        self.slots.clear();
        self.index.clear();
    }

    /// Number of live subscriptions
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Whether there are no subscriptions at all
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Number of handlers on `object` for `kind`
    #[must_use]
    pub fn handler_count(&self, object: ObjectId, kind: &SignalKind) -> usize {
        self.slots
            .get(&(object, kind.clone()))
            .map_or(0, Vec::len)
    }

    fn snapshot(&self, object: ObjectId, kind: SignalKind) -> Vec<Arc<Slot<C>>> {
        self.slots.get(&(object, kind)).cloned().unwrap_or_default()
    }
}

impl<C: SignalHost> SignalBus<C> {
    /// Emit `signal` on `target`
    ///
    /// Unknown targets and signals nobody subscribed to yield an empty
    /// [`Emission`].
    pub fn emit(ctx: &mut C, target: ObjectId, signal: &Signal) -> Emission {
        let slots = ctx.bus().snapshot(target, signal.kind());
        let mut emission = Emission::default();

        for slot in slots {
            if !slot.active.load(Ordering::Acquire) {
                continue;
            }
            emission.invoked += 1;
            if (slot.handler)(ctx, signal) == Propagation::Stop {
                emission.stopped_by = Some(slot.id);
                break;
            }
        }

        if emission.is_empty() {
            tracing::trace!(target_object = %target, kind = %signal.kind(), "Signal had no handlers");
        }
        emission
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::input::{KeyCode, Modifiers};

    #[derive(Default)]
    struct Host {
        bus: SignalBus<Host>,
        log: Vec<&'static str>,
    }

    impl SignalHost for Host {
        fn bus(&self) -> &SignalBus<Self> {
            &self.bus
        }
        fn bus_mut(&mut self) -> &mut SignalBus<Self> {
            &mut self.bus
        }
    }

    fn key(c: char) -> Signal {
        Signal::Key(KeyEvent::new(KeyCode::Char(c), Modifiers::empty()))
    }

    #[test]
    fn test_emit_without_handlers_is_empty() {
        let mut host = Host::default();
        let emission = SignalBus::emit(&mut host, ObjectId::next(), &Signal::Redraw);
        assert!(emission.is_empty());
        assert_eq!(emission, Emission::default());
    }

    #[test]
    fn test_priority_order_and_stop() {
        let mut host = Host::default();
        let obj = ObjectId::next();

        host.bus.connect_key(obj, PRIORITY_LOW, |h, _| {
            h.log.push("low");
            Propagation::Continue
        });
        let medium = host.bus.connect_key(obj, PRIORITY_NORMAL, |h, _| {
            h.log.push("medium");
            Propagation::Stop
        });
        host.bus.connect_key(obj, PRIORITY_HIGH, |h, _| {
            h.log.push("high");
            Propagation::Continue
        });

        let emission = SignalBus::emit(&mut host, obj, &key('x'));
        assert_eq!(host.log, vec!["high", "medium"]);
        assert_eq!(emission.invoked, 2);
        assert_eq!(emission.stopped_by, Some(medium));
    }

    #[test]
    fn test_equal_priority_keeps_insertion_order() {
        let mut host = Host::default();
        let obj = ObjectId::next();
        for label in ["first", "second", "third"] {
            host.bus.connect(obj, SignalKind::Redraw, 5, move |h, _| {
                h.log.push(label);
                Propagation::Continue
            });
        }
        SignalBus::emit(&mut host, obj, &Signal::Redraw);
        assert_eq!(host.log, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_signals_are_scoped_to_object_and_kind() {
        let mut host = Host::default();
        let a = ObjectId::next();
        let b = ObjectId::next();
        host.bus.connect_custom(a, "ping", 0, |h, _| {
            h.log.push("a-ping");
            Propagation::Continue
        });

        assert!(SignalBus::emit(&mut host, b, &Signal::custom("ping", vec![])).is_empty());
        assert!(SignalBus::emit(&mut host, a, &Signal::custom("pong", vec![])).is_empty());
        assert_eq!(SignalBus::emit(&mut host, a, &Signal::custom("ping", vec![])).invoked, 1);
    }

    #[test]
    fn test_disconnect_during_emission_skips_revoked() {
        let mut host = Host::default();
        let obj = ObjectId::next();
        let victim = Arc::new(parking_lot::Mutex::new(None));

        let slot = Arc::clone(&victim);
        host.bus.connect(obj, SignalKind::Redraw, 10, move |h, _| {
            h.log.push("killer");
            if let Some(id) = *slot.lock() {
                h.bus.disconnect(id);
            }
            Propagation::Continue
        });
        let id = host.bus.connect(obj, SignalKind::Redraw, 0, |h, _| {
            h.log.push("victim");
            Propagation::Continue
        });
        *victim.lock() = Some(id);

        let emission = SignalBus::emit(&mut host, obj, &Signal::Redraw);
        assert_eq!(host.log, vec!["killer"]);
        assert_eq!(emission.invoked, 1);
        assert_eq!(host.bus.len(), 1);
    }

    #[test]
    fn test_connect_during_emission_runs_next_time() {
        let mut host = Host::default();
        let obj = ObjectId::next();
        host.bus.connect(obj, SignalKind::Redraw, 0, move |h, _| {
            h.log.push("outer");
            if h.bus.handler_count(obj, &SignalKind::Redraw) == 1 {
                h.bus.connect(obj, SignalKind::Redraw, 0, |h, _| {
                    h.log.push("late");
                    Propagation::Continue
                });
            }
            Propagation::Continue
        });

        SignalBus::emit(&mut host, obj, &Signal::Redraw);
        assert_eq!(host.log, vec!["outer"]);
        SignalBus::emit(&mut host, obj, &Signal::Redraw);
        assert_eq!(host.log, vec!["outer", "outer", "late"]);
    }

    #[test]
    fn test_reentrant_emit() {
        let mut host = Host::default();
        let a = ObjectId::next();
        let b = ObjectId::next();
        host.bus.connect_custom(b, "inner", 0, |h, _| {
            h.log.push("inner");
            Propagation::Continue
        });
        host.bus.connect_custom(a, "outer", 0, move |h, _| {
            h.log.push("outer");
            SignalBus::emit(h, b, &Signal::custom("inner", vec![]));
            Propagation::Continue
        });

        SignalBus::emit(&mut host, a, &Signal::custom("outer", vec![SignalArg::Int(1)]));
        assert_eq!(host.log, vec!["outer", "inner"]);
    }

    #[test]
    fn test_disconnect_object_and_clear() {
        let mut host = Host::default();
        let a = ObjectId::next();
        let b = ObjectId::next();
        host.bus.connect_resize(a, 0, |_, _| Propagation::Continue);
        host.bus.connect_focus(a, 0, |_, _| Propagation::Continue);
        let keep = host.bus.connect_resize(b, 0, |_, _| Propagation::Continue);

        assert_eq!(host.bus.disconnect_object(a), 2);
        assert_eq!(host.bus.len(), 1);
        assert!(host.bus.disconnect(keep));
        assert!(!host.bus.disconnect(keep));

        host.bus.connect_resize(b, 0, |_, _| Propagation::Continue);
        host.bus.clear();
        assert!(host.bus.is_empty());
    }

    #[test]
    fn test_typed_helpers_receive_payload() {
        let mut host = Host::default();
        let obj = ObjectId::next();
        host.bus.connect_resize(obj, 0, |h, size| {
            if size == Size::new(40, 12) {
                h.log.push("40x12");
            }
            Propagation::Continue
        });
        host.bus.connect_focus(obj, 0, |h, gained| {
            h.log.push(if gained { "gained" } else { "lost" });
            Propagation::Continue
        });

        SignalBus::emit(&mut host, obj, &Signal::Resize(Size::new(40, 12)));
        SignalBus::emit(&mut host, obj, &Signal::FocusChanged { gained: false });
        assert_eq!(host.log, vec!["40x12", "lost"]);
    }
}
