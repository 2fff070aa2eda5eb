//! Scene - Per-Display Handler Context
//!
//! Everything a signal handler or object constructor may touch while a
//! display is running: the window tree, the signal bus, focus, and a handle
//! back to the application.
//!
//! A scene is owned by exactly one display task. Handlers get `&mut Scene`
//! and never see another display's scene; cross-display effects go through
//! [`Application::broadcast`] or a [`SharedModel`](crate::shared::SharedModel).
//!
//! # Usage
//!
//! ```ignore
//! app.spawn_display(session, backend, |scene| {
//!     let root = scene.root();
//!     let status = scene.add_window(root, Rect::new(0, 0, 20, 1))?;
//!     scene.connect_key(status, PRIORITY_NORMAL, |scene, key| {
//!         if key.code == KeyCode::Char('q') {
//!             scene.request_close();
//!         }
//!     });
//!     Ok(())
//! })?;
//! ```

use std::sync::Arc;

use tokio::sync::watch;

use crate::application::Application;
use crate::canvas::{Canvas, Rect, Size};
use crate::error::MuxError;
use crate::input::KeyEvent;
use crate::object::ObjectId;
use crate::session::Session;
use crate::signal::{
    Emission, Propagation, Signal, SignalArg, SignalBus, SignalHost, SignalKind, SubscriptionId,
};
use crate::theme::Theme;
use crate::window::{DrawContext, WindowTree};

/// The mutable world of one display
pub struct Scene {
    session: Arc<Session>,
    app: Application,
    theme: Arc<Theme>,
    tree: WindowTree,
    bus: SignalBus<Scene>,
    focus: Option<ObjectId>,
    close_requested: bool,
    needs_render: bool,
    redraw_sources: Vec<watch::Receiver<u64>>,
}

impl std::fmt::Debug for Scene {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scene")
            .field("session", &self.session.id)
            .field("windows", &self.tree.len())
            .field("subscriptions", &self.bus.len())
            .field("focus", &self.focus)
            .field("close_requested", &self.close_requested)
            .finish()
    }
}

impl SignalHost for Scene {
    fn bus(&self) -> &SignalBus<Self> {
        &self.bus
    }

    fn bus_mut(&mut self) -> &mut SignalBus<Self> {
        &mut self.bus
    }
}

impl Scene {
    /// Create a scene with a root window covering `size`
    pub(crate) fn new(session: Arc<Session>, app: Application, size: Size) -> Self {
        let theme = app.theme();
        let tree = WindowTree::new(size, theme.background);
        Self {
            session,
            app,
            theme,
            tree,
            bus: SignalBus::new(),
            focus: None,
            close_requested: false,
            needs_render: true,
            redraw_sources: Vec::new(),
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// The session this scene presents to
    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// The owning application
    #[must_use]
    pub fn app(&self) -> &Application {
        &self.app
    }

    /// Active theme
    #[must_use]
    pub fn theme(&self) -> &Theme {
        &self.theme
    }

    /// The root window
    #[must_use]
    pub fn root(&self) -> ObjectId {
        self.tree.root()
    }

    /// Current screen size
    #[must_use]
    pub fn size(&self) -> Size {
        self.tree.screen_size()
    }

    /// The window tree
    #[must_use]
    pub fn tree(&self) -> &WindowTree {
        &self.tree
    }

    /// The window tree, mutably
    pub fn tree_mut(&mut self) -> &mut WindowTree {
        self.needs_render = true;
        &mut self.tree
    }

    /// A window's canvas
    pub fn canvas_mut(&mut self, id: ObjectId) -> Option<&mut Canvas> {
        self.needs_render = true;
        self.tree.canvas_mut(id)
    }

    // ========================================================================
    // Windows and objects
    // ========================================================================

    /// Add a child window
    ///
    /// # Errors
    ///
    /// [`MuxError::UnknownObject`] if `parent` is not in the tree.
    pub fn add_window(&mut self, parent: ObjectId, bounds: Rect) -> Result<ObjectId, MuxError> {
        self.needs_render = true;
        self.tree.add_child(parent, bounds)
    }

    /// Add a named child window
    ///
    /// # Errors
    ///
    /// [`MuxError::UnknownObject`] if `parent` is not in the tree.
    pub fn add_named_window(
        &mut self,
        parent: ObjectId,
        name: impl Into<String>,
        bounds: Rect,
    ) -> Result<ObjectId, MuxError> {
        self.needs_render = true;
        self.tree.add_named_child(parent, name, bounds)
    }

    /// Remove a window and its subtree, revoking their subscriptions
    ///
    /// If focus was inside the removed subtree it moves to the parent.
    ///
    /// # Errors
    ///
    /// [`MuxError::UnknownObject`] if `id` is not in the tree.
    pub fn remove_window(&mut self, id: ObjectId) -> Result<Vec<ObjectId>, MuxError> {
        let parent = self.tree.get(id).and_then(|w| w.parent());
        let removed = self.tree.remove(id)?;
        for object in &removed {
            self.bus.disconnect_object(*object);
        }
        if let Some(focus) = self.focus {
            if removed.contains(&focus) {
                self.focus = None;
                if let Some(parent) = parent {
                    self.focus(parent)?;
                }
            }
        }
        self.needs_render = true;
        Ok(removed)
    }

    /// Install a draw handler on a window
    ///
    /// # Errors
    ///
    /// [`MuxError::UnknownObject`] if `id` is not in the tree.
    pub fn set_draw_handler<F>(&mut self, id: ObjectId, handler: F) -> Result<(), MuxError>
    where
        F: FnMut(&mut Canvas, &DrawContext<'_>) + Send + 'static,
    {
        self.needs_render = true;
        self.tree.set_draw_handler(id, handler)
    }

    /// Build an object of a registered kind under `parent`
    ///
    /// # Errors
    ///
    /// [`MuxError::UnknownKind`] or whatever the constructor fails with.
    pub fn construct(&mut self, kind: &str, parent: ObjectId) -> Result<ObjectId, MuxError> {
        let objects = self.app.objects().clone();
        objects.construct(kind, self, parent)
    }

    // ========================================================================
    // Signals
    // ========================================================================

    /// Subscribe a raw handler
    pub fn connect<F>(
        &mut self,
        object: ObjectId,
        kind: SignalKind,
        priority: i32,
        handler: F,
    ) -> SubscriptionId
    where
        F: Fn(&mut Scene, &Signal) -> Propagation + Send + Sync + 'static,
    {
        self.bus.connect(object, kind, priority, handler)
    }

    /// Subscribe to key presses on `object`
    pub fn connect_key<F>(&mut self, object: ObjectId, priority: i32, handler: F) -> SubscriptionId
    where
        F: Fn(&mut Scene, &KeyEvent) -> Propagation + Send + Sync + 'static,
    {
        self.bus.connect_key(object, priority, handler)
    }

    /// Subscribe to resizes on `object`
    pub fn connect_resize<F>(
        &mut self,
        object: ObjectId,
        priority: i32,
        handler: F,
    ) -> SubscriptionId
    where
        F: Fn(&mut Scene, Size) -> Propagation + Send + Sync + 'static,
    {
        self.bus.connect_resize(object, priority, handler)
    }

    /// Subscribe to focus changes on `object`
    pub fn connect_focus<F>(
        &mut self,
        object: ObjectId,
        priority: i32,
        handler: F,
    ) -> SubscriptionId
    where
        F: Fn(&mut Scene, bool) -> Propagation + Send + Sync + 'static,
    {
        self.bus.connect_focus(object, priority, handler)
    }

    /// Subscribe to a named custom signal on `object`
    pub fn connect_custom<F>(
        &mut self,
        object: ObjectId,
        name: impl Into<String>,
        priority: i32,
        handler: F,
    ) -> SubscriptionId
    where
        F: Fn(&mut Scene, &[SignalArg]) -> Propagation + Send + Sync + 'static,
    {
        self.bus.connect_custom(object, name, priority, handler)
    }

    /// Revoke a subscription
    pub fn disconnect(&mut self, id: SubscriptionId) -> bool {
        self.bus.disconnect(id)
    }

    /// Emit on one object, without bubbling
    pub fn emit(&mut self, target: ObjectId, signal: &Signal) -> Emission {
        let emission = SignalBus::emit(self, target, signal);
        if !emission.is_empty() {
            self.needs_render = true;
        }
        emission
    }

    /// Deliver `signal` to the focused window, bubbling up to the root
    ///
    /// Without focus the root is the target. The returned emission sums the
    /// handlers invoked along the way and names the one that stopped it.
    pub fn dispatch(&mut self, signal: &Signal) -> Emission {
        let target = self
            .focus
            .filter(|id| self.tree.contains(*id))
            .unwrap_or_else(|| self.tree.root());
        self.dispatch_to(target, signal)
    }

    /// Deliver `signal` to `target`, bubbling up to the root
    pub fn dispatch_to(&mut self, target: ObjectId, signal: &Signal) -> Emission {
        let mut chain = vec![target];
        chain.extend(self.tree.ancestors(target));

        let mut total = Emission::default();
        for object in chain {
            let emission = self.emit(object, signal);
            total.invoked += emission.invoked;
            if emission.is_stopped() {
                total.stopped_by = emission.stopped_by;
                break;
            }
        }
        total
    }

    /// Deliver `signal` to every window, root first
    ///
    /// A handler stopping propagation only stops it for its own window.
    pub fn broadcast(&mut self, signal: &Signal) -> Emission {
        let mut total = Emission::default();
        for object in self.tree.paint_order() {
            total.invoked += self.emit(object, signal).invoked;
        }
        total
    }

    // ========================================================================
    // Focus
    // ========================================================================

    /// The focused window
    #[must_use]
    pub fn focused(&self) -> Option<ObjectId> {
        self.focus
    }

    /// Move focus to `id`, emitting `FocusChanged` on the old and new holder
    ///
    /// # Errors
    ///
    /// [`MuxError::UnknownObject`] if `id` is not in the tree.
    pub fn focus(&mut self, id: ObjectId) -> Result<(), MuxError> {
        if !self.tree.contains(id) {
            return Err(MuxError::UnknownObject(id));
        }
        if self.focus == Some(id) {
            return Ok(());
        }
        if let Some(old) = self.focus.replace(id) {
            if self.tree.contains(old) {
                self.emit(old, &Signal::FocusChanged { gained: false });
            }
        }
        self.emit(id, &Signal::FocusChanged { gained: true });
        self.needs_render = true;
        Ok(())
    }

    /// Move focus to the next visible window in paint order, wrapping
    ///
    /// The root only takes focus when it is the only window.
    pub fn focus_next(&mut self) -> Option<ObjectId> {
        self.cycle_focus(false)
    }

    /// Move focus to the previous visible window in paint order, wrapping
    pub fn focus_prev(&mut self) -> Option<ObjectId> {
        self.cycle_focus(true)
    }

    fn cycle_focus(&mut self, backwards: bool) -> Option<ObjectId> {
        let root = self.tree.root();
        let mut order: Vec<_> = self
            .tree
            .paint_order()
            .into_iter()
            .filter(|id| *id != root)
            .collect();
        if order.is_empty() {
            order.push(root);
        }
        if backwards {
            order.reverse();
        }

        let next = match self.focus.and_then(|f| order.iter().position(|id| *id == f)) {
            Some(index) => order[(index + 1) % order.len()],
            None => order[0],
        };
        self.focus(next).ok()?;
        Some(next)
    }

    // ========================================================================
    // Display control
    // ========================================================================

    /// Ask the display to close after the current dispatch
    pub fn request_close(&mut self) {
        tracing::debug!(session = %self.session.id, "Close requested by handler");
        self.close_requested = true;
    }

    /// Whether a handler asked to close
    #[must_use]
    pub fn is_close_requested(&self) -> bool {
        self.close_requested
    }

    /// Schedule a render pass
    pub fn invalidate(&mut self) {
        self.needs_render = true;
    }

    /// Repaint whenever `source` publishes a new value
    ///
    /// Typically a [`SharedModel::subscribe`](crate::shared::SharedModel::subscribe)
    /// receiver.
    pub fn redraw_on(&mut self, source: watch::Receiver<u64>) {
        self.redraw_sources.push(source);
    }

    pub(crate) fn take_redraw_sources(&mut self) -> Vec<watch::Receiver<u64>> {
        std::mem::take(&mut self.redraw_sources)
    }

    pub(crate) fn take_needs_render(&mut self) -> bool {
        std::mem::replace(&mut self.needs_render, false)
    }

    /// Run draw handlers for a render pass
    pub(crate) fn draw(&mut self) -> usize {
        self.tree.draw_all(&self.theme, self.focus)
    }

    /// Apply new screen geometry
    pub(crate) fn resize(&mut self, size: Size) {
        self.tree.resize_root(size);
        self.needs_render = true;
    }

    /// Revoke every subscription
    pub(crate) fn revoke_all(&mut self) {
        self.bus.clear();
    }
}
