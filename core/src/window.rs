//! Window Tree
//!
//! Windows form a tree rooted at a screen-sized root window. The tree is an
//! arena: windows live in one map keyed by [`ObjectId`], a parent stores its
//! children's ids in paint order, and a child refers back to its parent by
//! id. Nothing holds a reference into another window.
//!
//! Each window owns a [`Canvas`] the size of its bounds. Bounds are relative
//! to the parent's origin; what is visible on screen is the window's absolute
//! rectangle clipped by every ancestor.
//!
//! Structural changes (move, resize, hide, remove) leave *damage*: screen
//! rectangles whose content must be recomposed even though no canvas inside
//! them changed.

use std::collections::HashMap;
use std::fmt;

use crate::canvas::{Canvas, Position, Rect, Size, Style};
use crate::error::MuxError;
use crate::object::ObjectId;
use crate::theme::Theme;

/// What a draw handler gets to look at
#[derive(Debug)]
pub struct DrawContext<'a> {
    /// The window being drawn
    pub window: ObjectId,
    /// Whether it holds focus
    pub focused: bool,
    /// The application theme
    pub theme: &'a Theme,
}

/// Paints a window's canvas
pub type DrawHandler = Box<dyn FnMut(&mut Canvas, &DrawContext<'_>) + Send>;

/// A rectangular drawable surface
pub struct Window {
    id: ObjectId,
    parent: Option<ObjectId>,
    children: Vec<ObjectId>,
    bounds: Rect,
    canvas: Canvas,
    visible: bool,
    name: Option<String>,
    draw: Option<DrawHandler>,
}

impl fmt::Debug for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Window")
            .field("id", &self.id)
            .field("parent", &self.parent)
            .field("children", &self.children)
            .field("bounds", &self.bounds)
            .field("visible", &self.visible)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl Window {
    fn new(id: ObjectId, parent: Option<ObjectId>, bounds: Rect, background: Style) -> Self {
        Self {
            id,
            parent,
            children: Vec::new(),
            bounds,
            canvas: Canvas::new(Size::new(bounds.width, bounds.height), background),
            visible: true,
            name: None,
            draw: None,
        }
    }

    /// Window id
    #[must_use]
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Parent id (`None` for the root)
    #[must_use]
    pub fn parent(&self) -> Option<ObjectId> {
        self.parent
    }

    /// Children in paint order (last is on top)
    #[must_use]
    pub fn children(&self) -> &[ObjectId] {
        &self.children
    }

    /// Bounds relative to the parent
    #[must_use]
    pub fn bounds(&self) -> Rect {
        self.bounds
    }

    /// Whether the window itself is visible (ancestors may still hide it)
    #[must_use]
    pub fn is_visible(&self) -> bool {
        self.visible
    }

    /// Debug name
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The window's canvas
    #[must_use]
    pub fn canvas(&self) -> &Canvas {
        &self.canvas
    }

    /// Mutable canvas access
    pub fn canvas_mut(&mut self) -> &mut Canvas {
        &mut self.canvas
    }

    /// Whether a draw handler is installed
    #[must_use]
    pub fn has_draw_handler(&self) -> bool {
        self.draw.is_some()
    }
}

/// Arena of windows for one display
#[derive(Debug)]
pub struct WindowTree {
    windows: HashMap<ObjectId, Window>,
    root: ObjectId,
    background: Style,
    damage: Vec<Rect>,
}

impl WindowTree {
    /// Create a tree whose root covers `size`
    #[must_use]
    pub fn new(size: Size, background: Style) -> Self {
        let root = ObjectId::next();
        let mut windows = HashMap::new();
        let mut window = Window::new(root, None, size.bounds(), background);
        window.name = Some("root".to_string());
        windows.insert(root, window);
        Self {
            windows,
            root,
            background,
            damage: Vec::new(),
        }
    }

    /// Root window id
    #[must_use]
    pub fn root(&self) -> ObjectId {
        self.root
    }

    /// Screen size (the root's size)
    #[must_use]
    pub fn screen_size(&self) -> Size {
        self.windows
            .get(&self.root)
            .map_or(Size::default(), |w| w.canvas.size())
    }

    /// Number of windows, root included
    #[must_use]
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    /// Always false: the root exists for the tree's lifetime
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Whether `id` is in the tree
    #[must_use]
    pub fn contains(&self, id: ObjectId) -> bool {
        self.windows.contains_key(&id)
    }

    /// Look up a window
    #[must_use]
    pub fn get(&self, id: ObjectId) -> Option<&Window> {
        self.windows.get(&id)
    }

    /// Look up a window mutably
    pub fn get_mut(&mut self, id: ObjectId) -> Option<&mut Window> {
        self.windows.get_mut(&id)
    }

    fn window(&self, id: ObjectId) -> Result<&Window, MuxError> {
        self.windows.get(&id).ok_or(MuxError::UnknownObject(id))
    }

    fn window_mut(&mut self, id: ObjectId) -> Result<&mut Window, MuxError> {
        self.windows.get_mut(&id).ok_or(MuxError::UnknownObject(id))
    }

    /// Canvas of a window
    pub fn canvas_mut(&mut self, id: ObjectId) -> Option<&mut Canvas> {
        self.windows.get_mut(&id).map(|w| &mut w.canvas)
    }

    /// Add a child window on top of its siblings
    ///
    /// # Errors
    ///
    /// [`MuxError::UnknownObject`] if `parent` is not in the tree.
    pub fn add_child(&mut self, parent: ObjectId, bounds: Rect) -> Result<ObjectId, MuxError> {
        let id = ObjectId::next();
        let background = self.background;
        self.window_mut(parent)?.children.push(id);
        self.windows
            .insert(id, Window::new(id, Some(parent), bounds, background));
        Ok(id)
    }

    /// Add a named child window
    ///
    /// # Errors
    ///
    /// [`MuxError::UnknownObject`] if `parent` is not in the tree.
    pub fn add_named_child(
        &mut self,
        parent: ObjectId,
        name: impl Into<String>,
        bounds: Rect,
    ) -> Result<ObjectId, MuxError> {
        let id = self.add_child(parent, bounds)?;
        if let Some(window) = self.windows.get_mut(&id) {
            window.name = Some(name.into());
        }
        Ok(id)
    }

    /// Find a window by name
    #[must_use]
    pub fn find(&self, name: &str) -> Option<ObjectId> {
        self.windows
            .values()
            .find(|w| w.name.as_deref() == Some(name))
            .map(|w| w.id)
    }

    /// Remove a window and its whole subtree
    ///
    /// Returns the removed ids, the window itself first. The root is never
    /// removed; asking for it removes nothing.
    ///
    /// # Errors
    ///
    /// [`MuxError::UnknownObject`] if `id` is not in the tree.
    pub fn remove(&mut self, id: ObjectId) -> Result<Vec<ObjectId>, MuxError> {
        let parent = self.window(id)?.parent;
        let Some(parent) = parent else {
            return Ok(Vec::new());
        };

        if let Some(rect) = self.visible_rect(id) {
            self.damage.push(rect);
        }
        if let Some(p) = self.windows.get_mut(&parent) {
            p.children.retain(|c| *c != id);
        }

        let removed = self.subtree(id);
        for gone in &removed {
            self.windows.remove(gone);
        }
        Ok(removed)
    }

    /// `id` and all its descendants, preorder
    #[must_use]
    pub fn subtree(&self, id: ObjectId) -> Vec<ObjectId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            if let Some(window) = self.windows.get(&next) {
                out.push(next);
                stack.extend(window.children.iter().rev());
            }
        }
        out
    }

    /// Parent, grandparent, ... up to and including the root
    #[must_use]
    pub fn ancestors(&self, id: ObjectId) -> Vec<ObjectId> {
        let mut out = Vec::new();
        let mut current = self.windows.get(&id).and_then(|w| w.parent);
        while let Some(parent) = current {
            out.push(parent);
            current = self.windows.get(&parent).and_then(|w| w.parent);
        }
        out
    }

    /// Screen position of a window's top-left cell
    #[must_use]
    pub fn origin(&self, id: ObjectId) -> Option<Position> {
        let window = self.windows.get(&id)?;
        let (mut col, mut row) = (window.bounds.x, window.bounds.y);
        for ancestor in self.ancestors(id) {
            let bounds = self.windows.get(&ancestor)?.bounds;
            col = col.saturating_add(bounds.x);
            row = row.saturating_add(bounds.y);
        }
        Some(Position::new(row, col))
    }

    /// Unclipped screen rectangle of a window
    #[must_use]
    pub fn absolute_rect(&self, id: ObjectId) -> Option<Rect> {
        let origin = self.origin(id)?;
        let bounds = self.windows.get(&id)?.bounds;
        Some(Rect::new(origin.col, origin.row, bounds.width, bounds.height))
    }

    /// The part of a window actually visible on screen
    ///
    /// `None` when the window or an ancestor is hidden, or nothing of it
    /// survives clipping.
    #[must_use]
    pub fn visible_rect(&self, id: ObjectId) -> Option<Rect> {
        if !self.windows.get(&id)?.visible {
            return None;
        }
        let mut rect = self.absolute_rect(id)?;
        for ancestor in self.ancestors(id) {
            if !self.windows.get(&ancestor)?.visible {
                return None;
            }
            rect = rect.intersection(&self.absolute_rect(ancestor)?);
        }
        (!rect.is_empty()).then_some(rect)
    }

    /// Visible windows in paint order: root first, then children in order,
    /// each before its own children
    #[must_use]
    pub fn paint_order(&self) -> Vec<ObjectId> {
        let mut out = Vec::new();
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            let Some(window) = self.windows.get(&id) else {
                continue;
            };
            if !window.visible {
                continue;
            }
            out.push(id);
            stack.extend(window.children.iter().rev());
        }
        out
    }

    /// Move and/or resize a window
    ///
    /// # Errors
    ///
    /// [`MuxError::UnknownObject`] if `id` is not in the tree.
    pub fn set_bounds(&mut self, id: ObjectId, bounds: Rect) -> Result<(), MuxError> {
        if self.window(id)?.bounds == bounds {
            return Ok(());
        }
        if let Some(old) = self.visible_rect(id) {
            self.damage.push(old);
        }
        let window = self.window_mut(id)?;
        window.bounds = bounds;
        window.canvas.resize(Size::new(bounds.width, bounds.height));
        self.mark_subtree_dirty(id);
        Ok(())
    }

    /// Show or hide a window (and with it, its subtree)
    ///
    /// # Errors
    ///
    /// [`MuxError::UnknownObject`] if `id` is not in the tree.
    pub fn set_visible(&mut self, id: ObjectId, visible: bool) -> Result<(), MuxError> {
        if self.window(id)?.visible == visible {
            return Ok(());
        }
        if !visible {
            if let Some(rect) = self.visible_rect(id) {
                self.damage.push(rect);
            }
        }
        self.window_mut(id)?.visible = visible;
        if visible {
            self.mark_subtree_dirty(id);
        }
        Ok(())
    }

    /// Move a window to the top of its siblings
    ///
    /// # Errors
    ///
    /// [`MuxError::UnknownObject`] if `id` is not in the tree.
    pub fn raise(&mut self, id: ObjectId) -> Result<(), MuxError> {
        let Some(parent) = self.window(id)?.parent else {
            return Ok(());
        };
        let siblings = &mut self.window_mut(parent)?.children;
        siblings.retain(|c| *c != id);
        siblings.push(id);
        self.mark_subtree_dirty(id);
        Ok(())
    }

    /// Install the handler that paints a window
    ///
    /// # Errors
    ///
    /// [`MuxError::UnknownObject`] if `id` is not in the tree.
    pub fn set_draw_handler<F>(&mut self, id: ObjectId, handler: F) -> Result<(), MuxError>
    where
        F: FnMut(&mut Canvas, &DrawContext<'_>) + Send + 'static,
    {
        self.window_mut(id)?.draw = Some(Box::new(handler));
        Ok(())
    }

    /// Run every visible window's draw handler once
    ///
    /// Returns the number of handlers run.
    pub fn draw_all(&mut self, theme: &Theme, focus: Option<ObjectId>) -> usize {
        let mut drawn = 0;
        for id in self.paint_order() {
            let Some(window) = self.windows.get_mut(&id) else {
                continue;
            };
            let Some(draw) = window.draw.as_mut() else {
                continue;
            };
            let ctx = DrawContext {
                window: id,
                focused: focus == Some(id),
                theme,
            };
            draw(&mut window.canvas, &ctx);
            drawn += 1;
        }
        drawn
    }

    /// Resize the root to a new screen size
    pub fn resize_root(&mut self, size: Size) {
        let root = self.root;
        if let Some(window) = self.windows.get_mut(&root) {
            window.bounds = size.bounds();
            window.canvas.resize(size);
        }
        self.damage.push(size.bounds());
    }

    /// Mark a window and its descendants for recomposition
    pub fn mark_subtree_dirty(&mut self, id: ObjectId) {
        for member in self.subtree(id) {
            if let Some(window) = self.windows.get_mut(&member) {
                window.canvas.mark_all_dirty();
            }
        }
    }

    /// Mark every window for recomposition
    pub fn mark_all_dirty(&mut self) {
        self.mark_subtree_dirty(self.root);
    }

    /// Record a damaged screen rectangle
    pub fn damage(&mut self, rect: Rect) {
        self.damage.push(rect);
    }

    /// Take accumulated structural damage
    pub fn take_damage(&mut self) -> Vec<Rect> {
        std::mem::take(&mut self.damage)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn tree() -> WindowTree {
        WindowTree::new(Size::new(80, 24), Style::default())
    }

    #[test]
    fn test_add_and_navigate() {
        let mut tree = tree();
        let root = tree.root();
        let panel = tree.add_child(root, Rect::new(10, 5, 30, 10)).unwrap();
        let button = tree.add_child(panel, Rect::new(2, 1, 8, 1)).unwrap();

        assert_eq!(tree.ancestors(button), vec![panel, root]);
        assert_eq!(tree.origin(button), Some(Position::new(6, 12)));
        assert_eq!(tree.get(panel).unwrap().children(), &[button]);
        assert_eq!(tree.paint_order(), vec![root, panel, button]);
    }

    #[test]
    fn test_add_to_unknown_parent_fails() {
        let mut tree = tree();
        let ghost = ObjectId::next();
        assert!(matches!(
            tree.add_child(ghost, Rect::new(0, 0, 1, 1)),
            Err(MuxError::UnknownObject(id)) if id == ghost
        ));
    }

    #[test]
    fn test_remove_takes_subtree_and_leaves_damage() {
        let mut tree = tree();
        let root = tree.root();
        let panel = tree.add_child(root, Rect::new(0, 0, 10, 10)).unwrap();
        let child = tree.add_child(panel, Rect::new(1, 1, 2, 2)).unwrap();
        tree.take_damage();

        let removed = tree.remove(panel).unwrap();
        assert_eq!(removed, vec![panel, child]);
        assert!(!tree.contains(child));
        assert!(tree.get(root).unwrap().children().is_empty());
        assert_eq!(tree.take_damage(), vec![Rect::new(0, 0, 10, 10)]);
    }

    #[test]
    fn test_root_is_never_removed() {
        let mut tree = tree();
        assert!(tree.remove(tree.root()).unwrap().is_empty());
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn test_visible_rect_clips_to_ancestors() {
        let mut tree = tree();
        let root = tree.root();
        let panel = tree.add_child(root, Rect::new(70, 20, 20, 10)).unwrap();
        let inner = tree.add_child(panel, Rect::new(5, 2, 10, 10)).unwrap();

        assert_eq!(tree.visible_rect(panel), Some(Rect::new(70, 20, 10, 4)));
        assert_eq!(tree.visible_rect(inner), Some(Rect::new(75, 22, 5, 2)));

        tree.set_visible(panel, false).unwrap();
        assert_eq!(tree.visible_rect(inner), None);
        assert_eq!(tree.paint_order(), vec![root]);
    }

    #[test]
    fn test_set_bounds_resizes_canvas() {
        let mut tree = tree();
        let root = tree.root();
        let panel = tree.add_child(root, Rect::new(0, 0, 10, 10)).unwrap();
        tree.take_damage();

        tree.set_bounds(panel, Rect::new(5, 5, 4, 3)).unwrap();
        assert_eq!(tree.get(panel).unwrap().canvas().size(), Size::new(4, 3));
        assert_eq!(tree.take_damage(), vec![Rect::new(0, 0, 10, 10)]);
    }

    #[test]
    fn test_raise_changes_paint_order() {
        let mut tree = tree();
        let root = tree.root();
        let a = tree.add_child(root, Rect::new(0, 0, 5, 5)).unwrap();
        let b = tree.add_child(root, Rect::new(2, 2, 5, 5)).unwrap();
        assert_eq!(tree.paint_order(), vec![root, a, b]);
        tree.raise(a).unwrap();
        assert_eq!(tree.paint_order(), vec![root, b, a]);
    }

    #[test]
    fn test_draw_all_runs_visible_handlers_once() {
        let mut tree = tree();
        let root = tree.root();
        let a = tree.add_named_child(root, "a", Rect::new(0, 0, 5, 1)).unwrap();
        let b = tree.add_child(root, Rect::new(0, 1, 5, 1)).unwrap();
        tree.set_draw_handler(a, |canvas, ctx| {
            canvas.put_str(0, 0, if ctx.focused { "yes" } else { "no" }, Style::default());
        })
        .unwrap();
        tree.set_draw_handler(b, |canvas, _| {
            canvas.put_str(0, 0, "b", Style::default());
        })
        .unwrap();
        tree.set_visible(b, false).unwrap();

        let drawn = tree.draw_all(&Theme::mono(), Some(a));
        assert_eq!(drawn, 1);
        assert_eq!(tree.get(a).unwrap().canvas().row_text(0), "yes  ");
        assert_eq!(tree.find("a"), Some(a));
    }
}
