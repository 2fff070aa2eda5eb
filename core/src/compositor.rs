//! Compositor
//!
//! Flattens a [`WindowTree`] into screen frames and works out what the
//! terminal needs to be told.
//!
//! # Frames
//!
//! - **composed**: what the screen should show, rebuilt region by region
//! - **presented**: what the terminal is believed to show
//!
//! # Render pass
//!
//! ```text
//!  window canvases ──dirty regions──┐
//!                                   ├─▶ coalesce ─▶ recompose ─▶ diff ─▶ patches
//!  structural damage ───────────────┘   (screen)    (root-first)  vs presented
//! ```
//!
//! Windows are opaque: inside a region, each window in paint order simply
//! overwrites what is below it.

use crate::canvas::{Canvas, DirtyRegions, Patch, Position, Rect, Size, Style};
use crate::window::WindowTree;

/// Two-frame compositor for one display
#[derive(Debug)]
pub struct Compositor {
    composed: Canvas,
    presented: Canvas,
}

impl Compositor {
    /// Create a compositor for a blank terminal of `size`
    #[must_use]
    pub fn new(size: Size) -> Self {
        Self {
            composed: Canvas::new(size, Style::default()),
            presented: Canvas::new(size, Style::default()),
        }
    }

    /// Current screen size
    #[must_use]
    pub fn size(&self) -> Size {
        self.presented.size()
    }

    /// What the terminal is believed to show
    #[must_use]
    pub fn presented(&self) -> &Canvas {
        &self.presented
    }

    /// Forget what the terminal shows
    ///
    /// Call after clearing the terminal (resume, resize). The next render
    /// repaints everything.
    pub fn invalidate(&mut self, size: Size, tree: &mut WindowTree) {
        self.composed = Canvas::new(size, Style::default());
        self.presented = Canvas::new(size, Style::default());
        tree.mark_all_dirty();
        tree.damage(size.bounds());
    }

    /// Recompose dirty regions and return the patches to send
    pub fn render(&mut self, tree: &mut WindowTree) -> Vec<Patch> {
        let size = tree.screen_size();
        if size != self.presented.size() {
            self.invalidate(size, tree);
        }

        let regions = Self::collect_regions(tree, size);
        if regions.is_empty() {
            return Vec::new();
        }

        let order: Vec<_> = tree
            .paint_order()
            .into_iter()
            .filter_map(|id| Some((id, tree.visible_rect(id)?, tree.origin(id)?)))
            .collect();

        for region in &regions {
            for (id, visible, origin) in &order {
                let area = region.intersection(visible);
                if area.is_empty() {
                    continue;
                }
                let Some(window) = tree.get(*id) else {
                    continue;
                };
                let local = Rect::new(
                    area.x - origin.col,
                    area.y - origin.row,
                    area.width,
                    area.height,
                );
                self.composed
                    .blit(window.canvas(), local, Position::new(area.y, area.x));
            }
        }
        self.composed.take_dirty();

        let patches = self.composed.diff_regions(&self.presented, &regions);
        self.presented.apply(&patches);
        self.presented.take_dirty();
        patches
    }

    fn collect_regions(tree: &mut WindowTree, size: Size) -> Vec<Rect> {
        let mut dirty = DirtyRegions::new(size);
        for rect in tree.take_damage() {
            dirty.mark(rect);
        }

        for id in tree.paint_order() {
            let (Some(visible), Some(origin)) = (tree.visible_rect(id), tree.origin(id)) else {
                continue;
            };
            let Some(canvas) = tree.canvas_mut(id) else {
                continue;
            };
            for rect in canvas.take_dirty() {
                dirty.mark(rect.offset(origin.col, origin.row).intersection(&visible));
            }
        }
        dirty.regions()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::canvas::{Cell, Color};

    fn red() -> Style {
        Style::fg(Color::Red)
    }

    fn screen(compositor: &Compositor, row: u16) -> String {
        compositor.presented().row_text(row)
    }

    #[test]
    fn test_first_render_paints_everything() {
        let mut tree = WindowTree::new(Size::new(6, 2), Style::default());
        let root = tree.root();
        tree.canvas_mut(root).unwrap().put_str(0, 0, "hello", red());

        let mut compositor = Compositor::new(Size::new(6, 2));
        let patches = compositor.render(&mut tree);
        assert!(!patches.is_empty());
        assert_eq!(screen(&compositor, 0), "hello ");
    }

    #[test]
    fn test_child_overlays_parent_and_clips() {
        let mut tree = WindowTree::new(Size::new(8, 3), Style::default());
        let root = tree.root();
        tree.canvas_mut(root)
            .unwrap()
            .fill(Rect::new(0, 0, 8, 3), Cell::new('.', Style::default()));
        let child = tree.add_child(root, Rect::new(5, 1, 6, 1)).unwrap();
        tree.canvas_mut(child).unwrap().put_str(0, 0, "abcdef", red());

        let mut compositor = Compositor::new(Size::new(8, 3));
        compositor.render(&mut tree);
        assert_eq!(screen(&compositor, 0), "........");
        assert_eq!(screen(&compositor, 1), ".....abc");
    }

    #[test]
    fn test_second_render_only_sends_changes() {
        let mut tree = WindowTree::new(Size::new(10, 2), Style::default());
        let root = tree.root();
        let mut compositor = Compositor::new(Size::new(10, 2));
        compositor.render(&mut tree);

        tree.canvas_mut(root).unwrap().put_str(1, 3, "xy", red());
        let patches = compositor.render(&mut tree);
        assert_eq!(patches.len(), 1);
        assert_eq!((patches[0].row, patches[0].col, patches[0].len()), (1, 3, 2));

        assert!(compositor.render(&mut tree).is_empty());
    }

    #[test]
    fn test_removed_window_is_repainted_from_below() {
        let mut tree = WindowTree::new(Size::new(6, 1), Style::default());
        let root = tree.root();
        let child = tree.add_child(root, Rect::new(0, 0, 3, 1)).unwrap();
        tree.canvas_mut(child).unwrap().put_str(0, 0, "top", red());

        let mut compositor = Compositor::new(Size::new(6, 1));
        compositor.render(&mut tree);
        assert_eq!(screen(&compositor, 0), "top   ");

        tree.remove(child).unwrap();
        compositor.render(&mut tree);
        assert_eq!(screen(&compositor, 0), "      ");
    }

    #[test]
    fn test_hidden_window_not_composed() {
        let mut tree = WindowTree::new(Size::new(4, 1), Style::default());
        let root = tree.root();
        let child = tree.add_child(root, Rect::new(0, 0, 4, 1)).unwrap();
        tree.canvas_mut(child).unwrap().put_str(0, 0, "gone", red());
        tree.set_visible(child, false).unwrap();

        let mut compositor = Compositor::new(Size::new(4, 1));
        compositor.render(&mut tree);
        assert_eq!(screen(&compositor, 0), "    ");
    }

    #[test]
    fn test_root_resize_invalidates() {
        let mut tree = WindowTree::new(Size::new(4, 2), Style::default());
        let root = tree.root();
        let mut compositor = Compositor::new(Size::new(4, 2));
        compositor.render(&mut tree);

        tree.resize_root(Size::new(2, 1));
        tree.canvas_mut(root).unwrap().put_str(0, 0, "ok", red());
        compositor.render(&mut tree);
        assert_eq!(compositor.size(), Size::new(2, 1));
        assert_eq!(screen(&compositor, 0), "ok");
    }
}
