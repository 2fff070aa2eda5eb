//! Canvas - Styled Character Grid
//!
//! A canvas is the unit of drawing: a grid of [`Cell`]s with a background
//! cell and a set of dirty regions accumulated since the last render flush.
//!
//! Coordinates passed to drawing operations are zero-based and are clipped
//! silently. Backends routinely report stale sizes while a resize is in
//! flight, so out-of-bounds drawing is never an error.
//!
//! # Diffing
//!
//! [`Canvas::diff_against`] compares two canvases cell by cell and returns
//! [`Patch`]es: maximal runs of adjacent changed cells on the same row. One
//! patch becomes one cursor move plus one write on the backend.

mod cell;
mod dirty;

use unicode_width::UnicodeWidthChar;

pub use cell::{Attributes, Cell, Color, Position, Rect, Size, Style, WIDE_CONTINUATION};
pub use dirty::{DirtyRegions, MAX_REGIONS};

use crate::theme::BorderSet;

/// A run of changed cells on one row
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Patch {
    /// Row of the run
    pub row: u16,
    /// Column of the first cell
    pub col: u16,
    /// The new cells, left to right
    pub cells: Vec<Cell>,
}

impl Patch {
    /// Number of cells in the run
    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Whether the run is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

/// In-memory grid of styled cells
#[derive(Clone, Debug)]
pub struct Canvas {
    size: Size,
    cells: Vec<Cell>,
    background: Cell,
    dirty: DirtyRegions,
}

impl PartialEq for Canvas {
    fn eq(&self, other: &Self) -> bool {
        self.size == other.size && self.cells == other.cells
    }
}

impl Canvas {
    /// Create a canvas filled with blank cells in the background style
    ///
    /// A new canvas starts fully dirty.
    #[must_use]
    pub fn new(size: Size, background: Style) -> Self {
        let background = Cell::blank(background);
        let mut dirty = DirtyRegions::new(size);
        dirty.mark_all();
        Self {
            size,
            cells: vec![background; size.area()],
            background,
            dirty,
        }
    }

    /// Current dimensions
    #[must_use]
    pub fn size(&self) -> Size {
        self.size
    }

    /// Rect covering the whole canvas
    #[must_use]
    pub fn bounds(&self) -> Rect {
        self.size.bounds()
    }

    /// The cell used to fill cleared and newly exposed area
    #[must_use]
    pub fn background(&self) -> Cell {
        self.background
    }

    /// Change the background style
    ///
    /// Existing cells are untouched; later clears and resizes use the new
    /// background.
    pub fn set_background(&mut self, style: Style) {
        self.background = Cell::blank(style);
    }

    fn index(&self, row: u16, col: u16) -> Option<usize> {
        if row < self.size.rows && col < self.size.cols {
            Some(usize::from(row) * usize::from(self.size.cols) + usize::from(col))
        } else {
            None
        }
    }

    /// Read a cell
    #[must_use]
    pub fn get(&self, row: u16, col: u16) -> Option<&Cell> {
        self.index(row, col).map(|i| &self.cells[i])
    }

    /// All cells in row-major order
    #[must_use]
    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    /// One row of cells
    #[must_use]
    pub fn row(&self, row: u16) -> Option<&[Cell]> {
        if row >= self.size.rows {
            return None;
        }
        let start = usize::from(row) * usize::from(self.size.cols);
        Some(&self.cells[start..start + usize::from(self.size.cols)])
    }

    /// Text of one row, with wide-glyph continuations dropped
    #[must_use]
    pub fn row_text(&self, row: u16) -> String {
        self.row(row)
            .map(|cells| {
                cells
                    .iter()
                    .filter(|c| !c.is_continuation())
                    .map(|c| c.symbol)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Write a single cell (clipped)
    pub fn set(&mut self, row: u16, col: u16, cell: Cell) {
        if let Some(i) = self.index(row, col) {
            self.cells[i] = cell;
            self.dirty.mark(Rect::cell(col, row));
        }
    }

    /// Paint `cells` into `rect`, row-major
    ///
    /// Cells falling outside the canvas are dropped. Painting stops early when
    /// `cells` runs out.
    pub fn paint(&mut self, rect: Rect, cells: &[Cell]) {
        let visible = rect.intersection(&self.bounds());
        if visible.is_empty() || cells.is_empty() {
            return;
        }

        for (i, (x, y)) in rect.cells().enumerate() {
            let Some(cell) = cells.get(i) else {
                break;
            };
            if let Some(idx) = self.index(y, x) {
                self.cells[idx] = *cell;
            }
        }
        self.dirty.mark(visible);
    }

    /// Fill `rect` with one cell (clipped)
    pub fn fill(&mut self, rect: Rect, cell: Cell) {
        let visible = rect.intersection(&self.bounds());
        if visible.is_empty() {
            return;
        }
        for (x, y) in visible.cells() {
            if let Some(idx) = self.index(y, x) {
                self.cells[idx] = cell;
            }
        }
        self.dirty.mark(visible);
    }

    /// Reset `rect` to the background cell (clipped)
    pub fn clear(&mut self, rect: Rect) {
        self.fill(rect, self.background);
    }

    /// Reset the whole canvas to the background cell
    pub fn clear_all(&mut self) {
        self.clear(self.bounds());
    }

    /// Write a string starting at (row, col)
    ///
    /// Double-width glyphs occupy two cells; zero-width characters are
    /// skipped. Writing stops at the right edge. Returns the number of columns
    /// written.
    pub fn put_str(&mut self, row: u16, col: u16, text: &str, style: Style) -> u16 {
        if row >= self.size.rows {
            return 0;
        }
        let mut x = col;
        for ch in text.chars() {
            let width = match ch.width() {
                Some(w) if w > 0 => w as u16,
                _ => continue,
            };
            if x.saturating_add(width) > self.size.cols {
                break;
            }
            self.set(row, x, Cell::new(ch, style));
            if width == 2 {
                self.set(row, x + 1, Cell::new(WIDE_CONTINUATION, style));
            }
            x += width;
        }
        x - col
    }

    /// Draw a box outline along the edges of `rect`
    pub fn draw_border(&mut self, rect: Rect, border: &BorderSet, style: Style) {
        if rect.width < 2 || rect.height < 2 {
            return;
        }
        let right = rect.right() - 1;
        let bottom = rect.bottom() - 1;

        for x in rect.x + 1..right {
            self.set(rect.y, x, Cell::new(border.horizontal, style));
            self.set(bottom, x, Cell::new(border.horizontal, style));
        }
        for y in rect.y + 1..bottom {
            self.set(y, rect.x, Cell::new(border.vertical, style));
            self.set(y, right, Cell::new(border.vertical, style));
        }
        self.set(rect.y, rect.x, Cell::new(border.top_left, style));
        self.set(rect.y, right, Cell::new(border.top_right, style));
        self.set(bottom, rect.x, Cell::new(border.bottom_left, style));
        self.set(bottom, right, Cell::new(border.bottom_right, style));
    }

    /// Copy a region of another canvas onto this one
    ///
    /// `src_rect` is in `source` coordinates and lands at `dest` on this
    /// canvas. Both sides are clipped.
    pub fn blit(&mut self, source: &Canvas, src_rect: Rect, dest: Position) {
        let src_rect = src_rect.intersection(&source.bounds());
        for (sx, sy) in src_rect.cells() {
            let dx = dest.col.saturating_add(sx - src_rect.x);
            let dy = dest.row.saturating_add(sy - src_rect.y);
            if let (Some(cell), Some(idx)) = (source.get(sy, sx), self.index(dy, dx)) {
                self.cells[idx] = *cell;
            }
        }
        self.dirty.mark(Rect::new(
            dest.col,
            dest.row,
            src_rect.width,
            src_rect.height,
        ));
    }

    /// Resize the canvas
    ///
    /// Content inside the overlap of old and new bounds is preserved; new
    /// area is filled with the background cell; content outside the new
    /// bounds is discarded.
    pub fn resize(&mut self, size: Size) {
        if size == self.size {
            return;
        }
        let mut cells = vec![self.background; size.area()];
        let keep_rows = self.size.rows.min(size.rows);
        let keep_cols = usize::from(self.size.cols.min(size.cols));
        for row in 0..keep_rows {
            let src = usize::from(row) * usize::from(self.size.cols);
            let dst = usize::from(row) * usize::from(size.cols);
            cells[dst..dst + keep_cols].copy_from_slice(&self.cells[src..src + keep_cols]);
        }
        self.cells = cells;
        self.size = size;
        self.dirty.resize(size);
    }

    /// Mark a region dirty without changing it
    pub fn mark_dirty(&mut self, rect: Rect) {
        self.dirty.mark(rect);
    }

    /// Mark the whole canvas dirty
    pub fn mark_all_dirty(&mut self) {
        self.dirty.mark_all();
    }

    /// Whether anything changed since the last [`Canvas::take_dirty`]
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty.is_dirty()
    }

    /// Current dirty regions (coalesced, non-overlapping)
    #[must_use]
    pub fn dirty_regions(&self) -> Vec<Rect> {
        self.dirty.regions()
    }

    /// Take the dirty regions and reset tracking
    pub fn take_dirty(&mut self) -> Vec<Rect> {
        self.dirty.take()
    }

    /// Compute the patches turning `previous` into this canvas
    #[must_use]
    pub fn diff_against(&self, previous: &Canvas) -> Vec<Patch> {
        self.diff_regions(previous, &[self.bounds()])
    }

    /// Compute patches restricted to `regions`
    ///
    /// Cells outside `previous`'s bounds always count as changed. Regions are
    /// expected to be non-overlapping; overlapping regions produce duplicate
    /// patches, which are harmless but wasteful.
    #[must_use]
    pub fn diff_regions(&self, previous: &Canvas, regions: &[Rect]) -> Vec<Patch> {
        let mut patches = Vec::new();
        for region in regions {
            let region = region.intersection(&self.bounds());
            if region.is_empty() {
                continue;
            }
            for row in region.y..region.bottom() {
                let mut run: Option<Patch> = None;
                for col in region.x..region.right() {
                    let Some(cell) = self.get(row, col) else {
                        continue;
                    };
                    let changed = previous.get(row, col) != Some(cell);
                    if changed {
                        match run.as_mut() {
                            Some(patch) => patch.cells.push(*cell),
                            None => {
                                run = Some(Patch {
                                    row,
                                    col,
                                    cells: vec![*cell],
                                });
                            }
                        }
                    } else if let Some(patch) = run.take() {
                        patches.push(patch);
                    }
                }
                if let Some(patch) = run.take() {
                    patches.push(patch);
                }
            }
        }
        patches
    }

    /// Replay patches onto this canvas (clipped)
    pub fn apply(&mut self, patches: &[Patch]) {
        for patch in patches {
            for (offset, cell) in patch.cells.iter().enumerate() {
                let Ok(offset) = u16::try_from(offset) else {
                    break;
                };
                self.set(patch.row, patch.col.saturating_add(offset), *cell);
            }
        }
    }
}
