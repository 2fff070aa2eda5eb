//! Cells, Styles and Geometry
//!
//! The value types every canvas is made of. All coordinates are zero-based;
//! `x` is the column and `y` is the row.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Symbol stored in the right half of a double-width glyph
pub const WIDE_CONTINUATION: char = '\0';

/// Terminal dimensions in character cells
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size {
    /// Number of columns
    pub cols: u16,
    /// Number of rows
    pub rows: u16,
}

impl Size {
    /// Create a new size
    #[must_use]
    pub const fn new(cols: u16, rows: u16) -> Self {
        Self { cols, rows }
    }

    /// Total number of cells
    #[must_use]
    pub fn area(&self) -> usize {
        usize::from(self.cols) * usize::from(self.rows)
    }

    /// Whether the size holds no cells at all
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cols == 0 || self.rows == 0
    }

    /// The rectangle covering this size, anchored at the origin
    #[must_use]
    pub fn bounds(&self) -> Rect {
        Rect::new(0, 0, self.cols, self.rows)
    }
}

impl std::fmt::Display for Size {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.cols, self.rows)
    }
}

/// A cell position
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Position {
    /// Row (zero-based)
    pub row: u16,
    /// Column (zero-based)
    pub col: u16,
}

impl Position {
    /// Create a new position
    #[must_use]
    pub const fn new(row: u16, col: u16) -> Self {
        Self { row, col }
    }
}

/// A rectangular region of cells
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Rect {
    /// Column of the left edge
    pub x: u16,
    /// Row of the top edge
    pub y: u16,
    /// Width in cells
    pub width: u16,
    /// Height in cells
    pub height: u16,
}

impl Rect {
    /// Create a new rect
    #[must_use]
    pub const fn new(x: u16, y: u16, width: u16, height: u16) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// A single-cell rect
    #[must_use]
    pub const fn cell(x: u16, y: u16) -> Self {
        Self::new(x, y, 1, 1)
    }

    /// One past the right-most column (saturating)
    #[must_use]
    pub fn right(&self) -> u16 {
        self.x.saturating_add(self.width)
    }

    /// One past the bottom-most row (saturating)
    #[must_use]
    pub fn bottom(&self) -> u16 {
        self.y.saturating_add(self.height)
    }

    /// Area in cells
    #[must_use]
    pub fn area(&self) -> u32 {
        u32::from(self.width) * u32::from(self.height)
    }

    /// Whether the rect covers no cells
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Whether the rect contains a cell
    #[must_use]
    pub fn contains(&self, x: u16, y: u16) -> bool {
        x >= self.x && x < self.right() && y >= self.y && y < self.bottom()
    }

    /// Whether two rects share at least one cell
    #[must_use]
    pub fn intersects(&self, other: &Rect) -> bool {
        !(self.is_empty()
            || other.is_empty()
            || self.right() <= other.x
            || other.right() <= self.x
            || self.bottom() <= other.y
            || other.bottom() <= self.y)
    }

    /// The shared part of two rects, or an empty rect
    #[must_use]
    pub fn intersection(&self, other: &Rect) -> Rect {
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        if right <= x || bottom <= y {
            return Rect::new(x, y, 0, 0);
        }
        Rect::new(x, y, right - x, bottom - y)
    }

    /// Bounding box of two rects
    #[must_use]
    pub fn union(&self, other: &Rect) -> Rect {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        let right = self.right().max(other.right());
        let bottom = self.bottom().max(other.bottom());
        Rect::new(x, y, right - x, bottom - y)
    }

    /// Move the rect by a (column, row) offset, saturating at the u16 range
    #[must_use]
    pub fn offset(&self, dx: u16, dy: u16) -> Rect {
        Rect::new(
            self.x.saturating_add(dx),
            self.y.saturating_add(dy),
            self.width,
            self.height,
        )
    }

    /// Iterate over all (x, y) cells in row-major order
    pub fn cells(&self) -> impl Iterator<Item = (u16, u16)> + '_ {
        (self.y..self.bottom()).flat_map(move |y| (self.x..self.right()).map(move |x| (x, y)))
    }
}

/// Terminal color
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Color {
    /// The terminal's default color
    #[default]
    Reset,
    /// ANSI black
    Black,
    /// ANSI red
    Red,
    /// ANSI green
    Green,
    /// ANSI yellow
    Yellow,
    /// ANSI blue
    Blue,
    /// ANSI magenta
    Magenta,
    /// ANSI cyan
    Cyan,
    /// ANSI white
    White,
    /// ANSI bright black
    DarkGray,
    /// 256-color palette index
    Indexed(u8),
    /// 24-bit color
    Rgb(u8, u8, u8),
}

bitflags! {
    /// Text attributes
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct Attributes: u8 {
        /// SGR bold
        const BOLD = 1;
        /// SGR dim
        const DIM = 1 << 1;
        /// SGR italic
        const ITALIC = 1 << 2;
        /// SGR underline
        const UNDERLINE = 1 << 3;
        /// SGR blink
        const BLINK = 1 << 4;
        /// SGR reverse
        const REVERSE = 1 << 5;
        /// SGR strikethrough
        const STRIKETHROUGH = 1 << 6;
    }
}

impl Default for Attributes {
    fn default() -> Self {
        Self::empty()
    }
}

/// Colors plus attributes applied to a cell
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Style {
    /// Foreground color
    #[serde(default)]
    pub fg: Color,
    /// Background color
    #[serde(default)]
    pub bg: Color,
    /// Text attributes
    #[serde(default)]
    pub attrs: Attributes,
}

impl Style {
    /// Style with only a foreground color
    #[must_use]
    pub const fn fg(fg: Color) -> Self {
        Self {
            fg,
            bg: Color::Reset,
            attrs: Attributes::empty(),
        }
    }

    /// Replace the background color
    #[must_use]
    pub const fn on(mut self, bg: Color) -> Self {
        self.bg = bg;
        self
    }

    /// Add attributes
    #[must_use]
    pub fn with(mut self, attrs: Attributes) -> Self {
        self.attrs |= attrs;
        self
    }
}

/// A single styled character cell
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Cell {
    /// The glyph shown in this cell
    pub symbol: char,
    /// How the glyph is drawn
    pub style: Style,
}

impl Default for Cell {
    fn default() -> Self {
        Self::blank(Style::default())
    }
}

impl Cell {
    /// Create a cell
    #[must_use]
    pub const fn new(symbol: char, style: Style) -> Self {
        Self { symbol, style }
    }

    /// A space drawn with the given style
    #[must_use]
    pub const fn blank(style: Style) -> Self {
        Self::new(' ', style)
    }

    /// Whether this cell is the right half of a wide glyph
    #[must_use]
    pub fn is_continuation(&self) -> bool {
        self.symbol == WIDE_CONTINUATION
    }
}
