//! Theme and Colors
//!
//! Named palettes mapping style roles (text, accent, focus, ...) to concrete
//! cell styles. A theme is shared process-wide through the application and
//! read by draw handlers; it never changes while a frame is being drawn.

use serde::{Deserialize, Serialize};

use crate::canvas::{Attributes, Color, Style};

// ============================================================================
// Palette
// ============================================================================

/// Deep background
pub const INK: Color = Color::Rgb(24, 24, 32);

/// Default text
pub const PAPER: Color = Color::Rgb(220, 220, 228);

/// Accent - warm coral
pub const CORAL: Color = Color::Rgb(255, 127, 127);

/// Focus highlight - soft blue
pub const SKY: Color = Color::Rgb(150, 180, 255);

/// System/dim text
pub const DIM_GRAY: Color = Color::Rgb(100, 100, 100);

/// Error red
pub const ERROR_RED: Color = Color::Rgb(255, 80, 80);

/// Success green
pub const SUCCESS_GREEN: Color = Color::Rgb(120, 230, 120);

// ============================================================================
// Borders
// ============================================================================

/// Glyphs used to draw a box outline
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BorderSet {
    /// Top edge and bottom edge
    pub horizontal: char,
    /// Left edge and right edge
    pub vertical: char,
    /// Top-left corner
    pub top_left: char,
    /// Top-right corner
    pub top_right: char,
    /// Bottom-left corner
    pub bottom_left: char,
    /// Bottom-right corner
    pub bottom_right: char,
}

impl BorderSet {
    /// Single-line box drawing
    pub const PLAIN: Self = Self {
        horizontal: '─',
        vertical: '│',
        top_left: '┌',
        top_right: '┐',
        bottom_left: '└',
        bottom_right: '┘',
    };

    /// Single line with rounded corners
    pub const ROUNDED: Self = Self {
        horizontal: '─',
        vertical: '│',
        top_left: '╭',
        top_right: '╮',
        bottom_left: '╰',
        bottom_right: '╯',
    };

    /// Double-line box drawing
    pub const DOUBLE: Self = Self {
        horizontal: '═',
        vertical: '║',
        top_left: '╔',
        top_right: '╗',
        bottom_left: '╚',
        bottom_right: '╝',
    };

    /// 7-bit fallback for terminals without box drawing glyphs
    pub const ASCII: Self = Self {
        horizontal: '-',
        vertical: '|',
        top_left: '+',
        top_right: '+',
        bottom_left: '+',
        bottom_right: '+',
    };
}

impl Default for BorderSet {
    fn default() -> Self {
        Self::ROUNDED
    }
}

// ============================================================================
// Theme
// ============================================================================

/// What a piece of content is, independent of how it looks
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StyleRole {
    /// Window background
    Background,
    /// Ordinary text
    Text,
    /// Highlighted content
    Accent,
    /// The focused window's chrome
    Focused,
    /// De-emphasized text
    Muted,
    /// Error messages
    Error,
}

/// A named set of styles
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Theme {
    /// Theme name, as used in configuration
    pub name: String,
    /// Window background
    pub background: Style,
    /// Ordinary text
    pub text: Style,
    /// Highlighted content
    pub accent: Style,
    /// Focused window chrome
    pub focused: Style,
    /// De-emphasized text
    pub muted: Style,
    /// Error messages
    pub error: Style,
    /// Border glyphs
    pub border: BorderSet,
}

impl Default for Theme {
    fn default() -> Self {
        Self::dusk()
    }
}

impl Theme {
    /// Names accepted by [`Theme::by_name`]
    pub const BUILTIN: &'static [&'static str] = &["dusk", "mono", "ascii"];

    /// Dark truecolor theme
    #[must_use]
    pub fn dusk() -> Self {
        Self {
            name: "dusk".to_string(),
            background: Style::fg(PAPER).on(INK),
            text: Style::fg(PAPER).on(INK),
            accent: Style::fg(CORAL).on(INK).with(Attributes::BOLD),
            focused: Style::fg(SKY).on(INK).with(Attributes::BOLD),
            muted: Style::fg(DIM_GRAY).on(INK),
            error: Style::fg(ERROR_RED).on(INK).with(Attributes::BOLD),
            border: BorderSet::ROUNDED,
        }
    }

    /// Theme using only the terminal's default colors and attributes
    #[must_use]
    pub fn mono() -> Self {
        Self {
            name: "mono".to_string(),
            background: Style::default(),
            text: Style::default(),
            accent: Style::default().with(Attributes::BOLD),
            focused: Style::default().with(Attributes::REVERSE),
            muted: Style::default().with(Attributes::DIM),
            error: Style::default().with(Attributes::BOLD | Attributes::UNDERLINE),
            border: BorderSet::PLAIN,
        }
    }

    /// ANSI 16-color theme with 7-bit borders
    #[must_use]
    pub fn ascii() -> Self {
        Self {
            name: "ascii".to_string(),
            background: Style::default(),
            text: Style::fg(Color::White),
            accent: Style::fg(Color::Yellow).with(Attributes::BOLD),
            focused: Style::fg(Color::Cyan).with(Attributes::BOLD),
            muted: Style::fg(Color::DarkGray),
            error: Style::fg(Color::Red).with(Attributes::BOLD),
            border: BorderSet::ASCII,
        }
    }

    /// Look up a built-in theme
    #[must_use]
    pub fn by_name(name: &str) -> Option<Self> {
        match name {
            "dusk" => Some(Self::dusk()),
            "mono" => Some(Self::mono()),
            "ascii" => Some(Self::ascii()),
            _ => None,
        }
    }

    /// Style for a role
    #[must_use]
    pub fn style(&self, role: StyleRole) -> Style {
        match role {
            StyleRole::Background => self.background,
            StyleRole::Text => self.text,
            StyleRole::Accent => self.accent,
            StyleRole::Focused => self.focused,
            StyleRole::Muted => self.muted,
            StyleRole::Error => self.error,
        }
    }
}
