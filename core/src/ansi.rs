//! Patch Encoding
//!
//! Converts canvas [`Patch`]es into terminal escape sequences using
//! crossterm's command queue. Output goes into a byte buffer so the same
//! encoder serves a local tty and a remote pseudo terminal.

use std::io;

use crossterm::cursor::{Hide, MoveTo, Show};
use crossterm::queue;
use crossterm::style::{
    Attribute, Color as TermColor, Print, SetAttribute, SetBackgroundColor, SetForegroundColor,
};
use crossterm::terminal::{Clear, ClearType, EnterAlternateScreen, LeaveAlternateScreen};

use crate::canvas::{Attributes, Color, Patch, Style};

impl From<Color> for TermColor {
    fn from(color: Color) -> Self {
        match color {
            Color::Reset => TermColor::Reset,
            Color::Black => TermColor::Black,
            Color::Red => TermColor::DarkRed,
            Color::Green => TermColor::DarkGreen,
            Color::Yellow => TermColor::DarkYellow,
            Color::Blue => TermColor::DarkBlue,
            Color::Magenta => TermColor::DarkMagenta,
            Color::Cyan => TermColor::DarkCyan,
            Color::White => TermColor::Grey,
            Color::DarkGray => TermColor::DarkGrey,
            Color::Indexed(i) => TermColor::AnsiValue(i),
            Color::Rgb(r, g, b) => TermColor::Rgb { r, g, b },
        }
    }
}

const ATTRIBUTE_MAP: [(Attributes, Attribute); 7] = [
    (Attributes::BOLD, Attribute::Bold),
    (Attributes::DIM, Attribute::Dim),
    (Attributes::ITALIC, Attribute::Italic),
    (Attributes::UNDERLINE, Attribute::Underlined),
    (Attributes::BLINK, Attribute::SlowBlink),
    (Attributes::REVERSE, Attribute::Reverse),
    (Attributes::STRIKETHROUGH, Attribute::CrossedOut),
];

/// Bytes that put a terminal into display mode: alternate screen, hidden
/// cursor, cleared
///
/// # Errors
///
/// Only if crossterm fails to format a command.
pub fn prologue() -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    queue!(
        out,
        EnterAlternateScreen,
        Hide,
        SetAttribute(Attribute::Reset),
        Clear(ClearType::All),
        MoveTo(0, 0)
    )?;
    Ok(out)
}

/// Bytes that undo [`prologue`]
///
/// # Errors
///
/// Only if crossterm fails to format a command.
pub fn epilogue() -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    queue!(out, SetAttribute(Attribute::Reset), Show, LeaveAlternateScreen)?;
    Ok(out)
}

/// Bytes that clear the screen before a full repaint
///
/// # Errors
///
/// Only if crossterm fails to format a command.
pub fn clear_screen() -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    queue!(out, SetAttribute(Attribute::Reset), Clear(ClearType::All))?;
    Ok(out)
}

/// Stateless-per-frame patch encoder
///
/// Each call to [`PatchEncoder::encode`] starts from an unknown cursor and
/// style and ends with attributes reset, so frames can be concatenated or
/// dropped independently.
#[derive(Debug, Default)]
pub struct PatchEncoder {
    cursor: Option<(u16, u16)>,
    style: Option<Style>,
}

impl PatchEncoder {
    /// Create an encoder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode patches into escape sequences
    ///
    /// # Errors
    ///
    /// Only if crossterm fails to format a command.
    pub fn encode(&mut self, patches: &[Patch]) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        if patches.is_empty() {
            return Ok(out);
        }
        self.cursor = None;
        self.style = None;

        for patch in patches {
            let mut col = patch.col;
            for cell in &patch.cells {
                let here = col;
                col = col.saturating_add(1);
                // The left half already advanced the cursor over this column.
                if cell.is_continuation() {
                    continue;
                }
                if self.cursor != Some((patch.row, here)) {
                    queue!(out, MoveTo(here, patch.row))?;
                }
                if self.style != Some(cell.style) {
                    self.write_style(&mut out, cell.style)?;
                }
                queue!(out, Print(cell.symbol))?;
                let width = unicode_width::UnicodeWidthChar::width(cell.symbol).unwrap_or(1);
                self.cursor = Some((patch.row, here.saturating_add(width.max(1) as u16)));
            }
        }

        queue!(out, SetAttribute(Attribute::Reset))?;
        Ok(out)
    }

    fn write_style(&mut self, out: &mut Vec<u8>, style: Style) -> io::Result<()> {
        queue!(
            out,
            SetAttribute(Attribute::Reset),
            SetForegroundColor(style.fg.into()),
            SetBackgroundColor(style.bg.into())
        )?;
        for (flag, attribute) in ATTRIBUTE_MAP {
            if style.attrs.contains(flag) {
                queue!(out, SetAttribute(attribute))?;
            }
        }
        self.style = Some(style);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::Cell;

    fn text(bytes: &[u8]) -> String {
        String::from_utf8_lossy(bytes).into_owned()
    }

    #[test]
    fn test_encode_moves_once_per_run() {
        let patch = Patch {
            row: 2,
            col: 5,
            cells: "abc".chars().map(|c| Cell::new(c, Style::default())).collect(),
        };
        let out = text(&PatchEncoder::new().encode(&[patch]).unwrap());
        // MoveTo is 1-based: row 3, column 6
        assert_eq!(out.matches("\x1b[3;6H").count(), 1);
        assert!(out.contains("abc"));
    }

    #[test]
    fn test_encode_skips_continuation_cells() {
        let style = Style::default();
        let patch = Patch {
            row: 0,
            col: 0,
            cells: vec![
                Cell::new('漢', style),
                Cell::new(crate::canvas::WIDE_CONTINUATION, style),
                Cell::new('x', style),
            ],
        };
        let out = text(&PatchEncoder::new().encode(&[patch]).unwrap());
        assert!(out.contains("漢x"));
        assert!(!out.contains('\0'));
    }

    #[test]
    fn test_encode_emits_style_changes_only() {
        let red = Style::fg(Color::Red).with(Attributes::BOLD);
        let patch = Patch {
            row: 0,
            col: 0,
            cells: vec![Cell::new('a', red), Cell::new('b', red)],
        };
        let out = text(&PatchEncoder::new().encode(&[patch]).unwrap());
        assert_eq!(out.matches("\x1b[1m").count(), 1);
    }

    #[test]
    fn test_empty_patches_encode_to_nothing() {
        assert!(PatchEncoder::new().encode(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_prologue_and_epilogue() {
        let pro = text(&prologue().unwrap());
        assert!(pro.contains("\x1b[?1049h"));
        assert!(pro.contains("\x1b[?25l"));
        let epi = text(&epilogue().unwrap());
        assert!(epi.contains("\x1b[?1049l"));
        assert!(epi.contains("\x1b[?25h"));
    }
}
