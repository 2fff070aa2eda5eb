//! Input Decoding
//!
//! Turns the raw byte stream of a terminal (or a remote session's pseudo
//! terminal) into [`InputEvent`]s. Bytes may arrive in arbitrary chunks; the
//! decoder buffers incomplete UTF-8 and escape sequences until the rest
//! shows up.
//!
//! Recognized:
//!
//! - printable UTF-8 and C0 control keys (Ctrl+letter, Enter, Tab, Backspace)
//! - CSI and SS3 cursor, navigation and function keys, with xterm modifiers
//! - `ESC <char>` as Alt+char
//! - bracketed paste (`ESC [200~ ... ESC [201~`)
//!
//! A lone `ESC` is ambiguous until more bytes arrive. Callers wait up to
//! [`ESC_TIMEOUT`] for the rest of a sequence, then call
//! [`InputDecoder::flush`], which resolves it to the Esc key.

use std::time::Duration;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Longest escape sequence accepted before it is discarded
pub const MAX_SEQUENCE_LEN: usize = 32;

/// Largest bracketed paste accepted (1 MB)
pub const MAX_PASTE_LEN: usize = 1024 * 1024;

/// How long a lone `ESC` waits for the rest of a sequence
pub const ESC_TIMEOUT: Duration = Duration::from_millis(25);

const ESC: u8 = 0x1b;
const PASTE_START: &[u8] = b"\x1b[200~";
const PASTE_END: &[u8] = b"\x1b[201~";

bitflags! {
    /// Modifier keys held during a key press
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct Modifiers: u8 {
        /// Shift
        const SHIFT = 1;
        /// Control
        const CTRL = 1 << 1;
        /// Alt / Meta
        const ALT = 1 << 2;
    }
}

impl Default for Modifiers {
    fn default() -> Self {
        Self::empty()
    }
}

/// A key, independent of modifiers
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyCode {
    /// A character key
    Char(char),
    /// Enter / Return
    Enter,
    /// Tab
    Tab,
    /// Shift+Tab
    BackTab,
    /// Backspace
    Backspace,
    /// Escape
    Esc,
    /// Arrow up
    Up,
    /// Arrow down
    Down,
    /// Arrow left
    Left,
    /// Arrow right
    Right,
    /// Home
    Home,
    /// End
    End,
    /// Page up
    PageUp,
    /// Page down
    PageDown,
    /// Insert
    Insert,
    /// Delete
    Delete,
    /// Function key F1..F12
    F(u8),
}

/// A key press
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyEvent {
    /// Which key
    pub code: KeyCode,
    /// Held modifiers
    pub modifiers: Modifiers,
}

impl KeyEvent {
    /// Create a key event
    #[must_use]
    pub const fn new(code: KeyCode, modifiers: Modifiers) -> Self {
        Self { code, modifiers }
    }

    /// A plain key press without modifiers
    #[must_use]
    pub const fn plain(code: KeyCode) -> Self {
        Self::new(code, Modifiers::empty())
    }

    /// Ctrl + character
    #[must_use]
    pub const fn ctrl(c: char) -> Self {
        Self::new(KeyCode::Char(c), Modifiers::CTRL)
    }

    /// Whether this is Ctrl+C
    #[must_use]
    pub fn is_interrupt(&self) -> bool {
        *self == Self::ctrl('c')
    }
}

impl From<KeyCode> for KeyEvent {
    fn from(code: KeyCode) -> Self {
        Self::plain(code)
    }
}

/// A decoded input event
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InputEvent {
    /// Key press
    Key(KeyEvent),
    /// Bracketed paste content
    Paste(String),
}

enum Step {
    Event(InputEvent, usize),
    Error(ProtocolError, usize),
    Incomplete,
}

/// Streaming byte-to-event decoder
#[derive(Debug, Default)]
pub struct InputDecoder {
    buffer: Vec<u8>,
    paste: Option<Vec<u8>>,
}

impl InputDecoder {
    /// Create an empty decoder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw bytes
    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Number of buffered, undecoded bytes
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Decode the next event
    ///
    /// Returns `None` when the buffer is empty or holds only an incomplete
    /// sequence. Errors consume the offending bytes, so the caller can keep
    /// calling `next` after one.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Option<Result<InputEvent, ProtocolError>> {
        if self.paste.is_none() && self.buffer.starts_with(PASTE_START) {
            self.buffer.drain(..PASTE_START.len());
            self.paste = Some(Vec::new());
        }

        let step = if self.paste.is_some() {
            self.step_paste()
        } else {
            Self::step(&self.buffer)
        };

        match step {
            Step::Event(event, consumed) => {
                self.buffer.drain(..consumed);
                Some(Ok(event))
            }
            Step::Error(err, consumed) => {
                self.buffer.drain(..consumed);
                Some(Err(err))
            }
            Step::Incomplete => {
                if self.paste.is_none() && self.buffer.len() > MAX_SEQUENCE_LEN {
                    let len = self.buffer.len();
                    self.buffer.clear();
                    return Some(Err(ProtocolError::SequenceTooLong(len)));
                }
                None
            }
        }
    }

    /// Decode everything currently buffered
    pub fn drain(&mut self) -> Vec<Result<InputEvent, ProtocolError>> {
        let mut out = Vec::new();
        while let Some(item) = self.next() {
            out.push(item);
        }
        if let Some(esc) = self.flush() {
            out.push(Ok(esc));
        }
        out
    }

    /// Whether the buffer holds nothing but a lone `ESC`
    #[must_use]
    pub fn has_lone_escape(&self) -> bool {
        self.paste.is_none() && self.buffer == [ESC]
    }

    /// Resolve a trailing lone `ESC` to the Esc key
    ///
    /// Call once no further input has arrived within [`ESC_TIMEOUT`]; an
    /// escape sequence split across reads would otherwise decode as Esc
    /// followed by plain characters.
    pub fn flush(&mut self) -> Option<InputEvent> {
        if self.has_lone_escape() {
            self.buffer.clear();
            return Some(InputEvent::Key(KeyEvent::plain(KeyCode::Esc)));
        }
        None
    }

    /// Drop all buffered state
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.paste = None;
    }

    fn step(input: &[u8]) -> Step {
        let Some(&first) = input.first() else {
            return Step::Incomplete;
        };

        let key = |code, mods| Step::Event(InputEvent::Key(KeyEvent::new(code, mods)), 1);
        match first {
            ESC => Self::step_escape(input),
            b'\r' | b'\n' => key(KeyCode::Enter, Modifiers::empty()),
            b'\t' => key(KeyCode::Tab, Modifiers::empty()),
            0x7f | 0x08 => key(KeyCode::Backspace, Modifiers::empty()),
            0x00 => key(KeyCode::Char(' '), Modifiers::CTRL),
            0x01..=0x1a => key(KeyCode::Char(char::from(first - 1 + b'a')), Modifiers::CTRL),
            0x1c..=0x1f => key(KeyCode::Char(char::from(first + 0x40)), Modifiers::CTRL),
            0x20..=0x7e => key(KeyCode::Char(char::from(first)), Modifiers::empty()),
            _ => Self::step_utf8(input),
        }
    }

    fn step_utf8(input: &[u8]) -> Step {
        let first = input[0];
        let len = match first {
            0xc2..=0xdf => 2,
            0xe0..=0xef => 3,
            0xf0..=0xf4 => 4,
            _ => return Step::Error(ProtocolError::InvalidUtf8(vec![first]), 1),
        };
        if input.len() < len {
            // A non-continuation byte before the end means it can never complete.
            if input[1..].iter().any(|b| b & 0xc0 != 0x80) {
                return Step::Error(ProtocolError::InvalidUtf8(vec![first]), 1);
            }
            return Step::Incomplete;
        }
        match std::str::from_utf8(&input[..len])
            .ok()
            .and_then(|s| s.chars().next())
        {
            Some(c) => Step::Event(InputEvent::Key(KeyEvent::plain(KeyCode::Char(c))), len),
            None => Step::Error(ProtocolError::InvalidUtf8(input[..len].to_vec()), len),
        }
    }

    fn step_escape(input: &[u8]) -> Step {
        let Some(&second) = input.get(1) else {
            return Step::Incomplete;
        };
        match second {
            b'[' => Self::step_csi(input),
            b'O' => Self::step_ss3(input),
            ESC => Step::Event(InputEvent::Key(KeyEvent::plain(KeyCode::Esc)), 1),
            0x20..=0x7e => Step::Event(
                InputEvent::Key(KeyEvent::new(KeyCode::Char(char::from(second)), Modifiers::ALT)),
                2,
            ),
            _ => Step::Event(InputEvent::Key(KeyEvent::plain(KeyCode::Esc)), 1),
        }
    }

    fn step_ss3(input: &[u8]) -> Step {
        let Some(&last) = input.get(2) else {
            return Step::Incomplete;
        };
        let code = match last {
            b'P' => KeyCode::F(1),
            b'Q' => KeyCode::F(2),
            b'R' => KeyCode::F(3),
            b'S' => KeyCode::F(4),
            b'A' => KeyCode::Up,
            b'B' => KeyCode::Down,
            b'C' => KeyCode::Right,
            b'D' => KeyCode::Left,
            b'H' => KeyCode::Home,
            b'F' => KeyCode::End,
            b'M' => KeyCode::Enter,
            _ => return Step::Error(ProtocolError::UnrecognizedSequence(input[..3].to_vec()), 3),
        };
        Step::Event(InputEvent::Key(KeyEvent::plain(code)), 3)
    }

    fn step_csi(input: &[u8]) -> Step {
        // Parameter and intermediate bytes run until a final byte in 0x40..=0x7e.
        let Some(end) = input
            .iter()
            .skip(2)
            .position(|b| (0x40..=0x7e).contains(b))
            .map(|p| p + 2)
        else {
            return Step::Incomplete;
        };
        let consumed = end + 1;
        let params = &input[2..end];
        let unrecognized = || {
            Step::Error(
                ProtocolError::UnrecognizedSequence(input[..consumed].to_vec()),
                consumed,
            )
        };

        let code = match input[end] {
            b'A' => KeyCode::Up,
            b'B' => KeyCode::Down,
            b'C' => KeyCode::Right,
            b'D' => KeyCode::Left,
            b'H' => KeyCode::Home,
            b'F' => KeyCode::End,
            b'Z' => KeyCode::BackTab,
            b'~' => match Self::param(params, 0) {
                Some(1 | 7) => KeyCode::Home,
                Some(2) => KeyCode::Insert,
                Some(3) => KeyCode::Delete,
                Some(4 | 8) => KeyCode::End,
                Some(5) => KeyCode::PageUp,
                Some(6) => KeyCode::PageDown,
                Some(n @ 11..=15) => KeyCode::F((n - 10) as u8),
                Some(n @ 17..=21) => KeyCode::F((n - 11) as u8),
                Some(n @ 23..=24) => KeyCode::F((n - 12) as u8),
                _ => return unrecognized(),
            },
            _ => return unrecognized(),
        };
        let modifiers = Self::param(params, 1).map_or(Modifiers::empty(), Self::modifiers);
        Step::Event(InputEvent::Key(KeyEvent::new(code, modifiers)), consumed)
    }

    /// xterm modifier parameter: 1 + (shift 1 | alt 2 | ctrl 4)
    fn modifiers(param: u16) -> Modifiers {
        let bits = param.saturating_sub(1);
        let mut mods = Modifiers::empty();
        if bits & 1 != 0 {
            mods |= Modifiers::SHIFT;
        }
        if bits & 2 != 0 {
            mods |= Modifiers::ALT;
        }
        if bits & 4 != 0 {
            mods |= Modifiers::CTRL;
        }
        mods
    }

    fn param(params: &[u8], index: usize) -> Option<u16> {
        std::str::from_utf8(params)
            .ok()?
            .split(';')
            .nth(index)?
            .parse()
            .ok()
    }

    fn step_paste(&mut self) -> Step {
        let Some(collected) = self.paste.as_mut() else {
            return Step::Incomplete;
        };

        if let Some(pos) = find(&self.buffer, PASTE_END) {
            collected.extend_from_slice(&self.buffer[..pos]);
            let content = String::from_utf8_lossy(collected).into_owned();
            self.paste = None;
            return Step::Event(InputEvent::Paste(content), pos + PASTE_END.len());
        }

        // Keep a possible partial end marker in the buffer for the next push.
        let keep = (1..PASTE_END.len())
            .rev()
            .find(|&n| self.buffer.ends_with(&PASTE_END[..n]))
            .unwrap_or(0);
        let take = self.buffer.len() - keep;
        if collected.len() + take > MAX_PASTE_LEN {
            self.paste = None;
            let len = self.buffer.len();
            return Step::Error(ProtocolError::SequenceTooLong(len), len);
        }
        collected.extend(self.buffer.drain(..take));
        Step::Incomplete
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn decode(bytes: &[u8]) -> Vec<Result<InputEvent, ProtocolError>> {
        let mut decoder = InputDecoder::new();
        decoder.push(bytes);
        decoder.drain()
    }

    fn keys(bytes: &[u8]) -> Vec<KeyEvent> {
        decode(bytes)
            .into_iter()
            .filter_map(|r| match r {
                Ok(InputEvent::Key(k)) => Some(k),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_printable_and_controls() {
        assert_eq!(
            keys(b"a\r\t\x7f\x03"),
            vec![
                KeyEvent::plain(KeyCode::Char('a')),
                KeyEvent::plain(KeyCode::Enter),
                KeyEvent::plain(KeyCode::Tab),
                KeyEvent::plain(KeyCode::Backspace),
                KeyEvent::ctrl('c'),
            ]
        );
    }

    #[test]
    fn test_utf8_split_across_pushes() {
        let bytes = "é".as_bytes();
        let mut decoder = InputDecoder::new();
        decoder.push(&bytes[..1]);
        assert!(decoder.next().is_none());
        decoder.push(&bytes[1..]);
        assert_eq!(
            decoder.next(),
            Some(Ok(InputEvent::Key(KeyEvent::plain(KeyCode::Char('é')))))
        );
    }

    #[test]
    fn test_invalid_utf8_is_reported_and_skipped() {
        let results = decode(b"\xffa");
        assert_eq!(results[0], Err(ProtocolError::InvalidUtf8(vec![0xff])));
        assert_eq!(
            results[1],
            Ok(InputEvent::Key(KeyEvent::plain(KeyCode::Char('a'))))
        );
    }

    #[test]
    fn test_arrows_and_modifiers() {
        assert_eq!(
            keys(b"\x1b[A\x1b[1;5C\x1bOP\x1b[Z"),
            vec![
                KeyEvent::plain(KeyCode::Up),
                KeyEvent::new(KeyCode::Right, Modifiers::CTRL),
                KeyEvent::plain(KeyCode::F(1)),
                KeyEvent::plain(KeyCode::BackTab),
            ]
        );
    }

    #[test]
    fn test_tilde_keys() {
        assert_eq!(
            keys(b"\x1b[3~\x1b[5~\x1b[15~\x1b[24~"),
            vec![
                KeyEvent::plain(KeyCode::Delete),
                KeyEvent::plain(KeyCode::PageUp),
                KeyEvent::plain(KeyCode::F(5)),
                KeyEvent::plain(KeyCode::F(12)),
            ]
        );
    }

    #[test]
    fn test_alt_char() {
        assert_eq!(
            keys(b"\x1bx"),
            vec![KeyEvent::new(KeyCode::Char('x'), Modifiers::ALT)]
        );
    }

    #[test]
    fn test_lone_escape_resolves_on_flush() {
        let mut decoder = InputDecoder::new();
        decoder.push(b"\x1b");
        assert!(decoder.next().is_none());
        assert!(decoder.has_lone_escape());
        assert_eq!(
            decoder.flush(),
            Some(InputEvent::Key(KeyEvent::plain(KeyCode::Esc)))
        );
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn test_csi_split_across_pushes() {
        let mut decoder = InputDecoder::new();
        decoder.push(b"\x1b[1;");
        assert!(decoder.next().is_none());
        assert!(decoder.flush().is_none());
        decoder.push(b"2B");
        assert_eq!(
            decoder.next(),
            Some(Ok(InputEvent::Key(KeyEvent::new(KeyCode::Down, Modifiers::SHIFT))))
        );
    }

    #[test]
    fn test_unrecognized_sequence() {
        let results = decode(b"\x1b[99xq");
        assert_eq!(
            results[0],
            Err(ProtocolError::UnrecognizedSequence(b"\x1b[99x".to_vec()))
        );
        assert_eq!(
            results[1],
            Ok(InputEvent::Key(KeyEvent::plain(KeyCode::Char('q'))))
        );
    }

    #[test]
    fn test_sequence_too_long() {
        let mut bytes = b"\x1b[".to_vec();
        bytes.extend(std::iter::repeat(b'1').take(MAX_SEQUENCE_LEN));
        let results = decode(&bytes);
        assert!(matches!(results[0], Err(ProtocolError::SequenceTooLong(_))));
    }

    #[test]
    fn test_bracketed_paste_chunked() {
        let mut decoder = InputDecoder::new();
        decoder.push(b"\x1b[200~hello ");
        assert!(decoder.next().is_none());
        decoder.push(b"world\x1b[2");
        assert!(decoder.next().is_none());
        decoder.push(b"01~z");
        assert_eq!(
            decoder.next(),
            Some(Ok(InputEvent::Paste("hello world".to_string())))
        );
        assert_eq!(
            decoder.next(),
            Some(Ok(InputEvent::Key(KeyEvent::plain(KeyCode::Char('z')))))
        );
    }
}
