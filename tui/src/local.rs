//! Local Terminal Backend
//!
//! Drives the process's own tty through crossterm: raw mode, bracketed
//! paste, and an async [`EventStream`] for keys, pastes and resizes.
//!
//! The display writes the alternate-screen prologue itself; this backend
//! only owns the tty modes. [`RawModeGuard`] restores them on drop, and
//! [`install_panic_hook`] restores them before a panic message prints.

use std::io::{self, IsTerminal, Write};
use std::panic;

use async_trait::async_trait;
use crossterm::event::{
    self as ct, DisableBracketedPaste, EnableBracketedPaste, Event, EventStream, KeyEventKind,
    KeyModifiers,
};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, LeaveAlternateScreen};
use crossterm::{cursor, execute};
use futures::StreamExt;
use tokio::io::AsyncWriteExt;

use termplex_core::backend::{BackendEvent, TerminalBackend};
use termplex_core::{BackendError, InputEvent, KeyCode, KeyEvent, Modifiers, Size};

/// Whether stdin and stdout are both terminals
#[must_use]
pub fn is_interactive() -> bool {
    io::stdin().is_terminal() && io::stdout().is_terminal()
}

/// Restore the terminal before the default panic output
pub fn install_panic_hook() {
    let original_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        let _ = restore_terminal();
        original_hook(panic_info);
    }));
}

fn restore_terminal() -> io::Result<()> {
    disable_raw_mode()?;
    execute!(
        io::stdout(),
        DisableBracketedPaste,
        LeaveAlternateScreen,
        cursor::Show
    )
}

/// Raw mode held for as long as the guard lives
#[derive(Debug)]
pub struct RawModeGuard {
    paste: bool,
}

impl RawModeGuard {
    /// Enter raw mode, optionally with bracketed paste
    ///
    /// # Errors
    ///
    /// The tty refused the mode change.
    pub fn enter(paste: bool) -> io::Result<Self> {
        enable_raw_mode()?;
        if paste {
            if let Err(e) = execute!(io::stdout(), EnableBracketedPaste) {
                let _ = disable_raw_mode();
                return Err(e);
            }
        }
        Ok(Self { paste })
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if self.paste {
            let _ = execute!(io::stdout(), DisableBracketedPaste);
        }
        let _ = disable_raw_mode();
        let _ = io::stdout().flush();
    }
}

/// The process's own terminal
pub struct LocalTerminal {
    events: Option<EventStream>,
    guard: Option<RawModeGuard>,
    stdout: tokio::io::Stdout,
    size: Size,
}

impl std::fmt::Debug for LocalTerminal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTerminal")
            .field("open", &self.guard.is_some())
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

impl Default for LocalTerminal {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalTerminal {
    /// Create a backend; nothing touches the tty until `open`
    #[must_use]
    pub fn new() -> Self {
        Self {
            events: None,
            guard: None,
            stdout: tokio::io::stdout(),
            size: Size::new(80, 24),
        }
    }
}

#[async_trait]
impl TerminalBackend for LocalTerminal {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn open(&mut self) -> Result<Size, BackendError> {
        let (cols, rows) = crossterm::terminal::size()?;
        self.guard = Some(RawModeGuard::enter(true)?);
        self.events = Some(EventStream::new());
        self.size = Size::new(cols, rows);
        tracing::debug!(size = %self.size, "Local terminal opened");
        Ok(self.size)
    }

    async fn next_event(&mut self) -> Result<BackendEvent, BackendError> {
        let events = self.events.as_mut().ok_or(BackendError::NotOpen)?;
        loop {
            let event = match events.next().await {
                Some(Ok(event)) => event,
                Some(Err(e)) => return Err(BackendError::Io(e)),
                None => return Ok(BackendEvent::Disconnected),
            };
            if let Some(event) = convert_event(event) {
                if let BackendEvent::Resize(size) = event {
                    self.size = size;
                }
                return Ok(event);
            }
        }
    }

    fn size(&self) -> Size {
        self.size
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<(), BackendError> {
        if self.guard.is_none() {
            return Err(BackendError::NotOpen);
        }
        self.stdout.write_all(bytes).await?;
        self.stdout.flush().await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), BackendError> {
        self.events = None;
        self.guard = None;
        tracing::debug!("Local terminal closed");
        Ok(())
    }
}

// ============================================================================
// Event conversion
// ============================================================================

/// Map a crossterm event, dropping the ones displays do not care about
fn convert_event(event: Event) -> Option<BackendEvent> {
    match event {
        Event::Key(key) if key.kind != KeyEventKind::Release => {
            convert_key(key).map(|key| BackendEvent::Input(InputEvent::Key(key)))
        }
        Event::Paste(text) => Some(BackendEvent::Input(InputEvent::Paste(text))),
        Event::Resize(cols, rows) => Some(BackendEvent::Resize(Size::new(cols, rows))),
        _ => None,
    }
}

fn convert_key(key: ct::KeyEvent) -> Option<KeyEvent> {
    let code = match key.code {
        ct::KeyCode::Char(c) => KeyCode::Char(c),
        ct::KeyCode::Enter => KeyCode::Enter,
        ct::KeyCode::Tab => KeyCode::Tab,
        ct::KeyCode::BackTab => KeyCode::BackTab,
        ct::KeyCode::Backspace => KeyCode::Backspace,
        ct::KeyCode::Esc => KeyCode::Esc,
        ct::KeyCode::Up => KeyCode::Up,
        ct::KeyCode::Down => KeyCode::Down,
        ct::KeyCode::Left => KeyCode::Left,
        ct::KeyCode::Right => KeyCode::Right,
        ct::KeyCode::Home => KeyCode::Home,
        ct::KeyCode::End => KeyCode::End,
        ct::KeyCode::PageUp => KeyCode::PageUp,
        ct::KeyCode::PageDown => KeyCode::PageDown,
        ct::KeyCode::Insert => KeyCode::Insert,
        ct::KeyCode::Delete => KeyCode::Delete,
        ct::KeyCode::F(n) if (1..=12).contains(&n) => KeyCode::F(n),
        _ => return None,
    };

    let mut modifiers = Modifiers::empty();
    if key.modifiers.contains(KeyModifiers::SHIFT) {
        modifiers |= Modifiers::SHIFT;
    }
    if key.modifiers.contains(KeyModifiers::CONTROL) {
        modifiers |= Modifiers::CTRL;
    }
    if key.modifiers.contains(KeyModifiers::ALT) {
        modifiers |= Modifiers::ALT;
    }
    // Shift is already folded into the character.
    if let KeyCode::Char(c) = code {
        if !c.is_ascii_alphabetic() || !modifiers.contains(Modifiers::CTRL) {
            modifiers.remove(Modifiers::SHIFT);
        }
    }
    Some(KeyEvent::new(code, modifiers))
}
