//! Termplex TUI - Local terminal, remote attach and the demo board
//!
//! # Architecture
//!
//! - **Local**: crossterm-backed `TerminalBackend` for the process's own tty
//! - **Attach**: pipes the tty to a remote session server
//! - **Demo**: the shared counter board both binaries serve

pub mod attach;
pub mod demo;
pub mod local;

pub use demo::{Board, Counter};
pub use local::LocalTerminal;
