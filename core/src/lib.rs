//! Termplex Core - Terminal Display Multiplexing
//!
//! Everything between a terminal byte stream and an application's window
//! tree: character canvases with change tracking, a signal bus, per-terminal
//! displays with their own task, and a TCP session multiplexer that gives
//! every authenticated remote terminal a display of its own.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                          Application                              │
//! │   config · theme · object kinds · DisplayRegistry · shutdown      │
//! └───────────────┬───────────────────────────────────┬───────────────┘
//!                 │ spawn_display                      │ terminate
//!   ┌─────────────┴─────────────┐        ┌─────────────┴─────────────┐
//!   │ Display (one tokio task)  │  ...   │ Display (one tokio task)  │
//!   │ ┌───────────────────────┐ │        │                           │
//!   │ │ Scene                 │ │        │                           │
//!   │ │  WindowTree (arena)   │ │        │                           │
//!   │ │  SignalBus<Scene>     │ │        │                           │
//!   │ └──────────┬────────────┘ │        │                           │
//!   │      Compositor ─▶ PatchEncoder    │                           │
//!   └────────────┬──────────────┘        └─────────────┬─────────────┘
//!                │ TerminalBackend                      │
//!        local terminal / pty                   pty ◀─ SessionServer ◀─ TCP
//! ```
//!
//! # Key Types
//!
//! - [`Canvas`]: cell grid with dirty regions and run-coalesced diffs
//! - [`SignalBus`]: prioritized handlers with stop semantics
//! - [`WindowTree`]: arena of windows, each owning a canvas
//! - [`Scene`]: what setup closures and signal handlers operate on
//! - [`DisplayHandle`]: control surface of one running display
//! - [`Application`]: lifecycle owner of every display
//! - [`SessionServer`]: TCP front end with authentication and a pty pool
//!
//! # Quick Start
//!
//! ```ignore
//! use termplex_core::{AppConfig, Application, Session, SimulatedTerminal, Size, StyleRole};
//!
//! let app = Application::initialize(AppConfig::default())?;
//! let (term, _handle) = SimulatedTerminal::new(Size::new(80, 24));
//! let display = app.spawn_display(Session::local(Size::new(80, 24)), term, |scene| {
//!     let root = scene.root();
//!     scene.set_draw_handler(root, |canvas, ctx| {
//!         canvas.put_str(0, 0, "hello", ctx.theme.style(StyleRole::Text));
//!     })?;
//!     Ok(())
//! })?;
//! let code = app.run().await;
//! ```
//!
//! # Module Overview
//!
//! - [`canvas`]: cells, geometry, dirty tracking and diffs
//! - [`theme`]: palette and style roles
//! - [`signal`]: signal types and the bus
//! - [`object`]: object ids and kind constructors
//! - [`window`]: window arena and drawing
//! - [`compositor`]: flattens windows into the presented frame
//! - [`input`]: byte stream to key, paste and mouse events
//! - [`ansi`]: patches to escape sequences
//! - [`backend`]: terminal backends (pty pair, simulated)
//! - [`scene`], [`display`], [`registry`]: per-terminal runtime
//! - [`application`]: process lifecycle
//! - [`server`]: session multiplexer, wire protocol and client
//! - [`config`], [`logging`], [`error`]: ambient plumbing
//! - [`shared`]: application state shared across displays

#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod ansi;
pub mod application;
pub mod backend;
pub mod canvas;
pub mod compositor;
pub mod config;
pub mod display;
pub mod error;
pub mod input;
pub mod logging;
pub mod object;
pub mod registry;
pub mod scene;
pub mod server;
pub mod session;
pub mod shared;
pub mod signal;
pub mod theme;
pub mod window;

// Re-exports for convenience
pub use application::{Application, TerminateReason, TerminateReport};
pub use backend::{BackendEvent, SimulatedHandle, SimulatedTerminal, TerminalBackend};
pub use canvas::{Attributes, Canvas, Cell, Color, Patch, Position, Rect, Size, Style};
pub use compositor::Compositor;
pub use display::{DisplayCommand, DisplayConfig, DisplayHandle, DisplayState};
pub use error::{AuthError, BackendError, MuxError, ProtocolError};
pub use input::{InputDecoder, InputEvent, KeyCode, KeyEvent, Modifiers};
pub use object::{ObjectId, ObjectRegistry};
pub use registry::{BroadcastResult, DisplayRegistry, RegistrySummary};
pub use scene::Scene;
pub use session::{Session, SessionId, SessionOrigin};
pub use shared::{SharedModel, VersionConflict};
pub use signal::{
    Emission, Propagation, Signal, SignalArg, SignalBus, SignalHost, SignalKind, SubscriptionId,
};
pub use theme::{StyleRole, Theme};
pub use window::{DrawContext, Window, WindowTree};

// Session multiplexer exports
pub use server::auth::{DenyAll, SessionToken, TokenAuthenticator};
pub use server::{
    Authenticator, ClientError, Credentials, Identity, RemoteClient, SessionServer, SessionStats,
};

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, AppConfig, CliOverrides, ConfigError,
    ConfigSource, RuntimeEnv,
};
