//! Termplex Server - Session Multiplexer Daemon
//!
//! Serves the demo board to remote terminals over TCP. Every authenticated
//! connection gets its own display; all of them share one board.
//!
//! # Usage
//!
//! ```bash
//! # Start with defaults (127.0.0.1:7373)
//! termplex-server
//!
//! # Custom listener and config
//! termplex-server --listen-address 0.0.0.0 --listen-port 9000 --config ./termplex.toml
//!
//! # Also show the board on this terminal
//! termplex-server --local
//!
//! # Verbose logging
//! TERMPLEX_LOG=debug termplex-server
//! ```
//!
//! A fresh token is written to the token file at startup; clients read it
//! from there (`termplex connect --token-file ...`).
//!
//! # Signals
//!
//! - `SIGTERM` / `SIGINT`: terminate every display, then exit

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};

use termplex_core::server::auth::default_token_path;
use termplex_core::{
    load_config_from_path, logging, Application, CliOverrides, RuntimeEnv, Session,
    SessionServer, SessionToken, SharedModel, Size, TerminateReason, TokenAuthenticator,
};
use termplex_tui::demo::{self, Board, DEFAULT_LABELS};
use termplex_tui::local::{self, LocalTerminal};

/// Repaint period for the board's clock when none is configured
const DEFAULT_TICK: Duration = Duration::from_secs(1);

/// Termplex Server - serve terminal displays to remote clients
#[derive(Parser, Debug)]
#[command(name = "termplex-server")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Interface to listen on
    #[arg(long, value_name = "ADDR")]
    listen_address: Option<String>,

    /// TCP port to listen on
    #[arg(short = 'p', long, value_name = "PORT")]
    listen_port: Option<u16>,

    /// Configuration file path
    #[arg(short = 'c', long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Where to write the session token
    #[arg(long, value_name = "PATH")]
    token_file: Option<PathBuf>,

    /// Also run a display on this terminal
    #[arg(long)]
    local: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "TERMPLEX_LOG_LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let code = run(args).await?;
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

async fn run(args: Args) -> Result<i32> {
    let env = RuntimeEnv::from_env().context("Invalid environment")?;
    let target = logging::init(&env, args.log_level.as_deref(), args.local)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {e}"))?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = std::process::id(),
        log = ?target,
        profile = ?env.profile,
        "Termplex server starting"
    );

    // Resolve configuration: file, then environment, then CLI
    let config_path = args.config.clone().or_else(|| env.config_path.clone());
    let mut config = load_config_from_path(config_path).context("Failed to load configuration")?;
    config.apply_cli(&CliOverrides {
        listen_address: args.listen_address.clone(),
        listen_port: args.listen_port,
        token_file: args.token_file.clone(),
    });
    if config.tick_interval.is_none() {
        config.tick_interval = Some(DEFAULT_TICK);
    }
    let addr = config.socket_addr().context("Invalid listen address")?;

    // Token
    let token_path = config.token_file.clone().unwrap_or_else(default_token_path);
    let token = SessionToken::generate();
    token
        .write_to_file(&token_path)
        .with_context(|| format!("Failed to write token file {}", token_path.display()))?;
    info!(path = %token_path.display(), "Session token written");

    let mut auth = TokenAuthenticator::new(token);
    if !config.allowed_users.is_empty() {
        auth = auth.allow_users(config.allowed_users.clone());
    }

    let app = Application::initialize(config).context("Invalid configuration")?;
    demo::register_kinds(app.objects());
    let board = SharedModel::new(Board::with_labels(DEFAULT_LABELS));

    let scene_board = board.clone();
    let mut server = SessionServer::new(app.clone(), Arc::new(auth))
        .with_scene(move |scene| demo::build(scene, &scene_board));
    let bound = server.listen(addr).await.context("Failed to start listener")?;
    info!(addr = %bound, "Accepting sessions");

    spawn_signal_handler(app.clone());

    if args.local {
        start_local_display(&app, &board)?;
    }

    let server = Arc::new(server);
    let serving = Arc::clone(&server);
    let shutdown = app.shutdown_token();
    let accept_loop = tokio::spawn(async move { serving.serve(shutdown).await });

    let code = app.run().await;

    match accept_loop.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "Accept loop failed"),
        Err(e) => error!(error = %e, "Accept loop panicked"),
    }
    let counters = server.counters();
    info!(
        code,
        connections = counters.connections,
        accepted = counters.accepted,
        rejected = counters.rejected,
        "Termplex server stopped"
    );

    if let Err(e) = tokio::fs::remove_file(&token_path).await {
        warn!(error = %e, "Failed to remove token file");
    }
    Ok(code)
}

/// Run the board on this process's terminal; closing it stops the server
fn start_local_display(app: &Application, board: &SharedModel<Board>) -> Result<()> {
    if !local::is_interactive() {
        anyhow::bail!("--local requires a terminal (TTY)");
    }
    local::install_panic_hook();

    // The backend reports the real size once open.
    let session = Session::local(Size::new(80, 24));
    let model = board.clone();
    let display = app
        .spawn_display(session, LocalTerminal::new(), move |scene| {
            demo::build(scene, &model)
        })
        .context("Failed to start local display")?;

    let app = app.clone();
    tokio::spawn(async move {
        display.wait_closed().await;
        info!("Local display closed, shutting down");
        let _report = app.terminate(TerminateReason::Requested).await;
    });
    Ok(())
}

fn spawn_signal_handler(app: Application) {
    tokio::spawn(async move {
        let name = wait_for_signal().await;
        info!(signal = name, "Received signal, initiating shutdown");
        let report = app.terminate(TerminateReason::Signal(name.to_string())).await;
        if !report.forced.is_empty() {
            warn!(forced = report.forced.len(), "Some displays were detached");
        }
    });
}

#[cfg(unix)]
async fn wait_for_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "Failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return "SIGINT";
        }
    };
    tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = tokio::signal::ctrl_c() => "SIGINT",
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> &'static str {
    let _ = tokio::signal::ctrl_c().await;
    "SIGINT"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parse() {
        let args = Args::parse_from([
            "termplex-server",
            "--listen-address",
            "0.0.0.0",
            "-p",
            "9000",
            "--local",
        ]);
        assert_eq!(args.listen_address.as_deref(), Some("0.0.0.0"));
        assert_eq!(args.listen_port, Some(9000));
        assert!(args.local);
        assert!(args.config.is_none());
    }
}
