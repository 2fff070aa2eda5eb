//! Termplex Terminal Entry Point
//!
//! Usage:
//!   termplex [local]                      Run the board on this terminal
//!   termplex connect [OPTIONS]            Attach to a termplex-server
//!
//! Connect options:
//!   --address <HOST>     Server host (default: 127.0.0.1)
//!   --port <PORT>        Server port (default: 7373)
//!   --user <NAME>        User to authenticate as (default: $USER)
//!   --token <HEX>        Session token
//!   --token-file <PATH>  Read the token from a file instead

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use termplex_core::server::auth::default_token_path;
use termplex_core::{
    load_config_from_path, logging, Application, Credentials, RuntimeEnv, Session, SessionToken,
    SharedModel, Size,
};
use termplex_tui::demo::{self, Board, DEFAULT_LABELS};
use termplex_tui::{attach, local, LocalTerminal};

const DEFAULT_TICK: Duration = Duration::from_secs(1);

#[derive(Parser, Debug)]
#[command(name = "termplex", author, version, about = "Termplex terminal client")]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "TERMPLEX_LOG_LEVEL", global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the demo board on this terminal (default)
    Local {
        /// Configuration file path
        #[arg(short = 'c', long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
    /// Attach this terminal to a running termplex-server
    Connect {
        /// Server host
        #[arg(long, default_value = "127.0.0.1")]
        address: String,

        /// Server port
        #[arg(short = 'p', long, default_value_t = 7373)]
        port: u16,

        /// User to authenticate as
        #[arg(short = 'u', long, env = "USER", default_value = "guest")]
        user: String,

        /// Session token (hex)
        #[arg(long, env = "TERMPLEX_TOKEN", conflicts_with = "token_file")]
        token: Option<String>,

        /// File holding the session token
        #[arg(long, value_name = "PATH")]
        token_file: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if !local::is_interactive() {
        eprintln!("Error: termplex requires a terminal (TTY)");
        eprintln!();
        eprintln!("This usually means:");
        eprintln!("  - SSH without -t flag");
        eprintln!("  - Piped stdin/stdout");
        std::process::exit(1);
    }

    let env = RuntimeEnv::from_env().context("Invalid environment")?;
    logging::init(&env, cli.log_level.as_deref(), true)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {e}"))?;
    local::install_panic_hook();

    match cli.command.unwrap_or(Command::Local { config: None }) {
        Command::Local { config } => {
            let code = run_local(&env, config).await?;
            if code != 0 {
                std::process::exit(code);
            }
        }
        Command::Connect {
            address,
            port,
            user,
            token,
            token_file,
        } => {
            let secret = match token {
                Some(token) => token,
                None => {
                    let path = token_file.unwrap_or_else(default_token_path);
                    SessionToken::read_from_file(&path)
                        .with_context(|| format!("Failed to read token from {}", path.display()))?
                        .to_hex()
                }
            };
            let addr = resolve(&address, port).await?;
            let detach = attach::run(addr, &Credentials::new(user, secret)).await?;
            println!("\r\ntermplex: {detach}");
        }
    }
    Ok(())
}

async fn run_local(env: &RuntimeEnv, config_path: Option<PathBuf>) -> Result<i32> {
    let mut config = load_config_from_path(config_path.or_else(|| env.config_path.clone()))
        .context("Failed to load configuration")?;
    config.exit_when_idle = true;
    if config.tick_interval.is_none() {
        config.tick_interval = Some(DEFAULT_TICK);
    }

    let app = Application::initialize(config).context("Invalid configuration")?;
    demo::register_kinds(app.objects());
    let board = SharedModel::new(Board::with_labels(DEFAULT_LABELS));

    let (cols, rows) = crossterm::terminal::size().context("Failed to read terminal size")?;
    app.spawn_display(
        Session::local(Size::new(cols, rows)),
        LocalTerminal::new(),
        move |scene| demo::build(scene, &board),
    )
    .context("Failed to start display")?;

    Ok(app.run().await)
}

async fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    tokio::net::lookup_host((host, port))
        .await
        .with_context(|| format!("Failed to resolve {host}"))?
        .next()
        .with_context(|| format!("No address for {host}"))
}
