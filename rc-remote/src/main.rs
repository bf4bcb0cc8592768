//! RC Remote handheld client — entry point.
//!
//! ```text
//! rc-remote                       Console with defaults
//! rc-remote --config <path>       Use custom config TOML
//! rc-remote --gen-config          Dump default config and exit
//! rc-remote -a 10.0.0.2 --connect Connect at start-up
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use rc_core::{Session, SessionCommand, SessionStatus};

use rc_remote::config::RemoteConfig;
use rc_remote::console::{ConsoleCommand, HELP, render_status};
use rc_remote::motion::{MotionSource, ReplayMotion, SimulatedMotion, spawn_motion};

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "rc-remote", about = "RC Remote telemetry client")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "rc-remote.toml")]
    config: PathBuf,

    /// Controller address (overrides config).
    #[arg(short, long)]
    address: Option<String>,

    /// Controller port (overrides config).
    #[arg(short, long)]
    port: Option<String>,

    /// Replay samples from a JSON-lines file instead of simulating.
    #[arg(long)]
    replay: Option<PathBuf>,

    /// Connect immediately.
    #[arg(long)]
    connect: bool,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        let text = toml::to_string_pretty(&RemoteConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let mut config = RemoteConfig::load(&cli.config);
    if let Some(address) = cli.address {
        config.network.address = address;
    }
    if let Some(port) = cli.port {
        config.network.port = port;
    }
    if cli.replay.is_some() {
        config.telemetry.replay = cli.replay;
    }
    if cli.connect {
        config.network.connect_on_start = true;
    }

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    info!("rc-remote v{}", env!("CARGO_PKG_VERSION"));

    // ── 1. Session & motion source ──────────────────────────────

    let (handle, session_task) = Session::spawn(config.session_options());

    let source: Box<dyn MotionSource> = match &config.telemetry.replay {
        Some(path) => Box::new(ReplayMotion::load(path)?),
        None => Box::new(SimulatedMotion::default()),
    };
    let motion_task = spawn_motion(handle.clone(), source, config.sample_period());

    // ── 2. Status printer ───────────────────────────────────────

    // Prints only when the connection or status line changes; the
    // numeric readout is available through `status`.
    let mut status_rx = handle.subscribe();
    let printer_task = tokio::spawn(async move {
        let mut last = (String::new(), String::new());
        while status_rx.changed().await.is_ok() {
            let status: SessionStatus = status_rx.borrow_and_update().clone();
            let key = (status.state.name().to_string(), status.message.clone());
            if key != last {
                println!("[{}] {}", status.state, status.message);
                last = key;
            }
        }
    });

    if config.network.connect_on_start {
        handle
            .send(SessionCommand::Connect {
                address: config.network.address.clone(),
                port: config.network.port.clone(),
                reply: None,
            })
            .await?;
    }

    // ── 3. Console loop ─────────────────────────────────────────

    println!("{HELP}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!("stdin error: {e}");
                break;
            }
        };

        let command = match ConsoleCommand::parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                println!("{e}");
                continue;
            }
        };

        match command {
            ConsoleCommand::Quit => break,
            ConsoleCommand::Help => println!("{HELP}"),
            ConsoleCommand::Status => println!("{}", render_status(&handle.status())),
            other => {
                if let Some(cmd) = other.to_session(&config.network) {
                    if let Err(e) = handle.send(cmd).await {
                        warn!("session unavailable: {e}");
                        break;
                    }
                }
            }
        }
    }

    // ── 4. Shutdown ─────────────────────────────────────────────

    info!("shutting down");
    let _ = handle.shutdown().await;
    let _ = session_task.await;
    motion_task.abort();
    let _ = motion_task.await;
    let _ = printer_task.await;

    Ok(())
}
