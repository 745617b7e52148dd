//! # Arm Arbiter
//!
//! Drive a robotic arm from a Logitech gamepad.
//!
//! # Control Flow
//!
//! 1. **Initialization**
//!    - Parse the command line and load `config/default.toml`
//!    - Set up logging (stdout, plus a rolling telemetry file when enabled)
//!    - Build the arm system with logging stand-ins for the drivers
//!
//! 2. **Run**
//!    - Router, sampling loop and bargraph consumer run as tokio tasks
//!    - The gamepad is read on its own thread
//!    - Optionally, JSON command batches are replayed from stdin
//!
//! 3. **Graceful Shutdown**
//!    - Ctrl+C cancels the shared token
//!    - In-flight sampling cycles and bargraph updates complete
//!    - Every task is awaited before exit

use std::path::PathBuf;

use anyhow::{Context, Result};
use arm_arbiter::config::{Config, TelemetryConfig};
use arm_arbiter::input::gamepad::{Gamepad, GamepadMapper};
use arm_arbiter::system::{logging_drivers, ArmSystem};
use arm_arbiter::telemetry::TELEMETRY_TARGET;
use clap::Parser;
use tokio::io::BufReader;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::{EnvFilter, Targets};
use tracing_subscriber::prelude::*;

/// Drive a robotic arm from a single gamepad
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = "config/default.toml")]
    config: PathBuf,

    /// Do not open the gamepad
    #[arg(long)]
    no_gamepad: bool,

    /// Replay JSON command batches read line by line from stdin
    #[arg(long)]
    stdin_commands: bool,
}

/// Set up stdout logging and, when enabled, the telemetry file.
///
/// The returned guard flushes the telemetry writer and must live until exit.
fn init_tracing(telemetry: &TelemetryConfig) -> Option<WorkerGuard> {
    let stdout = tracing_subscriber::fmt::layer().with_filter(
        EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
    );

    if !telemetry.enabled {
        tracing_subscriber::registry().with(stdout).init();
        return None;
    }

    let appender = tracing_appender::rolling::daily(&telemetry.log_dir, "telemetry.jsonl");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let file = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_level(false)
        .with_target(false)
        .without_time()
        .with_filter(Targets::new().with_target(TELEMETRY_TARGET, tracing::Level::TRACE));

    tracing_subscriber::registry().with(stdout).with(file).init();
    Some(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load(&args.config)
        .with_context(|| format!("Failed to load configuration from {}", args.config.display()))?;
    let _guard = init_tracing(&config.telemetry);

    info!("Arm Arbiter v{} starting...", env!("CARGO_PKG_VERSION"));

    let (drivers, discovery) = logging_drivers(&config).context("Invalid configuration")?;
    let mut system = ArmSystem::build(&config, drivers, std::sync::Arc::new(discovery))
        .context("Failed to build arm system")?;
    system.start();

    if config.gamepad.enabled && !args.no_gamepad {
        match Gamepad::open(&config.gamepad.device_path) {
            Ok(gamepad) => {
                gamepad
                    .spawn_reader(
                        GamepadMapper::new(config.gamepad.deadzone),
                        system.handle(),
                        system.shutdown_token(),
                    )
                    .context("Failed to start gamepad reader")?;
            }
            Err(e) => warn!("Running without gamepad: {}", e),
        }
    }

    let commands = args.stdin_commands.then(|| {
        let replay = system.replay().clone();
        tokio::spawn(async move {
            match replay.serve_lines(BufReader::new(tokio::io::stdin())).await {
                Ok(report) => info!("Command input closed after {} commands", report.executed),
                Err(e) => error!("Command input failed: {}", e),
            }
        })
    });

    info!("Press Ctrl+C to exit");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    info!("Received Ctrl+C, shutting down...");

    system.shutdown().await;
    if let Some(commands) = commands {
        if let Err(e) = commands.await {
            warn!("Command reader ended abnormally: {}", e);
        }
    }

    Ok(())
}
