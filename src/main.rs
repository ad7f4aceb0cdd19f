//! # rpimusicd - AMQP-driven stream player
//!
//! Listens on a durable per-instance queue for playback commands and plays
//! the requested URL through an external media player (mpv by default).
//!
//! ## Features
//!
//! - **Resume after restart**: the last applied URL is cached on disk
//! - **Instance and broadcast routing**: one queue bound under `<prefix>_<uuid>` and `<prefix>_All`
//! - **Reconnects**: broker connection loss is retried with a fixed delay
//! - **Player supervision**: a player that dies right after start stops the daemon
//! - **Signal Handling**: Graceful shutdown on SIGINT/SIGTERM
//!
//! ## Usage
//!
//! ```bash
//! rpimusicd --config ~/.config/rpimusic.json
//! ```
//!
//! Send `{"playlisturl": "http://..."}` to the `Xall` exchange with routing
//! key `RPiMusic_<uuid>` or `RPiMusic_All`.
//!
//! ## Exit codes
//!
//! 0 clean stop, 1 fatal error, 3 startup error, 255 unexpected failure.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rpimusic::commands::run::{Outcome, RunCommand};

const UNEXPECTED_FAILURE: u8 = 255;

/// rpimusicd - play URLs from AMQP messages via mpv, cache URLs
#[derive(Parser)]
#[command(
    name = "rpimusicd",
    about = "Play URLs from AMQP messages via mpv, cache URLs",
    version
)]
struct Cli {
    /// Path to the JSON config file
    #[arg(long, value_name = "CONFIG")]
    config: PathBuf,
    /// Activate debugging output
    #[arg(long)]
    debug: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.debug {
        "rpimusic=debug,rpimusicd=debug"
    } else {
        "rpimusic=info,rpimusicd=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
    debug!("Loglevel set to DEBUG");

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("{:#}", e);
            return ExitCode::from(UNEXPECTED_FAILURE);
        }
    };

    let command = RunCommand::new(cli.config);
    // A panic in the daemon surfaces here as a join error
    let joined = runtime.block_on(async move {
        tokio::spawn(async move { command.execute().await }).await
    });

    match joined {
        Ok(outcome) => {
            match &outcome {
                Outcome::Stopped => info!("Stopped"),
                Outcome::StartupFailed(e) => error!("Startup failed: {}", e),
                Outcome::Fatal(e) => error!("Worker failed: {}", e),
            }
            ExitCode::from(outcome.exit_code())
        }
        Err(e) => {
            error!("Unexpected failure: {}", e);
            ExitCode::from(UNEXPECTED_FAILURE)
        }
    }
}
