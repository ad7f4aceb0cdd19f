use anyhow::{Context, Result};
use std::path::PathBuf;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::WorkerConfig;
use crate::error::WorkerError;
use crate::worker::Worker;

/// How a daemon run ended
#[derive(Debug)]
pub enum Outcome {
    /// Stopped on request
    Stopped,
    /// Could not get as far as contacting the broker
    StartupFailed(WorkerError),
    /// Worker hit an unrecoverable error and tore everything down
    Fatal(WorkerError),
}

impl Outcome {
    pub fn exit_code(&self) -> u8 {
        match self {
            Outcome::Stopped => 0,
            Outcome::Fatal(_) => 1,
            Outcome::StartupFailed(_) => 3,
        }
    }
}

/// Command that runs the playback daemon until stopped
pub struct RunCommand {
    config_path: PathBuf,
}

impl RunCommand {
    pub fn new(config_path: PathBuf) -> Self {
        Self { config_path }
    }

    pub async fn execute(&self) -> Outcome {
        let config = match WorkerConfig::load(&self.config_path) {
            Ok(config) => config,
            Err(e) => return Outcome::StartupFailed(e),
        };

        info!("✅ Starting worker for instance {}", config.uuid);
        let mut worker = Worker::from_config(config).await;

        let shutdown = worker.shutdown_token();
        let signals = tokio::spawn(stop_on_signal(shutdown));

        let result = worker.run().await;
        signals.abort();

        match result {
            Ok(()) => match worker.stop_player().await {
                Ok(()) => Outcome::Stopped,
                Err(e) => Outcome::Fatal(e),
            },
            Err(e) => Outcome::Fatal(e),
        }
    }
}

/// Cancel `shutdown` on SIGTERM or SIGINT
async fn stop_on_signal(shutdown: CancellationToken) {
    match wait_for_signal().await {
        Ok(name) => info!("🛑 {} received. Exiting gracefully.", name),
        Err(e) => error!("Signal handling failed, stopping: {:#}", e),
    }
    shutdown.cancel();
}

async fn wait_for_signal() -> Result<&'static str> {
    let mut terminate =
        signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    let mut interrupt =
        signal(SignalKind::interrupt()).context("failed to install SIGINT handler")?;

    tokio::select! {
        _ = terminate.recv() => Ok("SIGTERM"),
        _ = interrupt.recv() => Ok("SIGINT"),
    }
}
