use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::WorkerConfig;
use crate::error::WorkerError;

/// The one live player process and the URL it was started with
#[derive(Debug)]
struct PlayerHandle {
    child: Child,
    url: String,
}

/// Owns the external media player process
#[derive(Debug)]
pub struct PlayerSupervisor {
    program: PathBuf,
    args: Vec<String>,
    startup_timeout: Duration,
    shutdown: CancellationToken,
    current: Option<PlayerHandle>,
}

impl PlayerSupervisor {
    pub fn new(
        program: PathBuf,
        args: Vec<String>,
        startup_timeout: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            program,
            args,
            startup_timeout,
            shutdown,
            current: None,
        }
    }

    pub fn from_config(config: &WorkerConfig, shutdown: CancellationToken) -> Self {
        Self::new(
            config.player.clone(),
            config.player_args.clone(),
            config.startup_timeout(),
            shutdown,
        )
    }

    fn build_command(&self, url: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        cmd
    }

    /// Spawn the player for `url` and watch it through the startup window.
    ///
    /// A player that exits inside the window is assumed unable to play the
    /// URL and yields [`WorkerError::PlayerStartup`], unless shutdown was
    /// requested meanwhile. One that survives keeps running in the
    /// background, owned by the supervisor.
    pub async fn start(&mut self, url: &str) -> Result<(), WorkerError> {
        if self.current.is_some() {
            return Err(WorkerError::Player(
                "player already running, stop it before starting another".into(),
            ));
        }

        let mut cmd = self.build_command(url);
        info!("▶️ Starting player: {:?} {:?} {}", self.program, self.args, url);

        let mut child = cmd.spawn().map_err(|source| WorkerError::PlayerSpawn {
            program: self.program.clone(),
            source,
        })?;

        let waited = tokio::time::timeout(self.startup_timeout, child.wait()).await;
        match waited {
            Err(_) => {
                debug!("Player alive after {:?}, pid {:?}", self.startup_timeout, child.id());
                self.current = Some(PlayerHandle {
                    child,
                    url: url.to_string(),
                });
                Ok(())
            }
            Ok(Ok(status)) if self.shutdown.is_cancelled() => {
                info!("Player exited with {} while shutting down", status);
                Ok(())
            }
            Ok(Ok(status)) => {
                error!(
                    "❌ Player dead after less than {:?} ({}), assuming it cannot play {}",
                    self.startup_timeout, status, url
                );
                Err(WorkerError::PlayerStartup {
                    code: status.code(),
                })
            }
            Ok(Err(e)) => Err(WorkerError::Player(format!("failed to wait for player: {e}"))),
        }
    }

    /// Terminate the owned player and wait for it to exit. No-op when idle.
    pub async fn stop(&mut self) -> Result<(), WorkerError> {
        let Some(mut handle) = self.current.take() else {
            return Ok(());
        };

        if let Some(pid) = handle.child.id() {
            if let Err(e) = terminate(pid) {
                warn!("SIGTERM to player {} failed ({}), killing it", pid, e);
                let _ = handle.child.start_kill();
            }
        }

        let status = handle
            .child
            .wait()
            .await
            .map_err(|e| WorkerError::Player(format!("failed to reap player: {e}")))?;
        info!("⏹️ Stopped player ({})", status);
        Ok(())
    }

    /// Stop the current player, then start a new one for `url`
    pub async fn restart(&mut self, url: &str) -> Result<(), WorkerError> {
        self.stop().await?;
        self.start(url).await
    }

    /// Make sure a live player is playing `url`, restarting only if needed
    pub async fn ensure_playing(&mut self, url: &str) -> Result<(), WorkerError> {
        if self.is_running() && self.current_url() == Some(url) {
            debug!("Player already playing {}", url);
            return Ok(());
        }
        self.restart(url).await
    }

    /// Non-blocking liveness check of the owned process
    pub fn is_running(&mut self) -> bool {
        match self.current.as_mut() {
            Some(handle) => matches!(handle.child.try_wait(), Ok(None)),
            None => false,
        }
    }

    pub fn current_url(&self) -> Option<&str> {
        self.current.as_ref().map(|h| h.url.as_str())
    }

    pub fn pid(&self) -> Option<u32> {
        self.current.as_ref().and_then(|h| h.child.id())
    }
}

fn terminate(pid: u32) -> io::Result<()> {
    let pid = libc::pid_t::try_from(pid)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
    // SAFETY: kill(2) has no memory-safety preconditions; the pid belongs to
    // a child we have not reaped yet.
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}
