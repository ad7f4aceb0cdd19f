use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::broker::{AmqpSession, InboundMessage, MessageSource};
use crate::cache::UrlCache;
use crate::config::WorkerConfig;
use crate::error::WorkerError;
use crate::message::{self, Action};
use crate::player::PlayerSupervisor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Starting,
    Running,
    Reconnecting,
    Stopping,
    Stopped,
}

/// What the player is supposed to be playing
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackState {
    pub current_url: String,
}

/// Drives the consume loop: broker deliveries in, player restarts out
pub struct Worker<S: MessageSource> {
    config: WorkerConfig,
    cache: UrlCache,
    playback: PlaybackState,
    player: PlayerSupervisor,
    source: S,
    state: WorkerState,
    shutdown: CancellationToken,
}

impl Worker<AmqpSession> {
    /// Worker consuming from the configured AMQP broker
    pub async fn from_config(config: WorkerConfig) -> Self {
        let session = AmqpSession::new(&config);
        Self::new(config, session).await
    }
}

impl<S: MessageSource> Worker<S> {
    /// Create a worker and restore the last playlist URL, falling back to the configured one
    pub async fn new(config: WorkerConfig, source: S) -> Self {
        let shutdown = CancellationToken::new();
        let cache = UrlCache::new(config.url_cache_file.clone());
        let player = PlayerSupervisor::from_config(&config, shutdown.clone());

        info!("Fallback URL set to {}", config.fallback_playlist_url);
        info!("Trying to load last URL from {:?}", cache.path());
        let current_url = match cache.load().await {
            Ok(url) => {
                info!("Restored last URL: {}", url);
                url
            }
            Err(e) => {
                warn!("Unable to load URL ({}), using fallback URL", e);
                config.fallback_playlist_url.clone()
            }
        };

        Self {
            config,
            cache,
            playback: PlaybackState { current_url },
            player,
            source,
            state: WorkerState::Starting,
            shutdown,
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn playback(&self) -> &PlaybackState {
        &self.playback
    }

    pub fn player(&mut self) -> &mut PlayerSupervisor {
        &mut self.player
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Token that stops [`Worker::run`] when cancelled; safe to cancel repeatedly
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn request_stop(&self) {
        self.shutdown.cancel();
    }

    /// Run until a stop is requested or a fatal error occurs.
    ///
    /// Broker connection failures are retried forever after a fixed delay.
    /// Any other error tears down the session and the player and is
    /// returned. A requested stop closes the session but leaves the player
    /// running; call [`Worker::stop_player`] afterwards.
    pub async fn run(&mut self) -> Result<(), WorkerError> {
        let shutdown = self.shutdown.clone();
        let delay = self.config.reconnect_delay();

        while !shutdown.is_cancelled() {
            self.state = WorkerState::Running;
            match self.run_session().await {
                Ok(()) => break,
                Err(e) if e.is_transient() => {
                    self.source.close().await;
                    self.state = WorkerState::Reconnecting;
                    error!("Lost broker connection, reconnecting in {:?}. Reason: {}", delay, e);

                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => {
                    error!("💥 Caught fatal error: {}", e);
                    self.state = WorkerState::Stopping;
                    self.teardown().await;
                    self.state = WorkerState::Stopped;
                    return Err(e);
                }
            }
        }

        self.state = WorkerState::Stopping;
        info!("🛑 Stopping...");
        self.source.close().await;
        self.state = WorkerState::Stopped;
        Ok(())
    }

    /// One connection's lifetime. `Ok` means a stop was requested.
    async fn run_session(&mut self) -> Result<(), WorkerError> {
        let shutdown = self.shutdown.clone();

        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            connected = self.source.connect() => connected?,
        }

        self.player.ensure_playing(&self.playback.current_url).await?;

        loop {
            let delivery = tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                delivery = self.source.next_message() => delivery?,
            };
            self.process_message(delivery).await?;
        }
    }

    /// Validate one delivery and apply it.
    ///
    /// Accepted URLs are persisted, recorded, and handed to the player before
    /// the delivery is acknowledged, so a crash in between leads to
    /// redelivery rather than loss. Invalid messages are rejected without
    /// requeue and never touch the cache or the player.
    pub async fn process_message(
        &mut self,
        delivery: InboundMessage,
    ) -> Result<Action, WorkerError> {
        let tag = delivery.delivery_tag;
        debug!("msgid {}: got message", tag);

        let action = message::handle(&delivery.body);
        match &action {
            Action::Reject(reason) => {
                error!("msgid {}: rejecting message: {}", tag, reason);
                self.source.reject(tag).await?;
            }
            Action::Accept(url) => {
                self.apply_url(url).await?;
                self.source.ack(tag).await?;
                info!("✅ msgid {}: now playing {}", tag, url);
            }
        }
        Ok(action)
    }

    async fn apply_url(&mut self, url: &str) -> Result<(), WorkerError> {
        self.cache.save(url).await.map_err(WorkerError::Persistence)?;
        self.playback.current_url = url.to_string();
        self.player.restart(url).await
    }

    async fn teardown(&mut self) {
        self.source.close().await;
        if let Err(e) = self.player.stop().await {
            warn!("Failed to stop player during teardown: {}", e);
        }
    }

    /// Stop the player left running by a requested stop
    pub async fn stop_player(&mut self) -> Result<(), WorkerError> {
        self.player.stop().await
    }
}
