use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions,
    ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::uri::AMQPUri;
use lapin::{Channel, Connection, ConnectionProperties, Consumer, ExchangeKind};
use tracing::{debug, info};

use crate::config::WorkerConfig;
use crate::error::WorkerError;

/// Direct exchange every instance queue is bound to
pub const EXCHANGE: &str = "Xall";

/// One delivery, alive until it is acknowledged or rejected
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub delivery_tag: u64,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Consuming,
    Closing,
}

/// Ordered, one-at-a-time supply of playback commands.
///
/// Implementations never retry on their own: every transport failure is
/// returned as [`WorkerError::Connection`], broker refusals as
/// [`WorkerError::Broker`], and the caller decides.
#[async_trait]
pub trait MessageSource: Send {
    /// Connect and set up the queue topology
    async fn connect(&mut self) -> Result<(), WorkerError>;

    /// Wait for the next delivery
    async fn next_message(&mut self) -> Result<InboundMessage, WorkerError>;

    async fn ack(&mut self, delivery_tag: u64) -> Result<(), WorkerError>;

    /// Discard a delivery without requeue
    async fn reject(&mut self, delivery_tag: u64) -> Result<(), WorkerError>;

    /// Best-effort, idempotent teardown
    async fn close(&mut self);

    fn state(&self) -> ConnectionState;
}

/// Live AMQP session
struct Session {
    connection: Connection,
    channel: Channel,
    consumer: Consumer,
}

/// AMQP 0-9-1 broker session built on lapin
pub struct AmqpSession {
    uri: String,
    heartbeat: u16,
    instance: String,
    queue_name: String,
    routing_keys: [String; 2],
    state: ConnectionState,
    session: Option<Session>,
}

impl AmqpSession {
    pub fn new(config: &WorkerConfig) -> Self {
        let queue_name = config.queue_name();
        Self {
            uri: config.amqp_url.clone(),
            heartbeat: config.heartbeat_secs,
            instance: config.uuid.clone(),
            routing_keys: [queue_name.clone(), config.broadcast_routing_key()],
            queue_name,
            state: ConnectionState::Disconnected,
            session: None,
        }
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    fn parse_uri(&self) -> Result<AMQPUri, WorkerError> {
        let mut uri: AMQPUri = self
            .uri
            .parse()
            .map_err(|e| WorkerError::Config(format!("invalid amqp_url: {e}")))?;
        if uri.query.heartbeat.is_none() {
            uri.query.heartbeat = Some(self.heartbeat);
        }
        Ok(uri)
    }

    async fn open(&self) -> Result<Session, WorkerError> {
        let uri = self.parse_uri()?;
        info!("🔌 Connecting to broker {}:{}", uri.authority.host, uri.authority.port);

        let properties = ConnectionProperties::default()
            .with_connection_name(format!("rpimusicd-{}", self.instance).into());
        let connection = Connection::connect_uri(uri, properties).await?;
        let channel = connection.create_channel().await?;

        channel
            .exchange_declare(
                EXCHANGE,
                ExchangeKind::Direct,
                ExchangeDeclareOptions::default(),
                FieldTable::default(),
            )
            .await?;

        info!("Registering queue {}", self.queue_name);
        channel
            .queue_declare(
                &self.queue_name,
                QueueDeclareOptions {
                    durable: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await?;

        for routing_key in &self.routing_keys {
            debug!("Binding {} to {} via {}", self.queue_name, EXCHANGE, routing_key);
            channel
                .queue_bind(
                    &self.queue_name,
                    EXCHANGE,
                    routing_key,
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await?;
        }

        // One unacknowledged delivery at a time keeps processing strictly sequential
        channel.basic_qos(1, BasicQosOptions::default()).await?;

        let consumer = channel
            .basic_consume(
                &self.queue_name,
                &format!("rpimusicd-{}", self.instance),
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        Ok(Session {
            connection,
            channel,
            consumer,
        })
    }

    fn session(&mut self) -> Result<&mut Session, WorkerError> {
        self.session
            .as_mut()
            .ok_or_else(|| WorkerError::Connection("not connected".into()))
    }

    /// Any transport failure leaves the session unusable
    fn drop_session<T>(&mut self, result: Result<T, WorkerError>) -> Result<T, WorkerError> {
        if result.is_err() {
            self.session = None;
            self.state = ConnectionState::Disconnected;
        }
        result
    }
}

#[async_trait]
impl MessageSource for AmqpSession {
    async fn connect(&mut self) -> Result<(), WorkerError> {
        self.close().await;
        self.state = ConnectionState::Connecting;

        let opened = self.open().await;
        let session = self.drop_session(opened)?;
        self.session = Some(session);
        self.state = ConnectionState::Consuming;
        info!("✅ Consuming from {}", self.queue_name);
        Ok(())
    }

    async fn next_message(&mut self) -> Result<InboundMessage, WorkerError> {
        let next = self.session()?.consumer.next().await;
        let result = match next {
            Some(Ok(delivery)) => Ok(InboundMessage {
                delivery_tag: delivery.delivery_tag,
                body: delivery.data,
            }),
            Some(Err(e)) => Err(WorkerError::from(e)),
            None => Err(WorkerError::Connection("consumer cancelled by broker".into())),
        };
        self.drop_session(result)
    }

    async fn ack(&mut self, delivery_tag: u64) -> Result<(), WorkerError> {
        let result = match self.session() {
            Ok(session) => session
                .channel
                .basic_ack(delivery_tag, BasicAckOptions::default())
                .await
                .map_err(WorkerError::from),
            Err(e) => Err(e),
        };
        self.drop_session(result)
    }

    async fn reject(&mut self, delivery_tag: u64) -> Result<(), WorkerError> {
        let options = BasicNackOptions {
            multiple: false,
            requeue: false,
        };
        let result = match self.session() {
            Ok(session) => session
                .channel
                .basic_nack(delivery_tag, options)
                .await
                .map_err(WorkerError::from),
            Err(e) => Err(e),
        };
        self.drop_session(result)
    }

    async fn close(&mut self) {
        let Some(session) = self.session.take() else {
            self.state = ConnectionState::Disconnected;
            return;
        };

        self.state = ConnectionState::Closing;
        if let Err(e) = session.channel.close(200, "worker stopping").await {
            debug!("Ignoring channel close error: {}", e);
        }
        if let Err(e) = session.connection.close(200, "worker stopping").await {
            debug!("Ignoring connection close error: {}", e);
        }
        self.state = ConnectionState::Disconnected;
        info!("🔌 Broker connection closed");
    }

    fn state(&self) -> ConnectionState {
        self.state
    }
}
