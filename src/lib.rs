pub mod broker;
pub mod cache;
pub mod commands;
pub mod config;
pub mod error;
pub mod message;
pub mod player;
pub mod worker;

pub use broker::{AmqpSession, ConnectionState, InboundMessage, MessageSource};
pub use config::WorkerConfig;
pub use error::{CacheError, WorkerError};
pub use worker::{PlaybackState, Worker, WorkerState};
