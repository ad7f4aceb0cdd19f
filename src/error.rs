use lapin::protocol::{AMQPErrorKind, AMQPHardError};
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that end or interrupt a worker run.
///
/// Only [`WorkerError::Connection`] is recoverable; the worker answers it by
/// reconnecting after the configured delay. Everything else is fatal.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Broker connection error: {0}")]
    Connection(String),

    #[error("Broker refused request: {0}")]
    Broker(String),

    #[error("Player exited during startup with {}", describe_exit(.code))]
    PlayerStartup { code: Option<i32> },

    #[error("Failed to launch player {program:?}: {source}")]
    PlayerSpawn {
        program: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Player control error: {0}")]
    Player(String),

    #[error("Failed to persist playlist URL: {0}")]
    Persistence(#[source] CacheError),
}

impl WorkerError {
    /// Whether the worker should reconnect instead of shutting down.
    pub fn is_transient(&self) -> bool {
        matches!(self, WorkerError::Connection(_))
    }
}

/// Transport loss is [`WorkerError::Connection`]; protocol refusals such as
/// ACCESS_REFUSED, NOT_ALLOWED or PRECONDITION_FAILED are [`WorkerError::Broker`].
impl From<lapin::Error> for WorkerError {
    fn from(err: lapin::Error) -> Self {
        let transient = match &err {
            lapin::Error::IOError(_)
            | lapin::Error::InvalidConnectionState(_)
            | lapin::Error::InvalidChannelState(_)
            | lapin::Error::MissingHeartbeatError => true,
            lapin::Error::ProtocolError(amqp) => matches!(
                amqp.kind(),
                AMQPErrorKind::Hard(AMQPHardError::CONNECTIONFORCED)
            ),
            _ => false,
        };

        if transient {
            WorkerError::Connection(err.to_string())
        } else {
            WorkerError::Broker(err.to_string())
        }
    }
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "no exit code (killed by signal)".to_string(),
    }
}

/// Failures of the URL cache store.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("no cached URL at {0:?}")]
    NotFound(PathBuf),

    #[error("corrupt cache file {path:?}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use lapin::protocol::{AMQPError, AMQPSoftError};
    use std::sync::Arc;

    #[test]
    fn test_only_connection_errors_are_transient() {
        assert!(WorkerError::Connection("reset".into()).is_transient());
        assert!(!WorkerError::Config("bad".into()).is_transient());
        assert!(!WorkerError::PlayerStartup { code: Some(2) }.is_transient());
    }

    fn protocol_error(kind: AMQPErrorKind) -> lapin::Error {
        lapin::Error::ProtocolError(AMQPError::new(kind, "refused".into()))
    }

    #[test]
    fn test_transport_loss_is_transient() {
        let reset = io::Error::from(io::ErrorKind::ConnectionReset);
        assert!(WorkerError::from(lapin::Error::IOError(Arc::new(reset))).is_transient());
        assert!(WorkerError::from(lapin::Error::MissingHeartbeatError).is_transient());
        let forced = protocol_error(AMQPErrorKind::Hard(AMQPHardError::CONNECTIONFORCED));
        assert!(WorkerError::from(forced).is_transient());
    }

    #[test]
    fn test_broker_refusals_are_fatal() {
        let refusals = [
            AMQPErrorKind::Soft(AMQPSoftError::ACCESSREFUSED),
            AMQPErrorKind::Soft(AMQPSoftError::PRECONDITIONFAILED),
            AMQPErrorKind::Soft(AMQPSoftError::NOTFOUND),
            AMQPErrorKind::Hard(AMQPHardError::NOTALLOWED),
        ];

        for kind in refusals {
            let err = WorkerError::from(protocol_error(kind.clone()));
            assert!(matches!(err, WorkerError::Broker(_)), "{kind:?} gave {err:?}");
            assert!(!err.is_transient());
        }
    }

    #[test]
    fn test_player_startup_message() {
        let err = WorkerError::PlayerStartup { code: Some(2) };
        assert_eq!(err.to_string(), "Player exited during startup with exit code 2");

        let err = WorkerError::PlayerStartup { code: None };
        assert!(err.to_string().contains("killed by signal"));
    }
}
