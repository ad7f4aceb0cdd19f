use serde::Deserialize;
use thiserror::Error;

/// Wire payload of a playback command
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PlaylistMessage {
    pub playlisturl: String,
}

/// Why an inbound message was refused
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("message body is not valid UTF-8")]
    NotUtf8,

    #[error("malformed message: {0}")]
    Malformed(String),
}

/// Decision for one delivery
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Switch playback to this URL, then acknowledge
    Accept(String),
    /// Discard the delivery without requeue
    Reject(ValidationError),
}

/// Validate a raw message body
pub fn handle(body: &[u8]) -> Action {
    let text = match std::str::from_utf8(body) {
        Ok(text) => text,
        Err(_) => return Action::Reject(ValidationError::NotUtf8),
    };

    match parse(text) {
        Ok(message) => Action::Accept(message.playlisturl),
        Err(reason) => Action::Reject(ValidationError::Malformed(reason)),
    }
}

/// Payloads must be JSON objects; a derived `Deserialize` also takes `["url"]` by position
fn parse(text: &str) -> Result<PlaylistMessage, String> {
    let value: serde_json::Value = serde_json::from_str(text).map_err(|e| e.to_string())?;
    if !value.is_object() {
        return Err("expected a JSON object".to_string());
    }
    serde_json::from_value(value).map_err(|e| e.to_string())
}
