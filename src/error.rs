use rust_decimal::Decimal;
use std::time::Duration;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Transport-level failures. Never fatal: the ingest loop reconnects.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("feed handshake failed: {0}")]
    Handshake(#[source] tungstenite::Error),
    #[error("feed handshake did not complete within {0:?}")]
    ConnectTimeout(Duration),
    #[error("invalid websocket subprotocol {0:?}")]
    InvalidSubprotocol(String),
    #[error("failed to send subscription start: {0}")]
    Subscribe(#[source] tungstenite::Error),
    #[error("feed connection dropped: {0}")]
    Receive(#[source] tungstenite::Error),
    #[error("feed connection closed by peer")]
    Closed,
    #[error("no message from feed within {0:?}")]
    Stalled(Duration),
}

/// A single inbound message that cannot be turned into a reading.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed feed message: {0}")]
    Json(#[from] serde_json::Error),
    #[error("message of type {kind:?} has no payload.data.temperature")]
    MissingTemperature { kind: Option<String> },
    #[error("temperature {0} is not a decimal number")]
    InvalidNumber(String),
    #[error("temperature {0} does not fit NUMERIC(18, 15)")]
    OutOfRange(Decimal),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid status {0:?}: expected \"on\" or \"off\"")]
    InvalidStatus(String),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("batch size must be at least 1, got {0}")]
    InvalidBatchSize(i64),
}

/// Failure of the control mutation: either the input or the write.
#[derive(Debug, Error)]
pub enum ToggleError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}
