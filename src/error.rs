// src/error.rs

use thiserror::Error;

/// Everything the broker side can fail with. The session treats every
/// variant the same way (drop the connection, back off, retry); the variants
/// only exist to make the logs readable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("subscribe to `{topic}` failed: {reason}")]
    Subscribe { topic: String, reason: String },

    #[error("unsubscribe from `{topic}` failed: {reason}")]
    Unsubscribe { topic: String, reason: String },

    #[error("connection lost: {0}")]
    Connection(String),
}

/// The client is gone; nothing more can be delivered.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    #[error("sink closed")]
    Closed,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required config key: {0}")]
    Missing(String),

    #[error("invalid value for {key}: `{value}`")]
    Invalid { key: String, value: String },
}
