//! Protocol and transport errors.

use thiserror::Error;

use crate::connection::ConnectionState;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("could not resolve {endpoint}: {reason}")]
    Resolution { endpoint: String, reason: String },

    #[error("connection to {endpoint} failed: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    #[error("authorization failed: {0}")]
    Authorization(String),

    #[error("stream error: {0}")]
    Stream(#[from] std::io::Error),

    #[error("buffered {size} bytes without a delimiter (maximum {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("connection is {0}, not open")]
    NotOpen(ConnectionState),

    #[error("connect cancelled")]
    Cancelled,

    #[error("invalid message: {0}")]
    Message(#[from] tournbuddy_types::TypesError),
}
