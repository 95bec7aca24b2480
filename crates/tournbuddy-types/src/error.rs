//! Errors raised while constructing shared values.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TypesError {
    #[error("payload contains the message delimiter at offset {offset}")]
    DelimiterInPayload { offset: usize },

    #[error("invalid authorization code: {0:?}")]
    InvalidAuthorizationCode(String),

    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
