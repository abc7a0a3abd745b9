//! Error types for protocol parsing and validation.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProtocolError>;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid timestamp '{value}': expected ISO-8601 like 2023-05-02T01:02:03")]
    InvalidTimestamp { value: String },

    #[error("Invalid table schema: {0}")]
    InvalidSchema(String),

    #[error("Invalid output address: {0}")]
    InvalidAddress(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ProtocolError {
    pub fn invalid_schema(msg: impl Into<String>) -> Self {
        Self::InvalidSchema(msg.into())
    }
}
