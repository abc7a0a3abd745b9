use thiserror::Error;

#[derive(Debug, Error)]
pub enum GcpError {
    #[error("Request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{method} {url} returned {status}: {body}")]
    Status {
        method: &'static str,
        url: String,
        status: u16,
        body: String,
    },

    #[error("Failed to decode response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Access token unavailable: {0}")]
    Auth(String),

    #[error("BigQuery job {job_id} failed: {message}")]
    Job { job_id: String, message: String },

    #[error("Unexpected response: {0}")]
    InvalidResponse(String),
}

impl GcpError {
    /// HTTP status of a rejected request, if that is what failed.
    pub fn status(&self) -> Option<u16> {
        match self {
            GcpError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, GcpError>;
