//! Error types for Flow transport and credential storage

/// Errors from upstream calls and credential file handling.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("upstream returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("session rejected: {0}")]
    Unauthorized(String),

    #[error("invalid upstream response: {0}")]
    InvalidResponse(String),

    #[error("I/O error: {0}")]
    Io(String),
}

/// Result alias for client operations.
pub type Result<T> = std::result::Result<T, Error>;
