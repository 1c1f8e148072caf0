//! Error types for pool operations

/// Errors from pool operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("credential already present: {0}")]
    DuplicateCredential(String),

    #[error("no session token found in input")]
    NoSecretFound,

    #[error("credential not found: {0}")]
    NotFound(String),

    #[error("no credential available")]
    NoneAvailable,

    #[error("credential store error: {0}")]
    Store(String),

    #[error("token refresh failed: {0}")]
    RefreshFailed(String),

    #[error("file watch error: {0}")]
    Watch(String),
}

/// Result alias for pool operations.
pub type Result<T> = std::result::Result<T, Error>;
