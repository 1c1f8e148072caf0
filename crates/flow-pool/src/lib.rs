//! Credential pool for Flow session secrets
//!
//! Keeps one in-memory `Credential` per distinct session secret found in the
//! credential directory, tracks each credential's health, and hands out
//! healthy credentials round-robin.
//!
//! Credential lifecycle:
//! 1. A file appears in the directory (startup scan, watcher, or admin add)
//! 2. Background refresh exchanges the session secret for an access token
//! 3. Generation outcomes reset or increment the error count
//! 4. Three consecutive refresh failures disable the credential
//! 5. A later successful refresh re-enables it
//! 6. Deleting the file (or an admin remove) drops it

pub mod credential;
pub mod error;
pub mod pool;
mod refresh;
mod watch;

#[cfg(test)]
pub(crate) mod test_support;

pub use credential::{Credential, CredentialState, CredentialSummary, ERROR_THRESHOLD, EXPIRY_MARGIN, now_millis};
pub use error::{Error, Result};
pub use pool::{Pool, PoolStats};
pub use watch::DEBOUNCE;
