//! Flow session credentials and upstream transport
//!
//! Provides session-secret extraction and identity derivation, the
//! one-file-per-credential store, the `Transport` contract the pool and the
//! orchestrator drive, and `FlowClient`, the HTTP implementation of it.
//!
//! Credential flow:
//! 1. Operator drops a cookie blob into the credential directory
//! 2. `session::extract_session_token()` pulls the durable secret out of it
//! 3. `session::credential_id()` derives the stable identity
//! 4. `Transport::exchange_session()` trades the secret for an access token
//! 5. Access token authorizes uploads, job submission and status queries

pub mod client;
pub mod constants;
pub mod error;
pub mod session;
pub mod store;
pub mod transport;

pub use client::{ClientConfig, FlowClient};
pub use error::{Error, Result};
pub use session::{credential_id, extract_session_token};
pub use store::{CredentialDir, StoredCredential};
pub use transport::{
    AccessGrant, ImageJob, JobStatus, Quota, Transport, VideoJob, VideoSubmission, VideoTask,
};
