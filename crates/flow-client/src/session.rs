//! Session secret extraction and credential identity
//!
//! Operators paste whatever their browser gave them: a full `Cookie:` header,
//! a cookie-jar export, or just the bare session token. The durable secret is
//! pulled out by pattern match, and the credential identity is a hash of that
//! secret so re-loading the same secret never yields a second credential.

use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};

/// Matches `__Secure-next-auth.session-token=<value>` up to `;` or whitespace.
static SESSION_TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"__Secure-next-auth\.session-token=([^;\s]+)")
        .expect("session token pattern is valid")
});

/// Minimum length for input to be accepted as a bare session token.
pub const MIN_BARE_SECRET_LEN: usize = 100;

/// Extract the durable session secret from arbitrary operator input.
///
/// Accepts either a cookie-like blob containing the session cookie, or a
/// bare token of at least `MIN_BARE_SECRET_LEN` characters with no `=`.
/// Returns `None` when neither shape is present.
pub fn extract_session_token(input: &str) -> Option<String> {
    if let Some(caps) = SESSION_TOKEN_RE.captures(input) {
        let token = caps[1].trim();
        if !token.is_empty() {
            return Some(token.to_string());
        }
    }

    let trimmed = input.trim();
    if !trimmed.contains('=') && trimmed.len() >= MIN_BARE_SECRET_LEN {
        return Some(trimmed.to_string());
    }

    None
}

/// Derive the stable credential identity from a session secret.
///
/// Lowercase hex SHA-256 of the secret bytes.
pub fn credential_id(secret: &str) -> String {
    hex::encode(Sha256::digest(secret.as_bytes()))
}
