//! Credential entity and its health bookkeeping
//!
//! A credential is one session secret plus everything derived from it: the
//! short-lived access token, the cached project, quota info and health
//! counters. Identity and secret are immutable; every mutable field lives in
//! `CredentialState` behind the credential's own mutex, so refreshes of
//! unrelated credentials never serialize against each other.
//!
//! Critical sections never span a network call: callers read what they need,
//! release the lock, talk to the transport, then lock again to record the outcome.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use common::Secret;
use flow_client::{AccessGrant, Transport};
use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Consecutive failures at which a credential stops being selectable.
pub const ERROR_THRESHOLD: u32 = 3;

/// Access tokens expiring within this margin are treated as absent.
pub const EXPIRY_MARGIN: Duration = Duration::from_secs(5 * 60);

/// Current unix time in milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn rfc3339(millis: u64) -> Option<String> {
    let millis = i64::try_from(millis).ok()?;
    chrono::DateTime::<chrono::Utc>::from_timestamp_millis(millis).map(|t| t.to_rfc3339())
}

/// Mutable fields of a credential. Only reachable through `Credential::state()`.
#[derive(Debug, Default)]
pub struct CredentialState {
    pub access_token: Option<Secret<String>>,
    /// Unix timestamp in milliseconds.
    pub expires_at_millis: Option<u64>,
    pub email: Option<String>,
    pub workspace_id: Option<String>,
    pub credits: Option<i64>,
    pub tier: Option<String>,
    pub error_count: u32,
    pub disabled: bool,
    pub last_used_millis: Option<u64>,
}

impl CredentialState {
    /// Eligible for selection.
    pub fn is_ready(&self) -> bool {
        !self.disabled && self.error_count < ERROR_THRESHOLD
    }

    /// Access token usable at `now_millis` with the expiry margin applied.
    pub fn fresh_access_token(&self, now_millis: u64) -> Option<&str> {
        let token = self.access_token.as_ref()?;
        let expires = self.expires_at_millis?;
        let margin = EXPIRY_MARGIN.as_millis() as u64;
        if token.is_empty() || expires <= now_millis.saturating_add(margin) {
            return None;
        }
        Some(token.expose().as_str())
    }

    /// Token absent, expiry unknown, or expiring within the margin.
    pub fn needs_refresh(&self, now_millis: u64) -> bool {
        self.fresh_access_token(now_millis).is_none()
    }

    /// Store new access material without touching health counters.
    pub fn apply_grant(&mut self, grant: AccessGrant) {
        self.access_token = Some(Secret::new(grant.access_token));
        self.expires_at_millis = grant.expires_at_millis;
        if grant.email.is_some() {
            self.email = grant.email;
        }
    }

    /// A successful refresh also heals the credential.
    pub fn record_refresh_success(&mut self, grant: AccessGrant) {
        self.apply_grant(grant);
        self.error_count = 0;
        self.disabled = false;
    }

    /// Count a refresh failure. Returns `true` if this failure disabled the credential.
    pub fn record_refresh_failure(&mut self) -> bool {
        self.error_count = self.error_count.saturating_add(1);
        if self.error_count >= ERROR_THRESHOLD && !self.disabled {
            self.disabled = true;
            return true;
        }
        false
    }

    /// Count a failed generation attempt. Does not disable.
    pub fn record_failure(&mut self) {
        self.error_count = self.error_count.saturating_add(1);
    }

    /// A completed generation: stamp last use and clear the error streak.
    pub fn record_success(&mut self, now_millis: u64) {
        self.last_used_millis = Some(now_millis);
        self.error_count = 0;
    }
}

/// Per-credential entry in `PoolStats`. Never carries secrets.
#[derive(Debug, Clone, Serialize)]
pub struct CredentialSummary {
    /// Masked identity (first 16 characters).
    pub id: String,
    pub email: Option<String>,
    pub credits: Option<i64>,
    pub tier: Option<String>,
    pub disabled: bool,
    pub error_count: u32,
    pub ready: bool,
    pub has_access_token: bool,
    pub access_expires_at: Option<String>,
    pub last_used: Option<String>,
    pub workspace_id: Option<String>,
}

/// One session secret and its derived state.
#[derive(Debug)]
pub struct Credential {
    id: String,
    secret: Secret<String>,
    state: Mutex<CredentialState>,
}

impl Credential {
    pub fn new(id: String, secret: Secret<String>) -> Self {
        Self {
            id,
            secret,
            state: Mutex::new(CredentialState::default()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn masked_id(&self) -> String {
        common::mask(&self.id)
    }

    pub fn secret(&self) -> &str {
        self.secret.expose()
    }

    /// Lock the mutable fields.
    pub async fn state(&self) -> MutexGuard<'_, CredentialState> {
        self.state.lock().await
    }

    pub async fn is_ready(&self) -> bool {
        self.state.lock().await.is_ready()
    }

    pub async fn summary(&self) -> CredentialSummary {
        let state = self.state.lock().await;
        CredentialSummary {
            id: self.masked_id(),
            email: state.email.clone(),
            credits: state.credits,
            tier: state.tier.clone(),
            disabled: state.disabled,
            error_count: state.error_count,
            ready: state.is_ready(),
            has_access_token: state.access_token.is_some(),
            access_expires_at: state.expires_at_millis.and_then(rfc3339),
            last_used: state.last_used_millis.and_then(rfc3339),
            workspace_id: state.workspace_id.clone(),
        }
    }

    /// Exchange the session secret and record the outcome as a health event.
    ///
    /// Success stores the new token and re-enables the credential; failure
    /// counts toward `ERROR_THRESHOLD` and disables it once reached.
    pub async fn refresh(&self, transport: &dyn Transport) -> flow_client::Result<()> {
        match transport.exchange_session(self.secret()).await {
            Ok(grant) => {
                let email = grant.email.clone();
                self.state.lock().await.record_refresh_success(grant);
                metrics::counter!("flow_pool_refresh_total", "outcome" => "success").increment(1);
                info!(credential = %self.masked_id(), email = ?email, "access token refreshed");
                Ok(())
            }
            Err(e) => {
                let (disabled_now, errors) = {
                    let mut state = self.state.lock().await;
                    (state.record_refresh_failure(), state.error_count)
                };
                metrics::counter!("flow_pool_refresh_total", "outcome" => "failure").increment(1);
                if disabled_now {
                    metrics::counter!("flow_pool_credentials_disabled_total").increment(1);
                    warn!(credential = %self.masked_id(), errors, error = %e, "refresh failed too many times, credential disabled");
                } else {
                    warn!(credential = %self.masked_id(), errors, error = %e, "access token refresh failed");
                }
                Err(e)
            }
        }
    }

    /// Return a usable access token, exchanging the session secret if needed.
    ///
    /// Request-path variant of `refresh`: failures are returned to the caller
    /// without touching health counters. The credential's lock is held across
    /// the exchange, so concurrent requests on a stale credential exchange once.
    pub async fn ensure_access_token(&self, transport: &dyn Transport) -> flow_client::Result<String> {
        let mut state = self.state.lock().await;
        if let Some(token) = state.fresh_access_token(now_millis()) {
            return Ok(token.to_string());
        }

        let grant = transport.exchange_session(self.secret()).await?;
        let token = grant.access_token.clone();
        state.apply_grant(grant);
        debug!(credential = %self.masked_id(), expires_at = ?state.expires_at_millis, "access token refreshed on request path");
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedTransport;

    fn grant(token: &str, expires_in: Duration) -> AccessGrant {
        AccessGrant {
            access_token: token.into(),
            expires_at_millis: Some(now_millis() + expires_in.as_millis() as u64),
            email: Some("user@example.com".into()),
        }
    }

    fn credential() -> Credential {
        Credential::new(
            flow_client::credential_id("secret"),
            Secret::new("secret".to_string()),
        )
    }

    #[test]
    fn fresh_token_respects_margin() {
        let mut state = CredentialState::default();
        assert!(state.needs_refresh(now_millis()));

        state.apply_grant(grant("at", Duration::from_secs(3600)));
        assert_eq!(state.fresh_access_token(now_millis()), Some("at"));

        state.apply_grant(grant("at2", Duration::from_secs(4 * 60)));
        assert!(state.needs_refresh(now_millis()), "token inside the 5 minute margin is stale");
    }

    #[test]
    fn unknown_expiry_needs_refresh() {
        let mut state = CredentialState::default();
        state.apply_grant(AccessGrant {
            access_token: "at".into(),
            expires_at_millis: None,
            email: None,
        });
        assert!(state.needs_refresh(now_millis()));
    }

    #[test]
    fn apply_grant_keeps_known_email() {
        let mut state = CredentialState::default();
        state.apply_grant(grant("a", Duration::from_secs(3600)));
        state.apply_grant(AccessGrant {
            access_token: "b".into(),
            expires_at_millis: None,
            email: None,
        });
        assert_eq!(state.email.as_deref(), Some("user@example.com"));
    }

    #[test]
    fn third_refresh_failure_disables() {
        let mut state = CredentialState::default();
        assert!(!state.record_refresh_failure());
        assert!(!state.record_refresh_failure());
        assert!(state.is_ready());
        assert!(state.record_refresh_failure());
        assert!(state.disabled);
        assert!(!state.is_ready());
        // Already disabled: not reported again
        assert!(!state.record_refresh_failure());

        state.record_refresh_success(grant("at", Duration::from_secs(3600)));
        assert!(state.is_ready());
        assert_eq!(state.error_count, 0);
    }

    #[test]
    fn generation_failures_block_without_disabling() {
        let mut state = CredentialState::default();
        for _ in 0..ERROR_THRESHOLD {
            state.record_failure();
        }
        assert!(!state.disabled);
        assert!(!state.is_ready());

        state.record_success(42);
        assert!(state.is_ready());
        assert_eq!(state.last_used_millis, Some(42));
    }

    #[tokio::test]
    async fn refresh_success_heals_credential() {
        let transport = ScriptedTransport::new();
        let cred = credential();
        {
            let mut state = cred.state().await;
            state.error_count = 3;
            state.disabled = true;
        }

        cred.refresh(&transport).await.unwrap();

        let state = cred.state().await;
        assert!(state.is_ready());
        assert!(state.fresh_access_token(now_millis()).is_some());
        assert_eq!(state.email.as_deref(), Some("user@example.com"));
    }

    #[tokio::test]
    async fn refresh_failure_counts() {
        let transport = ScriptedTransport::new();
        transport.set_failing(true);
        let cred = credential();

        assert!(cred.refresh(&transport).await.is_err());
        assert_eq!(cred.state().await.error_count, 1);
    }

    #[tokio::test]
    async fn ensure_access_token_reuses_fresh_token() {
        let transport = ScriptedTransport::new();
        let cred = credential();

        let first = cred.ensure_access_token(&transport).await.unwrap();
        let second = cred.ensure_access_token(&transport).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(transport.exchange_calls(), 1);
    }

    #[tokio::test]
    async fn concurrent_requests_on_stale_token_exchange_once() {
        let transport = ScriptedTransport::new();
        let cred = credential();

        let (a, b) = tokio::join!(
            cred.ensure_access_token(&transport),
            cred.ensure_access_token(&transport)
        );
        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(transport.exchange_calls(), 1);
    }

    #[tokio::test]
    async fn ensure_access_token_failure_leaves_health_alone() {
        let transport = ScriptedTransport::new();
        transport.set_failing(true);
        let cred = credential();

        assert!(cred.ensure_access_token(&transport).await.is_err());
        let state = cred.state().await;
        assert_eq!(state.error_count, 0);
        assert!(!state.disabled);
    }

    #[tokio::test]
    async fn summary_masks_identity() {
        let cred = credential();
        let summary = cred.summary().await;
        assert_eq!(summary.id, format!("{}...", &cred.id()[..16]));
        assert!(summary.ready);
        assert!(!summary.has_access_token);
        assert!(summary.last_used.is_none());
    }
}
