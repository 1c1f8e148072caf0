//! Periodic background token refresh
//!
//! Keeps every credential's access token ahead of expiry so the request path
//! rarely has to exchange a session secret itself. The cycle is also the only
//! way a disabled credential comes back: a successful refresh clears its errors.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::credential::now_millis;
use crate::pool::Pool;

impl Pool {
    /// Spawn the refresh loop. It runs every `interval` until `stop()`.
    pub fn start_refresh_worker(self: &Arc<Self>, interval: Duration) {
        let pool = Arc::clone(self);
        let mut shutdown = self.shutdown.subscribe();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // Skip the immediate first tick, credentials were just loaded
            ticker.tick().await;

            loop {
                if *shutdown.borrow_and_update() {
                    break;
                }
                tokio::select! {
                    _ = ticker.tick() => {
                        pool.refresh_cycle().await;
                    }
                    _ = shutdown.changed() => break,
                }
            }
            debug!("refresh worker exited");
        });

        self.track(handle);
        info!(interval_secs = interval.as_secs(), "refresh worker started");
    }

    /// Refresh every credential whose token is stale or whose health is bad.
    ///
    /// Returns how many refreshes were attempted.
    pub async fn refresh_cycle(&self) -> usize {
        let mut attempted = 0;
        for credential in self.sorted_credentials().await {
            let due = {
                let state = credential.state().await;
                state.needs_refresh(now_millis()) || !state.is_ready()
            };
            if !due {
                continue;
            }
            attempted += 1;
            // Failures are recorded on the credential
            let _ = credential.refresh(self.transport.as_ref()).await;
        }
        if attempted > 0 {
            debug!(attempted, "refresh cycle finished");
        }
        attempted
    }
}
