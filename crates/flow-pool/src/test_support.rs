//! Scripted transport and fixtures shared by the pool tests

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use flow_client::{
    AccessGrant, CredentialDir, Error, ImageJob, JobStatus, Quota, Result, Transport, VideoJob,
    VideoTask,
};
use futures_util::future::BoxFuture;

use crate::credential::now_millis;
use crate::pool::Pool;

/// Session exchange succeeds or fails on demand; everything else is unscripted.
#[derive(Debug, Default)]
pub(crate) struct ScriptedTransport {
    failing: AtomicBool,
    exchanges: AtomicUsize,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub(crate) fn exchange_calls(&self) -> usize {
        self.exchanges.load(Ordering::SeqCst)
    }
}

fn unscripted<T>() -> Result<T> {
    Err(Error::InvalidResponse("not scripted".into()))
}

impl Transport for ScriptedTransport {
    fn exchange_session<'a>(&'a self, _secret: &'a str) -> BoxFuture<'a, Result<AccessGrant>> {
        Box::pin(async move {
            let n = self.exchanges.fetch_add(1, Ordering::SeqCst);
            // Suspend like a real network call would
            tokio::task::yield_now().await;
            if self.failing.load(Ordering::SeqCst) {
                return Err(Error::Unauthorized("session expired".into()));
            }
            Ok(AccessGrant {
                access_token: format!("at-{n}"),
                expires_at_millis: Some(now_millis() + 3_600_000),
                email: Some("user@example.com".into()),
            })
        })
    }

    fn fetch_quota<'a>(&'a self, _access_token: &'a str) -> BoxFuture<'a, Result<Quota>> {
        Box::pin(async { unscripted() })
    }

    fn create_workspace<'a>(&'a self, _secret: &'a str, _name: &'a str) -> BoxFuture<'a, Result<String>> {
        Box::pin(async { unscripted() })
    }

    fn upload_image<'a>(
        &'a self,
        _access_token: &'a str,
        _image: &'a [u8],
        _aspect_ratio: &'a str,
    ) -> BoxFuture<'a, Result<String>> {
        Box::pin(async { unscripted() })
    }

    fn submit_image_job(&self, _job: ImageJob) -> BoxFuture<'_, Result<String>> {
        Box::pin(async { unscripted() })
    }

    fn submit_video_job(&self, _job: VideoJob) -> BoxFuture<'_, Result<VideoTask>> {
        Box::pin(async { unscripted() })
    }

    fn query_job_status<'a>(
        &'a self,
        _access_token: &'a str,
        _task: &'a VideoTask,
    ) -> BoxFuture<'a, Result<JobStatus>> {
        Box::pin(async { unscripted() })
    }
}

/// Cookie header carrying `token` as the session secret.
pub(crate) fn cookie(token: &str) -> String {
    format!("_ga=GA1.1; __Secure-next-auth.session-token={token}; theme=dark")
}

/// Pool over `dir` with a fresh scripted transport.
pub(crate) async fn pool_in(dir: &Path) -> (Pool, Arc<ScriptedTransport>) {
    let transport = Arc::new(ScriptedTransport::new());
    let store = CredentialDir::open(dir).await.unwrap();
    (Pool::new(store, transport.clone()), transport)
}
