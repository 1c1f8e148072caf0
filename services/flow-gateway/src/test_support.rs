//! Stub upstream and pool fixtures for router tests

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use flow_client::constants::DEFAULT_PAYGATE_TIER;
use flow_client::transport::STATUS_SUCCESSFUL;
use flow_client::{
    AccessGrant, CredentialDir, Error, ImageJob, JobStatus, Quota, Result, Transport, VideoJob,
    VideoTask,
};
use flow_pool::Pool;
use futures_util::future::BoxFuture;

pub(crate) const IMAGE_URL: &str = "https://cdn.example/img.png";
pub(crate) const VIDEO_URL: &str = "https://cdn.example/clip.mp4";

/// Upstream that always succeeds immediately unless told to reject sessions.
#[derive(Debug, Default)]
pub(crate) struct StubTransport {
    reject_sessions: AtomicBool,
}

impl StubTransport {
    pub(crate) fn reject_sessions(&self) {
        self.reject_sessions.store(true, Ordering::SeqCst);
    }
}

impl Transport for StubTransport {
    fn exchange_session<'a>(&'a self, _secret: &'a str) -> BoxFuture<'a, Result<AccessGrant>> {
        Box::pin(async move {
            if self.reject_sessions.load(Ordering::SeqCst) {
                return Err(Error::Unauthorized("session expired".into()));
            }
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64;
            Ok(AccessGrant {
                access_token: "at-stub".into(),
                expires_at_millis: Some(now + 3_600_000),
                email: Some("user@example.com".into()),
            })
        })
    }

    fn fetch_quota<'a>(&'a self, _access_token: &'a str) -> BoxFuture<'a, Result<Quota>> {
        Box::pin(async {
            Ok(Quota {
                credits: 100,
                tier: Some(DEFAULT_PAYGATE_TIER.into()),
            })
        })
    }

    fn create_workspace<'a>(&'a self, _secret: &'a str, _name: &'a str) -> BoxFuture<'a, Result<String>> {
        Box::pin(async { Ok("workspace-1".to_string()) })
    }

    fn upload_image<'a>(
        &'a self,
        _access_token: &'a str,
        _image: &'a [u8],
        _aspect_ratio: &'a str,
    ) -> BoxFuture<'a, Result<String>> {
        Box::pin(async { Ok("media-1".to_string()) })
    }

    fn submit_image_job(&self, _job: ImageJob) -> BoxFuture<'_, Result<String>> {
        Box::pin(async { Ok(IMAGE_URL.to_string()) })
    }

    fn submit_video_job(&self, _job: VideoJob) -> BoxFuture<'_, Result<VideoTask>> {
        Box::pin(async {
            Ok(VideoTask {
                task_id: "task-1".into(),
                scene_id: "scene-1".into(),
            })
        })
    }

    fn query_job_status<'a>(
        &'a self,
        _access_token: &'a str,
        _task: &'a VideoTask,
    ) -> BoxFuture<'a, Result<JobStatus>> {
        Box::pin(async {
            Ok(JobStatus {
                status: STATUS_SUCCESSFUL.into(),
                artifact_url: Some(VIDEO_URL.into()),
            })
        })
    }
}

/// Cookie header carrying `token` as the session secret.
pub(crate) fn cookie(token: &str) -> String {
    format!("_ga=GA1.1; __Secure-next-auth.session-token={token}; theme=dark")
}

/// Pool over `dir` backed by a fresh stub transport.
pub(crate) async fn stub_pool(dir: &Path) -> (Arc<Pool>, Arc<StubTransport>) {
    let transport = Arc::new(StubTransport::default());
    let store = CredentialDir::open(dir).await.unwrap();
    (Arc::new(Pool::new(store, transport.clone())), transport)
}
