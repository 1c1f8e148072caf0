//! Scriptable transport for orchestrator tests

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use flow_client::{
    AccessGrant, CredentialDir, Error, ImageJob, JobStatus, Quota, Result, Transport, VideoJob,
    VideoTask,
};
use flow_pool::{Pool, now_millis};
use futures_util::future::BoxFuture;
use tempfile::TempDir;
use tokio::time::Instant;

use crate::orchestrator::{Orchestrator, OrchestratorConfig};

const ACTIVE: &str = "MEDIA_GENERATION_STATUS_ACTIVE";

#[derive(Debug, Default)]
pub(crate) struct Calls {
    exchanges: AtomicUsize,
    workspaces: AtomicUsize,
    uploads: AtomicUsize,
    video_submissions: AtomicUsize,
}

impl Calls {
    pub(crate) fn exchanges(&self) -> usize {
        self.exchanges.load(Ordering::SeqCst)
    }

    pub(crate) fn workspaces(&self) -> usize {
        self.workspaces.load(Ordering::SeqCst)
    }

    pub(crate) fn uploads(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    pub(crate) fn video_submissions(&self) -> usize {
        self.video_submissions.load(Ordering::SeqCst)
    }
}

/// Succeeds at everything unless told otherwise.
///
/// Image jobs return an empty URL until `set_image_url`; status queries pop
/// from a script and report an active job once it runs out.
#[derive(Debug, Default)]
pub(crate) struct FakeTransport {
    pub(crate) calls: Calls,
    fail_exchange: AtomicBool,
    fail_workspace: AtomicBool,
    fail_uploads: AtomicBool,
    fail_submissions: AtomicBool,
    fail_status_queries: AtomicBool,
    image_url: Mutex<String>,
    statuses: Mutex<VecDeque<JobStatus>>,
    status_queries: Mutex<Vec<Instant>>,
    image_jobs: Mutex<Vec<ImageJob>>,
    video_jobs: Mutex<Vec<VideoJob>>,
}

impl FakeTransport {
    pub(crate) fn fail_exchange(&self) {
        self.fail_exchange.store(true, Ordering::SeqCst);
    }

    pub(crate) fn fail_workspace(&self) {
        self.fail_workspace.store(true, Ordering::SeqCst);
    }

    pub(crate) fn fail_uploads(&self) {
        self.fail_uploads.store(true, Ordering::SeqCst);
    }

    pub(crate) fn fail_submissions(&self) {
        self.fail_submissions.store(true, Ordering::SeqCst);
    }

    pub(crate) fn fail_status_queries(&self) {
        self.fail_status_queries.store(true, Ordering::SeqCst);
    }

    pub(crate) fn set_image_url(&self, url: &str) {
        *self.image_url.lock().unwrap() = url.to_string();
    }

    pub(crate) fn push_statuses(&self, statuses: impl IntoIterator<Item = JobStatus>) {
        self.statuses.lock().unwrap().extend(statuses);
    }

    pub(crate) fn status_query_times(&self) -> Vec<Instant> {
        self.status_queries.lock().unwrap().clone()
    }

    pub(crate) fn last_image_job(&self) -> Option<ImageJob> {
        self.image_jobs.lock().unwrap().last().cloned()
    }

    pub(crate) fn last_video_job(&self) -> Option<VideoJob> {
        self.video_jobs.lock().unwrap().last().cloned()
    }
}

fn upstream_error() -> Error {
    Error::Status {
        status: 500,
        body: "internal".into(),
    }
}

impl Transport for FakeTransport {
    fn exchange_session<'a>(&'a self, _secret: &'a str) -> BoxFuture<'a, Result<AccessGrant>> {
        Box::pin(async move {
            self.calls.exchanges.fetch_add(1, Ordering::SeqCst);
            if self.fail_exchange.load(Ordering::SeqCst) {
                return Err(Error::Unauthorized("session expired".into()));
            }
            Ok(AccessGrant {
                access_token: "access-token".into(),
                expires_at_millis: Some(now_millis() + 3_600_000),
                email: Some("user@example.com".into()),
            })
        })
    }

    fn fetch_quota<'a>(&'a self, _access_token: &'a str) -> BoxFuture<'a, Result<Quota>> {
        Box::pin(async {
            Ok(Quota {
                credits: 1000,
                tier: Some("PAYGATE_TIER_ONE".into()),
            })
        })
    }

    fn create_workspace<'a>(&'a self, _secret: &'a str, _name: &'a str) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let n = self.calls.workspaces.fetch_add(1, Ordering::SeqCst);
            if self.fail_workspace.load(Ordering::SeqCst) {
                return Err(upstream_error());
            }
            Ok(format!("workspace-{}", n + 1))
        })
    }

    fn upload_image<'a>(
        &'a self,
        _access_token: &'a str,
        _image: &'a [u8],
        _aspect_ratio: &'a str,
    ) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let n = self.calls.uploads.fetch_add(1, Ordering::SeqCst);
            if self.fail_uploads.load(Ordering::SeqCst) {
                return Err(upstream_error());
            }
            Ok(format!("media-{n}"))
        })
    }

    fn submit_image_job(&self, job: ImageJob) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            self.image_jobs.lock().unwrap().push(job);
            if self.fail_submissions.load(Ordering::SeqCst) {
                return Err(upstream_error());
            }
            Ok(self.image_url.lock().unwrap().clone())
        })
    }

    fn submit_video_job(&self, job: VideoJob) -> BoxFuture<'_, Result<VideoTask>> {
        Box::pin(async move {
            self.calls.video_submissions.fetch_add(1, Ordering::SeqCst);
            self.video_jobs.lock().unwrap().push(job);
            if self.fail_submissions.load(Ordering::SeqCst) {
                return Err(upstream_error());
            }
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
        Box::pin(async move {
            self.status_queries.lock().unwrap().push(Instant::now());
            if self.fail_status_queries.load(Ordering::SeqCst) {
                return Err(Error::Http("connection reset".into()));
            }
            let next = self.statuses.lock().unwrap().pop_front();
            Ok(next.unwrap_or_else(|| JobStatus {
                status: ACTIVE.into(),
                artifact_url: None,
            }))
        })
    }
}

/// Orchestrator over a pool holding one credential per token.
pub(crate) async fn orchestrator_with(
    transport: Arc<FakeTransport>,
    tokens: &[&str],
    config: OrchestratorConfig,
) -> (Orchestrator, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    for token in tokens {
        std::fs::write(
            dir.path().join(format!("{token}.txt")),
            format!("__Secure-next-auth.session-token={token}"),
        )
        .unwrap();
    }
    let store = CredentialDir::open(dir.path()).await.unwrap();
    let pool = Pool::new(store, transport);
    pool.load().await.unwrap();
    (Orchestrator::new(Arc::new(pool), config), dir)
}
