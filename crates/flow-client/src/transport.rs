//! Transport contract consumed by the pool and the generation orchestrator
//!
//! Only the fields the core depends on are modelled. `FlowClient` is the
//! production implementation; tests substitute scripted fakes.
//!
//! Uses `BoxFuture` return types for dyn-compatibility (`Arc<dyn Transport>`).

use futures_util::future::BoxFuture;

use crate::error::Result;

/// Job status reported when a video finished successfully.
pub const STATUS_SUCCESSFUL: &str = "MEDIA_GENERATION_STATUS_SUCCESSFUL";

/// Job statuses that end polling with a rejection.
pub const TERMINAL_ERROR_STATUSES: &[&str] = &[
    "MEDIA_GENERATION_STATUS_ERROR_UNKNOWN",
    "MEDIA_GENERATION_STATUS_ERROR_NSFW",
    "MEDIA_GENERATION_STATUS_ERROR_PERSON",
    "MEDIA_GENERATION_STATUS_ERROR_SAFETY",
];

/// Short-lived access material obtained from a session secret.
#[derive(Debug, Clone)]
pub struct AccessGrant {
    pub access_token: String,
    /// Unix timestamp in milliseconds; `None` when upstream omitted it.
    pub expires_at_millis: Option<u64>,
    pub email: Option<String>,
}

/// Remaining credits and paygate tier for an account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quota {
    pub credits: i64,
    pub tier: Option<String>,
}

/// Synchronous image generation call.
#[derive(Debug, Clone)]
pub struct ImageJob {
    pub access_token: String,
    pub workspace_id: String,
    pub prompt: String,
    pub model_name: String,
    pub aspect_ratio: String,
    /// Uploaded reference images, in request order.
    pub reference_media_ids: Vec<String>,
}

/// The three mutually exclusive video submission shapes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoSubmission {
    /// Text only.
    Text,
    /// First frame, optionally a last frame.
    StartEnd {
        start_media_id: String,
        end_media_id: Option<String>,
    },
    /// Any number of reference assets.
    Reference { media_ids: Vec<String> },
}

/// Asynchronous video generation call.
#[derive(Debug, Clone)]
pub struct VideoJob {
    pub access_token: String,
    pub workspace_id: String,
    pub prompt: String,
    pub model_key: String,
    pub aspect_ratio: String,
    pub tier: String,
    pub submission: VideoSubmission,
}

/// Handle on a submitted video job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoTask {
    pub task_id: String,
    pub scene_id: String,
}

/// One status query result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobStatus {
    pub status: String,
    pub artifact_url: Option<String>,
}

impl JobStatus {
    /// Successful with a usable artifact URL.
    pub fn finished_url(&self) -> Option<&str> {
        if self.status != STATUS_SUCCESSFUL {
            return None;
        }
        self.artifact_url.as_deref().filter(|url| !url.is_empty())
    }

    /// One of the unrecoverable error statuses.
    pub fn is_rejected(&self) -> bool {
        TERMINAL_ERROR_STATUSES.contains(&self.status.as_str())
    }
}

/// Authenticated operations against the Flow service.
///
/// Implementations must be safe for concurrent use by many workflows;
/// connection pooling is their concern.
pub trait Transport: Send + Sync {
    /// Trade a session secret for an access token.
    fn exchange_session<'a>(&'a self, secret: &'a str) -> BoxFuture<'a, Result<AccessGrant>>;

    /// Current credits and tier for the account behind an access token.
    fn fetch_quota<'a>(&'a self, access_token: &'a str) -> BoxFuture<'a, Result<Quota>>;

    /// Create a project; returns its identifier.
    fn create_workspace<'a>(
        &'a self,
        secret: &'a str,
        name: &'a str,
    ) -> BoxFuture<'a, Result<String>>;

    /// Upload one image; returns the media identifier.
    fn upload_image<'a>(
        &'a self,
        access_token: &'a str,
        image: &'a [u8],
        aspect_ratio: &'a str,
    ) -> BoxFuture<'a, Result<String>>;

    /// Generate an image; returns the result URL (may be empty).
    fn submit_image_job(&self, job: ImageJob) -> BoxFuture<'_, Result<String>>;

    /// Start a video job.
    fn submit_video_job(&self, job: VideoJob) -> BoxFuture<'_, Result<VideoTask>>;

    /// Query a video job's status.
    fn query_job_status<'a>(
        &'a self,
        access_token: &'a str,
        task: &'a VideoTask,
    ) -> BoxFuture<'a, Result<JobStatus>>;
}
