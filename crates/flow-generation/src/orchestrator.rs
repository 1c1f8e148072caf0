//! Generation workflow driver
//!
//! One request runs strictly in order: model lookup, credential selection,
//! access token freshness, detached quota refresh, workspace ensure, then the
//! image or video branch. Video jobs are asynchronous upstream and are polled
//! a bounded number of times.
//!
//! Progress chunks go to an optional channel. A dropped receiver only stops
//! delivery; the upstream job keeps running to completion.

use std::sync::Arc;
use std::time::Duration;

use flow_client::constants::DEFAULT_PAYGATE_TIER;
use flow_client::{ImageJob, Transport, VideoJob, VideoSubmission, VideoTask};
use flow_pool::{Credential, Pool, now_millis};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use crate::chunk::{Artifact, ArtifactKind, Chunk};
use crate::error::{GenerationError, Result};
use crate::models::{self, ModelEntry, ModelKind, VideoKind};

/// Buffered chunks per streaming request.
const CHUNK_BUFFER: usize = 32;

/// Progress is reported on every Nth status check.
const PROGRESS_EVERY: u32 = 7;

/// Reported progress never reaches 100 before the artifact exists.
const PROGRESS_CAP: u64 = 95;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub max_poll_attempts: u32,
    pub poll_interval: Duration,
    /// Title of projects created for credentials that have none.
    pub workspace_name: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_poll_attempts: 200,
            poll_interval: Duration::from_secs(3),
            workspace_name: "Flow2API".to_string(),
        }
    }
}

/// One inbound generation request.
#[derive(Debug, Clone, Default)]
pub struct GenerationRequest {
    pub model: String,
    pub prompt: String,
    /// Raw image bytes in request order.
    pub images: Vec<Vec<u8>>,
}

/// Optional progress sink. Send failures mean the caller went away.
struct Progress<'a>(Option<&'a mpsc::Sender<Chunk>>);

impl Progress<'_> {
    async fn say(&self, text: impl Into<String>) {
        if let Some(tx) = self.0 {
            let _ = tx.send(Chunk::progress(text)).await;
        }
    }
}

/// Coarse poll progress: `min(attempt * 100 / max, 95)` with zero-based attempts.
pub fn poll_progress(attempt: u32, max_attempts: u32) -> u64 {
    if max_attempts == 0 {
        return 0;
    }
    (u64::from(attempt) * 100 / u64::from(max_attempts)).min(PROGRESS_CAP)
}

/// First frame plus optional last frame of a start/end video request.
fn start_end_frames<'a>(
    model: &str,
    images: &'a [Vec<u8>],
    min_images: usize,
    max_images: usize,
) -> Result<(&'a [u8], Option<&'a [u8]>)> {
    match images.split_first() {
        Some((start, rest)) => Ok((start, rest.first().map(Vec::as_slice))),
        None => Err(GenerationError::Validation {
            model: model.to_string(),
            min: min_images,
            max: max_images,
            got: 0,
        }),
    }
}

pub struct Orchestrator {
    pool: Arc<Pool>,
    transport: Arc<dyn Transport>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    /// Drive generations through the pool's own transport.
    pub fn new(pool: Arc<Pool>, config: OrchestratorConfig) -> Self {
        let transport = pool.transport().clone();
        Self {
            pool,
            transport,
            config,
        }
    }

    /// Run one request to completion, narrating into `progress` if given.
    pub async fn generate(
        &self,
        request: GenerationRequest,
        progress: Option<&mpsc::Sender<Chunk>>,
    ) -> Result<Artifact> {
        let kind_label = match models::lookup(&request.model).map(|m| m.kind) {
            Some(ModelKind::Image) => "image",
            Some(ModelKind::Video(_)) => "video",
            None => "none",
        };
        let outcome = self.run(request, Progress(progress)).await;
        let outcome_label = match &outcome {
            Ok(_) => "success",
            Err(e) => e.label(),
        };
        metrics::counter!("flow_generation_requests_total", "kind" => kind_label, "outcome" => outcome_label)
            .increment(1);
        outcome
    }

    /// Run one request in the background and stream its chunks.
    ///
    /// The stream always ends with a terminal chunk unless the consumer drops it first.
    pub fn generate_stream(self: &Arc<Self>, request: GenerationRequest) -> ReceiverStream<Chunk> {
        let (tx, rx) = mpsc::channel(CHUNK_BUFFER);
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let terminal = match this.generate(request, Some(&tx)).await {
                Ok(artifact) => Chunk::Complete(artifact),
                Err(e) => Chunk::Failed(e.to_string()),
            };
            if tx.send(terminal).await.is_err() {
                debug!("stream consumer gone before final chunk");
            }
        });
        ReceiverStream::new(rx)
    }

    async fn run(&self, request: GenerationRequest, progress: Progress<'_>) -> Result<Artifact> {
        let model = models::lookup(&request.model)
            .ok_or_else(|| GenerationError::UnsupportedModel(request.model.clone()))?;

        let credential = self
            .pool
            .select()
            .await
            .map_err(|_| GenerationError::NoCredential)?;

        let access_token = credential
            .ensure_access_token(self.transport.as_ref())
            .await
            .map_err(|e| {
                warn!(credential = %credential.masked_id(), error = %e, "access token exchange failed");
                GenerationError::Authentication(e.to_string())
            })?;

        self.spawn_quota_refresh(credential.clone(), access_token.clone());

        let workspace_id = self.ensure_workspace(&credential).await?;

        let ctx = JobContext {
            model,
            credential: &credential,
            access_token: &access_token,
            workspace_id: &workspace_id,
            progress: &progress,
        };
        let outcome = match model.kind {
            ModelKind::Image => self.generate_image(&ctx, request).await,
            ModelKind::Video(kind) => self.generate_video(&ctx, kind, request).await,
        };

        match &outcome {
            Ok(artifact) => {
                credential.state().await.record_success(now_millis());
                info!(credential = %credential.masked_id(), model = model.id, kind = artifact.kind.as_str(), "generation finished");
            }
            Err(e) if e.counts_against_credential() => {
                let errors = {
                    let mut state = credential.state().await;
                    state.record_failure();
                    state.error_count
                };
                warn!(credential = %credential.masked_id(), model = model.id, errors, error = %e, "generation failed");
            }
            Err(e) => {
                warn!(credential = %credential.masked_id(), model = model.id, error = %e, "generation failed");
            }
        }
        outcome
    }

    /// Refresh credits and tier without holding up the request.
    fn spawn_quota_refresh(&self, credential: Arc<Credential>, access_token: String) {
        let transport = self.transport.clone();
        tokio::spawn(async move {
            match transport.fetch_quota(&access_token).await {
                Ok(quota) => {
                    {
                        let mut state = credential.state().await;
                        state.credits = Some(quota.credits);
                        if quota.tier.is_some() {
                            state.tier = quota.tier.clone();
                        }
                    }
                    debug!(credential = %credential.masked_id(), credits = quota.credits, tier = ?quota.tier, "quota updated");
                }
                Err(e) => {
                    warn!(credential = %credential.masked_id(), error = %e, "quota query failed");
                }
            }
        });
    }

    /// Cached project for the credential, creating one on first use.
    async fn ensure_workspace(&self, credential: &Credential) -> Result<String> {
        let cached = credential.state().await.workspace_id.clone();
        if let Some(id) = cached {
            return Ok(id);
        }

        let created = self
            .transport
            .create_workspace(credential.secret(), &self.config.workspace_name)
            .await
            .map_err(|e| GenerationError::Workspace(e.to_string()))?;

        // A concurrent request may have created one meanwhile; keep the first
        let mut state = credential.state().await;
        let id = state.workspace_id.get_or_insert(created).clone();
        info!(credential = %credential.masked_id(), workspace = %id, "workspace ready");
        Ok(id)
    }

    async fn upload(&self, ctx: &JobContext<'_>, image: &[u8]) -> Result<String> {
        self.transport
            .upload_image(ctx.access_token, image, ctx.model.aspect_ratio)
            .await
            .map_err(|e| GenerationError::Upload(e.to_string()))
    }

    async fn generate_image(&self, ctx: &JobContext<'_>, request: GenerationRequest) -> Result<Artifact> {
        ctx.progress.say("✨ Image generation started\n").await;

        let total = request.images.len();
        let mut reference_media_ids = Vec::with_capacity(total);
        if total > 0 {
            ctx.progress
                .say(format!("Uploading {total} reference image(s)...\n"))
                .await;
            for (i, image) in request.images.iter().enumerate() {
                reference_media_ids.push(self.upload(ctx, image).await?);
                ctx.progress
                    .say(format!("Uploaded image {}/{total}\n", i + 1))
                    .await;
            }
        }

        ctx.progress.say("Generating image...\n").await;
        let url = self
            .transport
            .submit_image_job(ImageJob {
                access_token: ctx.access_token.to_string(),
                workspace_id: ctx.workspace_id.to_string(),
                prompt: request.prompt,
                model_name: ctx.model.upstream.to_string(),
                aspect_ratio: ctx.model.aspect_ratio.to_string(),
                reference_media_ids,
            })
            .await
            .map_err(|e| GenerationError::Submission(e.to_string()))?;

        if url.is_empty() {
            return Err(GenerationError::EmptyResult);
        }
        Ok(Artifact {
            kind: ArtifactKind::Image,
            url,
        })
    }

    async fn generate_video(
        &self,
        ctx: &JobContext<'_>,
        kind: VideoKind,
        request: GenerationRequest,
    ) -> Result<Artifact> {
        ctx.progress.say("✨ Video generation started\n").await;

        let mut images = request.images;
        match kind {
            VideoKind::TextToVideo if !images.is_empty() => {
                ctx.progress
                    .say("⚠️ Text-to-video models ignore images, using the prompt only\n")
                    .await;
                images.clear();
            }
            VideoKind::StartEnd {
                min_images,
                max_images,
            } if images.len() < min_images || images.len() > max_images => {
                return Err(GenerationError::Validation {
                    model: ctx.model.id.to_string(),
                    min: min_images,
                    max: max_images,
                    got: images.len(),
                });
            }
            _ => {}
        }

        let submission = match kind {
            VideoKind::TextToVideo => VideoSubmission::Text,
            VideoKind::StartEnd {
                min_images,
                max_images,
            } => {
                let (start, end) = start_end_frames(ctx.model.id, &images, min_images, max_images)?;
                ctx.progress.say("Uploading first frame...\n").await;
                let start_media_id = self.upload(ctx, start).await?;
                let end_media_id = match end {
                    Some(end) => {
                        ctx.progress.say("Uploading last frame...\n").await;
                        Some(self.upload(ctx, end).await?)
                    }
                    None => None,
                };
                VideoSubmission::StartEnd {
                    start_media_id,
                    end_media_id,
                }
            }
            VideoKind::Reference => {
                let mut media_ids = Vec::with_capacity(images.len());
                if !images.is_empty() {
                    ctx.progress
                        .say(format!("Uploading {} reference image(s)...\n", images.len()))
                        .await;
                    for image in &images {
                        media_ids.push(self.upload(ctx, image).await?);
                    }
                }
                VideoSubmission::Reference { media_ids }
            }
        };

        let tier = ctx
            .credential
            .state()
            .await
            .tier
            .clone()
            .unwrap_or_else(|| DEFAULT_PAYGATE_TIER.to_string());

        ctx.progress.say("Submitting video job...\n").await;
        let task = self
            .transport
            .submit_video_job(VideoJob {
                access_token: ctx.access_token.to_string(),
                workspace_id: ctx.workspace_id.to_string(),
                prompt: request.prompt,
                model_key: ctx.model.upstream.to_string(),
                aspect_ratio: ctx.model.aspect_ratio.to_string(),
                tier,
                submission,
            })
            .await
            .map_err(|e| GenerationError::Submission(e.to_string()))?;

        if task.task_id.is_empty() {
            return Err(GenerationError::Submission(
                "upstream returned no task id".to_string(),
            ));
        }
        debug!(credential = %ctx.credential.masked_id(), task = %task.task_id, "video job submitted");

        ctx.progress.say("Video generating...\n").await;
        let url = self.poll(ctx, &task).await?;
        Ok(Artifact {
            kind: ArtifactKind::Video,
            url,
        })
    }

    /// Poll a video job until it finishes, is rejected, or attempts run out.
    ///
    /// Each attempt sleeps first. Failed status queries use up an attempt and
    /// are otherwise ignored.
    async fn poll(&self, ctx: &JobContext<'_>, task: &VideoTask) -> Result<String> {
        let max = self.config.max_poll_attempts;
        for attempt in 0..max {
            tokio::time::sleep(self.config.poll_interval).await;
            metrics::counter!("flow_generation_poll_attempts_total").increment(1);

            let status = match self.transport.query_job_status(ctx.access_token, task).await {
                Ok(status) => status,
                Err(e) => {
                    debug!(task = %task.task_id, attempt, error = %e, "status query failed");
                    continue;
                }
            };

            if attempt % PROGRESS_EVERY == 0 {
                ctx.progress
                    .say(format!("Progress: {}%\n", poll_progress(attempt, max)))
                    .await;
            }

            if let Some(url) = status.finished_url() {
                return Ok(url.to_string());
            }
            if status.is_rejected() {
                return Err(GenerationError::Rejected(status.status));
            }
        }
        Err(GenerationError::Timeout(max))
    }
}

/// Per-request values shared by the branch steps.
struct JobContext<'a> {
    model: &'static ModelEntry,
    credential: &'a Credential,
    access_token: &'a str,
    workspace_id: &'a str,
    progress: &'a Progress<'a>,
}
