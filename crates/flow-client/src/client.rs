//! HTTP implementation of the Flow transport
//!
//! Two hosts are involved: the labs site, authorized by the session cookie
//! (session exchange, project creation), and the sandbox API, authorized by the
//! short-lived bearer token (uploads, generation, status). Response parsing is
//! split into pure functions so the field paths are covered by unit tests.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures_util::future::BoxFuture;
use serde_json::{Value, json};
use tracing::debug;

use crate::constants::{
    CREATE_PROJECT_PATH, CREDITS_PATH, DEFAULT_API_BASE_URL, DEFAULT_LABS_BASE_URL,
    PROJECT_TOOL_NAME, SESSION_COOKIE, SESSION_PATH, UPLOAD_IMAGE_PATH, USER_AGENT,
    VIDEO_REFERENCE_PATH, VIDEO_START_END_PATH, VIDEO_START_PATH, VIDEO_STATUS_PATH,
    VIDEO_TEXT_PATH,
};
use crate::error::{Error, Result};
use crate::transport::{
    AccessGrant, ImageJob, JobStatus, Quota, Transport, VideoJob, VideoSubmission, VideoTask,
};

/// Connection settings for `FlowClient`.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub labs_base_url: String,
    pub api_base_url: String,
    pub timeout: Duration,
    /// Optional outbound proxy URL applied to all requests.
    pub proxy: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            labs_base_url: DEFAULT_LABS_BASE_URL.to_string(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            timeout: Duration::from_secs(120),
            proxy: None,
        }
    }
}

/// reqwest-backed `Transport`. Cheap to clone; clones share the connection pool.
#[derive(Clone)]
pub struct FlowClient {
    http: reqwest::Client,
    labs_base_url: String,
    api_base_url: String,
}

impl FlowClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(USER_AGENT);
        if let Some(proxy) = &config.proxy {
            let proxy = reqwest::Proxy::all(proxy)
                .map_err(|e| Error::Http(format!("invalid proxy {proxy}: {e}")))?;
            builder = builder.proxy(proxy);
        }
        let http = builder
            .build()
            .map_err(|e| Error::Http(format!("building HTTP client: {e}")))?;

        Ok(Self {
            http,
            labs_base_url: config.labs_base_url.trim_end_matches('/').to_string(),
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
        })
    }

    fn labs_url(&self, path: &str) -> String {
        format!("{}{}", self.labs_base_url, path)
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.api_base_url, path)
    }

    fn session_cookie(secret: &str) -> String {
        format!("{SESSION_COOKIE}={secret}")
    }

    /// Send a request and decode a JSON body, mapping non-2xx statuses.
    async fn send_json(request: reqwest::RequestBuilder) -> Result<Value> {
        let response = request
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<no body>"));
            if status.as_u16() == 401 || status.as_u16() == 403 {
                return Err(Error::Unauthorized(format!("{status}: {body}")));
            }
            return Err(Error::Status {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| Error::InvalidResponse(format!("decoding JSON: {e}")))
    }
}

fn client_context(workspace_id: Option<&str>, tier: Option<&str>, tool: &str) -> Value {
    let mut ctx = json!({
        "sessionId": format!(";{}", uuid::Uuid::new_v4().as_simple()),
        "tool": tool,
    });
    if let Some(ws) = workspace_id {
        ctx["projectId"] = Value::String(ws.to_string());
    }
    if let Some(tier) = tier {
        ctx["userPaygateTier"] = Value::String(tier.to_string());
    }
    ctx
}

/// Sniff the image MIME type from magic bytes. Defaults to JPEG.
pub fn image_mime(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
        "image/png"
    } else if bytes.starts_with(b"GIF8") {
        "image/gif"
    } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        "image/webp"
    } else {
        "image/jpeg"
    }
}

/// Uploads always use the image form of the aspect ratio enum.
fn upload_aspect_ratio(aspect_ratio: &str) -> String {
    aspect_ratio.replace("VIDEO_ASPECT_RATIO_", "IMAGE_ASPECT_RATIO_")
}

fn str_at<'v>(value: &'v Value, pointer: &str) -> Option<&'v str> {
    value.pointer(pointer).and_then(Value::as_str)
}

pub(crate) fn parse_session(body: &Value) -> Result<AccessGrant> {
    let access_token = str_at(body, "/access_token")
        .filter(|t| !t.is_empty())
        .ok_or_else(|| Error::Unauthorized("session response has no access_token".into()))?;

    let expires_at_millis = str_at(body, "/expires").and_then(|s| {
        chrono::DateTime::parse_from_rfc3339(s)
            .ok()
            .and_then(|t| u64::try_from(t.timestamp_millis()).ok())
    });

    Ok(AccessGrant {
        access_token: access_token.to_string(),
        expires_at_millis,
        email: str_at(body, "/user/email").map(String::from),
    })
}

pub(crate) fn parse_quota(body: &Value) -> Result<Quota> {
    let credits = body
        .get("credits")
        .and_then(Value::as_i64)
        .ok_or_else(|| Error::InvalidResponse("credits missing".into()))?;
    Ok(Quota {
        credits,
        tier: str_at(body, "/userPaygateTier").map(String::from),
    })
}

pub(crate) fn parse_project_id(body: &Value) -> Result<String> {
    str_at(body, "/result/data/json/result/projectId")
        .filter(|id| !id.is_empty())
        .map(String::from)
        .ok_or_else(|| Error::InvalidResponse("projectId missing".into()))
}

pub(crate) fn parse_media_id(body: &Value) -> Result<String> {
    str_at(body, "/mediaGenerationId/mediaGenerationId")
        .filter(|id| !id.is_empty())
        .map(String::from)
        .ok_or_else(|| Error::InvalidResponse("mediaGenerationId missing".into()))
}

/// First generated image URL, or an empty string when upstream produced none.
pub(crate) fn parse_image_url(body: &Value) -> String {
    body.get("media")
        .and_then(Value::as_array)
        .and_then(|media| {
            media
                .iter()
                .find_map(|m| str_at(m, "/image/generatedImage/fifeUrl"))
        })
        .unwrap_or_default()
        .to_string()
}

pub(crate) fn parse_video_task(body: &Value) -> Result<VideoTask> {
    let op = body
        .pointer("/operations/0")
        .ok_or_else(|| Error::InvalidResponse("operations missing".into()))?;
    Ok(VideoTask {
        task_id: str_at(op, "/operation/name").unwrap_or_default().to_string(),
        scene_id: str_at(op, "/sceneId").unwrap_or_default().to_string(),
    })
}

pub(crate) fn parse_job_status(body: &Value) -> Result<JobStatus> {
    let op = body
        .pointer("/operations/0")
        .ok_or_else(|| Error::InvalidResponse("operations missing".into()))?;
    Ok(JobStatus {
        status: str_at(op, "/status").unwrap_or_default().to_string(),
        artifact_url: str_at(op, "/operation/metadata/video/fifeUrl").map(String::from),
    })
}

fn video_request_body(job: &VideoJob) -> (&'static str, Value) {
    let mut request = json!({
        "aspectRatio": job.aspect_ratio,
        "textInput": { "prompt": job.prompt },
        "videoModelKey": job.model_key,
        "metadata": { "sceneId": uuid::Uuid::new_v4().to_string() },
    });

    let path = match &job.submission {
        VideoSubmission::Text => VIDEO_TEXT_PATH,
        VideoSubmission::StartEnd {
            start_media_id,
            end_media_id,
        } => {
            request["startImage"] = json!({ "mediaId": start_media_id });
            match end_media_id {
                Some(end) => {
                    request["endImage"] = json!({ "mediaId": end });
                    VIDEO_START_END_PATH
                }
                None => VIDEO_START_PATH,
            }
        }
        VideoSubmission::Reference { media_ids } => {
            request["referenceImages"] = Value::Array(
                media_ids
                    .iter()
                    .map(|id| json!({ "imageUsageType": "IMAGE_USAGE_TYPE_ASSET", "mediaId": id }))
                    .collect(),
            );
            VIDEO_REFERENCE_PATH
        }
    };

    let body = json!({
        "clientContext": client_context(Some(&job.workspace_id), Some(&job.tier), PROJECT_TOOL_NAME),
        "requests": [request],
    });
    (path, body)
}

impl Transport for FlowClient {
    fn exchange_session<'a>(&'a self, secret: &'a str) -> BoxFuture<'a, Result<AccessGrant>> {
        Box::pin(async move {
            let body = Self::send_json(
                self.http
                    .get(self.labs_url(SESSION_PATH))
                    .header(reqwest::header::COOKIE, Self::session_cookie(secret)),
            )
            .await?;
            parse_session(&body)
        })
    }

    fn fetch_quota<'a>(&'a self, access_token: &'a str) -> BoxFuture<'a, Result<Quota>> {
        Box::pin(async move {
            let body =
                Self::send_json(self.http.get(self.api_url(CREDITS_PATH)).bearer_auth(access_token))
                    .await?;
            parse_quota(&body)
        })
    }

    fn create_workspace<'a>(
        &'a self,
        secret: &'a str,
        name: &'a str,
    ) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let body = Self::send_json(
                self.http
                    .post(self.labs_url(CREATE_PROJECT_PATH))
                    .header(reqwest::header::COOKIE, Self::session_cookie(secret))
                    .json(&json!({
                        "json": { "projectTitle": name, "toolName": PROJECT_TOOL_NAME }
                    })),
            )
            .await?;
            let id = parse_project_id(&body)?;
            debug!(workspace_id = %id, "created project");
            Ok(id)
        })
    }

    fn upload_image<'a>(
        &'a self,
        access_token: &'a str,
        image: &'a [u8],
        aspect_ratio: &'a str,
    ) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let body = json!({
                "imageInput": {
                    "rawImageBytes": STANDARD.encode(image),
                    "mimeType": image_mime(image),
                    "isUserUploaded": true,
                    "aspectRatio": upload_aspect_ratio(aspect_ratio),
                },
                "clientContext": client_context(None, None, "ASSET_MANAGER"),
            });
            let response = Self::send_json(
                self.http
                    .post(self.api_url(UPLOAD_IMAGE_PATH))
                    .bearer_auth(access_token)
                    .json(&body),
            )
            .await?;
            parse_media_id(&response)
        })
    }

    fn submit_image_job(&self, job: ImageJob) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            let inputs: Vec<Value> = job
                .reference_media_ids
                .iter()
                .map(|id| json!({ "name": id, "imageInputType": "IMAGE_INPUT_TYPE_REFERENCE" }))
                .collect();
            let body = json!({
                "clientContext": client_context(Some(&job.workspace_id), None, PROJECT_TOOL_NAME),
                "requests": [{
                    "imageModelName": job.model_name,
                    "imageAspectRatio": job.aspect_ratio,
                    "prompt": job.prompt,
                    "imageInputs": inputs,
                }],
            });
            let path = format!(
                "/v1/projects/{}/flowMedia:batchGenerateImages",
                job.workspace_id
            );
            let response = Self::send_json(
                self.http
                    .post(self.api_url(&path))
                    .bearer_auth(&job.access_token)
                    .json(&body),
            )
            .await?;
            Ok(parse_image_url(&response))
        })
    }

    fn submit_video_job(&self, job: VideoJob) -> BoxFuture<'_, Result<VideoTask>> {
        Box::pin(async move {
            let (path, body) = video_request_body(&job);
            let response = Self::send_json(
                self.http
                    .post(self.api_url(path))
                    .bearer_auth(&job.access_token)
                    .json(&body),
            )
            .await?;
            parse_video_task(&response)
        })
    }

    fn query_job_status<'a>(
        &'a self,
        access_token: &'a str,
        task: &'a VideoTask,
    ) -> BoxFuture<'a, Result<JobStatus>> {
        Box::pin(async move {
            let body = json!({
                "operations": [{
                    "operation": { "name": task.task_id },
                    "sceneId": task.scene_id,
                }]
            });
            let response = Self::send_json(
                self.http
                    .post(self.api_url(VIDEO_STATUS_PATH))
                    .bearer_auth(access_token)
                    .json(&body),
            )
            .await?;
            parse_job_status(&response)
        })
    }
}
