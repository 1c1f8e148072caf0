//! Generation API
//!
//! - POST /v1/generate   run one image or video request
//! - GET  /v1/models     list supported model ids
//!
//! A non-streaming request returns a `GenerationResult` body with a status
//! code derived from the failure kind. A streaming request always answers 200
//! with server-sent `chat.completion.chunk` events, ending in `data: [DONE]`;
//! failures arrive as the final content chunk.

use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use flow_generation::chunk::CHUNK_MODEL;
use flow_generation::{GenerationError, GenerationRequest, GenerationResult, MODELS, Orchestrator};
use serde::Deserialize;
use tokio_stream::StreamExt;
use tracing::{info, warn};

use crate::metrics;

/// Request body cap: several base64 photos fit, unlike axum's 2 MB default.
pub const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

/// Body of POST /v1/generate.
#[derive(Debug, Deserialize)]
pub struct GenerateBody {
    pub model: String,
    pub prompt: String,
    /// Base64 images, optionally as `data:<mime>;base64,<payload>` URLs.
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub stream: bool,
}

/// Build the generation router.
pub fn build_generate_router(orchestrator: Arc<Orchestrator>) -> Router {
    Router::new()
        .route("/v1/generate", post(generate))
        .route("/v1/models", get(list_models))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(orchestrator)
}

/// HTTP status for a failed non-streaming generation.
pub fn error_status(error: &GenerationError) -> StatusCode {
    match error {
        GenerationError::UnsupportedModel(_) | GenerationError::Validation { .. } => {
            StatusCode::BAD_REQUEST
        }
        GenerationError::NoCredential => StatusCode::SERVICE_UNAVAILABLE,
        GenerationError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::BAD_GATEWAY,
    }
}

/// Decode one request image, accepting bare base64 or a data URL.
fn decode_image(encoded: &str) -> Option<Vec<u8>> {
    let payload = match encoded.strip_prefix("data:") {
        Some(rest) => rest.split_once(',')?.1,
        None => encoded,
    };
    STANDARD.decode(payload.trim()).ok()
}

fn failure(status: StatusCode, error: String) -> Response {
    let body = GenerationResult {
        success: false,
        kind: None,
        url: None,
        error: Some(error),
    };
    (status, axum::Json(body)).into_response()
}

/// POST /v1/generate
async fn generate(
    State(orchestrator): State<Arc<Orchestrator>>,
    axum::Json(body): axum::Json<GenerateBody>,
) -> Response {
    let started = Instant::now();
    let response = run(&orchestrator, body).await;
    metrics::record_request(
        "generate",
        response.status().as_u16(),
        started.elapsed().as_secs_f64(),
    );
    response
}

async fn run(orchestrator: &Arc<Orchestrator>, body: GenerateBody) -> Response {
    let mut images = Vec::with_capacity(body.images.len());
    for (i, encoded) in body.images.iter().enumerate() {
        match decode_image(encoded) {
            Some(bytes) => images.push(bytes),
            None => {
                return failure(
                    StatusCode::BAD_REQUEST,
                    format!("image {} is not valid base64", i + 1),
                );
            }
        }
    }

    let request = GenerationRequest {
        model: body.model,
        prompt: body.prompt,
        images,
    };
    info!(model = %request.model, images = request.images.len(), stream = body.stream, "generation request");

    if body.stream {
        return stream_response(orchestrator, request);
    }

    match orchestrator.generate(request, None).await {
        Ok(artifact) => (StatusCode::OK, axum::Json(GenerationResult::from(Ok(artifact)))).into_response(),
        Err(e) => {
            warn!(error = %e, kind = e.label(), "generation failed");
            failure(error_status(&e), e.to_string())
        }
    }
}

fn stream_response(orchestrator: &Arc<Orchestrator>, request: GenerationRequest) -> Response {
    let id = format!("chatcmpl-{}", uuid::Uuid::new_v4().as_simple());
    let created = chrono::Utc::now().timestamp();

    let events = orchestrator
        .generate_stream(request)
        .map(move |chunk| Event::default().json_data(chunk.to_completion(&id, created)))
        .chain(tokio_stream::once(Ok(Event::default().data("[DONE]"))));

    Sse::new(events)
        .keep_alive(KeepAlive::default())
        .into_response()
}

/// GET /v1/models
async fn list_models() -> impl IntoResponse {
    let data: Vec<serde_json::Value> = MODELS
        .iter()
        .map(|model| {
            let mut entry = serde_json::json!(model);
            entry["object"] = serde_json::json!("model");
            entry["owned_by"] = serde_json::json!(CHUNK_MODEL);
            entry
        })
        .collect();
    axum::Json(serde_json::json!({ "object": "list", "data": data }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{IMAGE_URL, StubTransport, VIDEO_URL, cookie, stub_pool};
    use axum::body::Body;
    use axum::http::Request;
    use flow_generation::OrchestratorConfig;
    use std::time::Duration;
    use tower::ServiceExt;

    async fn app_with(tokens: &[&str]) -> (Router, Arc<StubTransport>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        for token in tokens {
            std::fs::write(dir.path().join(format!("{token}.txt")), cookie(token)).unwrap();
        }
        let (pool, transport) = stub_pool(dir.path()).await;
        pool.load().await.unwrap();
        let config = OrchestratorConfig {
            poll_interval: Duration::from_millis(1),
            ..OrchestratorConfig::default()
        };
        let orchestrator = Arc::new(Orchestrator::new(pool, config));
        (build_generate_router(orchestrator), transport, dir)
    }

    fn post(body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/v1/generate")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_text(response: Response) -> String {
        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        String::from_utf8(body.to_vec()).unwrap()
    }

    #[test]
    fn decode_accepts_bare_and_data_url() {
        assert_eq!(decode_image("aGk=").unwrap(), b"hi");
        assert_eq!(decode_image("data:image/png;base64,aGk=").unwrap(), b"hi");
        assert!(decode_image("data:image/png;base64").is_none());
        assert!(decode_image("!!!").is_none());
    }

    #[test]
    fn status_per_failure_kind() {
        assert_eq!(
            error_status(&GenerationError::UnsupportedModel("x".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(error_status(&GenerationError::NoCredential), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(error_status(&GenerationError::Timeout(200)), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(error_status(&GenerationError::EmptyResult), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn image_request_returns_result() {
        let (app, _transport, _dir) = app_with(&["alice"]).await;

        let response = app
            .oneshot(post(serde_json::json!({
                "model": "gemini-2.5-flash-image-landscape",
                "prompt": "a lighthouse",
                "images": ["data:image/png;base64,aGk="],
            })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["type"], "image");
        assert_eq!(json["url"], IMAGE_URL);
    }

    #[tokio::test]
    async fn large_photo_fits_under_body_limit() {
        let (app, _transport, _dir) = app_with(&["alice"]).await;
        let photo = STANDARD.encode(vec![0u8; 3 * 1024 * 1024]);

        let response = app
            .oneshot(post(serde_json::json!({
                "model": "gemini-2.5-flash-image-landscape",
                "prompt": "a lighthouse",
                "images": [format!("data:image/jpeg;base64,{photo}")],
            })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn body_over_limit_is_rejected() {
        let (app, _transport, _dir) = app_with(&["alice"]).await;
        let photo = "A".repeat(MAX_BODY_BYTES + 1);

        let response = app
            .oneshot(post(serde_json::json!({
                "model": "gemini-2.5-flash-image-landscape",
                "prompt": "a lighthouse",
                "images": [photo],
            })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn unsupported_model_is_bad_request() {
        let (app, _transport, _dir) = app_with(&["alice"]).await;

        let response = app
            .oneshot(post(serde_json::json!({ "model": "gpt-4", "prompt": "hi" })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "unsupported model: gpt-4");
    }

    #[tokio::test]
    async fn empty_pool_is_unavailable() {
        let (app, _transport, _dir) = app_with(&[]).await;

        let response = app
            .oneshot(post(serde_json::json!({
                "model": "imagen-4.0-generate-preview-portrait",
                "prompt": "hi",
            })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn invalid_image_is_rejected_before_generation() {
        let (app, _transport, _dir) = app_with(&["alice"]).await;

        let response = app
            .oneshot(post(serde_json::json!({
                "model": "gemini-2.5-flash-image-landscape",
                "prompt": "hi",
                "images": ["aGk=", "not base64 at all"],
            })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(json["error"], "image 2 is not valid base64");
    }

    #[tokio::test]
    async fn stream_emits_chunks_then_done() {
        let (app, _transport, _dir) = app_with(&["alice"]).await;

        let response = app
            .oneshot(post(serde_json::json!({
                "model": "veo_3_1_t2v_fast_landscape",
                "prompt": "waves",
                "stream": true,
            })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[axum::http::header::CONTENT_TYPE],
            "text/event-stream"
        );
        let text = body_text(response).await;
        let events: Vec<&str> = text
            .lines()
            .filter_map(|line| line.strip_prefix("data: "))
            .collect();

        assert_eq!(events.last(), Some(&"[DONE]"));
        let chunks: Vec<serde_json::Value> = events[..events.len() - 1]
            .iter()
            .map(|data| serde_json::from_str(data).unwrap())
            .collect();
        assert!(chunks.len() >= 2, "progress before the terminal chunk");
        assert!(chunks.iter().all(|c| c["object"] == "chat.completion.chunk"));
        let id = &chunks[0]["id"];
        assert!(id.as_str().unwrap().starts_with("chatcmpl-"));
        assert!(chunks.iter().all(|c| &c["id"] == id));

        let last = chunks.last().unwrap();
        assert_eq!(last["choices"][0]["finish_reason"], "stop");
        let content = last["choices"][0]["delta"]["content"].as_str().unwrap();
        assert!(content.contains(VIDEO_URL));
    }

    #[tokio::test]
    async fn stream_failure_is_final_content_chunk() {
        let (app, transport, _dir) = app_with(&["alice"]).await;
        transport.reject_sessions();

        let response = app
            .oneshot(post(serde_json::json!({
                "model": "gemini-2.5-flash-image-portrait",
                "prompt": "hi",
                "stream": true,
            })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let text = body_text(response).await;
        let events: Vec<&str> = text
            .lines()
            .filter_map(|line| line.strip_prefix("data: "))
            .collect();
        assert_eq!(events.last(), Some(&"[DONE]"));
        let last: serde_json::Value = serde_json::from_str(events[events.len() - 2]).unwrap();
        assert_eq!(last["choices"][0]["finish_reason"], "stop");
        let content = last["choices"][0]["delta"]["content"].as_str().unwrap();
        assert!(content.starts_with("authentication failed"), "{content}");
    }

    #[tokio::test]
    async fn models_lists_every_entry() {
        let (app, _transport, _dir) = app_with(&[]).await;

        let response = app
            .oneshot(Request::builder().uri("/v1/models").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(json["object"], "list");
        let data = json["data"].as_array().unwrap();
        assert_eq!(data.len(), MODELS.len());
        assert!(data.iter().all(|m| m["object"] == "model"));
        assert!(data.iter().any(|m| m["id"] == "veo_3_1_i2v_s_fast_fl_portrait"));
    }
}
