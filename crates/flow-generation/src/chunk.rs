//! Generation outputs: artifacts, final results and streamed chunks
//!
//! Streaming callers receive progress narration chunks followed by exactly one
//! terminal chunk. The OpenAI `chat.completion.chunk` rendering puts narration
//! in `delta.reasoning_content` and the terminal text in `delta.content` with
//! `finish_reason = "stop"`.

use serde::Serialize;

use crate::error::GenerationError;

/// Model id reported in completion chunks.
pub const CHUNK_MODEL: &str = "flow2api";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Image,
    Video,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Image => "image",
            ArtifactKind::Video => "video",
        }
    }
}

/// A finished generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifact {
    #[serde(rename = "type")]
    pub kind: ArtifactKind,
    pub url: String,
}

impl Artifact {
    /// Markup embedding the artifact in a chat message.
    pub fn markup(&self) -> String {
        match self.kind {
            ArtifactKind::Image => format!("![Generated Image]({})", self.url),
            ArtifactKind::Video => format!(
                "<video src='{}' controls style='max-width:100%'></video>",
                self.url
            ),
        }
    }
}

/// Non-streaming response body.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationResult {
    pub success: bool,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<ArtifactKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<Result<Artifact, GenerationError>> for GenerationResult {
    fn from(outcome: Result<Artifact, GenerationError>) -> Self {
        match outcome {
            Ok(artifact) => Self {
                success: true,
                kind: Some(artifact.kind),
                url: Some(artifact.url),
                error: None,
            },
            Err(e) => Self {
                success: false,
                kind: None,
                url: None,
                error: Some(e.to_string()),
            },
        }
    }
}

/// One streamed event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunk {
    /// Free-text narration.
    Progress(String),
    /// Terminal: the finished artifact.
    Complete(Artifact),
    /// Terminal: the request failed.
    Failed(String),
}

impl Chunk {
    pub fn progress(text: impl Into<String>) -> Self {
        Chunk::Progress(text.into())
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Chunk::Progress(_))
    }

    /// Render as an OpenAI `chat.completion.chunk`.
    pub fn to_completion(&self, id: &str, created: i64) -> CompletionChunk {
        let (delta, finish_reason) = match self {
            Chunk::Progress(text) => (
                Delta {
                    content: None,
                    reasoning_content: Some(text.clone()),
                },
                None,
            ),
            Chunk::Complete(artifact) => (
                Delta {
                    content: Some(artifact.markup()),
                    reasoning_content: None,
                },
                Some("stop"),
            ),
            Chunk::Failed(error) => (
                Delta {
                    content: Some(error.clone()),
                    reasoning_content: None,
                },
                Some("stop"),
            ),
        };
        CompletionChunk {
            id: id.to_string(),
            object: "chat.completion.chunk",
            created,
            model: CHUNK_MODEL,
            choices: vec![Choice {
                index: 0,
                delta,
                finish_reason,
            }],
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CompletionChunk {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub model: &'static str,
    pub choices: Vec<Choice>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Choice {
    pub index: u32,
    pub delta: Delta,
    pub finish_reason: Option<&'static str>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Delta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
}
