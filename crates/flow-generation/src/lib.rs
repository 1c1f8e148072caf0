//! Image and video generation on top of the credential pool
//!
//! `Orchestrator` takes a request for a model from the static table in
//! `models`, borrows a credential from the pool, and drives the upstream
//! workflow to a finished `Artifact`. Streaming callers get a sequence of
//! `Chunk`s ending in exactly one terminal chunk.

pub mod chunk;
pub mod error;
pub mod models;
pub mod orchestrator;

#[cfg(test)]
pub(crate) mod test_support;

pub use chunk::{Artifact, ArtifactKind, Chunk, CompletionChunk, GenerationResult};
pub use error::{GenerationError, Result};
pub use models::{MODELS, ModelEntry, ModelKind, VideoKind};
pub use orchestrator::{GenerationRequest, Orchestrator, OrchestratorConfig, poll_progress};
