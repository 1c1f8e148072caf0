//! Request-level failures of a generation workflow

/// Everything a single generation request can fail with.
///
/// None of these are fatal to the process or to other requests.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    #[error("unsupported model: {0}")]
    UnsupportedModel(String),

    #[error("no credential available")]
    NoCredential,

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("workspace creation failed: {0}")]
    Workspace(String),

    #[error("image upload failed: {0}")]
    Upload(String),

    #[error("model {model} takes {min}-{max} images, got {got}")]
    Validation {
        model: String,
        min: usize,
        max: usize,
        got: usize,
    },

    #[error("job submission failed: {0}")]
    Submission(String),

    #[error("generation returned an empty result")]
    EmptyResult,

    #[error("generation timed out after {0} status checks")]
    Timeout(u32),

    #[error("generation rejected: {0}")]
    Rejected(String),
}

impl GenerationError {
    /// Metric label for this failure.
    pub fn label(&self) -> &'static str {
        match self {
            GenerationError::UnsupportedModel(_) => "unsupported_model",
            GenerationError::NoCredential => "no_credential",
            GenerationError::Authentication(_) => "authentication",
            GenerationError::Workspace(_) => "workspace",
            GenerationError::Upload(_) => "upload",
            GenerationError::Validation { .. } => "validation",
            GenerationError::Submission(_) => "submission",
            GenerationError::EmptyResult => "empty_result",
            GenerationError::Timeout(_) => "timeout",
            GenerationError::Rejected(_) => "rejected",
        }
    }

    /// Whether this failure counts toward the credential's error threshold.
    ///
    /// Only transport failures inside the generation branch do. Access-token
    /// failures are left to the refresh worker; validation, empty results,
    /// rejections and timeouts say nothing about the credential.
    pub fn counts_against_credential(&self) -> bool {
        matches!(
            self,
            GenerationError::Upload(_) | GenerationError::Submission(_)
        )
    }
}

/// Result alias for generation workflows.
pub type Result<T> = std::result::Result<T, GenerationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_message_names_bounds() {
        let err = GenerationError::Validation {
            model: "veo".into(),
            min: 1,
            max: 2,
            got: 3,
        };
        assert_eq!(err.to_string(), "model veo takes 1-2 images, got 3");
        assert_eq!(err.label(), "validation");
    }

    #[test]
    fn only_branch_transport_failures_count() {
        assert!(GenerationError::Upload("x".into()).counts_against_credential());
        assert!(GenerationError::Submission("x".into()).counts_against_credential());
        assert!(!GenerationError::Authentication("x".into()).counts_against_credential());
        assert!(!GenerationError::EmptyResult.counts_against_credential());
        assert!(!GenerationError::Timeout(3).counts_against_credential());
        assert!(!GenerationError::Rejected("NSFW".into()).counts_against_credential());
    }
}
