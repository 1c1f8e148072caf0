//! Flow upstream constants
//!
//! Endpoint paths are relative to the two configurable base URLs: the labs
//! site (session exchange, project creation) and the sandbox API (everything
//! authorized by the short-lived access token).

/// Default labs site base URL
pub const DEFAULT_LABS_BASE_URL: &str = "https://labs.google";

/// Default sandbox API base URL
pub const DEFAULT_API_BASE_URL: &str = "https://aisandbox-pa.googleapis.com";

/// Cookie carrying the durable session secret
pub const SESSION_COOKIE: &str = "__Secure-next-auth.session-token";

pub const SESSION_PATH: &str = "/fx/api/auth/session";
pub const CREATE_PROJECT_PATH: &str = "/fx/api/trpc/project.createProject";
pub const CREDITS_PATH: &str = "/v1/credits";
pub const UPLOAD_IMAGE_PATH: &str = "/v1:uploadUserImage";
pub const VIDEO_TEXT_PATH: &str = "/v1/video:batchAsyncGenerateVideoText";
pub const VIDEO_START_END_PATH: &str = "/v1/video:batchAsyncGenerateVideoStartAndEndImage";
pub const VIDEO_START_PATH: &str = "/v1/video:batchAsyncGenerateVideoStartImage";
pub const VIDEO_REFERENCE_PATH: &str = "/v1/video:batchAsyncGenerateVideoReferenceImages";
pub const VIDEO_STATUS_PATH: &str = "/v1/video:batchCheckAsyncVideoGenerationStatus";

/// Tool name sent with project creation
pub const PROJECT_TOOL_NAME: &str = "PINHOLE";

/// Tier assumed when the quota endpoint has not reported one yet
pub const DEFAULT_PAYGATE_TIER: &str = "PAYGATE_TIER_ONE";

/// Browser identity presented to the labs site
pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";
