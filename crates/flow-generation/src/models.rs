//! Static table of supported models
//!
//! The public model id encodes both the upstream model and the aspect ratio,
//! so a request never carries a separate size parameter.

use serde::Serialize;

const IMAGE_LANDSCAPE: &str = "IMAGE_ASPECT_RATIO_LANDSCAPE";
const IMAGE_PORTRAIT: &str = "IMAGE_ASPECT_RATIO_PORTRAIT";
const VIDEO_LANDSCAPE: &str = "VIDEO_ASPECT_RATIO_LANDSCAPE";
const VIDEO_PORTRAIT: &str = "VIDEO_ASPECT_RATIO_PORTRAIT";

/// How a video model consumes images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "video_kind")]
pub enum VideoKind {
    /// Prompt only; supplied images are dropped.
    TextToVideo,
    /// First frame and optional last frame.
    StartEnd { min_images: usize, max_images: usize },
    /// Any number of reference assets.
    Reference,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum ModelKind {
    Image,
    Video(VideoKind),
}

/// One entry of the model table.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ModelEntry {
    pub id: &'static str,
    #[serde(flatten)]
    pub kind: ModelKind,
    /// Upstream model name (image) or model key (video).
    #[serde(skip)]
    pub upstream: &'static str,
    #[serde(skip)]
    pub aspect_ratio: &'static str,
}

const START_END: VideoKind = VideoKind::StartEnd {
    min_images: 1,
    max_images: 2,
};

pub static MODELS: &[ModelEntry] = &[
    ModelEntry {
        id: "gemini-2.5-flash-image-landscape",
        kind: ModelKind::Image,
        upstream: "GEM_PIX",
        aspect_ratio: IMAGE_LANDSCAPE,
    },
    ModelEntry {
        id: "gemini-2.5-flash-image-portrait",
        kind: ModelKind::Image,
        upstream: "GEM_PIX",
        aspect_ratio: IMAGE_PORTRAIT,
    },
    ModelEntry {
        id: "imagen-4.0-generate-preview-landscape",
        kind: ModelKind::Image,
        upstream: "IMAGEN_3_5",
        aspect_ratio: IMAGE_LANDSCAPE,
    },
    ModelEntry {
        id: "imagen-4.0-generate-preview-portrait",
        kind: ModelKind::Image,
        upstream: "IMAGEN_3_5",
        aspect_ratio: IMAGE_PORTRAIT,
    },
    ModelEntry {
        id: "veo_3_1_t2v_fast_landscape",
        kind: ModelKind::Video(VideoKind::TextToVideo),
        upstream: "veo_3_1_t2v_fast",
        aspect_ratio: VIDEO_LANDSCAPE,
    },
    ModelEntry {
        id: "veo_3_1_t2v_fast_portrait",
        kind: ModelKind::Video(VideoKind::TextToVideo),
        upstream: "veo_3_1_t2v_fast_portrait",
        aspect_ratio: VIDEO_PORTRAIT,
    },
    ModelEntry {
        id: "veo_3_1_i2v_s_fast_fl_landscape",
        kind: ModelKind::Video(START_END),
        upstream: "veo_3_1_i2v_s_fast_fl",
        aspect_ratio: VIDEO_LANDSCAPE,
    },
    ModelEntry {
        id: "veo_3_1_i2v_s_fast_fl_portrait",
        kind: ModelKind::Video(START_END),
        upstream: "veo_3_1_i2v_s_fast_portrait_fl",
        aspect_ratio: VIDEO_PORTRAIT,
    },
    ModelEntry {
        id: "veo_3_0_r2v_fast_landscape",
        kind: ModelKind::Video(VideoKind::Reference),
        upstream: "veo_3_0_r2v_fast",
        aspect_ratio: VIDEO_LANDSCAPE,
    },
    ModelEntry {
        id: "veo_3_0_r2v_fast_portrait",
        kind: ModelKind::Video(VideoKind::Reference),
        upstream: "veo_3_0_r2v_fast_portrait",
        aspect_ratio: VIDEO_PORTRAIT,
    },
];

pub fn lookup(id: &str) -> Option<&'static ModelEntry> {
    MODELS.iter().find(|m| m.id == id)
}
