use serde::Serialize;

/// Image uploaded by the client to steer generation
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceImage {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl ReferenceImage {
    pub fn to_data_url(&self) -> String {
        use base64::{engine::general_purpose::STANDARD, Engine};
        format!("data:{};base64,{}", self.content_type, STANDARD.encode(&self.bytes))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ImageDimensions {
    pub width: u32,
    pub height: u32,
}

impl ImageDimensions {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn aspect_ratio(&self) -> f64 {
        self.width.max(1) as f64 / self.height.max(1) as f64
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl Default for ImageDimensions {
    fn default() -> Self {
        Self::new(1024, 1024)
    }
}

impl std::fmt::Display for ImageDimensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// One image generation call as received from the client
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    /// Key into the model table; unknown keys fall back to the default model
    pub model: String,
    pub style: Option<String>,
    pub size: ImageDimensions,
    pub reference_images: Vec<ReferenceImage>,
    pub mask: Option<Vec<u8>>,
}

impl GenerationRequest {
    pub fn has_references(&self) -> bool {
        !self.reference_images.is_empty()
    }
}

/// Raw provider output; passed through unmodified
#[derive(Debug, Clone, PartialEq)]
pub struct ImageOutput {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// Field a job provider expects the reference image under
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceConvention {
    /// `init_image` + `strength`
    InitImage,
    /// `image` + `prompt_strength`
    Image,
}

impl ReferenceConvention {
    pub fn image_field(&self) -> &'static str {
        match self {
            ReferenceConvention::InitImage => "init_image",
            ReferenceConvention::Image => "image",
        }
    }

    pub fn strength_field(&self) -> &'static str {
        match self {
            ReferenceConvention::InitImage => "strength",
            ReferenceConvention::Image => "prompt_strength",
        }
    }

    pub fn alternate(&self) -> Self {
        match self {
            ReferenceConvention::InitImage => ReferenceConvention::Image,
            ReferenceConvention::Image => ReferenceConvention::InitImage,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProviderOperation {
    TextToImage,
    MultiImageEdit {
        images: Vec<ReferenceImage>,
        mask: Option<Vec<u8>>,
    },
    SingleImageEdit {
        image: ReferenceImage,
        mask: Option<Vec<u8>>,
    },
    ImageToImage {
        image: ReferenceImage,
        convention: ReferenceConvention,
        strength: f32,
    },
}

/// Normalized input for a single provider call
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderInput {
    pub model_id: String,
    pub prompt: String,
    pub size: ImageDimensions,
    pub style: Option<String>,
    pub operation: ProviderOperation,
}

/// What a provider returns from `submit`
#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    Completed(ImageOutput),
    Pending { job_id: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobStatus {
    Running,
    Succeeded(ImageOutput),
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    MultiImageEdit,
    SingleImageEdit,
    ImageToImage,
    TextToImage,
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepKind::MultiImageEdit => write!(f, "multi-image edit"),
            StepKind::SingleImageEdit => write!(f, "single-image edit"),
            StepKind::ImageToImage => write!(f, "image-to-image"),
            StepKind::TextToImage => write!(f, "text-to-image"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    Succeeded,
    Failed {
        class: super::error::FailureClass,
        reason: String,
    },
}

/// One entry of the fallback chain, kept for diagnostics only
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderAttempt {
    pub step: StepKind,
    pub provider: String,
    pub model: String,
    pub outcome: AttemptOutcome,
}

impl ProviderAttempt {
    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, AttemptOutcome::Failed { .. })
    }
}

impl std::fmt::Display for ProviderAttempt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.outcome {
            AttemptOutcome::Succeeded => {
                write!(f, "{} via {} ({}): ok", self.step, self.provider, self.model)
            }
            AttemptOutcome::Failed { reason, .. } => write!(
                f,
                "{} via {} ({}): {}",
                self.step, self.provider, self.model, reason
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    pub image: ImageOutput,
    pub provider_used: String,
    pub model_used: String,
    pub step: StepKind,
    /// Prompt actually sent, after truncation
    pub prompt: String,
    pub attempts: Vec<ProviderAttempt>,
}
