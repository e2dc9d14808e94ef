//! Static capability table for the image models the service knows about.
//!
//! Each profile says which provider family serves the model, how it is
//! invoked, which request shapes it accepts and how sizes and prompts must
//! be normalized before the call.

use super::model::{ImageDimensions, ReferenceConvention};

pub const DEFAULT_MODEL: &str = "DALL-E 3";

/// Strength used for image-to-image when the client gives none
pub const DEFAULT_REFERENCE_STRENGTH: f32 = 0.7;

/// Characters kept free at the end of a truncated prompt
const TRUNCATION_MARGIN: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    OpenAi,
    Replicate,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderKind::OpenAi => write!(f, "openai"),
            ProviderKind::Replicate => write!(f, "replicate"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationMode {
    /// Image comes back in the submit response
    Synchronous,
    /// Submit returns a job id that must be polled
    JobPolling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeRule {
    /// Only these exact sizes are accepted
    Buckets(&'static [(u32, u32)]),
    /// Any size within bounds, each side a multiple of `multiple`
    FreeForm { multiple: u32, min: u32, max: u32 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelProfile {
    /// Client-facing model key
    pub key: &'static str,
    pub provider: ProviderKind,
    /// Identifier sent to the provider
    pub model_id: &'static str,
    pub mode: InvocationMode,
    pub supports_style: bool,
    /// Model id that serves multi-image edits for this model
    pub multi_edit_via: Option<&'static str>,
    /// Model id that serves single-image edits for this model
    pub single_edit_via: Option<&'static str>,
    /// Reference convention for image-to-image, when supported
    pub image_to_image: Option<ReferenceConvention>,
    pub sizing: SizeRule,
    pub max_prompt_chars: usize,
}

const GPT_IMAGE_SIZES: &[(u32, u32)] = &[(1024, 1024), (1536, 1024), (1024, 1536)];
const DALLE3_SIZES: &[(u32, u32)] = &[(1024, 1024), (1792, 1024), (1024, 1792)];
const DALLE2_SIZES: &[(u32, u32)] = &[(256, 256), (512, 512), (1024, 1024)];

const REPLICATE_SIZING: SizeRule = SizeRule::FreeForm {
    multiple: 8,
    min: 512,
    max: 1536,
};

pub static PROFILES: &[ModelProfile] = &[
    ModelProfile {
        key: "GPT Image",
        provider: ProviderKind::OpenAi,
        model_id: "gpt-image-1",
        mode: InvocationMode::Synchronous,
        supports_style: false,
        multi_edit_via: Some("gpt-image-1"),
        single_edit_via: Some("gpt-image-1"),
        image_to_image: None,
        sizing: SizeRule::Buckets(GPT_IMAGE_SIZES),
        max_prompt_chars: 32000,
    },
    ModelProfile {
        key: "DALL-E 3",
        provider: ProviderKind::OpenAi,
        model_id: "dall-e-3",
        mode: InvocationMode::Synchronous,
        supports_style: true,
        multi_edit_via: Some("gpt-image-1"),
        single_edit_via: Some("dall-e-2"),
        image_to_image: None,
        sizing: SizeRule::Buckets(DALLE3_SIZES),
        max_prompt_chars: 4000,
    },
    ModelProfile {
        key: "DALL-E 2",
        provider: ProviderKind::OpenAi,
        model_id: "dall-e-2",
        mode: InvocationMode::Synchronous,
        supports_style: false,
        multi_edit_via: Some("gpt-image-1"),
        single_edit_via: Some("dall-e-2"),
        image_to_image: None,
        sizing: SizeRule::Buckets(DALLE2_SIZES),
        max_prompt_chars: 1000,
    },
    ModelProfile {
        key: "Stable Diffusion XL",
        provider: ProviderKind::Replicate,
        model_id: "stability-ai/sdxl:39ed52f2a78e934b3ba6e2a89f5b1c712de7dfea535525255b1aa35c5565e08b",
        mode: InvocationMode::JobPolling,
        supports_style: false,
        multi_edit_via: None,
        single_edit_via: None,
        image_to_image: Some(ReferenceConvention::InitImage),
        sizing: REPLICATE_SIZING,
        max_prompt_chars: 2000,
    },
    ModelProfile {
        key: "Kandinsky",
        provider: ProviderKind::Replicate,
        model_id: "ai-forever/kandinsky-2.2:ad9d7879fbffa2874e1d909d1d37d9bc682889cc65b31f7bb00d2362619f194a",
        mode: InvocationMode::JobPolling,
        supports_style: false,
        multi_edit_via: None,
        single_edit_via: None,
        image_to_image: None,
        sizing: REPLICATE_SIZING,
        max_prompt_chars: 2000,
    },
    ModelProfile {
        key: "Realistic Vision",
        provider: ProviderKind::Replicate,
        model_id: "cjwbw/realistic-vision-v5:ac732df83cea7fff18b8472768c88ad041fa750ff7682a21affe81863cbe77e4",
        mode: InvocationMode::JobPolling,
        supports_style: false,
        multi_edit_via: None,
        single_edit_via: None,
        image_to_image: Some(ReferenceConvention::Image),
        sizing: REPLICATE_SIZING,
        max_prompt_chars: 2000,
    },
];

/// Look a model up by its client-facing key
pub fn find_profile(key: &str) -> Option<&'static ModelProfile> {
    let key = key.trim();
    PROFILES.iter().find(|p| p.key.eq_ignore_ascii_case(key))
}

/// Like `find_profile` but unknown keys resolve to the default model
pub fn resolve_profile(key: &str) -> &'static ModelProfile {
    find_profile(key).unwrap_or_else(|| {
        tracing::warn!(model = %key, default = DEFAULT_MODEL, "Unknown model, using default");
        default_profile()
    })
}

pub fn default_profile() -> &'static ModelProfile {
    &PROFILES[1]
}

impl ModelProfile {
    pub fn normalize_size(&self, requested: ImageDimensions) -> ImageDimensions {
        match self.sizing {
            SizeRule::Buckets(buckets) => closest_bucket(buckets, requested),
            SizeRule::FreeForm { multiple, min, max } => {
                scale_free_form(requested, multiple, min, max)
            }
        }
    }

    /// Bucket size for an edit served by `model_id` on this provider
    pub fn normalize_size_for(&self, model_id: &str, requested: ImageDimensions) -> ImageDimensions {
        PROFILES
            .iter()
            .find(|p| p.model_id == model_id)
            .unwrap_or(self)
            .normalize_size(requested)
    }

    pub fn truncate_prompt(&self, prompt: &str) -> String {
        if prompt.chars().count() <= self.max_prompt_chars {
            return prompt.to_string();
        }
        let keep = self.max_prompt_chars.saturating_sub(TRUNCATION_MARGIN).max(1);
        let mut truncated: String = prompt.chars().take(keep).collect();
        truncated.push_str("...");
        truncated
    }

    pub fn effective_style(&self, style: Option<&str>) -> Option<String> {
        if !self.supports_style {
            return None;
        }
        style
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }
}

fn closest_bucket(buckets: &[(u32, u32)], requested: ImageDimensions) -> ImageDimensions {
    let target_ratio = requested.aspect_ratio();
    let target_area = requested.area() as f64;

    buckets
        .iter()
        .map(|&(w, h)| ImageDimensions::new(w, h))
        .min_by(|a, b| {
            let ratio_a = (a.aspect_ratio() - target_ratio).abs();
            let ratio_b = (b.aspect_ratio() - target_ratio).abs();
            let area_a = (a.area() as f64 - target_area).abs();
            let area_b = (b.area() as f64 - target_area).abs();
            ratio_a
                .total_cmp(&ratio_b)
                .then(area_a.total_cmp(&area_b))
        })
        .unwrap_or_default()
}

fn scale_free_form(requested: ImageDimensions, multiple: u32, min: u32, max: u32) -> ImageDimensions {
    let width = requested.width.max(1) as f64;
    let height = requested.height.max(1) as f64;

    let mut scale = 1.0_f64;
    let long_side = width.max(height);
    let short_side = width.min(height);
    if long_side > max as f64 {
        scale = max as f64 / long_side;
    }
    if short_side * scale < min as f64 {
        scale = min as f64 / short_side;
    }

    let fit = |side: f64| -> u32 {
        let rounded = ((side * scale) / multiple as f64).round() as u32 * multiple;
        rounded.clamp(min, max)
    };

    ImageDimensions::new(fit(width), fit(height))
}
