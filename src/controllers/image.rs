use axum::{
    body::Body,
    extract::{Multipart, Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    Extension, Json,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    domain::{
        generation::{
            GenerationRequest, ImageDimensions, ImageGenerationService, ReferenceImage,
            DEFAULT_MODEL,
        },
        shared::usage_dto::UsageDto,
    },
    error::{AppError, AppResult},
    infrastructure::{auth::AuthUser, repositories::ArtifactStore},
};

/// Per reference image upload cap
pub const MAX_REFERENCE_IMAGE_BYTES: usize = 4 * 1024 * 1024;

const TITLE_MAX_CHARS: usize = 50;
/// `data:image/<subtype>;base64,` prefix in front of mask data, e.g. `svg+xml`
static DATA_URL_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^data:image/[A-Za-z0-9.+-]+;base64,").expect("mask prefix pattern is valid")
});

/// Response for POST /api/images/generate
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateImageResponse {
    pub url: String,
    pub usage: UsageDto,
    pub provider: String,
    pub model: String,
    pub prompt: String,
}

/// Multipart fields of a generation request
#[derive(Debug, Default)]
struct ImageForm {
    prompt: Option<String>,
    original_prompt: Option<String>,
    style: Option<String>,
    size: Option<String>,
    width: Option<String>,
    height: Option<String>,
    model: Option<String>,
    reference_images: Vec<ReferenceImage>,
    mask_data: Option<String>,
}

pub struct ImageController {
    generation_service: Arc<ImageGenerationService>,
    artifacts: Arc<dyn ArtifactStore>,
}

impl ImageController {
    pub fn new(
        generation_service: Arc<ImageGenerationService>,
        artifacts: Arc<dyn ArtifactStore>,
    ) -> Self {
        Self {
            generation_service,
            artifacts,
        }
    }

    /// POST /api/images/generate - Generate an image and charge one use
    pub async fn generate(
        State(controller): State<Arc<ImageController>>,
        Extension(auth_user): Extension<AuthUser>,
        multipart: Multipart,
    ) -> AppResult<Json<GenerateImageResponse>> {
        let user_id = auth_user.user_id;
        let service = controller.generation_service.clone();

        // Quota before the body is read or validated
        let check = service.authorize(user_id).await?;

        let form = read_form(multipart).await?;

        let prompt = form
            .prompt
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| AppError::BadRequest("Prompt is required".to_string()))?
            .to_string();

        let size = resolve_size(
            form.size.as_deref(),
            form.width.as_deref(),
            form.height.as_deref(),
        )?;
        let mask = form.mask_data.as_deref().map(decode_mask).transpose()?;
        let title = make_title(form.original_prompt.as_deref().unwrap_or(&prompt));

        let request = GenerationRequest {
            prompt,
            model: form
                .model
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            style: form.style.filter(|s| !s.trim().is_empty()),
            size,
            reference_images: form.reference_images,
            mask,
        };

        // Dropping this handler (client disconnect) cancels the pipeline
        let token = CancellationToken::new();
        let guard = token.clone().drop_guard();

        let task = tokio::spawn(async move {
            service
                .generate_authorized(user_id, check, request, title, token)
                .await
        });

        let receipt = task
            .await
            .map_err(|e| AppError::Internal(format!("Generation task failed: {}", e)))?
            .map_err(AppError::from)?;
        guard.disarm();

        Ok(Json(GenerateImageResponse {
            url: format!("/api/images/{}", receipt.artifact_id),
            usage: UsageDto::from(&receipt.usage),
            provider: receipt.provider,
            model: receipt.model,
            prompt: receipt.prompt,
        }))
    }

    /// GET /api/images/:id - Raw bytes of an image owned by the caller
    pub async fn get_image(
        State(controller): State<Arc<ImageController>>,
        Extension(auth_user): Extension<AuthUser>,
        Path(image_id): Path<Uuid>,
    ) -> AppResult<(StatusCode, HeaderMap, Body)> {
        let artifact = controller
            .artifacts
            .find(image_id)
            .await?
            .filter(|artifact| artifact.owner_id == auth_user.user_id)
            .ok_or_else(|| AppError::NotFound("Image not found".to_string()))?;

        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_str(&artifact.content_type)
                .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
        );
        headers.insert(
            header::CACHE_CONTROL,
            HeaderValue::from_static("private, max-age=31536000, immutable"),
        );

        Ok((StatusCode::OK, headers, Body::from(artifact.data)))
    }
}

async fn read_form(mut multipart: Multipart) -> AppResult<ImageForm> {
    let mut form = ImageForm::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("Invalid multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();

        if name == "referenceImages" {
            let file_name = field.file_name().unwrap_or("reference.png").to_string();
            let content_type = field.content_type().unwrap_or("image/png").to_string();
            let bytes = field
                .bytes()
                .await
                .map_err(|e| AppError::BadRequest(format!("Invalid reference image: {}", e)))?;

            if bytes.is_empty() {
                continue;
            }
            if !content_type.starts_with("image/") {
                return Err(AppError::BadRequest(format!(
                    "Reference image {} is not an image",
                    file_name
                )));
            }
            if bytes.len() > MAX_REFERENCE_IMAGE_BYTES {
                return Err(AppError::BadRequest(format!(
                    "Reference image {} exceeds the 4MB limit",
                    file_name
                )));
            }

            form.reference_images.push(ReferenceImage {
                file_name,
                content_type,
                bytes: bytes.to_vec(),
            });
            continue;
        }

        let value = field
            .text()
            .await
            .map_err(|e| AppError::BadRequest(format!("Invalid field {}: {}", name, e)))?;

        match name.as_str() {
            "prompt" => form.prompt = Some(value),
            "originalPrompt" => form.original_prompt = Some(value),
            "style" => form.style = Some(value),
            "size" => form.size = Some(value),
            "width" => form.width = Some(value),
            "height" => form.height = Some(value),
            "model" => form.model = Some(value),
            "maskData" => form.mask_data = Some(value),
            other => tracing::debug!(field = %other, "Ignoring unknown form field"),
        }
    }

    Ok(form)
}

/// `size` ("WxH") wins over `width`/`height`; both absent means 1024x1024
fn resolve_size(
    size: Option<&str>,
    width: Option<&str>,
    height: Option<&str>,
) -> AppResult<ImageDimensions> {
    let parse = |value: &str| -> AppResult<u32> {
        value
            .trim()
            .parse::<u32>()
            .ok()
            .filter(|v| *v > 0)
            .ok_or_else(|| AppError::BadRequest(format!("Invalid image dimension: {}", value)))
    };

    if let Some(size) = size.map(str::trim).filter(|s| !s.is_empty()) {
        let (w, h) = size
            .split_once(['x', 'X'])
            .ok_or_else(|| AppError::BadRequest(format!("Invalid size: {}", size)))?;
        return Ok(ImageDimensions::new(parse(w)?, parse(h)?));
    }

    match (width, height) {
        (Some(w), Some(h)) => Ok(ImageDimensions::new(parse(w)?, parse(h)?)),
        (None, None) => Ok(ImageDimensions::default()),
        _ => Err(AppError::BadRequest(
            "Both width and height are required".to_string(),
        )),
    }
}

/// Decode base64 mask data, with or without a data URL prefix
fn decode_mask(data: &str) -> AppResult<Vec<u8>> {
    let payload = DATA_URL_PREFIX.replace(data.trim(), "");

    STANDARD
        .decode(payload.as_bytes())
        .map_err(|e| AppError::BadRequest(format!("Invalid mask data: {}", e)))
}

fn make_title(prompt: &str) -> String {
    let prompt = prompt.trim();
    if prompt.chars().count() <= TITLE_MAX_CHARS {
        return prompt.to_string();
    }
    let mut title: String = prompt.chars().take(TITLE_MAX_CHARS).collect();
    title.push_str("...");
    title
}
