use super::image_provider::ImageProvider;
use crate::domain::generation::{
    ImageDimensions, ImageOutput, ProviderError, ProviderInput, ProviderOperation,
    ReferenceImage, Submission,
};
use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::{CreateImageRequestArgs, Image, ImageModel, ImageResponseFormat, ImageSize, ImageStyle},
    Client,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::sync::Arc;

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Deserialize)]
struct ImagesPayload {
    data: Vec<ImagePayload>,
}

#[derive(Debug, Deserialize)]
struct ImagePayload {
    b64_json: Option<String>,
    url: Option<String>,
}

/// Synchronous provider for the OpenAI image models
///
/// DALL-E text-to-image goes through the SDK; GPT Image generation and all
/// edits go through the REST endpoints directly since they need sizes and
/// multipart shapes the SDK request types do not cover.
pub struct OpenAiImageProvider {
    client: Arc<Client<OpenAIConfig>>,
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl OpenAiImageProvider {
    pub fn new(api_key: String, base_url: Option<String>, http: reqwest::Client) -> Self {
        let base_url = base_url
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        let config = OpenAIConfig::new()
            .with_api_key(api_key.clone())
            .with_api_base(base_url.clone());

        Self {
            client: Arc::new(Client::with_config(config)),
            http,
            api_key,
            base_url,
        }
    }

    async fn generate_with_sdk(&self, input: &ProviderInput) -> Result<ImageOutput, ProviderError> {
        let mut builder = CreateImageRequestArgs::default();
        builder
            .prompt(input.prompt.clone())
            .model(image_model(&input.model_id))
            .n(1)
            .size(image_size(input.size))
            .response_format(ImageResponseFormat::B64Json);

        if let Some(style) = input.style.as_deref() {
            builder.style(match style.to_lowercase().as_str() {
                "natural" => ImageStyle::Natural,
                _ => ImageStyle::Vivid,
            });
        }

        let request = builder
            .build()
            .map_err(|e| ProviderError::InvalidInput(e.to_string()))?;

        let response = self
            .client
            .images()
            .create(request)
            .await
            .map_err(classify_sdk_error)?;

        let image = response
            .data
            .first()
            .ok_or_else(|| ProviderError::Upstream("OpenAI returned no image".to_string()))?;

        match image.as_ref() {
            Image::B64Json { b64_json, .. } => decode_png(b64_json),
            Image::Url { url, .. } => self.download(url).await,
        }
    }

    async fn generate_with_rest(&self, input: &ProviderInput) -> Result<ImageOutput, ProviderError> {
        let body = serde_json::json!({
            "model": input.model_id,
            "prompt": input.prompt,
            "n": 1,
            "size": input.size.to_string(),
        });

        let response = self
            .http
            .post(format!("{}/images/generations", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Upstream(e.to_string()))?;

        self.read_images(response).await
    }

    async fn edit(
        &self,
        input: &ProviderInput,
        images: &[ReferenceImage],
        mask: Option<&[u8]>,
    ) -> Result<ImageOutput, ProviderError> {
        let image_field = if images.len() > 1 { "image[]" } else { "image" };

        let mut form = Form::new()
            .text("model", input.model_id.clone())
            .text("prompt", input.prompt.clone())
            .text("n", "1")
            .text("size", input.size.to_string());

        if is_dall_e(&input.model_id) {
            form = form.text("response_format", "b64_json");
        }

        for image in images {
            form = form.part(image_field, image_part(image)?);
        }

        if let Some(mask) = mask {
            let part = Part::bytes(mask.to_vec())
                .file_name("mask.png")
                .mime_str("image/png")
                .map_err(|e| ProviderError::InvalidInput(e.to_string()))?;
            form = form.part("mask", part);
        }

        tracing::debug!(
            model = %input.model_id,
            images = images.len(),
            has_mask = mask.is_some(),
            "Calling OpenAI image edit"
        );

        let response = self
            .http
            .post(format!("{}/images/edits", self.base_url))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| ProviderError::Upstream(e.to_string()))?;

        self.read_images(response).await
    }

    async fn read_images(&self, response: reqwest::Response) -> Result<ImageOutput, ProviderError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), &body));
        }

        let payload: ImagesPayload = response
            .json()
            .await
            .map_err(|e| ProviderError::Upstream(format!("unreadable OpenAI response: {}", e)))?;

        let image = payload
            .data
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::Upstream("OpenAI returned no image".to_string()))?;

        match (image.b64_json, image.url) {
            (Some(b64), _) => decode_png(&b64),
            (None, Some(url)) => self.download(&url).await,
            (None, None) => Err(ProviderError::Upstream(
                "OpenAI image had neither data nor url".to_string(),
            )),
        }
    }

    async fn download(&self, url: &str) -> Result<ImageOutput, ProviderError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| ProviderError::Upstream(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ProviderError::Upstream(format!(
                "image download failed with status {}",
                response.status()
            )));
        }
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("image/png")
            .to_string();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ProviderError::Upstream(e.to_string()))?;

        Ok(ImageOutput {
            bytes: bytes.to_vec(),
            content_type,
        })
    }
}

#[async_trait]
impl ImageProvider for OpenAiImageProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn submit(&self, input: &ProviderInput) -> Result<Submission, ProviderError> {
        let start_time = std::time::Instant::now();

        let output = match &input.operation {
            ProviderOperation::TextToImage if is_dall_e(&input.model_id) => {
                self.generate_with_sdk(input).await
            }
            ProviderOperation::TextToImage => self.generate_with_rest(input).await,
            ProviderOperation::MultiImageEdit { images, mask } => {
                self.edit(input, images, mask.as_deref()).await
            }
            ProviderOperation::SingleImageEdit { image, mask } => {
                self.edit(input, std::slice::from_ref(image), mask.as_deref())
                    .await
            }
            ProviderOperation::ImageToImage { .. } => Err(ProviderError::Unsupported(
                "OpenAI models do not run image-to-image jobs".to_string(),
            )),
        }?;

        tracing::info!(
            model = %input.model_id,
            image_size = output.bytes.len(),
            duration_ms = start_time.elapsed().as_millis() as u64,
            "OpenAI image received"
        );

        Ok(Submission::Completed(output))
    }
}

fn is_dall_e(model_id: &str) -> bool {
    model_id.starts_with("dall-e")
}

fn image_model(model_id: &str) -> ImageModel {
    match model_id {
        "dall-e-2" => ImageModel::DallE2,
        "dall-e-3" => ImageModel::DallE3,
        other => ImageModel::Other(other.to_string()),
    }
}

fn image_size(size: ImageDimensions) -> ImageSize {
    match (size.width, size.height) {
        (256, 256) => ImageSize::S256x256,
        (512, 512) => ImageSize::S512x512,
        (1792, 1024) => ImageSize::S1792x1024,
        (1024, 1792) => ImageSize::S1024x1792,
        _ => ImageSize::S1024x1024,
    }
}

fn image_part(image: &ReferenceImage) -> Result<Part, ProviderError> {
    Part::bytes(image.bytes.clone())
        .file_name(image.file_name.clone())
        .mime_str(&image.content_type)
        .map_err(|e| ProviderError::InvalidInput(format!("bad reference image type: {}", e)))
}

fn decode_png(b64: &str) -> Result<ImageOutput, ProviderError> {
    let bytes = STANDARD
        .decode(b64.trim())
        .map_err(|e| ProviderError::Upstream(format!("invalid base64 image: {}", e)))?;
    Ok(ImageOutput {
        bytes,
        content_type: "image/png".to_string(),
    })
}

fn classify_sdk_error(err: OpenAIError) -> ProviderError {
    let detail = format!("{:?}", err);
    match ProviderError::from_message(detail) {
        ProviderError::Upstream(_) => ProviderError::Upstream(err.to_string()),
        classified => classified,
    }
}

/// Map an HTTP error response onto the failure taxonomy
pub(crate) fn classify_status(status: u16, body: &str) -> ProviderError {
    let message = format!("status {}: {}", status, body);
    match status {
        401 | 403 => ProviderError::Auth(message),
        429 => ProviderError::RateLimited(message),
        400 | 422 => match ProviderError::from_message(message) {
            ProviderError::Upstream(message) => ProviderError::InvalidInput(message),
            classified => classified,
        },
        _ => ProviderError::from_message(message),
    }
}
