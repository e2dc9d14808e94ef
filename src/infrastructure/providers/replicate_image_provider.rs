use super::image_provider::ImageProvider;
use super::openai_image_provider::classify_status;
use crate::domain::generation::{
    ImageOutput, JobStatus, ProviderError, ProviderInput, ProviderOperation, Submission,
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

pub const DEFAULT_REPLICATE_BASE_URL: &str = "https://api.replicate.com";

const NEGATIVE_PROMPT: &str = "blurry, low quality, distorted, ugly, bad anatomy";
const INFERENCE_STEPS: u32 = 50;
const GUIDANCE_SCALE: f32 = 7.5;

#[derive(Debug, Deserialize)]
struct Prediction {
    id: String,
    status: String,
    #[serde(default)]
    output: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

/// Job-style provider for models hosted on Replicate
pub struct ReplicateImageProvider {
    http: reqwest::Client,
    api_token: String,
    base_url: String,
}

impl ReplicateImageProvider {
    pub fn new(api_token: String, base_url: Option<String>, http: reqwest::Client) -> Self {
        let base_url = base_url
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_REPLICATE_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        Self {
            http,
            api_token,
            base_url,
        }
    }

    async fn read_prediction(&self, response: reqwest::Response) -> Result<Prediction, ProviderError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), &body));
        }
        response
            .json::<Prediction>()
            .await
            .map_err(|e| ProviderError::Upstream(format!("unreadable prediction: {}", e)))
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
                "output download failed with status {}",
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
impl ImageProvider for ReplicateImageProvider {
    fn name(&self) -> &str {
        "replicate"
    }

    async fn submit(&self, input: &ProviderInput) -> Result<Submission, ProviderError> {
        let prediction_input = build_prediction_input(input)?;

        // Pinned versions go through the generic endpoint; bare model names through the model route
        let (url, body) = match input.model_id.split_once(':') {
            Some((_, version)) => (
                format!("{}/v1/predictions", self.base_url),
                json!({ "version": version, "input": prediction_input }),
            ),
            None => (
                format!("{}/v1/models/{}/predictions", self.base_url, input.model_id),
                json!({ "input": prediction_input }),
            ),
        };

        let response = self
            .http
            .post(url)
            .bearer_auth(&self.api_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Upstream(e.to_string()))?;

        let prediction = self.read_prediction(response).await?;

        tracing::info!(
            model = %input.model_id,
            prediction_id = %prediction.id,
            status = %prediction.status,
            "Replicate prediction created"
        );

        Ok(Submission::Pending {
            job_id: prediction.id,
        })
    }

    async fn poll(&self, job_id: &str) -> Result<JobStatus, ProviderError> {
        let response = self
            .http
            .get(format!("{}/v1/predictions/{}", self.base_url, job_id))
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(|e| ProviderError::Upstream(e.to_string()))?;

        let prediction = self.read_prediction(response).await?;

        match prediction.status.as_str() {
            "succeeded" => {
                let url = first_output_url(prediction.output.as_ref()).ok_or_else(|| {
                    ProviderError::Upstream("prediction succeeded without output".to_string())
                })?;
                Ok(JobStatus::Succeeded(self.download(&url).await?))
            }
            "failed" | "canceled" => Ok(JobStatus::Failed(
                prediction
                    .error
                    .map(|e| match e {
                        Value::String(s) => s,
                        other => other.to_string(),
                    })
                    .unwrap_or_else(|| format!("prediction {}", prediction.status)),
            )),
            _ => Ok(JobStatus::Running),
        }
    }

    async fn cancel(&self, job_id: &str) -> Result<(), ProviderError> {
        let response = self
            .http
            .post(format!("{}/v1/predictions/{}/cancel", self.base_url, job_id))
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(|e| ProviderError::Upstream(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            Err(classify_status(status, &body))
        }
    }
}

/// Prediction `input` object for a generation step
pub fn build_prediction_input(input: &ProviderInput) -> Result<Value, ProviderError> {
    let mut body = json!({
        "prompt": input.prompt,
        "width": input.size.width,
        "height": input.size.height,
        "num_outputs": 1,
        "num_inference_steps": INFERENCE_STEPS,
        "guidance_scale": GUIDANCE_SCALE,
        "negative_prompt": NEGATIVE_PROMPT,
    });

    match &input.operation {
        ProviderOperation::TextToImage => {
            body["scheduler"] = json!("K_EULER");
        }
        ProviderOperation::ImageToImage {
            image,
            convention,
            strength,
        } => {
            body[convention.image_field()] = json!(image.to_data_url());
            body[convention.strength_field()] = json!(strength);
        }
        ProviderOperation::MultiImageEdit { .. } | ProviderOperation::SingleImageEdit { .. } => {
            return Err(ProviderError::Unsupported(
                "Replicate models do not support image edits".to_string(),
            ))
        }
    }

    Ok(body)
}

fn first_output_url(output: Option<&Value>) -> Option<String> {
    match output? {
        Value::String(url) => Some(url.clone()),
        Value::Array(items) => items.iter().find_map(|v| v.as_str().map(str::to_string)),
        _ => None,
    }
}
