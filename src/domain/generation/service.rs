use super::error::{GenerationError, ImageServiceError};
use super::model::GenerationRequest;
use super::orchestrator::ImageOrchestrator;
use crate::domain::quota::{QuotaCheck, QuotaDenial, QuotaLedger, ServiceType};
use crate::infrastructure::repositories::{ArtifactMetadata, ArtifactStore};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// What the client gets back after a successful generation
#[derive(Debug, Clone)]
pub struct GenerationReceipt {
    pub artifact_id: Uuid,
    pub usage: QuotaCheck,
    pub provider: String,
    pub model: String,
    /// Prompt as sent to the provider
    pub prompt: String,
}

pub struct ImageGenerationService {
    quota: Arc<dyn QuotaLedger>,
    orchestrator: Arc<ImageOrchestrator>,
    artifacts: Arc<dyn ArtifactStore>,
}

impl ImageGenerationService {
    pub fn new(
        quota: Arc<dyn QuotaLedger>,
        orchestrator: Arc<ImageOrchestrator>,
        artifacts: Arc<dyn ArtifactStore>,
    ) -> Self {
        Self {
            quota,
            orchestrator,
            artifacts,
        }
    }

    /// Check quota, generate, store and commit
    ///
    /// Quota is committed only after the artifact is stored and the token is
    /// still live, so a cancelled or failed request never consumes usage.
    pub async fn generate_for_user(
        &self,
        user_id: Uuid,
        request: GenerationRequest,
        title: String,
        token: CancellationToken,
    ) -> Result<GenerationReceipt, ImageServiceError> {
        let check = self.authorize(user_id).await?;
        self.generate_authorized(user_id, check, request, title, token)
            .await
    }

    /// Quota gate run before the request body is even looked at
    pub async fn authorize(&self, user_id: Uuid) -> Result<QuotaCheck, ImageServiceError> {
        let check = self.quota.check(user_id, ServiceType::ImageGenerate).await?;
        match check.denial {
            Some(QuotaDenial::LimitReached) => {
                tracing::info!(
                    user_id = %user_id,
                    usage_count = check.usage_count,
                    limit_count = check.limit_count,
                    "Image generation limit reached"
                );
                Err(ImageServiceError::QuotaExceeded(check))
            }
            Some(QuotaDenial::AccountUnavailable) => {
                tracing::warn!(user_id = %user_id, reason = ?check.error, "Image generation for unavailable account");
                Err(ImageServiceError::AccountUnavailable(check))
            }
            None => Ok(check),
        }
    }

    /// Generate, store and commit for a caller that already passed `authorize`
    pub async fn generate_authorized(
        &self,
        user_id: Uuid,
        check: QuotaCheck,
        request: GenerationRequest,
        title: String,
        token: CancellationToken,
    ) -> Result<GenerationReceipt, ImageServiceError> {
        if request.prompt.trim().is_empty() {
            return Err(ImageServiceError::Invalid("Prompt is required".to_string()));
        }

        tracing::info!(
            user_id = %user_id,
            model = %request.model,
            size = %request.size,
            reference_images = request.reference_images.len(),
            prompt_length = request.prompt.len(),
            "Image generation request"
        );

        if token.is_cancelled() {
            return Err(ImageServiceError::Cancelled);
        }

        // Run the provider chain
        let outcome = self
            .orchestrator
            .generate(&request, &token)
            .await
            .map_err(|e| match e {
                GenerationError::Cancelled { .. } => ImageServiceError::Cancelled,
                other => ImageServiceError::Generation(other),
            })?;

        if token.is_cancelled() {
            return Err(ImageServiceError::Cancelled);
        }

        // Persist the artifact
        let metadata = ArtifactMetadata {
            owner_id: user_id,
            title,
            prompt: outcome.prompt.clone(),
            model: outcome.model_used.clone(),
            provider: outcome.provider_used.clone(),
            size: request.size.to_string(),
            style: request.style.clone(),
        };
        let artifact_id = self
            .artifacts
            .store(&outcome.image.bytes, &outcome.image.content_type, &metadata)
            .await
            .map_err(|e| ImageServiceError::Storage(e.to_string()))?;

        if token.is_cancelled() {
            tracing::info!(
                user_id = %user_id,
                artifact_id = %artifact_id,
                "Client left after the image was stored, usage not committed"
            );
            return Err(ImageServiceError::Cancelled);
        }

        // Consume quota
        self.quota.commit(user_id, ServiceType::ImageGenerate).await?;

        let usage = match self.quota.check(user_id, ServiceType::ImageGenerate).await {
            Ok(usage) => usage,
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "Usage refresh after commit failed");
                committed_locally(check)
            }
        };

        tracing::info!(
            user_id = %user_id,
            artifact_id = %artifact_id,
            provider = %outcome.provider_used,
            model = %outcome.model_used,
            step = %outcome.step,
            attempts = outcome.attempts.len(),
            usage_count = usage.usage_count,
            "Image generation completed"
        );

        Ok(GenerationReceipt {
            artifact_id,
            usage,
            provider: outcome.provider_used,
            model: outcome.model_used,
            prompt: outcome.prompt,
        })
    }
}

/// Pre-commit check advanced by the one use just committed
fn committed_locally(mut check: QuotaCheck) -> QuotaCheck {
    check.usage_count += 1;
    check.remaining_count = (check.limit_count - check.usage_count).max(0);
    check.allowed = check.usage_count < check.limit_count;
    check.denial = (!check.allowed).then_some(QuotaDenial::LimitReached);
    check
}
