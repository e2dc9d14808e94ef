use super::capability::{
    resolve_profile, InvocationMode, ModelProfile, ProviderKind,
    DEFAULT_REFERENCE_STRENGTH,
};
use super::error::{GenerationError, ProviderError};
use super::model::{
    AttemptOutcome, GenerationOutcome, GenerationRequest, ImageOutput, ProviderAttempt,
    ProviderInput, ProviderOperation, ReferenceConvention, StepKind, Submission,
};
use super::polling::{await_job, cancel_upstream, JobResult, PollSettings};
use crate::infrastructure::providers::ImageProvider;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// One entry of the fallback chain
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedStep {
    pub kind: StepKind,
    pub profile: &'static ModelProfile,
    /// Model id actually invoked; edits may be served by a sibling model
    pub model_id: &'static str,
}

/// Ordered chain of steps for a request
///
/// With reference images: multi-image edit, single-image edit, image-to-image
/// on the primary when it is a job model, image-to-image on the fallback,
/// then text-to-image on the fallback. Without: primary then fallback
/// text-to-image.
pub fn plan_steps(
    primary: &'static ModelProfile,
    fallback: &'static ModelProfile,
    has_references: bool,
) -> Vec<PlannedStep> {
    let mut steps = Vec::new();
    let same_model = primary.key == fallback.key;

    if !has_references {
        steps.push(PlannedStep {
            kind: StepKind::TextToImage,
            profile: primary,
            model_id: primary.model_id,
        });
        if !same_model {
            steps.push(PlannedStep {
                kind: StepKind::TextToImage,
                profile: fallback,
                model_id: fallback.model_id,
            });
        }
        return steps;
    }

    if let Some(via) = primary.multi_edit_via {
        steps.push(PlannedStep {
            kind: StepKind::MultiImageEdit,
            profile: primary,
            model_id: via,
        });
    }
    if let Some(via) = primary.single_edit_via {
        steps.push(PlannedStep {
            kind: StepKind::SingleImageEdit,
            profile: primary,
            model_id: via,
        });
    }
    if primary.mode == InvocationMode::JobPolling
        && primary.image_to_image.is_some()
        && !same_model
    {
        steps.push(PlannedStep {
            kind: StepKind::ImageToImage,
            profile: primary,
            model_id: primary.model_id,
        });
    }
    if fallback.image_to_image.is_some() {
        steps.push(PlannedStep {
            kind: StepKind::ImageToImage,
            profile: fallback,
            model_id: fallback.model_id,
        });
    }
    steps.push(PlannedStep {
        kind: StepKind::TextToImage,
        profile: fallback,
        model_id: fallback.model_id,
    });

    steps
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Selecting,
    Attempting(usize),
    Succeeded,
    Cancelled,
    ExhaustedAllSteps,
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunState::Selecting => write!(f, "selecting"),
            RunState::Attempting(n) => write!(f, "attempting({})", n),
            RunState::Succeeded => write!(f, "succeeded"),
            RunState::Cancelled => write!(f, "cancelled"),
            RunState::ExhaustedAllSteps => write!(f, "exhausted"),
        }
    }
}

enum AttemptResult {
    Image(ImageOutput),
    Failed(ProviderError),
    Cancelled,
}

pub struct ImageOrchestrator {
    providers: HashMap<ProviderKind, Arc<dyn ImageProvider>>,
    fallback: &'static ModelProfile,
    poll: PollSettings,
}

impl ImageOrchestrator {
    /// Unknown fallback keys resolve like unknown request models do
    pub fn new(fallback_model: &str, poll: PollSettings) -> Self {
        Self {
            providers: HashMap::new(),
            fallback: resolve_profile(fallback_model),
            poll,
        }
    }

    pub fn with_provider(mut self, kind: ProviderKind, provider: Arc<dyn ImageProvider>) -> Self {
        self.providers.insert(kind, provider);
        self
    }

    pub fn fallback_profile(&self) -> &'static ModelProfile {
        self.fallback
    }

    pub async fn generate(
        &self,
        request: &GenerationRequest,
        token: &CancellationToken,
    ) -> Result<GenerationOutcome, GenerationError> {
        if self.providers.is_empty() {
            return Err(GenerationError::NotConfigured(
                "no image providers are configured".to_string(),
            ));
        }

        let mut state = RunState::Selecting;
        let primary = resolve_profile(&request.model);
        let steps = plan_steps(primary, self.fallback, request.has_references());

        tracing::info!(
            state = %state,
            model = primary.key,
            fallback = self.fallback.key,
            reference_images = request.reference_images.len(),
            has_mask = request.mask.is_some(),
            steps = steps.len(),
            "Planned generation chain"
        );

        let mut attempts: Vec<ProviderAttempt> = Vec::new();

        for (index, step) in steps.iter().enumerate() {
            state = RunState::Attempting(index + 1);

            if token.is_cancelled() {
                return Err(self.cancelled(attempts));
            }

            let Some(provider) = self.providers.get(&step.profile.provider) else {
                tracing::warn!(state = %state, provider = %step.profile.provider, "Provider not configured, skipping step");
                attempts.push(failed_attempt(
                    step,
                    &step.profile.provider.to_string(),
                    &ProviderError::Unsupported("provider not configured".to_string()),
                ));
                continue;
            };

            let conventions: Vec<Option<ReferenceConvention>> = match step.kind {
                StepKind::ImageToImage => {
                    let primary = step.profile.image_to_image.unwrap_or(ReferenceConvention::InitImage);
                    vec![Some(primary), Some(primary.alternate())]
                }
                _ => vec![None],
            };

            for (retry, convention) in conventions.into_iter().enumerate() {
                let input = build_input(step, request, convention);

                tracing::info!(
                    state = %state,
                    step = %step.kind,
                    provider = provider.name(),
                    model = step.model_id,
                    size = %input.size,
                    convention = ?convention.map(|c| c.image_field()),
                    "Attempting generation step"
                );

                match self.attempt(provider, step.profile.mode, &input, token).await {
                    AttemptResult::Image(image) => {
                        attempts.push(ProviderAttempt {
                            step: step.kind,
                            provider: provider.name().to_string(),
                            model: step.model_id.to_string(),
                            outcome: AttemptOutcome::Succeeded,
                        });

                        // Discard the result if the client left while the provider was working
                        if token.is_cancelled() {
                            return Err(self.cancelled(attempts));
                        }

                        state = RunState::Succeeded;
                        tracing::info!(
                            state = %state,
                            step = %step.kind,
                            provider = provider.name(),
                            model = step.model_id,
                            attempts = attempts.len(),
                            image_size = image.bytes.len(),
                            "Image generated"
                        );

                        return Ok(GenerationOutcome {
                            image,
                            provider_used: provider.name().to_string(),
                            model_used: step.model_id.to_string(),
                            step: step.kind,
                            prompt: input.prompt,
                            attempts,
                        });
                    }
                    AttemptResult::Cancelled => return Err(self.cancelled(attempts)),
                    AttemptResult::Failed(error) => {
                        tracing::warn!(
                            state = %state,
                            step = %step.kind,
                            provider = provider.name(),
                            model = step.model_id,
                            class = %error.class(),
                            error = %error,
                            "Generation step failed"
                        );
                        let rejected_convention = matches!(error, ProviderError::InvalidInput(_));
                        attempts.push(failed_attempt(step, provider.name(), &error));

                        // Only a rejected reference convention earns the second try
                        if retry == 0 && !rejected_convention {
                            break;
                        }
                    }
                }
            }
        }

        state = RunState::ExhaustedAllSteps;
        let error = GenerationError::Exhausted { attempts };
        tracing::error!(state = %state, error = %error, "Every generation step failed");
        Err(error)
    }

    async fn attempt(
        &self,
        provider: &Arc<dyn ImageProvider>,
        mode: InvocationMode,
        input: &ProviderInput,
        token: &CancellationToken,
    ) -> AttemptResult {
        // Submitted in its own task so a job created after cancellation can still be reaped
        let mut submission = {
            let provider = provider.clone();
            let input = input.clone();
            tokio::spawn(async move { provider.submit(&input).await })
        };

        let joined = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            joined = &mut submission => Some(joined),
        };

        let Some(joined) = joined else {
            match mode {
                InvocationMode::Synchronous => submission.abort(),
                InvocationMode::JobPolling => reap_late_job(provider.clone(), submission),
            }
            return AttemptResult::Cancelled;
        };

        let submitted = match joined {
            Ok(result) => result,
            Err(e) => {
                return AttemptResult::Failed(ProviderError::Upstream(format!(
                    "submit task failed: {}",
                    e
                )))
            }
        };

        match submitted {
            Ok(Submission::Completed(image)) => AttemptResult::Image(image),
            Ok(Submission::Pending { job_id }) => {
                tracing::debug!(provider = provider.name(), job_id = %job_id, "Job submitted, polling");
                match await_job(provider.as_ref(), &job_id, self.poll, token).await {
                    JobResult::Completed(image) => AttemptResult::Image(image),
                    JobResult::Failed(error) => AttemptResult::Failed(error),
                    JobResult::Cancelled => AttemptResult::Cancelled,
                }
            }
            Err(error) => AttemptResult::Failed(error),
        }
    }

    fn cancelled(&self, attempts: Vec<ProviderAttempt>) -> GenerationError {
        tracing::info!(
            state = %RunState::Cancelled,
            attempts = attempts.len(),
            "Generation cancelled by client"
        );
        GenerationError::Cancelled { attempts }
    }
}

/// Let an interrupted submit finish in the background and cancel whatever job it created
fn reap_late_job(
    provider: Arc<dyn ImageProvider>,
    submission: JoinHandle<Result<Submission, ProviderError>>,
) {
    tokio::spawn(async move {
        if let Ok(Ok(Submission::Pending { job_id })) = submission.await {
            tracing::info!(provider = provider.name(), job_id = %job_id, "Job created after cancellation");
            cancel_upstream(provider.as_ref(), &job_id).await;
        }
    });
}

fn failed_attempt(step: &PlannedStep, provider: &str, error: &ProviderError) -> ProviderAttempt {
    ProviderAttempt {
        step: step.kind,
        provider: provider.to_string(),
        model: step.model_id.to_string(),
        outcome: AttemptOutcome::Failed {
            class: error.class(),
            reason: error.to_string(),
        },
    }
}

fn build_input(
    step: &PlannedStep,
    request: &GenerationRequest,
    convention: Option<ReferenceConvention>,
) -> ProviderInput {
    let profile = step.profile;
    let prompt = profile.truncate_prompt(&request.prompt);
    let first_reference = request.reference_images.first().cloned();

    let (operation, size, style) = match (step.kind, first_reference) {
        (StepKind::MultiImageEdit, _) => (
            ProviderOperation::MultiImageEdit {
                images: request.reference_images.clone(),
                mask: request.mask.clone(),
            },
            profile.normalize_size_for(step.model_id, request.size),
            None,
        ),
        (StepKind::SingleImageEdit, Some(image)) => (
            ProviderOperation::SingleImageEdit {
                image,
                mask: request.mask.clone(),
            },
            profile.normalize_size_for(step.model_id, request.size),
            None,
        ),
        (StepKind::ImageToImage, Some(image)) => (
            ProviderOperation::ImageToImage {
                image,
                convention: convention.unwrap_or(ReferenceConvention::InitImage),
                strength: DEFAULT_REFERENCE_STRENGTH,
            },
            profile.normalize_size(request.size),
            None,
        ),
        _ => (
            ProviderOperation::TextToImage,
            profile.normalize_size(request.size),
            profile.effective_style(request.style.as_deref()),
        ),
    };

    ProviderInput {
        model_id: step.model_id.to_string(),
        prompt,
        size,
        style,
        operation,
    }
}
