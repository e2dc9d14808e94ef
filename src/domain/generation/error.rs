use super::model::ProviderAttempt;
use crate::domain::quota::{QuotaCheck, QuotaError};
use crate::domain::shared::usage_dto::UsageDto;
use crate::error::AppError;

/// Coarse failure category used to pick the HTTP status of a failed chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    PolicyViolation,
    Auth,
    RateLimited,
    InvalidInput,
    Other,
}

impl std::fmt::Display for FailureClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureClass::PolicyViolation => write!(f, "policy_violation"),
            FailureClass::Auth => write!(f, "auth"),
            FailureClass::RateLimited => write!(f, "rate_limited"),
            FailureClass::InvalidInput => write!(f, "invalid_input"),
            FailureClass::Other => write!(f, "other"),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    #[error("content policy violation: {0}")]
    PolicyViolation(String),
    #[error("provider authentication failed: {0}")]
    Auth(String),
    #[error("provider rate limited: {0}")]
    RateLimited(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("job failed: {0}")]
    JobFailed(String),
    #[error("job did not finish after {0} polls")]
    TimedOut(u32),
    #[error("operation not supported: {0}")]
    Unsupported(String),
    #[error("upstream error: {0}")]
    Upstream(String),
}

impl ProviderError {
    pub fn class(&self) -> FailureClass {
        match self {
            ProviderError::PolicyViolation(_) => FailureClass::PolicyViolation,
            ProviderError::Auth(_) => FailureClass::Auth,
            ProviderError::RateLimited(_) => FailureClass::RateLimited,
            ProviderError::InvalidInput(_) => FailureClass::InvalidInput,
            ProviderError::JobFailed(_)
            | ProviderError::TimedOut(_)
            | ProviderError::Unsupported(_)
            | ProviderError::Upstream(_) => FailureClass::Other,
        }
    }

    /// Classify a raw provider message by well-known markers
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();

        if lower.contains("content_policy_violation")
            || lower.contains("safety system")
            || lower.contains("nsfw")
        {
            ProviderError::PolicyViolation(message)
        } else if lower.contains("invalid_api_key")
            || lower.contains("incorrect api key")
            || lower.contains("unauthenticated")
        {
            ProviderError::Auth(message)
        } else if lower.contains("rate_limit") || lower.contains("rate limit") {
            ProviderError::RateLimited(message)
        } else if lower.contains("invalid_request_error") || lower.contains("invalid input") {
            ProviderError::InvalidInput(message)
        } else {
            ProviderError::Upstream(message)
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("generation cancelled after {} attempt(s)", attempts.len())]
    Cancelled { attempts: Vec<ProviderAttempt> },
    #[error("all {} generation step(s) failed: {}", attempts.len(), summarize(attempts))]
    Exhausted { attempts: Vec<ProviderAttempt> },
    #[error("no provider configured for {0}")]
    NotConfigured(String),
}

fn summarize(attempts: &[ProviderAttempt]) -> String {
    attempts
        .iter()
        .map(|a| a.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl GenerationError {
    pub fn attempts(&self) -> &[ProviderAttempt] {
        match self {
            GenerationError::Cancelled { attempts } | GenerationError::Exhausted { attempts } => {
                attempts
            }
            GenerationError::NotConfigured(_) => &[],
        }
    }

    /// Class shared by every failed attempt, if any
    ///
    /// Only policy, auth and rate-limit failures are surfaced; anything else
    /// stays a generic exhaustion.
    pub fn dominant_class(&self) -> Option<FailureClass> {
        let GenerationError::Exhausted { attempts } = self else {
            return None;
        };

        let mut classes = attempts.iter().filter_map(|a| match &a.outcome {
            super::model::AttemptOutcome::Failed { class, .. } => Some(*class),
            super::model::AttemptOutcome::Succeeded => None,
        });

        let first = classes.next()?;
        if !matches!(
            first,
            FailureClass::PolicyViolation | FailureClass::Auth | FailureClass::RateLimited
        ) {
            return None;
        }
        classes.all(|c| c == first).then_some(first)
    }
}

impl From<GenerationError> for AppError {
    fn from(err: GenerationError) -> Self {
        match (&err, err.dominant_class()) {
            (GenerationError::Cancelled { .. }, _) => AppError::Cancelled,
            (_, Some(FailureClass::PolicyViolation)) => AppError::PolicyViolation(
                "The prompt was rejected by the provider's content policy".to_string(),
            ),
            (_, Some(FailureClass::Auth)) => {
                AppError::ProviderAuth("Image provider credentials were rejected".to_string())
            }
            (_, Some(FailureClass::RateLimited)) => AppError::RateLimitExceeded(
                "Image provider is rate limiting requests, try again later".to_string(),
            ),
            (GenerationError::NotConfigured(msg), _) => AppError::Internal(msg.clone()),
            (GenerationError::Exhausted { attempts }, _) => AppError::ProviderExhausted(format!(
                "no provider could produce the image ({} step(s) attempted)",
                attempts.len()
            )),
        }
    }
}

/// Errors of the full generate-store-commit pipeline
#[derive(Debug, thiserror::Error)]
pub enum ImageServiceError {
    #[error("usage limit reached")]
    QuotaExceeded(QuotaCheck),
    #[error("account unavailable")]
    AccountUnavailable(QuotaCheck),
    #[error("invalid input: {0}")]
    Invalid(String),
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error(transparent)]
    Quota(#[from] QuotaError),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("request cancelled")]
    Cancelled,
}

impl From<ImageServiceError> for AppError {
    fn from(err: ImageServiceError) -> Self {
        match err {
            ImageServiceError::QuotaExceeded(check) => {
                let plan = check
                    .plan_type
                    .map(|p| p.to_string())
                    .unwrap_or_else(|| "basic".to_string());
                let upgrade_message = (plan == "basic").then(|| {
                    "Upgrade to the standard or pro plan for more image generations".to_string()
                });
                AppError::QuotaExceeded {
                    message: format!("Image generation limit reached for the {} plan", plan),
                    upgrade_message,
                    usage: UsageDto::from(&check),
                }
            }
            // A denied check is a quota answer whatever the reason
            ImageServiceError::AccountUnavailable(check) => AppError::QuotaExceeded {
                message: check
                    .error
                    .clone()
                    .unwrap_or_else(|| "Account is not available".to_string()),
                upgrade_message: None,
                usage: UsageDto::from(&check),
            },
            ImageServiceError::Invalid(msg) => AppError::BadRequest(msg),
            ImageServiceError::Generation(e) => e.into(),
            ImageServiceError::Quota(e) => e.into(),
            ImageServiceError::Storage(msg) => AppError::Internal(msg),
            ImageServiceError::Cancelled => AppError::Cancelled,
        }
    }
}
