use super::error::ProviderError;
use super::model::{ImageOutput, JobStatus};
use crate::infrastructure::providers::ImageProvider;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(1000),
            max_attempts: 60,
        }
    }
}

/// How a polled job ended
#[derive(Debug)]
pub enum JobResult {
    Completed(ImageOutput),
    Failed(ProviderError),
    Cancelled,
}

/// Drive a pending job to a terminal state
///
/// Every wait is raced against the token. On cancellation, on a failed poll
/// or when the poll budget runs out the upstream job is cancelled best-effort.
pub async fn await_job(
    provider: &dyn ImageProvider,
    job_id: &str,
    settings: PollSettings,
    token: &CancellationToken,
) -> JobResult {
    for attempt in 1..=settings.max_attempts {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                cancel_upstream(provider, job_id).await;
                return JobResult::Cancelled;
            }
            _ = tokio::time::sleep(settings.interval) => {}
        }

        if token.is_cancelled() {
            cancel_upstream(provider, job_id).await;
            return JobResult::Cancelled;
        }

        match provider.poll(job_id).await {
            Ok(JobStatus::Running) => {
                tracing::debug!(provider = provider.name(), job_id = %job_id, attempt, "Job still running");
            }
            Ok(JobStatus::Succeeded(output)) => return JobResult::Completed(output),
            Ok(JobStatus::Failed(reason)) => {
                return JobResult::Failed(match ProviderError::from_message(reason.clone()) {
                    ProviderError::Upstream(_) => ProviderError::JobFailed(reason),
                    classified => classified,
                })
            }
            Err(e) => {
                // The job may still be running upstream
                cancel_upstream(provider, job_id).await;
                return JobResult::Failed(e);
            }
        }
    }

    tracing::warn!(
        provider = provider.name(),
        job_id = %job_id,
        max_attempts = settings.max_attempts,
        "Job did not finish within the poll budget"
    );
    cancel_upstream(provider, job_id).await;
    JobResult::Failed(ProviderError::TimedOut(settings.max_attempts))
}

pub(super) async fn cancel_upstream(provider: &dyn ImageProvider, job_id: &str) {
    if let Err(e) = provider.cancel(job_id).await {
        tracing::warn!(provider = provider.name(), job_id = %job_id, error = %e, "Upstream cancel failed");
    } else {
        tracing::info!(provider = provider.name(), job_id = %job_id, "Upstream job cancelled");
    }
}
