use crate::domain::generation::{JobStatus, ProviderError, ProviderInput, Submission};
use async_trait::async_trait;

/// Uniform interface over image generation backends.
///
/// Synchronous providers answer `submit` with `Submission::Completed`.
/// Job-style providers answer with `Submission::Pending` and are then driven
/// through `poll` until the job reaches a terminal state.
///
/// Implementations are responsible for:
/// - Mapping `ProviderInput` onto the provider's wire format
/// - Classifying provider failures into `ProviderError`
/// - Downloading or decoding the final image bytes
#[async_trait]
pub trait ImageProvider: Send + Sync {
    /// Short identifier used in logs and attempt records
    fn name(&self) -> &str;

    async fn submit(&self, input: &ProviderInput) -> Result<Submission, ProviderError>;

    /// Fetch the current status of a pending job
    async fn poll(&self, job_id: &str) -> Result<JobStatus, ProviderError> {
        Err(ProviderError::Unsupported(format!(
            "{} does not run background jobs (job {})",
            self.name(),
            job_id
        )))
    }

    /// Best-effort upstream cancellation; failures are only logged by callers
    async fn cancel(&self, _job_id: &str) -> Result<(), ProviderError> {
        Ok(())
    }
}
