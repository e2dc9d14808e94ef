use crate::error::AppError;

#[derive(Debug, thiserror::Error)]
pub enum QuotaError {
    #[error("dependency error: {0}")]
    Dependency(String),
    #[error("invalid input: {0}")]
    Invalid(String),
}

impl From<AppError> for QuotaError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::BadRequest(msg) => QuotaError::Invalid(msg),
            _ => QuotaError::Dependency(err.to_string()),
        }
    }
}

impl From<QuotaError> for AppError {
    fn from(err: QuotaError) -> Self {
        match err {
            QuotaError::Invalid(msg) => AppError::BadRequest(msg),
            QuotaError::Dependency(msg) => AppError::Internal(msg),
        }
    }
}
