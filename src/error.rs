use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::domain::shared::usage_dto::UsageDto;

/// Non-standard status returned when the client went away mid-generation
pub const CLIENT_CLOSED_REQUEST: u16 = 499;

/// Main application error type
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Authentication failed: {0}")]
    Unauthorized(String),

    #[error("Invalid input: {0}")]
    BadRequest(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("{message}")]
    QuotaExceeded {
        message: String,
        upgrade_message: Option<String>,
        usage: UsageDto,
    },

    #[error("Content policy violation: {0}")]
    PolicyViolation(String),

    #[error("Provider authentication failed: {0}")]
    ProviderAuth(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    #[error("Image generation failed: {0}")]
    ProviderExhausted(String),

    #[error("Request cancelled by client")]
    Cancelled,

    #[error("Internal server error: {0}")]
    Internal(String),
}

/// Error body: a single top-level `error` string plus optional quota details
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upgrade_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageDto>,
}

impl AppError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) | Self::ProviderAuth(_) => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) | Self::PolicyViolation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::QuotaExceeded { .. } | Self::RateLimitExceeded(_) => {
                StatusCode::TOO_MANY_REQUESTS
            }
            Self::Cancelled => StatusCode::from_u16(CLIENT_CLOSED_REQUEST)
                .unwrap_or(StatusCode::BAD_REQUEST),
            Self::Database(_) | Self::ProviderExhausted(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Convert to the user-facing error body
    pub fn to_response(&self) -> ErrorResponse {
        match self {
            Self::QuotaExceeded {
                message,
                upgrade_message,
                usage,
            } => ErrorResponse {
                error: message.clone(),
                upgrade_message: upgrade_message.clone(),
                usage: Some(usage.clone()),
            },
            // Database details stay in the logs
            Self::Database(_) => ErrorResponse {
                error: "Internal server error".to_string(),
                upgrade_message: None,
                usage: None,
            },
            _ => ErrorResponse {
                error: self.to_string(),
                upgrade_message: None,
                usage: None,
            },
        }
    }
}

/// Implement IntoResponse for automatic conversion in handlers
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // A client disconnect is not a failure of ours
        if matches!(self, Self::Cancelled) {
            tracing::info!(status = %status.as_u16(), "Request cancelled by client");
        } else {
            tracing::error!(
                error = %self,
                status = %status.as_u16(),
                "Request failed"
            );
        }

        let error_response = self.to_response();

        (status, Json(error_response)).into_response()
    }
}

/// Custom result type for the application
pub type AppResult<T> = Result<T, AppError>;
