use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::auth::JwtManager;
use crate::domain::user::UserRole;
use crate::error::{AppError, AppResult};
use crate::infrastructure::config::Config;
use crate::infrastructure::repositories::AccountStore;

/// Caller identity placed in request extensions once the session is verified
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub email: String,
    pub role: UserRole,
}

/// Shared by every authenticated route group
pub struct AuthState {
    accounts: Arc<dyn AccountStore>,
    tokens: JwtManager,
}

impl AuthState {
    pub fn new(accounts: Arc<dyn AccountStore>, config: &Config) -> Self {
        Self {
            accounts,
            tokens: JwtManager::new(config.jwt_secret.clone(), config.jwt_expiration_hours),
        }
    }
}

fn bearer_token(headers: &HeaderMap) -> AppResult<&str> {
    let value = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("Missing authorization header".to_string()))?;

    match value.split_once(' ') {
        Some((scheme, token)) if scheme.eq_ignore_ascii_case("bearer") && !token.is_empty() => {
            Ok(token.trim())
        }
        _ => Err(AppError::Unauthorized(
            "Invalid authorization format".to_string(),
        )),
    }
}

/// Verify the bearer session and resolve it to a live account
pub async fn auth_middleware(
    State(auth): State<Arc<AuthState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let user_id = auth.tokens.verify_subject(bearer_token(request.headers())?)?;

    // Sessions outlive deactivation
    let user = match auth.accounts.find_by_id(user_id).await? {
        Some(user) if user.is_active => user,
        Some(_) => {
            tracing::debug!(user_id = %user_id, "Rejected session of inactive account");
            return Err(AppError::Unauthorized("User account is inactive".to_string()));
        }
        None => {
            tracing::debug!(user_id = %user_id, "Rejected session of unknown account");
            return Err(AppError::Unauthorized("User not found".to_string()));
        }
    };

    request.extensions_mut().insert(AuthUser {
        user_id: user.id,
        email: user.email,
        role: user.role,
    });

    Ok(next.run(request).await)
}
