use crate::domain::user::UserRole;
use crate::error::{AppError, AppResult};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Clock skew tolerated on `exp`, in seconds
const EXPIRY_LEEWAY_SECS: u64 = 30;

/// Claims of a session token. Sessions are issued by the account service;
/// this backend only verifies them. `role` is informational, the stored
/// account is authoritative.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    #[serde(default)]
    pub role: Option<UserRole>,
    pub exp: i64,
    pub iat: i64,
}

/// HS256 session token signer and verifier
pub struct JwtManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

impl JwtManager {
    pub fn new(secret: String, expiration_hours: i64) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = EXPIRY_LEEWAY_SECS;

        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            ttl: Duration::hours(expiration_hours),
        }
    }

    /// Sign a session for `user_id`. Used by tooling and tests.
    pub fn generate_token(&self, user_id: Uuid, email: &str, role: UserRole) -> AppResult<String> {
        let issued_at = Utc::now();

        let claims = Claims {
            sub: user_id.to_string(),
            email: email.to_string(),
            role: Some(role),
            exp: (issued_at + self.ttl).timestamp(),
            iat: issued_at.timestamp(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AppError::Internal(format!("Failed to sign session token: {}", e)))
    }

    pub fn validate_token(&self, token: &str) -> AppResult<Claims> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| AppError::Unauthorized(format!("Invalid token: {}", e)))
    }

    /// Verify the token and return the account id it was issued for
    pub fn verify_subject(&self, token: &str) -> AppResult<Uuid> {
        let claims = self.validate_token(token)?;
        claims
            .sub
            .parse::<Uuid>()
            .map_err(|_| AppError::Unauthorized("Token subject is not an account id".to_string()))
    }
}
