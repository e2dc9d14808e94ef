use anyhow::{bail, Context};
use chrono::{FixedOffset, Offset, Utc};
use serde::Deserialize;
use std::env;
use std::time::Duration;

use crate::domain::generation::PollSettings;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub jwt_secret: String,
    pub jwt_expiration_hours: i64,
    pub environment: Environment,
    pub log_format: LogFormat,
    // Image providers
    pub openai_api_key: Option<String>,
    pub openai_base_url: Option<String>,
    pub replicate_api_token: Option<String>,
    pub replicate_base_url: Option<String>,
    pub fallback_model: String,
    pub poll_interval_ms: u64,
    pub max_poll_attempts: u32,
    // Quota
    pub quota_utc_offset_minutes: i32,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Production,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("PORT is not a valid number")?,
            jwt_secret: env::var("JWT_SECRET").context("JWT_SECRET must be set")?,
            jwt_expiration_hours: env::var("JWT_EXPIRATION_HOURS")
                .unwrap_or_else(|_| "1".to_string())
                .parse()
                .context("JWT_EXPIRATION_HOURS is not a valid number")?,
            environment: match env::var("ENVIRONMENT")
                .unwrap_or_else(|_| "development".to_string())
                .as_str()
            {
                "production" => Environment::Production,
                _ => Environment::Development,
            },
            log_format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
            openai_api_key: optional("OPENAI_API_KEY"),
            openai_base_url: optional("OPENAI_BASE_URL"),
            replicate_api_token: optional("REPLICATE_API_TOKEN"),
            replicate_base_url: optional("REPLICATE_BASE_URL"),
            fallback_model: env::var("FALLBACK_MODEL")
                .unwrap_or_else(|_| "Stable Diffusion XL".to_string()),
            poll_interval_ms: env::var("POLL_INTERVAL_MS")
                .unwrap_or_else(|_| "1000".to_string())
                .parse()
                .context("POLL_INTERVAL_MS is not a valid number")?,
            max_poll_attempts: env::var("MAX_POLL_ATTEMPTS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .context("MAX_POLL_ATTEMPTS is not a valid number")?,
            quota_utc_offset_minutes: env::var("QUOTA_UTC_OFFSET_MINUTES")
                .unwrap_or_else(|_| "540".to_string())
                .parse()
                .context("QUOTA_UTC_OFFSET_MINUTES is not a valid number")?,
        };

        if offset_from_minutes(config.quota_utc_offset_minutes).is_none() {
            bail!("QUOTA_UTC_OFFSET_MINUTES must be between -840 and 840");
        }

        Ok(config)
    }

    pub fn is_development(&self) -> bool {
        self.environment == Environment::Development
    }

    pub fn poll_settings(&self) -> PollSettings {
        PollSettings {
            interval: Duration::from_millis(self.poll_interval_ms),
            max_attempts: self.max_poll_attempts.max(1),
        }
    }

    /// Offset whose midnight ends the daily quota window
    pub fn quota_offset(&self) -> FixedOffset {
        offset_from_minutes(self.quota_utc_offset_minutes).unwrap_or_else(|| Utc.fix())
    }
}

/// Real-world offsets stay within fourteen hours of UTC
const MAX_OFFSET_MINUTES: u32 = 14 * 60;

fn offset_from_minutes(minutes: i32) -> Option<FixedOffset> {
    if minutes.unsigned_abs() > MAX_OFFSET_MINUTES {
        return None;
    }
    FixedOffset::east_opt(minutes.checked_mul(60)?)
}
