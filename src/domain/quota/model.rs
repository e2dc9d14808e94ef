use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Hash)]
#[sqlx(type_name = "text")]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PlanType {
    Basic,
    Standard,
    Pro,
    Admin,
}

impl std::fmt::Display for PlanType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlanType::Basic => write!(f, "basic"),
            PlanType::Standard => write!(f, "standard"),
            PlanType::Pro => write!(f, "pro"),
            PlanType::Admin => write!(f, "admin"),
        }
    }
}

impl FromStr for PlanType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "basic" => Ok(PlanType::Basic),
            "standard" => Ok(PlanType::Standard),
            "pro" => Ok(PlanType::Pro),
            "admin" => Ok(PlanType::Admin),
            other => Err(format!("unknown plan type: {}", other)),
        }
    }
}

/// Metered services sharing the ledger
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Hash)]
#[sqlx(type_name = "text")]
#[sqlx(rename_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum ServiceType {
    ImageGenerate,
    VideoGenerate,
    Productivity,
}

impl ServiceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::ImageGenerate => "image-generate",
            ServiceType::VideoGenerate => "video-generate",
            ServiceType::Productivity => "productivity",
        }
    }
}

impl std::fmt::Display for ServiceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ServiceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "image-generate" => Ok(ServiceType::ImageGenerate),
            "video-generate" => Ok(ServiceType::VideoGenerate),
            "productivity" => Ok(ServiceType::Productivity),
            other => Err(format!("unknown service type: {}", other)),
        }
    }
}

/// Per (user, service) usage counter
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct UsageRecord {
    pub user_id: Uuid,
    pub service_type: ServiceType,
    pub usage_count: i32,
    pub limit_count: i32,
    pub next_reset_date: Option<DateTime<Utc>>,
}

impl UsageRecord {
    /// Fresh record seen on the first check; the boundary is filled in by the reset transition
    pub fn new(user_id: Uuid, service_type: ServiceType, limit_count: i32) -> Self {
        Self {
            user_id,
            service_type,
            usage_count: 0,
            limit_count,
            next_reset_date: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QuotaDenial {
    LimitReached,
    AccountUnavailable,
}

/// Answer of a ledger check
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QuotaCheck {
    pub allowed: bool,
    pub usage_count: i32,
    pub limit_count: i32,
    pub remaining_count: i32,
    pub reset_date: Option<DateTime<Utc>>,
    pub plan_type: Option<PlanType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub denial: Option<QuotaDenial>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QuotaCheck {
    pub fn from_record(record: &UsageRecord, plan_type: PlanType) -> Self {
        let allowed = record.usage_count < record.limit_count;
        Self {
            allowed,
            usage_count: record.usage_count,
            limit_count: record.limit_count,
            remaining_count: (record.limit_count - record.usage_count).max(0),
            reset_date: record.next_reset_date,
            plan_type: Some(plan_type),
            denial: if allowed {
                None
            } else {
                Some(QuotaDenial::LimitReached)
            },
            error: None,
        }
    }

    /// Denied check for an unknown or deactivated account
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            usage_count: 0,
            limit_count: 0,
            remaining_count: 0,
            reset_date: None,
            plan_type: None,
            denial: Some(QuotaDenial::AccountUnavailable),
            error: Some(reason.into()),
        }
    }
}
