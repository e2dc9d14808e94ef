use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::quota::QuotaCheck;

/// Usage block returned alongside generated images and quota errors
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UsageDto {
    pub usage_count: i32,
    pub limit_count: i32,
    pub remaining_count: i32,
    pub reset_date: Option<DateTime<Utc>>,
    pub plan_type: Option<String>,
}

impl From<&QuotaCheck> for UsageDto {
    fn from(check: &QuotaCheck) -> Self {
        Self {
            usage_count: check.usage_count,
            limit_count: check.limit_count,
            remaining_count: check.remaining_count,
            reset_date: check.reset_date,
            plan_type: check.plan_type.map(|plan| plan.to_string()),
        }
    }
}
