use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::domain::quota::PlanType;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub role: UserRole,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "text")]
#[sqlx(rename_all = "UPPERCASE")]
pub enum UserRole {
    #[serde(rename = "USER")]
    User,
    #[serde(rename = "ADMIN")]
    Admin,
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UserRole::User => write!(f, "USER"),
            UserRole::Admin => write!(f, "ADMIN"),
        }
    }
}

/// Billing view of an account: who the user is, which plan is active and
/// the timestamp monthly reset windows are anchored to.
#[derive(Debug, Clone)]
pub struct BillingProfile {
    pub user: User,
    /// Plan of the active subscription, if any
    pub subscription_plan: Option<PlanType>,
    /// Last completed payment, falling back to the subscription timestamps
    pub payment_anchor: Option<DateTime<Utc>>,
}

impl BillingProfile {
    /// Active subscription wins; admins without one are unlimited; everyone else is basic.
    pub fn plan_type(&self) -> PlanType {
        match self.subscription_plan {
            Some(plan) => plan,
            None if self.user.role == UserRole::Admin => PlanType::Admin,
            None => PlanType::Basic,
        }
    }
}
