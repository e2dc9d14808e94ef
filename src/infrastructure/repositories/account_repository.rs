use crate::domain::quota::PlanType;
use crate::domain::user::{BillingProfile, User, UserRole};
use crate::error::AppResult;
use crate::infrastructure::db::DbPool;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use std::sync::Arc;
use uuid::Uuid;

/// Read access to accounts and the subscription/payment state behind them.
/// Account creation and billing live elsewhere.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn find_by_id(&self, user_id: Uuid) -> AppResult<Option<User>>;

    async fn find_billing_profile(&self, user_id: Uuid) -> AppResult<Option<BillingProfile>>;
}

#[derive(Debug, FromRow)]
struct BillingProfileRow {
    id: Uuid,
    email: String,
    role: UserRole,
    is_active: bool,
    created_at: DateTime<Utc>,
    plan_type: Option<String>,
    payment_anchor: Option<DateTime<Utc>>,
}

impl From<BillingProfileRow> for BillingProfile {
    fn from(row: BillingProfileRow) -> Self {
        let subscription_plan = row.plan_type.as_deref().and_then(|plan| {
            plan.parse::<PlanType>()
                .map_err(|e| tracing::warn!(user_id = %row.id, error = %e, "Ignoring unknown subscription plan"))
                .ok()
        });

        Self {
            user: User {
                id: row.id,
                email: row.email,
                role: row.role,
                is_active: row.is_active,
                created_at: row.created_at,
            },
            subscription_plan,
            payment_anchor: row.payment_anchor,
        }
    }
}

pub struct AccountRepository {
    pool: Arc<DbPool>,
}

impl AccountRepository {
    pub fn new(pool: Arc<DbPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccountStore for AccountRepository {
    async fn find_by_id(&self, user_id: Uuid) -> AppResult<Option<User>> {
        let pool = self.pool.as_ref();
        let user = sqlx::query_as::<_, User>(
            "SELECT id, email, role, is_active, created_at FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(pool)
        .await?;

        Ok(user)
    }

    /// Payment anchor priority: last completed payment, then the active
    /// subscription's update time, then its creation time.
    async fn find_billing_profile(&self, user_id: Uuid) -> AppResult<Option<BillingProfile>> {
        let pool = self.pool.as_ref();
        let row = sqlx::query_as::<_, BillingProfileRow>(
            r#"
            SELECT
                u.id, u.email, u.role, u.is_active, u.created_at,
                s.plan_type,
                COALESCE(
                    (SELECT p.created_at
                     FROM payments p
                     WHERE p.user_id = u.id AND p.status = 'completed'
                     ORDER BY p.created_at DESC
                     LIMIT 1),
                    s.updated_at,
                    s.created_at
                ) AS payment_anchor
            FROM users u
            LEFT JOIN LATERAL (
                SELECT plan_type, created_at, updated_at
                FROM subscriptions
                WHERE user_id = u.id AND status = 'active'
                ORDER BY updated_at DESC
                LIMIT 1
            ) s ON TRUE
            WHERE u.id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(pool)
        .await?;

        Ok(row.map(BillingProfile::from))
    }
}
