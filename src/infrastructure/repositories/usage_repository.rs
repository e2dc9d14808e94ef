use crate::domain::quota::{ServiceType, UsageRecord};
use crate::error::AppResult;
use crate::infrastructure::db::DbPool;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

/// Storage for per (user, service) usage counters.
///
/// Writes are split so that a boundary refresh never overwrites a concurrent
/// increment: only `reset` touches `usage_count` besides `increment`.
#[async_trait]
pub trait UsageStore: Send + Sync {
    async fn find(&self, user_id: Uuid, service: ServiceType) -> AppResult<Option<UsageRecord>>;

    /// Insert a first-sight record; a concurrent insert wins silently
    async fn create(&self, record: &UsageRecord) -> AppResult<()>;

    /// Zero the counter if the stored boundary is still `previous_boundary`.
    /// Returns false when another request already reset it.
    async fn reset(
        &self,
        user_id: Uuid,
        service: ServiceType,
        previous_boundary: Option<DateTime<Utc>>,
        next_boundary: DateTime<Utc>,
        limit_count: i32,
    ) -> AppResult<bool>;

    /// Update boundary and limit without touching the counter
    async fn refresh(
        &self,
        user_id: Uuid,
        service: ServiceType,
        next_boundary: Option<DateTime<Utc>>,
        limit_count: i32,
    ) -> AppResult<()>;

    /// Atomically add one use, creating the row if needed. Returns the new count.
    async fn increment(
        &self,
        user_id: Uuid,
        service: ServiceType,
        limit_count: i32,
    ) -> AppResult<i32>;
}

pub struct UsageRepository {
    pool: Arc<DbPool>,
}

impl UsageRepository {
    pub fn new(pool: Arc<DbPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UsageStore for UsageRepository {
    async fn find(&self, user_id: Uuid, service: ServiceType) -> AppResult<Option<UsageRecord>> {
        let pool = self.pool.as_ref();

        let usage = sqlx::query_as::<_, UsageRecord>(
            r#"
            SELECT user_id, service_type, usage_count, limit_count, next_reset_date
            FROM usage
            WHERE user_id = $1 AND service_type = $2
            "#,
        )
        .bind(user_id)
        .bind(service)
        .fetch_optional(pool)
        .await?;

        Ok(usage)
    }

    async fn create(&self, record: &UsageRecord) -> AppResult<()> {
        let pool = self.pool.as_ref();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO usage (user_id, service_type, usage_count, limit_count, next_reset_date, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $6)
            ON CONFLICT (user_id, service_type) DO NOTHING
            "#,
        )
        .bind(record.user_id)
        .bind(record.service_type)
        .bind(record.usage_count)
        .bind(record.limit_count)
        .bind(record.next_reset_date)
        .bind(now)
        .execute(pool)
        .await?;

        Ok(())
    }

    async fn reset(
        &self,
        user_id: Uuid,
        service: ServiceType,
        previous_boundary: Option<DateTime<Utc>>,
        next_boundary: DateTime<Utc>,
        limit_count: i32,
    ) -> AppResult<bool> {
        let pool = self.pool.as_ref();

        let result = sqlx::query(
            r#"
            UPDATE usage
            SET usage_count = 0, next_reset_date = $3, limit_count = $4, updated_at = $5
            WHERE user_id = $1 AND service_type = $2
              AND next_reset_date IS NOT DISTINCT FROM $6
            "#,
        )
        .bind(user_id)
        .bind(service)
        .bind(next_boundary)
        .bind(limit_count)
        .bind(Utc::now())
        .bind(previous_boundary)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn refresh(
        &self,
        user_id: Uuid,
        service: ServiceType,
        next_boundary: Option<DateTime<Utc>>,
        limit_count: i32,
    ) -> AppResult<()> {
        let pool = self.pool.as_ref();

        sqlx::query(
            r#"
            UPDATE usage
            SET next_reset_date = $3, limit_count = $4, updated_at = $5
            WHERE user_id = $1 AND service_type = $2
            "#,
        )
        .bind(user_id)
        .bind(service)
        .bind(next_boundary)
        .bind(limit_count)
        .bind(Utc::now())
        .execute(pool)
        .await?;

        Ok(())
    }

    async fn increment(
        &self,
        user_id: Uuid,
        service: ServiceType,
        limit_count: i32,
    ) -> AppResult<i32> {
        let pool = self.pool.as_ref();
        let now = Utc::now();

        let usage_count: i32 = sqlx::query_scalar(
            r#"
            INSERT INTO usage (user_id, service_type, usage_count, limit_count, created_at, updated_at)
            VALUES ($1, $2, 1, $3, $4, $4)
            ON CONFLICT (user_id, service_type)
            DO UPDATE SET
                usage_count = usage.usage_count + 1,
                updated_at = $4
            RETURNING usage_count
            "#,
        )
        .bind(user_id)
        .bind(service)
        .bind(limit_count)
        .bind(now)
        .fetch_one(pool)
        .await?;

        Ok(usage_count)
    }
}
