use super::error::QuotaError;
use super::limits::limit_for;
use super::model::{QuotaCheck, ServiceType, UsageRecord};
use super::reset::compute_next_state;
use crate::infrastructure::repositories::{AccountStore, UsageStore};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use std::sync::Arc;
use uuid::Uuid;

#[async_trait]
pub trait QuotaLedger: Send + Sync {
    /// Check whether one more use is allowed
    ///
    /// Never increments usage. May create the usage record on first sight
    /// and may apply the lazy reset when the window boundary has passed.
    async fn check(&self, user_id: Uuid, service: ServiceType) -> Result<QuotaCheck, QuotaError>;

    /// Record exactly one consumption
    ///
    /// Only call after a generation fully succeeded and was not cancelled;
    /// there is no rollback.
    async fn commit(&self, user_id: Uuid, service: ServiceType) -> Result<(), QuotaError>;
}

pub struct QuotaService {
    account_store: Arc<dyn AccountStore>,
    usage_store: Arc<dyn UsageStore>,
    reset_offset: FixedOffset,
}

impl QuotaService {
    pub fn new(
        account_store: Arc<dyn AccountStore>,
        usage_store: Arc<dyn UsageStore>,
        reset_offset: FixedOffset,
    ) -> Self {
        Self {
            account_store,
            usage_store,
            reset_offset,
        }
    }

    /// `check` against an explicit clock
    pub async fn check_at(
        &self,
        user_id: Uuid,
        service: ServiceType,
        now: DateTime<Utc>,
    ) -> Result<QuotaCheck, QuotaError> {
        let profile = self
            .account_store
            .find_billing_profile(user_id)
            .await
            .map_err(|e| QuotaError::Dependency(e.to_string()))?;

        let profile = match profile {
            Some(profile) if profile.user.is_active => profile,
            Some(_) => {
                tracing::warn!(user_id = %user_id, service = %service, "Quota check for inactive account");
                return Ok(QuotaCheck::unavailable("User account is inactive"));
            }
            None => {
                tracing::warn!(user_id = %user_id, service = %service, "Quota check for unknown account");
                return Ok(QuotaCheck::unavailable("User not found"));
            }
        };

        let plan = profile.plan_type();
        let limit = limit_for(plan, service);
        let cadence = plan.cadence(profile.payment_anchor, profile.user.created_at);

        let stored = self
            .usage_store
            .find(user_id, service)
            .await
            .map_err(|e| QuotaError::Dependency(e.to_string()))?;
        let is_new = stored.is_none();
        let stored = stored.unwrap_or_else(|| UsageRecord::new(user_id, service, limit));

        let transition = compute_next_state(now, &stored, &cadence, self.reset_offset);
        let mut record = transition.record.clone();
        record.limit_count = limit;

        if is_new {
            self.usage_store
                .create(&record)
                .await
                .map_err(|e| QuotaError::Dependency(e.to_string()))?;
        } else if transition.reset_applied {
            let next_boundary = record.next_reset_date.unwrap_or(now);
            let applied = self
                .usage_store
                .reset(user_id, service, stored.next_reset_date, next_boundary, limit)
                .await
                .map_err(|e| QuotaError::Dependency(e.to_string()))?;

            if applied {
                tracing::info!(
                    user_id = %user_id,
                    service = %service,
                    plan = %plan,
                    previous_usage = stored.usage_count,
                    next_reset_date = %next_boundary,
                    "Usage window reset"
                );
            } else {
                // Another request reset the window first; report what is stored now
                tracing::debug!(user_id = %user_id, service = %service, "Usage window already reset");
                if let Some(current) = self
                    .usage_store
                    .find(user_id, service)
                    .await
                    .map_err(|e| QuotaError::Dependency(e.to_string()))?
                {
                    record = current;
                    record.limit_count = limit;
                }
            }
        } else if transition.boundary_refreshed || stored.limit_count != limit {
            tracing::debug!(
                user_id = %user_id,
                service = %service,
                previous_reset_date = ?stored.next_reset_date,
                next_reset_date = ?record.next_reset_date,
                "Refreshing usage boundary"
            );
            self.usage_store
                .refresh(user_id, service, record.next_reset_date, limit)
                .await
                .map_err(|e| QuotaError::Dependency(e.to_string()))?;
        }

        let check = QuotaCheck::from_record(&record, plan);

        tracing::info!(
            user_id = %user_id,
            service = %service,
            plan = %plan,
            usage_count = check.usage_count,
            limit_count = check.limit_count,
            allowed = check.allowed,
            "Quota checked"
        );

        Ok(check)
    }
}

#[async_trait]
impl QuotaLedger for QuotaService {
    async fn check(&self, user_id: Uuid, service: ServiceType) -> Result<QuotaCheck, QuotaError> {
        self.check_at(user_id, service, Utc::now()).await
    }

    async fn commit(&self, user_id: Uuid, service: ServiceType) -> Result<(), QuotaError> {
        // The basic limit only seeds a row that was never checked; the next check corrects it
        let seed_limit = limit_for(super::model::PlanType::Basic, service);
        let usage_count = self
            .usage_store
            .increment(user_id, service, seed_limit)
            .await
            .map_err(|e| QuotaError::Dependency(e.to_string()))?;

        tracing::info!(
            user_id = %user_id,
            service = %service,
            usage_count = usage_count,
            "Usage committed"
        );

        Ok(())
    }
}
