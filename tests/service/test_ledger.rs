use crate::support::{InMemoryAccountStore, InMemoryUsageStore};
use chrono::{DateTime, FixedOffset, Utc};
use imagegen_backend::domain::quota::{
    PlanType, QuotaDenial, QuotaLedger, QuotaService, ServiceType, UsageRecord,
    UNLIMITED_SENTINEL,
};
use imagegen_backend::domain::user::UserRole;
use pretty_assertions::assert_eq;
use std::sync::Arc;

fn kst() -> FixedOffset {
    FixedOffset::east_opt(9 * 3600).unwrap()
}

fn at(rfc3339: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(rfc3339)
        .unwrap()
        .with_timezone(&Utc)
}

struct Ledger {
    accounts: Arc<InMemoryAccountStore>,
    usage: Arc<InMemoryUsageStore>,
    service: QuotaService,
}

fn ledger() -> Ledger {
    let accounts = Arc::new(InMemoryAccountStore::default());
    let usage = Arc::new(InMemoryUsageStore::default());
    let service = QuotaService::new(accounts.clone(), usage.clone(), kst());
    Ledger {
        accounts,
        usage,
        service,
    }
}

#[tokio::test]
async fn it_should_create_the_record_on_first_check_without_consuming() {
    let ledger = ledger();
    let user_id = ledger.accounts.add_basic_user();
    let now = at("2024-03-10T03:00:00Z");

    let first = ledger
        .service
        .check_at(user_id, ServiceType::ImageGenerate, now)
        .await
        .unwrap();
    let second = ledger
        .service
        .check_at(user_id, ServiceType::ImageGenerate, now)
        .await
        .unwrap();

    assert!(first.allowed);
    assert_eq!(first.usage_count, 0);
    assert_eq!(first.limit_count, 1);
    assert_eq!(first.plan_type, Some(PlanType::Basic));
    assert_eq!(first.reset_date, Some(at("2024-03-10T15:00:00Z")));
    assert_eq!(first, second);

    let record = ledger.usage.get(user_id, ServiceType::ImageGenerate).unwrap();
    assert_eq!(record.usage_count, 0);
}

#[tokio::test]
async fn it_should_deny_a_basic_user_after_one_use() {
    let ledger = ledger();
    let user_id = ledger.accounts.add_basic_user();

    let before = ledger
        .service
        .check(user_id, ServiceType::ImageGenerate)
        .await
        .unwrap();
    assert!(before.allowed);

    ledger
        .service
        .commit(user_id, ServiceType::ImageGenerate)
        .await
        .unwrap();

    let after = ledger
        .service
        .check(user_id, ServiceType::ImageGenerate)
        .await
        .unwrap();
    assert!(!after.allowed);
    assert_eq!(after.usage_count, 1);
    assert_eq!(after.remaining_count, 0);
    assert_eq!(after.denial, Some(QuotaDenial::LimitReached));
}

#[tokio::test]
async fn it_should_count_exactly_one_use_per_commit() {
    let ledger = ledger();
    let user_id = ledger
        .accounts
        .add_user(UserRole::User, Some(PlanType::Pro), Some(Utc::now()));

    let mut previous = 0;
    for _ in 0..3 {
        ledger
            .service
            .check(user_id, ServiceType::ImageGenerate)
            .await
            .unwrap();
        ledger
            .service
            .commit(user_id, ServiceType::ImageGenerate)
            .await
            .unwrap();
        let check = ledger
            .service
            .check(user_id, ServiceType::ImageGenerate)
            .await
            .unwrap();
        assert_eq!(check.usage_count, previous + 1);
        previous = check.usage_count;
    }

    let check = ledger
        .service
        .check(user_id, ServiceType::ImageGenerate)
        .await
        .unwrap();
    assert_eq!(check.usage_count, 3);
    assert_eq!(check.limit_count, 180);
    assert_eq!(check.remaining_count, 177);
}

#[tokio::test]
async fn it_should_reset_daily_usage_across_skipped_boundaries() {
    let ledger = ledger();
    let user_id = ledger.accounts.add_basic_user();
    ledger.usage.put(UsageRecord {
        user_id,
        service_type: ServiceType::ImageGenerate,
        usage_count: 1,
        limit_count: 1,
        next_reset_date: Some(at("2024-03-05T15:00:00Z")),
    });

    let now = at("2024-03-10T03:00:00Z");
    let check = ledger
        .service
        .check_at(user_id, ServiceType::ImageGenerate, now)
        .await
        .unwrap();

    assert!(check.allowed);
    assert_eq!(check.usage_count, 0);
    assert_eq!(check.reset_date, Some(at("2024-03-10T15:00:00Z")));
}

#[tokio::test]
async fn it_should_reset_monthly_usage_on_the_payment_anchor() {
    let ledger = ledger();
    let anchor = at("2024-01-15T10:00:00Z");
    let user_id = ledger
        .accounts
        .add_user(UserRole::User, Some(PlanType::Standard), Some(anchor));
    ledger.usage.put(UsageRecord {
        user_id,
        service_type: ServiceType::ImageGenerate,
        usage_count: 42,
        limit_count: 80,
        next_reset_date: Some(at("2024-02-15T10:00:00Z")),
    });

    // Three months and five days after the anchor
    let now = at("2024-04-20T10:00:00Z");
    let check = ledger
        .service
        .check_at(user_id, ServiceType::ImageGenerate, now)
        .await
        .unwrap();

    assert_eq!(check.usage_count, 0);
    assert_eq!(check.limit_count, 80);
    assert_eq!(check.reset_date, Some(at("2024-05-15T10:00:00Z")));
}

#[tokio::test]
async fn it_should_not_reset_twice_in_the_same_window() {
    let ledger = ledger();
    let user_id = ledger.accounts.add_basic_user();
    ledger.usage.put(UsageRecord {
        user_id,
        service_type: ServiceType::ImageGenerate,
        usage_count: 1,
        limit_count: 1,
        next_reset_date: Some(at("2024-03-01T15:00:00Z")),
    });
    let now = at("2024-03-10T03:00:00Z");

    let reset = ledger
        .service
        .check_at(user_id, ServiceType::ImageGenerate, now)
        .await
        .unwrap();
    assert_eq!(reset.usage_count, 0);

    ledger
        .service
        .commit(user_id, ServiceType::ImageGenerate)
        .await
        .unwrap();

    let again = ledger
        .service
        .check_at(user_id, ServiceType::ImageGenerate, now)
        .await
        .unwrap();
    assert_eq!(again.usage_count, 1);
    assert!(!again.allowed);
    assert_eq!(again.reset_date, reset.reset_date);
}

#[tokio::test]
async fn it_should_give_admins_the_unlimited_sentinel() {
    let ledger = ledger();
    let user_id = ledger.accounts.add_user(UserRole::Admin, None, None);

    for service in [
        ServiceType::ImageGenerate,
        ServiceType::VideoGenerate,
        ServiceType::Productivity,
    ] {
        let check = ledger.service.check(user_id, service).await.unwrap();
        assert!(check.allowed);
        assert_eq!(check.limit_count, UNLIMITED_SENTINEL);
        assert_eq!(check.plan_type, Some(PlanType::Admin));
    }
}

#[tokio::test]
async fn it_should_prefer_the_subscription_plan_over_the_admin_role() {
    let ledger = ledger();
    let user_id = ledger
        .accounts
        .add_user(UserRole::Admin, Some(PlanType::Standard), Some(Utc::now()));

    let check = ledger
        .service
        .check(user_id, ServiceType::VideoGenerate)
        .await
        .unwrap();
    assert_eq!(check.plan_type, Some(PlanType::Standard));
    assert_eq!(check.limit_count, 20);
}

#[tokio::test]
async fn it_should_deny_unknown_and_inactive_accounts_without_a_record() {
    let ledger = ledger();
    let unknown = uuid::Uuid::new_v4();
    let inactive = ledger.accounts.add_basic_user();
    ledger.accounts.deactivate(inactive);

    for user_id in [unknown, inactive] {
        let check = ledger
            .service
            .check(user_id, ServiceType::ImageGenerate)
            .await
            .unwrap();
        assert!(!check.allowed);
        assert_eq!(check.denial, Some(QuotaDenial::AccountUnavailable));
        assert!(check.error.is_some());
    }
    assert_eq!(ledger.usage.len(), 0);
}

#[tokio::test]
async fn it_should_correct_a_stale_stored_limit() {
    let ledger = ledger();
    let user_id = ledger
        .accounts
        .add_user(UserRole::User, Some(PlanType::Pro), Some(Utc::now()));
    // Row seeded with the basic limit before the upgrade
    ledger
        .service
        .commit(user_id, ServiceType::ImageGenerate)
        .await
        .unwrap();

    let check = ledger
        .service
        .check(user_id, ServiceType::ImageGenerate)
        .await
        .unwrap();
    assert!(check.allowed);
    assert_eq!(check.usage_count, 1);
    assert_eq!(check.limit_count, 180);
    assert_eq!(
        ledger
            .usage
            .get(user_id, ServiceType::ImageGenerate)
            .unwrap()
            .limit_count,
        180
    );
}
