use crate::helpers::{at, TestDb};
use chrono::{FixedOffset, Utc};
use imagegen_backend::domain::quota::{
    QuotaLedger, QuotaService, ServiceType, UsageRecord,
};
use imagegen_backend::infrastructure::repositories::{
    AccountRepository, UsageRepository, UsageStore,
};
use pretty_assertions::assert_eq;
use serial_test::serial;
use std::sync::Arc;

#[tokio::test]
#[serial]
#[ignore = "requires docker"]
async fn it_should_create_and_find_a_usage_record() {
    let db = TestDb::new().await;
    let user_id = db.insert_user("USER", Utc::now()).await;
    let repo = UsageRepository::new(db.pool.clone());

    assert!(repo
        .find(user_id, ServiceType::ImageGenerate)
        .await
        .unwrap()
        .is_none());

    let mut record = UsageRecord::new(user_id, ServiceType::ImageGenerate, 1);
    record.next_reset_date = Some(at("2024-03-10T15:00:00Z"));
    repo.create(&record).await.unwrap();
    // A second first-sight insert is ignored
    repo.create(&record).await.unwrap();

    let stored = repo
        .find(user_id, ServiceType::ImageGenerate)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored, record);
    assert!(repo
        .find(user_id, ServiceType::VideoGenerate)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
#[serial]
#[ignore = "requires docker"]
async fn it_should_increment_atomically_under_concurrency() {
    let db = TestDb::new().await;
    let user_id = db.insert_user("USER", Utc::now()).await;
    let repo = Arc::new(UsageRepository::new(db.pool.clone()));

    let tasks: Vec<_> = (0..10)
        .map(|_| {
            let repo = repo.clone();
            tokio::spawn(async move {
                repo.increment(user_id, ServiceType::Productivity, 120)
                    .await
                    .unwrap()
            })
        })
        .collect();
    for task in futures::future::join_all(tasks).await {
        task.unwrap();
    }

    let stored = repo
        .find(user_id, ServiceType::Productivity)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.usage_count, 10);
    assert_eq!(stored.limit_count, 120);
}

#[tokio::test]
#[serial]
#[ignore = "requires docker"]
async fn it_should_reset_only_from_the_expected_boundary() {
    let db = TestDb::new().await;
    let user_id = db.insert_user("USER", Utc::now()).await;
    let repo = UsageRepository::new(db.pool.clone());

    let old_boundary = at("2024-03-01T15:00:00Z");
    let new_boundary = at("2024-03-10T15:00:00Z");
    let mut record = UsageRecord::new(user_id, ServiceType::ImageGenerate, 1);
    record.next_reset_date = Some(old_boundary);
    repo.create(&record).await.unwrap();
    repo.increment(user_id, ServiceType::ImageGenerate, 1)
        .await
        .unwrap();

    let first = repo
        .reset(user_id, ServiceType::ImageGenerate, Some(old_boundary), new_boundary, 1)
        .await
        .unwrap();
    let second = repo
        .reset(user_id, ServiceType::ImageGenerate, Some(old_boundary), new_boundary, 1)
        .await
        .unwrap();

    assert!(first);
    assert!(!second);
    let stored = repo
        .find(user_id, ServiceType::ImageGenerate)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.usage_count, 0);
    assert_eq!(stored.next_reset_date, Some(new_boundary));
}

#[tokio::test]
#[serial]
#[ignore = "requires docker"]
async fn it_should_refresh_the_boundary_without_touching_usage() {
    let db = TestDb::new().await;
    let user_id = db.insert_user("USER", Utc::now()).await;
    let repo = UsageRepository::new(db.pool.clone());

    repo.increment(user_id, ServiceType::VideoGenerate, 1)
        .await
        .unwrap();
    repo.refresh(
        user_id,
        ServiceType::VideoGenerate,
        Some(at("2024-05-02T08:00:00Z")),
        40,
    )
    .await
    .unwrap();

    let stored = repo
        .find(user_id, ServiceType::VideoGenerate)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.usage_count, 1);
    assert_eq!(stored.limit_count, 40);
    assert_eq!(stored.next_reset_date, Some(at("2024-05-02T08:00:00Z")));
}

#[tokio::test]
#[serial]
#[ignore = "requires docker"]
async fn it_should_enforce_the_basic_daily_limit_end_to_end() {
    let db = TestDb::new().await;
    let user_id = db.insert_user("USER", Utc::now()).await;
    let ledger = QuotaService::new(
        Arc::new(AccountRepository::new(db.pool.clone())),
        Arc::new(UsageRepository::new(db.pool.clone())),
        FixedOffset::east_opt(9 * 3600).unwrap(),
    );

    let first = ledger.check(user_id, ServiceType::ImageGenerate).await.unwrap();
    assert!(first.allowed);
    assert_eq!(first.limit_count, 1);

    ledger.commit(user_id, ServiceType::ImageGenerate).await.unwrap();

    let second = ledger.check(user_id, ServiceType::ImageGenerate).await.unwrap();
    assert!(!second.allowed);
    assert_eq!(second.usage_count, 1);
    assert_eq!(second.remaining_count, 0);
    assert!(second.reset_date.unwrap() > Utc::now());
}
