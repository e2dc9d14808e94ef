use crate::support::{
    png, InMemoryAccountStore, InMemoryArtifactStore, InMemoryUsageStore, Script,
    ScriptedProvider, SpyLedger,
};
use chrono::FixedOffset;
use imagegen_backend::domain::generation::{
    GenerationRequest, ImageDimensions, ImageGenerationService, ImageOrchestrator,
    ImageServiceError, PollSettings, ProviderError, ProviderKind,
};
use imagegen_backend::domain::quota::{QuotaLedger, QuotaService, ServiceType};
use imagegen_backend::error::AppError;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

struct Pipeline {
    service: ImageGenerationService,
    artifacts: Arc<InMemoryArtifactStore>,
    openai: Arc<ScriptedProvider>,
}

fn pipeline(ledger: Arc<dyn QuotaLedger>, openai_script: Vec<Script>) -> Pipeline {
    let openai = Arc::new(ScriptedProvider::new("openai", openai_script));
    let replicate = Arc::new(ScriptedProvider::new(
        "replicate",
        vec![Script::Fail(ProviderError::Upstream("fallback down".into()))],
    ));
    let orchestrator = ImageOrchestrator::new(
        "Stable Diffusion XL",
        PollSettings {
            interval: Duration::from_millis(2),
            max_attempts: 5,
        },
    )
    .with_provider(ProviderKind::OpenAi, openai.clone())
    .with_provider(ProviderKind::Replicate, replicate);

    let artifacts = Arc::new(InMemoryArtifactStore::default());
    let service = ImageGenerationService::new(ledger, Arc::new(orchestrator), artifacts.clone());

    Pipeline {
        service,
        artifacts,
        openai,
    }
}

fn request() -> GenerationRequest {
    GenerationRequest {
        prompt: "a watercolor fox".to_string(),
        model: "DALL-E 3".to_string(),
        style: None,
        size: ImageDimensions::new(1024, 1024),
        reference_images: vec![],
        mask: None,
    }
}

#[tokio::test]
async fn it_should_store_and_commit_once_on_success() {
    let ledger = Arc::new(SpyLedger::allowing());
    let pipeline = pipeline(ledger.clone(), vec![Script::Complete(png(1))]);
    let user_id = Uuid::new_v4();

    let receipt = pipeline
        .service
        .generate_for_user(user_id, request(), "a watercolor fox".into(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(ledger.commits(), 1);
    assert_eq!(ledger.checks(), 2);
    assert_eq!(pipeline.artifacts.len(), 1);
    assert_eq!(receipt.provider, "openai");

    let metadata = pipeline.artifacts.metadata(receipt.artifact_id).unwrap();
    assert_eq!(metadata.owner_id, user_id);
    assert_eq!(metadata.model, "dall-e-3");
    assert_eq!(metadata.size, "1024x1024");
}

#[tokio::test]
async fn it_should_not_call_providers_when_quota_is_exhausted() {
    let ledger = Arc::new(SpyLedger::denying());
    let pipeline = pipeline(ledger.clone(), vec![Script::Complete(png(1))]);

    let error = pipeline
        .service
        .generate_for_user(Uuid::new_v4(), request(), "t".into(), CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(error, ImageServiceError::QuotaExceeded(_)));
    assert_eq!(pipeline.openai.calls(), 0);
    assert_eq!(ledger.commits(), 0);

    match AppError::from(error) {
        AppError::QuotaExceeded {
            upgrade_message,
            usage,
            ..
        } => {
            assert!(upgrade_message.is_some());
            assert_eq!(usage.remaining_count, 0);
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn it_should_never_commit_when_cancelled_mid_generation() {
    let ledger = Arc::new(SpyLedger::allowing());
    let pipeline = Arc::new(pipeline(ledger.clone(), vec![Script::Hang]));
    let token = CancellationToken::new();

    let task = {
        let pipeline = pipeline.clone();
        let token = token.clone();
        tokio::spawn(async move {
            pipeline
                .service
                .generate_for_user(Uuid::new_v4(), request(), "t".into(), token)
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(30)).await;
    token.cancel();

    let result = tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .expect("pipeline did not stop after cancellation")
        .unwrap();

    assert!(matches!(result, Err(ImageServiceError::Cancelled)));
    assert_eq!(ledger.commits(), 0);
    assert_eq!(pipeline.artifacts.len(), 0);
}

#[tokio::test]
async fn it_should_never_commit_when_the_client_leaves_as_the_image_arrives() {
    let ledger = Arc::new(SpyLedger::allowing());
    let token = CancellationToken::new();
    let pipeline = pipeline(
        ledger.clone(),
        vec![Script::CompleteAndCancel(token.clone(), png(1))],
    );

    let result = pipeline
        .service
        .generate_for_user(Uuid::new_v4(), request(), "t".into(), token)
        .await;

    assert!(matches!(result, Err(ImageServiceError::Cancelled)));
    assert_eq!(ledger.commits(), 0);
    assert_eq!(pipeline.artifacts.len(), 0);
}

#[tokio::test]
async fn it_should_not_commit_when_every_provider_fails() {
    let ledger = Arc::new(SpyLedger::allowing());
    let pipeline = pipeline(
        ledger.clone(),
        vec![Script::Fail(ProviderError::Upstream("primary down".into()))],
    );

    let error = pipeline
        .service
        .generate_for_user(Uuid::new_v4(), request(), "t".into(), CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(error, ImageServiceError::Generation(_)));
    assert_eq!(ledger.commits(), 0);
    assert_eq!(pipeline.artifacts.len(), 0);
}

#[tokio::test]
async fn it_should_reject_an_empty_prompt() {
    let ledger = Arc::new(SpyLedger::allowing());
    let pipeline = pipeline(ledger.clone(), vec![]);
    let mut request = request();
    request.prompt = "   ".to_string();

    let error = pipeline
        .service
        .generate_for_user(Uuid::new_v4(), request, "t".into(), CancellationToken::new())
        .await
        .unwrap_err();

    // Quota is consulted before the request is validated
    assert!(matches!(error, ImageServiceError::Invalid(_)));
    assert_eq!(ledger.checks(), 1);
    assert_eq!(ledger.commits(), 0);
    assert_eq!(pipeline.openai.calls(), 0);
}

#[tokio::test]
async fn it_should_deny_an_unknown_account_as_a_quota_answer() {
    let accounts = Arc::new(InMemoryAccountStore::default());
    let usage = Arc::new(InMemoryUsageStore::default());
    let ledger = Arc::new(QuotaService::new(
        accounts,
        usage.clone(),
        FixedOffset::east_opt(9 * 3600).unwrap(),
    ));
    let pipeline = pipeline(ledger, vec![Script::Complete(png(1))]);

    let error = pipeline
        .service
        .generate_for_user(Uuid::new_v4(), request(), "t".into(), CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(error, ImageServiceError::AccountUnavailable(_)));
    let app_error = AppError::from(error);
    assert_eq!(app_error.status_code().as_u16(), 429);
    assert_eq!(pipeline.openai.calls(), 0);
    assert_eq!(usage.len(), 0);
}

#[tokio::test]
async fn it_should_allow_one_image_per_day_on_the_basic_plan() {
    let accounts = Arc::new(InMemoryAccountStore::default());
    let usage = Arc::new(InMemoryUsageStore::default());
    let ledger = Arc::new(QuotaService::new(
        accounts.clone(),
        usage.clone(),
        FixedOffset::east_opt(9 * 3600).unwrap(),
    ));
    let pipeline = pipeline(
        ledger,
        vec![Script::Complete(png(1)), Script::Complete(png(2))],
    );
    let user_id = accounts.add_basic_user();

    let receipt = pipeline
        .service
        .generate_for_user(user_id, request(), "first".into(), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(receipt.usage.usage_count, 1);
    assert_eq!(receipt.usage.remaining_count, 0);
    assert!(!receipt.usage.allowed);

    let error = pipeline
        .service
        .generate_for_user(user_id, request(), "second".into(), CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(error, ImageServiceError::QuotaExceeded(_)));
    assert_eq!(pipeline.openai.calls(), 1);
    assert_eq!(
        usage
            .get(user_id, ServiceType::ImageGenerate)
            .unwrap()
            .usage_count,
        1
    );
}
