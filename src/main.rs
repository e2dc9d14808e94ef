use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use imagegen_backend::controllers::{health::HealthState, image::ImageController, usage::UsageController};
use imagegen_backend::domain::generation::{ImageGenerationService, ImageOrchestrator, ProviderKind};
use imagegen_backend::domain::quota::{QuotaLedger, QuotaService};
use imagegen_backend::infrastructure::config::{Config, LogFormat};
use imagegen_backend::infrastructure::db::{check_connection, create_pool, run_migrations};
use imagegen_backend::infrastructure::http::{build_router, start_http_server};
use imagegen_backend::infrastructure::providers::{OpenAiImageProvider, ReplicateImageProvider};
use imagegen_backend::infrastructure::repositories::{
    AccountRepository, AccountStore, ArtifactRepository, ArtifactStore, UsageRepository,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize logging
    init_logging(&config);

    tracing::info!(
        "Starting image generation backend on {}:{}",
        config.host,
        config.port
    );

    // Create database connection pool
    let pool = create_pool(&config.database_url).await?;
    check_connection(&pool).await?;
    tracing::info!("Database connection verified");

    run_migrations(&pool).await?;
    tracing::info!("Database migrations applied");

    let pool = Arc::new(pool);
    let config = Arc::new(config);

    // === DEPENDENCY INJECTION SETUP ===
    // 1. Repositories
    let account_store: Arc<dyn AccountStore> = Arc::new(AccountRepository::new(pool.clone()));
    let usage_store = Arc::new(UsageRepository::new(pool.clone()));
    let artifact_store: Arc<dyn ArtifactStore> = Arc::new(ArtifactRepository::new(pool.clone()));

    // 2. Image providers
    // No request deadline; job providers are bounded by the poll budget
    let http_client = reqwest::Client::builder().build()?;

    let mut orchestrator = ImageOrchestrator::new(&config.fallback_model, config.poll_settings());
    let mut provider_names = Vec::new();

    match &config.openai_api_key {
        Some(api_key) => {
            orchestrator = orchestrator.with_provider(
                ProviderKind::OpenAi,
                Arc::new(OpenAiImageProvider::new(
                    api_key.clone(),
                    config.openai_base_url.clone(),
                    http_client.clone(),
                )),
            );
            provider_names.push(ProviderKind::OpenAi.to_string());
        }
        None => tracing::warn!("OPENAI_API_KEY not set, OpenAI models are unavailable"),
    }

    match &config.replicate_api_token {
        Some(api_token) => {
            orchestrator = orchestrator.with_provider(
                ProviderKind::Replicate,
                Arc::new(ReplicateImageProvider::new(
                    api_token.clone(),
                    config.replicate_base_url.clone(),
                    http_client.clone(),
                )),
            );
            provider_names.push(ProviderKind::Replicate.to_string());
        }
        None => tracing::warn!("REPLICATE_API_TOKEN not set, fallback models are unavailable"),
    }

    tracing::info!(
        providers = ?provider_names,
        fallback_model = orchestrator.fallback_profile().key,
        poll_interval_ms = config.poll_interval_ms,
        max_poll_attempts = config.max_poll_attempts,
        "Image providers configured"
    );

    // 3. Services
    let quota: Arc<dyn QuotaLedger> = Arc::new(QuotaService::new(
        account_store.clone(),
        usage_store,
        config.quota_offset(),
    ));
    let generation_service = Arc::new(ImageGenerationService::new(
        quota.clone(),
        Arc::new(orchestrator),
        artifact_store.clone(),
    ));

    // 4. Controllers
    let image_controller = Arc::new(ImageController::new(generation_service, artifact_store));
    let usage_controller = Arc::new(UsageController::new(quota));
    let health_state = Arc::new(HealthState {
        pool,
        providers: provider_names,
    });

    let app = build_router(
        config.clone(),
        account_store,
        health_state,
        image_controller,
        usage_controller,
    );

    start_http_server(app, config).await?;

    Ok(())
}

fn init_logging(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "imagegen_backend=debug,tower_http=debug".into());

    if config.log_format == LogFormat::Json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }
}
