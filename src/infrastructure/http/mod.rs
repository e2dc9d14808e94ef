use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::infrastructure::config::Config;
use crate::infrastructure::repositories::AccountStore;
use crate::{
    controllers::{
        health::{self, HealthState},
        image::ImageController,
        usage::UsageController,
    },
    infrastructure::auth::{auth_middleware, request_id_middleware, AuthState},
};

/// Room for several 4MB reference images plus the text fields
pub const MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

/// Build the application router with all routes configured
pub fn build_router(
    config: Arc<Config>,
    account_store: Arc<dyn AccountStore>,
    health_state: Arc<HealthState>,
    image_controller: Arc<ImageController>,
    usage_controller: Arc<UsageController>,
) -> Router {
    let auth_state = Arc::new(AuthState::new(account_store, &config));

    // Image routes (need auth)
    let image_routes = Router::new()
        .route("/api/images/generate", post(ImageController::generate))
        .route("/api/images/:id", get(ImageController::get_image))
        .with_state(image_controller)
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(middleware::from_fn_with_state(
            auth_state.clone(),
            auth_middleware,
        ));

    // Usage routes (need auth)
    let usage_routes = Router::new()
        .route("/api/usage/check", get(UsageController::check))
        .with_state(usage_controller)
        .layer(middleware::from_fn_with_state(
            auth_state.clone(),
            auth_middleware,
        ));

    let app = Router::new()
        .route("/health", get(health::health))
        .route("/health/ready", get(health::health_ready))
        .with_state(health_state)
        .merge(image_routes)
        .merge(usage_routes)
        .layer(middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http());

    if config.is_development() {
        app.layer(CorsLayer::permissive())
    } else {
        app
    }
}

/// Bind and serve until the process is stopped
pub async fn start_http_server(
    app: Router,
    config: Arc<Config>,
) -> anyhow::Result<()> {
    let listener =
        tokio::net::TcpListener::bind(format!("{}:{}", config.host, config.port)).await?;

    tracing::info!("Server listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}
