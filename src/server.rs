use axum::{
    http::StatusCode,
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use std::time::Duration;

use tower::ServiceBuilder;
use tower_http::{compression::CompressionLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::info;

use crate::{
    api::handler::{
        get_contract, get_status, health_check, list_contracts, post_event, register_contract,
        resolve_expired, AppState,
    },
    config::Config,
    middleware::{create_cors_layer, rate_limit_middleware, RateLimitLayer},
};

pub fn create_app(state: AppState, config: &Config) -> Router {
    info!("⚙️ Setting up HTTP routes...");

    let limiter = RateLimitLayer::per_minute(config.rate_limit_per_minute);

    let app = Router::new()
        .route("/health", get(health_check))
        .nest(
            "/api/v1",
            Router::new()
                // Read API
                .route("/contracts", get(list_contracts).post(register_contract))
                .route("/contracts/:address", get(get_contract))
                // Lifecycle notifications
                .route("/events", post(post_event))
                // Operator endpoints
                .route("/resolve-expired", post(resolve_expired))
                .route("/status", get(get_status))
                .layer(from_fn_with_state(limiter, rate_limit_middleware)),
        )
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::with_status_code(
                    StatusCode::REQUEST_TIMEOUT,
                    Duration::from_secs(30),
                ))
                .layer(create_cors_layer(&config.cors_origins()))
                .layer(CompressionLayer::new()),
        )
        .with_state(state);

    info!("✓ HTTP routes configured");
    app
}

pub async fn run_server(app: Router, bind_address: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    info!("🌐 Server listening on: {}", bind_address);

    axum::serve(listener, app).await?;
    Ok(())
}
