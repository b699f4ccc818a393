use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use tracing::info;

use super::models::*;
use crate::{
    error::AppResult,
    middleware::validate_payload,
    registry::{parse_address, ContractRecord, ContractRegistry},
    settlement::{
        ContractFeed, ContractMetadata, EventAck, ExpiryScheduler, LifecycleEvent,
        LifecycleHandler,
    },
};

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ContractRegistry>,
    pub feed: Arc<ContractFeed>,
    pub scheduler: Arc<ExpiryScheduler>,
    pub lifecycle: Arc<LifecycleHandler>,
    pub started_at: DateTime<Utc>,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: Utc::now(),
        store: state.registry.backend(),
        aggregator_available: state.feed.aggregator_availability(),
    })
}

/// All tracked contracts with live state
/// GET /api/v1/contracts
pub async fn list_contracts(State(state): State<AppState>) -> AppResult<Json<ContractListResponse>> {
    let listing = state.feed.list_contracts().await?;

    Ok(Json(ContractListResponse {
        count: listing.contracts.len(),
        contracts: listing.contracts,
        aggregated: listing.aggregated,
    }))
}

/// GET /api/v1/contracts/:address
pub async fn get_contract(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> AppResult<Json<ContractMetadata>> {
    let address = parse_address(&address)?;
    let metadata = state.feed.get_contract(address).await?;
    Ok(Json(metadata))
}

/// POST /api/v1/contracts
pub async fn register_contract(
    State(state): State<AppState>,
    Json(request): Json<RegisterContractRequest>,
) -> AppResult<(StatusCode, Json<ContractRecord>)> {
    validate_payload(&request)?;

    let record = state.lifecycle.register(request.into()).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// Inbound lifecycle notification
/// POST /api/v1/events
pub async fn post_event(
    State(state): State<AppState>,
    Json(event): Json<LifecycleEvent>,
) -> AppResult<Json<EventAck>> {
    if let LifecycleEvent::Created { contract } = &event {
        validate_payload(&RegisterContractRequest::from(contract.clone()))?;
    }

    info!("📨 Lifecycle event {} for {}", event.kind(), event.address());
    let ack = state.lifecycle.dispatch(event).await?;
    Ok(Json(ack))
}

/// Sweep now instead of waiting for the next tick
/// POST /api/v1/resolve-expired
pub async fn resolve_expired(State(state): State<AppState>) -> AppResult<Json<ResolveExpiredResponse>> {
    let report = state.scheduler.sweep().await?;

    Ok(Json(ResolveExpiredResponse {
        resolved_count: report.submitted,
        report,
    }))
}

/// GET /api/v1/status
pub async fn get_status(State(state): State<AppState>) -> AppResult<Json<StatusResponse>> {
    let scheduler = state.scheduler.get_status().await?;

    Ok(Json(StatusResponse {
        scheduler,
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
    }))
}
