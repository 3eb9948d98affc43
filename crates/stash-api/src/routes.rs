use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use stash_core::models::CampaignSummary;
use stash_core::{Document, DocumentId, RevisionStore, SqliteRevisionStore};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::AppConfig;
use crate::error::AppError;
use crate::rate_limit::{RateLimitMetricsSnapshot, WriteRateLimiter};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    store: SqliteRevisionStore,
    write_limiter: WriteRateLimiter,
}

impl AppState {
    pub fn new(config: Arc<AppConfig>, store: SqliteRevisionStore) -> Self {
        Self {
            write_limiter: WriteRateLimiter::from_config(config.as_ref()),
            store,
            config,
        }
    }
}

pub fn app_router(state: AppState) -> Router {
    let campaign_routes = Router::new()
        .route("/campaigns", post(create_campaign))
        .route("/campaigns/{id}", get(get_campaign).put(update_campaign))
        .route("/campaigns/{id}/summary", get(get_summary).put(put_summary));

    Router::new()
        .route("/healthz", get(healthz))
        .nest("/v1", campaign_routes)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: i64,
    rate_limit: RateLimitMetricsSnapshot,
}

async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().timestamp(),
        rate_limit: state.write_limiter.metrics_snapshot(),
    })
}

#[derive(Debug, Deserialize)]
struct CreateCampaignRequest {
    payload: Value,
}

#[derive(Debug, Deserialize)]
struct UpdateCampaignRequest {
    payload: Value,
    expected_revision: Option<i64>,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
struct UpdateCampaignResponse {
    revision: i64,
}

#[derive(Debug, Deserialize)]
struct SummaryRequest {
    name: String,
}

fn parse_id(raw: &str) -> Result<DocumentId, AppError> {
    raw.parse()
        .map_err(|_| AppError::bad_request(format!("invalid campaign id: {raw}")))
}

async fn create_campaign(
    State(state): State<AppState>,
    Json(request): Json<CreateCampaignRequest>,
) -> Result<(StatusCode, Json<Document>), AppError> {
    let document = state.store.create(&request.payload).await?;
    tracing::info!(campaign_id = %document.id, "Created campaign");
    Ok((StatusCode::CREATED, Json(document)))
}

async fn get_campaign(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Document>, AppError> {
    let id = parse_id(&id)?;
    state
        .store
        .read(&id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::not_found(format!("campaign {id}")))
}

async fn update_campaign(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UpdateCampaignRequest>,
) -> Result<Json<UpdateCampaignResponse>, AppError> {
    let id = parse_id(&id)?;
    state.write_limiter.check(id)?;

    if let Some(revision) = state
        .store
        .update(&id, &request.payload, request.expected_revision)
        .await?
    {
        tracing::info!(
            campaign_id = %id,
            revision,
            conditional = request.expected_revision.is_some(),
            "Committed campaign revision"
        );
        return Ok(Json(UpdateCampaignResponse { revision }));
    }

    let current = state.store.read(&id).await?;
    match (current, request.expected_revision) {
        (Some(document), Some(expected)) => {
            tracing::info!(
                campaign_id = %id,
                expected,
                current = document.revision,
                "Rejected stale campaign update"
            );
            Err(AppError::conflict(format!(
                "expected revision {expected}, current revision is {}",
                document.revision
            )))
        }
        _ => Err(AppError::not_found(format!("campaign {id}"))),
    }
}

async fn get_summary(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CampaignSummary>, AppError> {
    let id = parse_id(&id)?;
    state
        .store
        .summary(&id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::not_found(format!("summary for campaign {id}")))
}

async fn put_summary(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<SummaryRequest>,
) -> Result<StatusCode, AppError> {
    let id = parse_id(&id)?;
    if state.store.read(&id).await?.is_none() {
        return Err(AppError::not_found(format!("campaign {id}")));
    }
    state.store.update_summary(&id, &request.name).await?;
    Ok(StatusCode::NO_CONTENT)
}
