//! Auxiliary routes: health, model list, dialect rejection and the request
//! log query API

use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde_json::{Value, json};
use std::sync::Arc;

use super::error::ProxyError;
use super::server::AppState;
use crate::record::RequestRecord;
use crate::storage::{
    DashboardStats, RequestPage, RequestQuery, StatsQuery, SummaryPage, SummaryQuery,
};

/// Model ids advertised on `/v1/models`
const ADVERTISED_MODELS: &[&str] = &[
    "claude-3-sonnet-20240229",
    "claude-3-opus-20240229",
    "claude-3-haiku-20240307",
];

pub(crate) async fn health_handler() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now(),
    }))
}

pub(crate) async fn models_handler() -> Json<Value> {
    let data: Vec<Value> = ADVERTISED_MODELS
        .iter()
        .map(|id| {
            json!({
                "id": id,
                "object": "model",
                "created": 1677610602,
                "owned_by": "anthropic",
            })
        })
        .collect();
    Json(json!({"object": "list", "data": data}))
}

pub(crate) async fn chat_completions_handler() -> ProxyError {
    tracing::debug!("Rejected OpenAI-style request on /v1/chat/completions");
    ProxyError::UnsupportedDialect
}

pub(crate) async fn list_requests_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RequestQuery>,
) -> Result<Json<RequestPage>, ProxyError> {
    let page = state.store.list(&query).await.map_err(|e| {
        tracing::error!("Failed to list requests: {e}");
        ProxyError::Storage
    })?;
    tracing::debug!(total = page.total, returned = page.requests.len(), "Listed requests");
    Ok(Json(page))
}

pub(crate) async fn request_summaries_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SummaryQuery>,
) -> Result<Json<SummaryPage>, ProxyError> {
    let page = state.store.summaries(&query).await.map_err(|e| {
        tracing::error!("Failed to summarize requests: {e}");
        ProxyError::Storage
    })?;
    Ok(Json(page))
}

pub(crate) async fn stats_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<DashboardStats>, ProxyError> {
    let stats = state.store.stats(&query).await.map_err(|e| {
        tracing::error!("Failed to compute stats: {e}");
        ProxyError::Storage
    })?;
    Ok(Json(stats))
}

pub(crate) async fn get_request_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<RequestRecord>, ProxyError> {
    match state.store.get(&id).await {
        Ok(Some(record)) => Ok(Json(record)),
        Ok(None) => Err(ProxyError::NotFound),
        Err(e) => {
            tracing::error!(request_id = %id, "Failed to load request: {e}");
            Err(ProxyError::Storage)
        }
    }
}

pub(crate) async fn clear_requests_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Value>, ProxyError> {
    let deleted = state.store.clear().await.map_err(|e| {
        tracing::error!("Failed to clear requests: {e}");
        ProxyError::Storage
    })?;
    tracing::info!(deleted, "Request history cleared");
    Ok(Json(json!({
        "message": "Request history cleared",
        "deleted": deleted,
    })))
}

pub(crate) async fn not_found_handler() -> ProxyError {
    ProxyError::NotFound
}
