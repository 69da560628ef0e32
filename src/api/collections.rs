//! Collection endpoints: refresh cycles and local record writes.

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use serde::Deserialize;
use serde_json::Value;

use super::{entity_from_path, success, ApiResult};
use crate::errors::AppError;
use crate::models::{MergedView, Record, Trigger};
use crate::AppState;

/// Header carrying the caller identity used to scope remote fetches.
pub const SELLER_ID_HEADER: &str = "x-seller-id";

/// Query parameters for a refresh.
#[derive(Debug, Default, Deserialize)]
pub struct ReconcileQuery {
    #[serde(default)]
    pub trigger: Option<Trigger>,
}

/// Request body for acknowledging an upload.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkSyncedRequest {
    #[serde(default)]
    pub remote_id: Option<String>,
}

/// Header identity first, configured identity second, otherwise unscoped.
fn caller_identity(state: &AppState, headers: &HeaderMap) -> Option<String> {
    headers
        .get(SELLER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .or_else(|| state.config.seller_id.clone())
}

/// GET /api/collections/{entity} - Run a reconciliation cycle and return the merged view.
pub async fn reconcile_collection(
    State(state): State<AppState>,
    Path(entity): Path<String>,
    Query(query): Query<ReconcileQuery>,
    headers: HeaderMap,
) -> ApiResult<MergedView> {
    let entity = entity_from_path(&entity)?;
    let trigger = query.trigger.unwrap_or_default();
    let identity = caller_identity(&state, &headers);

    // Detached, so a client that goes away mid-cycle does not cancel it.
    let reconciler = state.reconciler.clone();
    let view = tokio::spawn(async move {
        reconciler
            .reconcile(entity, trigger, identity.as_deref())
            .await
    })
    .await
    .map_err(|e| AppError::Internal(format!("Reconciliation task failed: {}", e)))??;
    success(view)
}

/// GET /api/collections/{entity}/local - Local cache only, no remote contact.
pub async fn local_snapshot(
    State(state): State<AppState>,
    Path(entity): Path<String>,
) -> ApiResult<Vec<Record>> {
    let entity = entity_from_path(&entity)?;
    success(state.reconciler.local_snapshot(entity).await?)
}

/// POST /api/collections/{entity}/records - Create a local, unsynced record.
pub async fn create_record(
    State(state): State<AppState>,
    Path(entity): Path<String>,
    Json(payload): Json<Value>,
) -> ApiResult<Record> {
    let entity = entity_from_path(&entity)?;
    success(state.reconciler.create_local(entity, payload).await?)
}

/// PUT /api/collections/{entity}/records/{id} - Edit a record locally.
pub async fn update_record(
    State(state): State<AppState>,
    Path((entity, id)): Path<(String, String)>,
    Json(patch): Json<Value>,
) -> ApiResult<Record> {
    let entity = entity_from_path(&entity)?;
    success(state.reconciler.update_local(entity, &id, patch).await?)
}

/// DELETE /api/collections/{entity}/records/{id} - Delete a record locally.
pub async fn delete_record(
    State(state): State<AppState>,
    Path((entity, id)): Path<(String, String)>,
) -> ApiResult<()> {
    let entity = entity_from_path(&entity)?;
    state.reconciler.delete_local(entity, &id).await?;
    success(())
}

/// POST /api/collections/{entity}/records/{id}/synced - Acknowledge an upload.
pub async fn mark_synced(
    State(state): State<AppState>,
    Path((entity, id)): Path<(String, String)>,
    Json(request): Json<MarkSyncedRequest>,
) -> ApiResult<Record> {
    let entity = entity_from_path(&entity)?;
    let record = state
        .reconciler
        .mark_synced(entity, &id, request.remote_id.as_deref())
        .await?;
    success(record)
}
