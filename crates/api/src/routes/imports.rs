//! Import run endpoints.
//!
//! Starting and retrying answer `202 Accepted` with the Running run as soon
//! as it is persisted; the outcome is observed by polling the run.

use axum::{
    body::Bytes,
    extract::{
        rejection::{PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    Json,
};
use import_core::{ImportedRecord, IngestionRun, ListQuery, Page};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;
use validator::Validate;

use crate::extractors::OwnerContext;
use crate::response::ApiError;
use crate::state::AppState;

/// Body of `POST /imports`.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct StartImportRequest {
    /// Display name; its extension selects the spreadsheet format
    #[validate(length(min = 1, max = 255))]
    pub file_name: String,
    /// HTTP(S) URL or server-local path of the source file
    #[validate(length(min = 1, max = 2048))]
    pub source_url: String,
}

fn run_id(path: Result<Path<Uuid>, PathRejection>) -> Result<Uuid, ApiError> {
    path.map(|Path(id)| id)
        .map_err(|e| ApiError::bad_request(format!("invalid import id: {}", e.body_text())))
}

fn list_query(query: Result<Query<ListQuery>, QueryRejection>) -> Result<ListQuery, ApiError> {
    query
        .map(|Query(q)| q)
        .map_err(|e| ApiError::bad_request(e.body_text()))
}

/// POST /imports - Start a new import run.
pub async fn start_handler(
    State(state): State<AppState>,
    owner: OwnerContext,
    body: Bytes,
) -> Result<(StatusCode, Json<IngestionRun>), ApiError> {
    let request: StartImportRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError::bad_request(format!("invalid request body: {}", e)))?;
    request.validate()?;

    let run = state
        .manager
        .start(&owner.owner_id, &request.file_name, &request.source_url)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(run)))
}

/// POST /imports/:id/retry - Re-execute a failed run.
pub async fn retry_handler(
    State(state): State<AppState>,
    owner: OwnerContext,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<(StatusCode, Json<IngestionRun>), ApiError> {
    let id = run_id(path)?;
    let run = state.manager.retry(id, &owner.owner_id).await?;
    Ok((StatusCode::ACCEPTED, Json(run)))
}

/// GET /imports/:id - Current state of one run.
pub async fn get_run_handler(
    State(state): State<AppState>,
    owner: OwnerContext,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<IngestionRun>, ApiError> {
    let id = run_id(path)?;
    Ok(Json(state.manager.get_run(id, &owner.owner_id).await?))
}

/// GET /imports - The caller's runs, newest first.
pub async fn list_runs_handler(
    State(state): State<AppState>,
    owner: OwnerContext,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<Json<Page<IngestionRun>>, ApiError> {
    let query = list_query(query)?;
    debug!(owner_id = %owner.owner_id, ?query, "Listing runs");
    Ok(Json(state.manager.list_runs(&owner.owner_id, &query).await?))
}

/// GET /imports/:id/records - Records of one run in source order.
pub async fn list_records_handler(
    State(state): State<AppState>,
    owner: OwnerContext,
    path: Result<Path<Uuid>, PathRejection>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<Json<Page<ImportedRecord>>, ApiError> {
    let id = run_id(path)?;
    let query = list_query(query)?;
    Ok(Json(
        state
            .manager
            .list_records(id, &owner.owner_id, &query)
            .await?,
    ))
}
