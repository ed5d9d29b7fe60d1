use axum::{
    Json,
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use tracing::debug;

use super::{
    error::ApiError,
    models::{AppendResponse, HealthResponse, RewriteResponse},
    state::AppState,
    utils::{read_json, read_optional_object},
};

/// Append one record to the stream (POST /streams/{key}/records)
///
/// The body is re-serialized onto a single line. Responds once the line is
/// written, so a 201 means the record is on disk in its final position.
pub async fn append_record(
    State(state): State<AppState>,
    Path(key): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> Result<impl IntoResponse, ApiError> {
    let record = read_json(&headers, body, state.config.server.max_body_bytes).await?;
    state.store.append_record(&key, &record).await?;

    Ok((StatusCode::CREATED, Json(AppendResponse { key })))
}

/// Replace every record sharing the body's identifier (PUT /streams/{key}/records)
pub async fn edit_record(
    State(state): State<AppState>,
    Path(key): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> Result<impl IntoResponse, ApiError> {
    let record = read_json(&headers, body, state.config.server.max_body_bytes).await?;
    let affected = state.store.edit(&key, &record).await?;

    Ok(Json(RewriteResponse { key, affected }))
}

/// Remove every record sharing the body's identifier (DELETE /streams/{key}/records)
pub async fn delete_record(
    State(state): State<AppState>,
    Path(key): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> Result<impl IntoResponse, ApiError> {
    let record = read_json(&headers, body, state.config.server.max_body_bytes).await?;
    let affected = state.store.delete(&key, &record).await?;

    Ok(Json(RewriteResponse { key, affected }))
}

/// Records of the active stream (GET /streams/{key}/records)
pub async fn list_records(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let records = state.store.read_active(&key).await?;
    debug!(key = %key, count = records.len(), "Listed active records");

    Ok(Json(records))
}

/// Compact the active stream into its complete document (POST /streams/{key}/finalize)
///
/// An optional JSON object body is merged into the document metadata.
pub async fn finalize_stream(
    State(state): State<AppState>,
    Path(key): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> Result<impl IntoResponse, ApiError> {
    let metadata = read_optional_object(&headers, body, state.config.server.max_body_bytes).await?;
    let document = state.store.finalize(&key, metadata).await?;

    Ok(Json(document))
}

/// Complete document of a finalized stream (GET /streams/{key})
pub async fn get_document(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let document = state
        .store
        .read_completed(&key)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("document {key}")))?;

    Ok(Json(document))
}

/// Remove a complete document; absent documents succeed too (DELETE /streams/{key})
pub async fn delete_document(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.store.delete_completed(&key).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Health check endpoint (GET /health)
///
/// Always 200 while the process can answer; carries the metrics snapshot.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        metrics: state.metrics.snapshot(),
    })
}
