//! HTTP handlers for the WOPI endpoints.
//!
//! Implements:
//! - GET  /wopi/files/{id}           - CheckFileInfo
//! - POST /wopi/files/{id}           - X-WOPI-Override dispatch (LOCK, UNLOCK, REFRESH_LOCK, GET_LOCK)
//! - GET  /wopi/files/{id}/contents  - GetFile
//! - POST /wopi/files/{id}/contents  - PutFile
//! - POST /wopi/files/{id}/lock      - Lock (UnlockAndRelock with X-WOPI-OldLock)
//! - POST /wopi/files/{id}/unlock    - Unlock
//! - POST /wopi/files/{id}/refresh   - RefreshLock
//! - GET  /access                    - editor launch URL
//! - GET  /health                    - health check

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use wopi_host_core::{
    mime_type_for, AccessContext, ContentAccessGateway, FileInfoAssembler, FileMetadata,
    LockManager,
};

use crate::auth::SharedTokenValidator;
use crate::error::{ApiError, Result};

pub const X_WOPI_LOCK: &str = "x-wopi-lock";
pub const X_WOPI_OLD_LOCK: &str = "x-wopi-oldlock";
pub const X_WOPI_OVERRIDE: &str = "x-wopi-override";
pub const X_WOPI_LOCK_FAILURE_REASON: &str = "x-wopi-lockfailurereason";

/// Public URLs used to build editor launch links.
#[derive(Debug, Clone)]
pub struct LaunchConfig {
    pub wopi_host_domain: String,
    pub collabora_domain: String,
}

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub locks: Arc<LockManager>,
    pub file_info: Arc<FileInfoAssembler>,
    pub content: Arc<ContentAccessGateway>,
    pub validator: SharedTokenValidator,
    pub launch: Arc<LaunchConfig>,
    pub storage_backend: &'static str,
}

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub version: &'static str,
    pub auth_enabled: bool,
    pub storage_backend: &'static str,
    pub tracked_locks: usize,
}

/// GET / - liveness banner.
pub async fn root_handler() -> &'static str {
    "WOPI Server Running..."
}

/// GET /health - Health check endpoint.
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        healthy: true,
        version: env!("CARGO_PKG_VERSION"),
        auth_enabled: state.validator.enabled(),
        storage_backend: state.storage_backend,
        tracked_locks: state.locks.tracked(),
    })
}

/// Read a non-empty header as a string.
fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn required_lock_header(headers: &HeaderMap) -> Result<&str> {
    header_str(headers, X_WOPI_LOCK)
        .ok_or_else(|| ApiError::BadRequest("Missing X-WOPI-Lock header".to_string()))
}

/// GET /wopi/files/{file_id} - CheckFileInfo.
pub async fn check_file_info_handler(
    State(state): State<AppState>,
    Extension(access): Extension<AccessContext>,
    Path(file_id): Path<String>,
) -> Result<Json<FileMetadata>> {
    let info = state.file_info.check_file_info(&file_id, &access).await?;
    Ok(Json(info))
}

/// GET /wopi/files/{file_id}/contents - GetFile.
pub async fn get_file_handler(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
) -> Result<Response> {
    let data = state.content.read(&file_id).await?;
    Ok((
        [(header::CONTENT_TYPE, mime_type_for(&file_id))],
        data,
    )
        .into_response())
}

/// POST /wopi/files/{file_id}/contents - PutFile.
pub async fn put_file_handler(
    State(state): State<AppState>,
    Extension(access): Extension<AccessContext>,
    Path(file_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode> {
    if !access.can_write {
        return Err(ApiError::WriteDenied);
    }

    let presented = header_str(&headers, X_WOPI_LOCK);
    state.content.write(&file_id, body, presented).await?;
    info!("Saved {} for {}", file_id, access.user_id);
    Ok(StatusCode::OK)
}

/// POST /wopi/files/{file_id}/lock - Lock, or UnlockAndRelock when X-WOPI-OldLock is present.
pub async fn lock_handler(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode> {
    lock(&state, &file_id, &headers)
}

/// POST /wopi/files/{file_id}/unlock - Unlock.
pub async fn unlock_handler(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode> {
    unlock(&state, &file_id, &headers)
}

/// POST /wopi/files/{file_id}/refresh - RefreshLock.
pub async fn refresh_lock_handler(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode> {
    refresh_lock(&state, &file_id, &headers)
}

/// POST /wopi/files/{file_id} - dispatch on X-WOPI-Override.
pub async fn file_override_handler(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
    headers: HeaderMap,
) -> Result<Response> {
    let operation = header_str(&headers, X_WOPI_OVERRIDE)
        .ok_or_else(|| ApiError::BadRequest("Missing X-WOPI-Override header".to_string()))?
        .to_ascii_uppercase();

    debug!("X-WOPI-Override {} on {}", operation, file_id);
    match operation.as_str() {
        "LOCK" => lock(&state, &file_id, &headers).map(IntoResponse::into_response),
        "UNLOCK" => unlock(&state, &file_id, &headers).map(IntoResponse::into_response),
        "REFRESH_LOCK" => refresh_lock(&state, &file_id, &headers).map(IntoResponse::into_response),
        "GET_LOCK" => Ok(get_lock(&state, &file_id)),
        other => Err(ApiError::NotImplemented(other.to_string())),
    }
}

fn lock(state: &AppState, file_id: &str, headers: &HeaderMap) -> Result<StatusCode> {
    let token = required_lock_header(headers)?;
    match header_str(headers, X_WOPI_OLD_LOCK) {
        Some(old_token) => {
            state.locks.unlock_and_relock(file_id, old_token, token)?;
            info!("Relocked {} from {} to {}", file_id, old_token, token);
        }
        None => {
            state.locks.lock(file_id, token)?;
            info!("Locked {} with {}", file_id, token);
        }
    }
    Ok(StatusCode::OK)
}

fn unlock(state: &AppState, file_id: &str, headers: &HeaderMap) -> Result<StatusCode> {
    let token = required_lock_header(headers)?;
    state.locks.unlock(file_id, token)?;
    info!("Unlocked {} ({})", file_id, token);
    Ok(StatusCode::OK)
}

fn refresh_lock(state: &AppState, file_id: &str, headers: &HeaderMap) -> Result<StatusCode> {
    let token = required_lock_header(headers)?;
    state.locks.refresh(file_id, token)?;
    debug!("Refreshed lock on {} ({})", file_id, token);
    Ok(StatusCode::OK)
}

fn get_lock(state: &AppState, file_id: &str) -> Response {
    let holder = state.locks.get_lock(file_id).unwrap_or_default();
    let value = HeaderValue::from_str(&holder).unwrap_or_else(|_| HeaderValue::from_static(""));
    (StatusCode::OK, [(X_WOPI_LOCK, value)]).into_response()
}

#[derive(Deserialize)]
pub struct AccessQuery {
    pub path: Option<String>,
}

/// Editor launch details.
#[derive(Debug, Serialize, Deserialize)]
pub struct AccessResponse {
    pub url: String,
    pub token: String,
}

/// GET /access?path={file_id} - build the Collabora launch URL for a document.
pub async fn access_handler(
    State(state): State<AppState>,
    Query(query): Query<AccessQuery>,
) -> Result<Json<AccessResponse>> {
    let file_id = query
        .path
        .filter(|p| !p.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Missing file path".to_string()))?;

    let wopi_src = format!(
        "{}/wopi/files/{}",
        state.launch.wopi_host_domain.trim_end_matches('/'),
        urlencoding::encode(&file_id)
    );
    let token = state.validator.access_token().to_string();
    let url = format!(
        "{}/browser/dist/cool.html?WOPISrc={}&access_token={}",
        state.launch.collabora_domain.trim_end_matches('/'),
        urlencoding::encode(&wopi_src),
        urlencoding::encode(&token)
    );

    Ok(Json(AccessResponse { url, token }))
}
