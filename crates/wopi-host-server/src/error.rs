//! Error types for the WOPI endpoints.

use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use wopi_host_core::WopiError;

use crate::handlers::{X_WOPI_LOCK, X_WOPI_LOCK_FAILURE_REASON};

/// Application-level errors.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Invalid or missing token")]
    Unauthorized,

    #[error("User is not allowed to write this file")]
    WriteDenied,

    #[error("{0}")]
    BadRequest(String),

    #[error("Unsupported operation: {0}")]
    NotImplemented(String),

    #[error(transparent)]
    Wopi(#[from] WopiError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorBody {
            error: String,
            code: &'static str,
            #[serde(skip_serializing_if = "Option::is_none")]
            lock: Option<String>,
        }

        let (status, code) = match &self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            ApiError::WriteDenied => (StatusCode::UNAUTHORIZED, "WRITE_DENIED"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::NotImplemented(_) => (StatusCode::NOT_IMPLEMENTED, "NOT_IMPLEMENTED"),
            ApiError::Wopi(err) => match err {
                WopiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
                WopiError::Conflict { .. } => (StatusCode::CONFLICT, "LOCK_CONFLICT"),
                WopiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
                WopiError::PayloadTooLarge { .. } => {
                    (StatusCode::PAYLOAD_TOO_LARGE, "PAYLOAD_TOO_LARGE")
                }
                WopiError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_FAILURE"),
            },
        };

        let mut headers = HeaderMap::new();
        let mut lock = None;
        if let ApiError::Wopi(WopiError::Conflict {
            reason,
            current_lock,
        }) = &self
        {
            // The editor reads the holder from X-WOPI-Lock; empty means no lock.
            let holder = current_lock.clone().unwrap_or_default();
            headers.insert(
                X_WOPI_LOCK,
                HeaderValue::from_str(&holder).unwrap_or_else(|_| HeaderValue::from_static("")),
            );
            if let Ok(value) = HeaderValue::from_str(reason) {
                headers.insert(X_WOPI_LOCK_FAILURE_REASON, value);
            }
            lock = Some(holder);
        }

        let body = ErrorBody {
            error: self.to_string(),
            code,
            lock,
        };

        (status, headers, axum::Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;
