//! Access token validation for WOPI requests.
//!
//! The editor passes the token either as the `access_token` query parameter
//! (the WOPI convention) or as an `Authorization: Bearer` header.

use std::sync::Arc;

use axum::extract::{Query, Request, State};
use axum::http::{header, HeaderMap, Uri};
use axum::middleware::Next;
use axum::response::Response;
use serde::Deserialize;
use tracing::debug;
use wopi_host_core::AccessContext;

use crate::error::{ApiError, Result};
use crate::handlers::AppState;

/// Validates the static access token and maps it to the caller's identity.
#[derive(Debug, Clone)]
pub struct TokenValidator {
    token: Option<String>,
    access: AccessContext,
}

impl TokenValidator {
    /// Create a validator. With `token == None` every request is accepted.
    pub fn new(token: Option<String>, access: AccessContext) -> Self {
        Self {
            token: token.filter(|t| !t.is_empty()),
            access,
        }
    }

    pub fn enabled(&self) -> bool {
        self.token.is_some()
    }

    /// The token handed to the editor in launch URLs.
    pub fn access_token(&self) -> &str {
        self.token.as_deref().unwrap_or_default()
    }

    pub fn validate(&self, presented: Option<&str>) -> Result<AccessContext> {
        match &self.token {
            None => Ok(self.access.clone()),
            Some(expected) if presented == Some(expected.as_str()) => Ok(self.access.clone()),
            Some(_) => Err(ApiError::Unauthorized),
        }
    }
}

/// Shared validator wrapped in Arc.
pub type SharedTokenValidator = Arc<TokenValidator>;

#[derive(Deserialize)]
struct TokenQuery {
    access_token: Option<String>,
}

/// Extract the `access_token` query parameter.
fn query_access_token(uri: &Uri) -> Option<String> {
    Query::<TokenQuery>::try_from_uri(uri)
        .ok()
        .and_then(|Query(query)| query.access_token)
}

/// Extract the token from an Authorization header, with or without the Bearer scheme.
fn authorization_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?.trim();
    let token = match value.split_once(char::is_whitespace) {
        Some((scheme, rest)) if scheme.eq_ignore_ascii_case("bearer") => rest.trim_start(),
        _ => value,
    };
    Some(token.to_string())
}

/// Middleware rejecting requests without a valid access token.
///
/// On success the caller's `AccessContext` is stored in the request extensions.
pub async fn require_access_token(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response> {
    let token = query_access_token(req.uri()).or_else(|| authorization_token(req.headers()));
    let access = state.validator.validate(token.as_deref()).inspect_err(|_| {
        debug!("Rejected {} {}: invalid access token", req.method(), req.uri().path());
    })?;
    req.extensions_mut().insert(access);
    Ok(next.run(req).await)
}
