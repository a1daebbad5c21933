use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderName, Method};
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::require_access_token;
use crate::handlers::{
    access_handler, check_file_info_handler, file_override_handler, get_file_handler,
    health_handler, lock_handler, put_file_handler, refresh_lock_handler, root_handler,
    unlock_handler, AppState, X_WOPI_LOCK, X_WOPI_LOCK_FAILURE_REASON, X_WOPI_OLD_LOCK,
    X_WOPI_OVERRIDE,
};

/// Build the application router.
pub fn router(state: AppState) -> Router {
    let max_body_bytes = state.content.max_body_bytes();

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static(X_WOPI_LOCK),
            HeaderName::from_static(X_WOPI_OLD_LOCK),
            HeaderName::from_static(X_WOPI_OVERRIDE),
        ])
        .expose_headers([
            HeaderName::from_static(X_WOPI_LOCK),
            HeaderName::from_static(X_WOPI_LOCK_FAILURE_REASON),
        ]);

    let files = Router::new()
        .route(
            "/files/{file_id}",
            get(check_file_info_handler).post(file_override_handler),
        )
        .route(
            "/files/{file_id}/contents",
            get(get_file_handler).post(put_file_handler),
        )
        .route("/files/{file_id}/lock", post(lock_handler))
        .route("/files/{file_id}/unlock", post(unlock_handler))
        .route("/files/{file_id}/refresh", post(refresh_lock_handler))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_access_token,
        ));

    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/access", get(access_handler))
        .nest("/wopi", files)
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
