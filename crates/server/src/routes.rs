//! Route configuration.

use crate::auth::auth_middleware;
use crate::handlers;
use crate::lifecycle::ingest::MULTIPART_OVERHEAD;
use crate::metrics::metrics_handler;
use crate::state::AppState;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{delete, get, post, put};
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let upload_limit = state
        .config
        .uploads
        .max_upload_size
        .saturating_add(MULTIPART_OVERHEAD);
    let upload_limit = usize::try_from(upload_limit).unwrap_or(usize::MAX);

    let api_routes = Router::new()
        // Health check (unauthenticated for load balancers and probes)
        .route("/v1/health", get(handlers::health_check))
        // Auth
        .route("/v1/auth/login", post(handlers::login))
        .route("/v1/auth/logout", post(handlers::logout))
        .route("/v1/auth/whoami", get(handlers::whoami))
        // Files
        .route("/v1/files", get(handlers::list_files))
        .route("/v1/files/{file_id}", get(handlers::get_file))
        .route("/v1/files/{file_id}/content", get(handlers::get_file_content))
        .route("/v1/failed", get(handlers::list_failed))
        .route("/v1/trash", get(handlers::list_trash))
        // Resumable uploads
        .route("/v1/uploads", post(handlers::init_upload))
        .route(
            "/v1/uploads/{upload_id}",
            get(handlers::get_upload)
                .put(handlers::put_chunk)
                .delete(handlers::cancel_upload),
        )
        .route(
            "/v1/uploads/{upload_id}/complete",
            post(handlers::complete_upload),
        )
        // Admin endpoints (all require an administrator)
        .route(
            "/v1/admin/users",
            get(handlers::list_users).post(handlers::create_user),
        )
        .route(
            "/v1/admin/users/{user_id}",
            delete(handlers::delete_user),
        )
        .route(
            "/v1/admin/users/{user_id}/quota",
            put(handlers::set_quota),
        )
        .route(
            "/v1/admin/users/{user_id}/quota/recalculate",
            post(handlers::recalculate_quota),
        )
        .route(
            "/v1/admin/users/{user_id}/password",
            put(handlers::reset_password),
        )
        .route("/v1/admin/trash/empty", post(handlers::empty_all_trash));

    let form_routes = Router::new()
        .route(
            "/files/upload",
            post(handlers::upload_form).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/files/{file_id}/rename", post(handlers::rename_file_form))
        .route("/files/{file_id}/move", post(handlers::move_file_form))
        .route("/files/{file_id}/delete", post(handlers::trash_file_form))
        .route("/files/{file_id}/dismiss", post(handlers::dismiss_file_form))
        .route("/folders", post(handlers::create_folder_form))
        .route("/folders/rename", post(handlers::rename_folder_form))
        .route("/folders/delete", post(handlers::delete_folder_form))
        .route("/folders/trash", post(handlers::trash_folder_form))
        .route(
            "/trash/files/{file_id}/restore",
            post(handlers::restore_file_form),
        )
        .route("/trash/files/{file_id}/delete", post(handlers::purge_file_form))
        .route(
            "/trash/folders/{folder_id}/restore",
            post(handlers::restore_folder_form),
        )
        .route(
            "/trash/folders/{folder_id}/delete",
            post(handlers::purge_folder_form),
        )
        .route("/trash/empty", post(handlers::empty_trash_form));

    let mut router = Router::new().merge(api_routes).merge(form_routes);

    // SECURITY: When enabled, this endpoint MUST be network-restricted
    // to authorized Prometheus scraper IPs only.
    if state.config.server.metrics_enabled {
        let metrics_routes = Router::new().route("/metrics", get(metrics_handler));
        router = router.merge(metrics_routes);
    }

    // Order of execution: TraceLayer -> Auth -> Handler
    router
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
