//! Router construction

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post, put};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::handlers::{self, admin, catalog, download, upload};
use super::AppState;

/// Complete `/api` router with CORS and request tracing
pub fn router(state: Arc<AppState>) -> Router {
    // Chunk PUTs carry one raw chunk; leave headroom over the configured
    // chunk size.
    let body_limit = (state.storage_info.chunk_size as usize).saturating_add(1024 * 1024);

    let api = Router::new()
        .nest("/upload", upload_routes())
        .nest("/download", download_routes())
        .merge(catalog_routes())
        .nest("/admin", admin_routes())
        .route("/health", get(handlers::health));

    Router::new()
        .nest("/api", api)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn upload_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/init", post(upload::init))
        .route("/chunk/:session_id/:index", put(upload::put_chunk))
        .route("/status/:session_id", get(upload::status))
        .route("/resume/:session_id", get(upload::resume))
        .route("/complete/:session_id", post(upload::complete))
        .route("/abort/:session_id", delete(upload::abort))
        .route("/storage-info", get(handlers::storage_info))
        .route("/direct/init", post(upload::direct_init))
        .route("/direct/complete/:session_id", post(upload::direct_complete))
        .route("/direct/abort/:session_id", delete(upload::direct_abort))
}

fn download_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/info/:file_id", get(download::info))
        .route("/:file_id", get(download::download))
}

fn catalog_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/folders", get(catalog::list_folders).post(catalog::create_folder))
        .route("/folders/:folder_id/rename", post(catalog::rename_folder))
        .route("/folders/:folder_id/move", post(catalog::move_folder))
        .route("/folders/:folder_id", delete(catalog::delete_folder))
        .route("/files", get(catalog::list_files))
        .route("/files/:file_id/rename", post(catalog::rename_file))
        .route("/files/:file_id/move", post(catalog::move_file))
        .route("/files/:file_id", delete(catalog::delete_file))
}

fn admin_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/users/:user_id/promote", post(admin::promote))
        .route("/users/:user_id/demote", post(admin::demote))
        .route("/users/:user_id/block", post(admin::block))
        .route("/users/:user_id/restrict", post(admin::restrict))
        .route("/users/:user_id/unblock", post(admin::unblock))
        .route("/files/bulk-delete", post(admin::bulk_delete))
        .route("/files/:file_id/migrate", post(admin::force_migrate))
        .route("/files/:file_id/expiry", put(admin::set_expiry))
}
